// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the wire crate.

use miette::Diagnostic;

/// Protocol violations observed while decoding a frame.
///
/// Every variant maps to "drop the connection and count a protocol error"
/// on the serving side; none of them are fatal to the endpoint.
#[derive(thiserror::Error, Debug, Diagnostic, PartialEq, Eq)]
pub enum Error {
    /// The header announced a protocol version this build does not speak.
    #[error("Unsupported wire version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version found in the header.
        found: u16,
        /// The version this build implements.
        expected: u16,
    },

    /// The header carried an unknown message type.
    #[error("Unknown message type {found}")]
    UnknownMsgType {
        /// The raw type byte.
        found: u8,
    },

    /// `payload_len` does not match the expected size for the type.
    #[error("Payload length mismatch for {msg_type:?}: expected {expected}, got {found}")]
    PayloadLenMismatch {
        /// The message type being decoded.
        msg_type: crate::frame::MsgType,
        /// The exact size the type requires.
        expected: u32,
        /// The size announced by the header.
        found: u32,
    },

    /// `payload_len` exceeds the global bound, regardless of type.
    #[error("Payload length {found} exceeds the {max}-byte bound")]
    PayloadTooLarge {
        /// The size announced by the header.
        found: u32,
        /// The global payload bound.
        max: u32,
    },

    /// Fewer bytes were available than the codec needed.
    #[error("Truncated frame: needed {needed} bytes, got {found}")]
    Truncated {
        /// Bytes the codec required.
        needed: usize,
        /// Bytes actually available.
        found: usize,
    },

    /// A payload field held a value outside its domain.
    #[error("Invalid field `{field}`: {details}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        details: String,
    },
}
