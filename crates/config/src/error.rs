// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the config crate.

use miette::Diagnostic;

/// Errors that can occur while loading or validating a configuration file.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// A collection of errors that occurred while validating the configuration.
    #[error("Invalid configuration: {errors:?}")]
    #[diagnostic(code(posim::config::invalid_configuration))]
    InvalidConfiguration {
        /// Every violation found during the validation pass.
        #[related]
        errors: Vec<Error>,
    },

    /// The configuration file could not be read.
    #[error("Cannot read config file `{path}`: {details}")]
    #[diagnostic(code(posim::config::file_read_error))]
    FileReadError {
        /// Path of the file that could not be read.
        path: String,
        /// Underlying I/O error description.
        details: String,
    },

    /// The configuration file could not be parsed.
    #[error("Config deserialization error: {details}")]
    #[diagnostic(code(posim::config::deserialization_error))]
    DeserializationError {
        /// Parser error description, including the offending key when known.
        details: String,
    },

    /// A key holds a value outside its permitted range.
    #[error("[{section}] {key}: {details}")]
    #[diagnostic(code(posim::config::value_out_of_range))]
    ValueOutOfRange {
        /// Section the key belongs to.
        section: &'static str,
        /// The offending key.
        key: &'static str,
        /// Why the value was rejected.
        details: String,
    },
}
