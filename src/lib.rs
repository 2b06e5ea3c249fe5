//! # encmap - Mapping Compiler and Streaming Conversion Engine
//!
//! Compiles human-written mapping rules into a compact binary table and
//! executes that table to convert text between legacy byte encodings and
//! Unicode, in either direction, one buffer at a time.
//!
//! ## Features
//!
//! - **Rule compiler** with line-numbered diagnostics and reproducible output
//! - **Streaming converter** that keeps partial matches between calls
//! - **Longest-match rewriting** with left and right context
//! - **Multiple passes** (byte reordering, mapping, Unicode cleanup, NFC/NFD)
//! - **Metadata queries** straight from a compiled table blob
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use encmap::{compile, CompileOptions, Converter, EncodingForm, MappingTable};
//!
//! let rules = r#"
//!     LHSName "Legacy-Greek"
//!     RHSName "UNICODE"
//!     PassThrough 0x00..0x7F
//!     0x41 <> U+0391
//! "#;
//!
//! let blob = compile(rules, &CompileOptions::default(), |_| {}).unwrap();
//! let table = Arc::new(MappingTable::from_bytes(blob).unwrap());
//! let mut converter =
//!     Converter::new(table, true, EncodingForm::BYTES, EncodingForm::UTF8).unwrap();
//!
//! let output = converter.convert_all(b"AB").unwrap();
//! assert_eq!(std::str::from_utf8(&output).unwrap(), "\u{391}B");
//! ```

#![deny(missing_docs)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod compiler;
pub mod engine;
pub mod form;
pub mod table;

pub use compiler::{CompileOptions, Diagnostic, Severity, compile, compiler_version};
pub use engine::{Converter, Phase, Progress, SharedConverter, engine_version};
pub use form::{BaseForm, EncodingForm, NormalForm, SideFlags};
pub use table::{
    MappingTable, NameId, TableInfo, Version, copy_mapping_name, mapping_flags, mapping_name,
};

/// Result type for compiler, table and engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Status codes shared by the compiler and the engine.
///
/// Informational codes are `>= 0`, errors are `< 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum Status {
    /// Fully succeeded with no caveats
    NoError = 0,
    /// The output buffer filled before all input was consumed
    OutputBufferFull = 1,
    /// All input was consumed and more may follow
    NeedMoreInput = 2,
    /// Encoding forms are incompatible with the mapping
    InvalidForm = -1,
    /// Another call is in progress on the same converter
    ConverterBusy = -2,
    /// The converter was disposed or is unusable
    InvalidConverter = -3,
    /// The mapping table is corrupt
    InvalidMapping = -4,
    /// The mapping table uses an unsupported format version
    BadMappingVersion = -5,
    /// Internal engine fault
    Exception = -6,
    /// No name record for the requested id
    NameNotFound = -7,
    /// Truncated or malformed character sequence
    IncompleteChar = -8,
    /// The compiler rejected the rule source
    CompilationFailed = -9,
    /// An allocation failed
    OutOfMemory = -10,
}

impl Status {
    /// Numeric status code
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Look up a status by its numeric code
    pub fn from_code(code: i32) -> Option<Self> {
        let status = match code {
            0 => Status::NoError,
            1 => Status::OutputBufferFull,
            2 => Status::NeedMoreInput,
            -1 => Status::InvalidForm,
            -2 => Status::ConverterBusy,
            -3 => Status::InvalidConverter,
            -4 => Status::InvalidMapping,
            -5 => Status::BadMappingVersion,
            -6 => Status::Exception,
            -7 => Status::NameNotFound,
            -8 => Status::IncompleteChar,
            -9 => Status::CompilationFailed,
            -10 => Status::OutOfMemory,
            _ => return None,
        };
        Some(status)
    }

    /// True for the hard error codes
    pub fn is_error(self) -> bool {
        self.code() < 0
    }
}

/// Errors that can occur while compiling, loading or converting
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Encoding forms are incompatible with the mapping
    #[error("invalid encoding form: {0}")]
    InvalidForm(String),

    /// Another call is in progress on the same converter
    #[error("converter is busy with another call")]
    ConverterBusy,

    /// The converter was disposed or is unusable
    #[error("converter has been disposed or is no longer usable")]
    InvalidConverter,

    /// The mapping table is corrupt
    #[error("invalid mapping table: {0}")]
    InvalidMapping(String),

    /// The mapping table uses a format version this engine does not read
    #[error("unsupported mapping format version {found} (engine reads {supported})")]
    BadMappingVersion {
        /// Version stamped in the table
        found: Version,
        /// Version implemented by this engine
        supported: Version,
    },

    /// Internal invariant failure
    #[error("internal engine fault: {0}")]
    Exception(String),

    /// No name record for the requested id
    #[error("no name record for {0}")]
    NameNotFound(NameId),

    /// Truncated or malformed character sequence
    #[error(
        "incomplete or malformed character at input offset {input_read} \
         ({output_used} output bytes written)"
    )]
    IncompleteChar {
        /// Bytes of this call's input taken before the failure
        input_read: usize,
        /// Bytes of this call's input whose translation is settled
        input_used: usize,
        /// Bytes written to the output buffer before the failure
        output_used: usize,
    },

    /// The compiler rejected the rule source
    #[error("compilation failed with {errors} error(s)")]
    CompilationFailed {
        /// Number of error diagnostics reported
        errors: usize,
    },

    /// An allocation failed
    #[error("out of memory")]
    OutOfMemory,
}

impl Error {
    /// Status code corresponding to this error
    pub fn status(&self) -> Status {
        match self {
            Error::InvalidForm(_) => Status::InvalidForm,
            Error::ConverterBusy => Status::ConverterBusy,
            Error::InvalidConverter => Status::InvalidConverter,
            Error::InvalidMapping(_) => Status::InvalidMapping,
            Error::BadMappingVersion { .. } => Status::BadMappingVersion,
            Error::Exception(_) => Status::Exception,
            Error::NameNotFound(_) => Status::NameNotFound,
            Error::IncompleteChar { .. } => Status::IncompleteChar,
            Error::CompilationFailed { .. } => Status::CompilationFailed,
            Error::OutOfMemory => Status::OutOfMemory,
        }
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Self {
        Error::OutOfMemory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_stable() {
        assert_eq!(Status::NoError.code(), 0);
        assert_eq!(Status::OutputBufferFull.code(), 1);
        assert_eq!(Status::NeedMoreInput.code(), 2);
        assert_eq!(Status::InvalidForm.code(), -1);
        assert_eq!(Status::IncompleteChar.code(), -8);
        assert_eq!(Status::OutOfMemory.code(), -10);

        for code in -10..=2 {
            let status = Status::from_code(code).unwrap();
            assert_eq!(status.code(), code);
            assert_eq!(status.is_error(), code < 0);
        }
        assert_eq!(Status::from_code(3), None);
        assert_eq!(Status::from_code(-11), None);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(Error::ConverterBusy.status(), Status::ConverterBusy);
        assert_eq!(
            Error::NameNotFound(NameId::COPYRIGHT).status(),
            Status::NameNotFound
        );
        assert_eq!(
            Error::CompilationFailed { errors: 2 }.status(),
            Status::CompilationFailed
        );
        let err = Error::BadMappingVersion {
            found: Version::new(2, 0),
            supported: Version::new(1, 0),
        };
        assert_eq!(err.status(), Status::BadMappingVersion);
        assert!(err.to_string().contains("2.0"));
    }

    #[test]
    fn test_try_reserve_maps_to_out_of_memory() {
        let mut v: Vec<u8> = Vec::new();
        let err = v.try_reserve(usize::MAX).unwrap_err();
        assert_eq!(Error::from(err), Error::OutOfMemory);
    }
}
