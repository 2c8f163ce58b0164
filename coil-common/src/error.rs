//! Error handling for COIL
//!
//! This module defines the error taxonomy shared by the IR container and the
//! binary codec, and the diagnostics context used to collect non-fatal
//! findings while decoding.

use serde::{Deserialize, Serialize};
use std::collections::TryReserveError;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoilError>;

/// Every failure the container, encoder and decoder can report
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoilError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Out of memory: {message}")]
    OutOfMemory { message: String },

    #[error("Unknown type 0x{handle:08X}")]
    UnknownType { handle: u32 },

    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Not a COIL binary: bad magic 0x{found:08X}")]
    BinaryFormatError { found: u32 },

    #[error("Unsupported version {major}.{minor} (supported up to {supported_major}.{supported_minor})")]
    UnsupportedVersion {
        major: u16,
        minor: u16,
        supported_major: u16,
        supported_minor: u16,
    },

    #[error("Corrupt data in {section}: {message}")]
    CorruptData { section: String, message: String },

    #[error("Missing section: {section}")]
    MissingSection { section: String },

    #[error("Unsupported feature flags 0x{flags:08X}")]
    UnsupportedFeature { flags: u32 },

    #[error("IO error: {message}")]
    Io { message: String },
}

/// Discriminant of [`CoilError`], for callers that only care about the kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidArgument,
    OutOfMemory,
    UnknownType,
    BufferTooSmall,
    BinaryFormatError,
    UnsupportedVersion,
    CorruptData,
    MissingSection,
    UnsupportedFeature,
    Io,
}

impl CoilError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoilError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            CoilError::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            CoilError::UnknownType { .. } => ErrorKind::UnknownType,
            CoilError::BufferTooSmall { .. } => ErrorKind::BufferTooSmall,
            CoilError::BinaryFormatError { .. } => ErrorKind::BinaryFormatError,
            CoilError::UnsupportedVersion { .. } => ErrorKind::UnsupportedVersion,
            CoilError::CorruptData { .. } => ErrorKind::CorruptData,
            CoilError::MissingSection { .. } => ErrorKind::MissingSection,
            CoilError::UnsupportedFeature { .. } => ErrorKind::UnsupportedFeature,
            CoilError::Io { .. } => ErrorKind::Io,
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        CoilError::InvalidArgument { message: message.into() }
    }

    /// Create a corrupt data error for the named section
    pub fn corrupt(section: impl Into<String>, message: impl Into<String>) -> Self {
        CoilError::CorruptData {
            section: section.into(),
            message: message.into(),
        }
    }

    /// Create a missing section error
    pub fn missing_section(section: impl Into<String>) -> Self {
        CoilError::MissingSection { section: section.into() }
    }
}

impl From<TryReserveError> for CoilError {
    fn from(err: TryReserveError) -> Self {
        CoilError::OutOfMemory {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for CoilError {
    fn from(err: std::io::Error) -> Self {
        CoilError::Io {
            message: err.to_string(),
        }
    }
}

/// Diagnostic severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// A non-fatal finding, tagged with the section it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub section: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.severity, self.section, self.message)
    }
}

/// Explicit diagnostics context
///
/// Passed by `&mut` into operations that can observe recoverable oddities.
/// Fatal conditions are never recorded here, they are returned as [`CoilError`].
#[derive(Debug, Default)]
pub struct Diagnostics {
    diagnostics: Vec<Diagnostic>,
    warning_count: usize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a warning
    pub fn warning(&mut self, section: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            section: section.to_string(),
            message: message.into(),
        });
        self.warning_count += 1;
    }

    /// Report a note
    pub fn note(&mut self, section: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Note,
            section: section.to_string(),
            message: message.into(),
        });
    }

    pub fn has_warnings(&self) -> bool {
        self.warning_count > 0
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Create a summary string
    pub fn summary(&self) -> String {
        let notes = self.diagnostics.len() - self.warning_count;
        match (self.warning_count, notes) {
            (0, 0) => "No warnings".to_string(),
            (w, 0) => format!("{} warning{}", w, if w == 1 { "" } else { "s" }),
            (0, n) => format!("{} note{}", n, if n == 1 { "" } else { "s" }),
            (w, n) => format!(
                "{} warning{} and {} note{}",
                w,
                if w == 1 { "" } else { "s" },
                n,
                if n == 1 { "" } else { "s" }
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_kind() {
        let err = CoilError::corrupt("string table", "truncated string");
        assert_eq!(err.kind(), ErrorKind::CorruptData);
        assert_eq!(err.to_string(), "Corrupt data in string table: truncated string");

        let err = CoilError::BinaryFormatError { found: 0xDEADBEEF };
        assert_eq!(err.kind(), ErrorKind::BinaryFormatError);
        assert_eq!(err.to_string(), "Not a COIL binary: bad magic 0xDEADBEEF");
    }

    #[test]
    fn test_try_reserve_maps_to_out_of_memory() {
        let mut v: Vec<u64> = Vec::new();
        let err: CoilError = v.try_reserve(usize::MAX).unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
    }

    #[test]
    fn test_diagnostics_summary() {
        let mut diags = Diagnostics::new();
        assert_eq!(diags.summary(), "No warnings");
        assert!(diags.is_empty());

        diags.note("header", "older minor version");
        assert_eq!(diags.summary(), "1 note");
        assert!(!diags.has_warnings());

        diags.warning("header", "unknown flag bits");
        diags.warning("type table", "size mismatch");
        assert_eq!(diags.summary(), "2 warnings and 1 note");
        assert_eq!(diags.warning_count(), 2);
        assert_eq!(
            diags.diagnostics()[1].to_string(),
            "warning [header]: unknown flag bits"
        );
    }
}
