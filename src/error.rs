//! Unified error type for the conversion engine.
//!
//! The taxonomy distinguishes environment errors (nothing installed),
//! per-candidate transient failures (absorbed by the pipeline), document
//! content errors (fatal for that file) and total exhaustion of all
//! application/format candidates.

use std::path::PathBuf;
use thiserror::Error;

use crate::com::AutomationError;

/// Unified error type for all conversion operations.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// No operational CAD installation was found on this machine.
    #[error("No operational CAD application installation found")]
    NoInstallation,

    /// No downstream mesh-format handler is available, so no intermediate
    /// format could ever be loaded.
    #[error("No mesh format handler available for any intermediate format")]
    NoFormatHandlers,

    /// The source file extension is not supported by any registered
    /// application.
    #[error("Unsupported file extension: {path}")]
    UnsupportedExtension {
        /// The offending source path.
        path: PathBuf,
    },

    /// The user cancelled in the settings dialog before conversion started.
    #[error("Conversion cancelled by the user")]
    Cancelled,

    /// Starting or attaching to an automation service failed.
    #[error("Failed to start automation session '{service}': {reason}")]
    SessionStart {
        /// The automation service name that was tried.
        service: String,
        /// Description of the failure.
        reason: String,
    },

    /// The foreign document could not be opened.
    #[error("Failed to open document {path}: {reason}")]
    DocumentOpen {
        /// The document that failed to open.
        path: PathBuf,
        /// Description of the failure.
        reason: String,
    },

    /// A drawing container did not reference exactly one part/assembly.
    /// This is fatal for the file and reported to the user.
    #[error("Drawing {path} references {count} documents, expected exactly 1")]
    DrawingReferences {
        /// The drawing file.
        path: PathBuf,
        /// How many part/assembly references were found.
        count: usize,
    },

    /// Export into an intermediate format failed.
    #[error("Export to {format} failed: {reason}")]
    ExportFailed {
        /// The intermediate format identifier.
        format: String,
        /// Description of the failure.
        reason: String,
    },

    /// The export call returned but the temporary file never appeared.
    #[error("Temporary export file not found on disk: {path}")]
    TempFileMissing {
        /// The expected temporary file path.
        path: PathBuf,
    },

    /// The downstream mesh loader rejected the exported file.
    #[error("Mesh loader failed for {format} file: {reason}")]
    LoadFailed {
        /// The intermediate format identifier.
        format: String,
        /// Description of the failure.
        reason: String,
    },

    /// Every application version and format candidate was tried and failed.
    #[error("All conversion candidates exhausted for {path}")]
    Exhausted {
        /// The source file that could not be converted.
        path: PathBuf,
    },

    /// An automation transport error escaped a stage boundary.
    #[error("Automation error: {0}")]
    Automation(#[from] AutomationError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConversionError {
    /// Whether this error is fatal for the whole `convert()` call, as
    /// opposed to a per-candidate failure the pipeline may absorb.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConversionError::NoInstallation
                | ConversionError::NoFormatHandlers
                | ConversionError::UnsupportedExtension { .. }
                | ConversionError::Cancelled
                | ConversionError::DrawingReferences { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ConversionError::NoInstallation.is_fatal());
        assert!(
            ConversionError::DrawingReferences {
                path: PathBuf::from("a.slddrw"),
                count: 3,
            }
            .is_fatal()
        );
        assert!(
            !ConversionError::SessionStart {
                service: "SldWorks.Application.24".to_string(),
                reason: "refused".to_string(),
            }
            .is_fatal()
        );
        assert!(
            !ConversionError::TempFileMissing {
                path: PathBuf::from("/tmp/x.stl"),
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_display_includes_context() {
        let err = ConversionError::DrawingReferences {
            path: PathBuf::from("plate.slddrw"),
            count: 0,
        };
        let msg = err.to_string();
        assert!(msg.contains("plate.slddrw"));
        assert!(msg.contains('0'));
    }
}
