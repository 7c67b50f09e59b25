//! Intermediate export formats and the format priority resolver.
//!
//! The resolver decides, per connected application revision and per
//! installed downstream handler, which intermediate formats to try and in
//! what order. First success wins; formats with no available handler are
//! omitted entirely.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

use crate::models::MeshNode;

/// Intermediate formats the engine can ask the CAD application to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntermediateFormat {
    /// 3MF: a multi-object container that preserves per-component
    /// structure. Preferred when the application revision produces
    /// correct output for it.
    ThreeMf,
    /// STL: a simple triangle soup, universally supported.
    Stl,
}

impl IntermediateFormat {
    /// File extension, lowercase.
    pub fn extension(&self) -> &'static str {
        match self {
            IntermediateFormat::ThreeMf => "3mf",
            IntermediateFormat::Stl => "stl",
        }
    }

    /// Whether this format can carry more than one object per file.
    pub fn is_container(&self) -> bool {
        matches!(self, IntermediateFormat::ThreeMf)
    }
}

impl fmt::Display for IntermediateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Error from a downstream mesh loader.
#[derive(Debug, Error)]
#[error("mesh load failed: {reason}")]
pub struct LoadError {
    /// Description of the failure.
    pub reason: String,
}

impl LoadError {
    /// Create a load error from any displayable reason.
    pub fn new(reason: impl fmt::Display) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

/// Downstream mesh-format handler: parses an intermediate export file into
/// scene nodes. Implemented by the host's mesh-loading subsystem.
pub trait MeshLoader: Send + Sync {
    /// Whether this loader handles the given format.
    fn can_handle(&self, format: IntermediateFormat) -> bool;

    /// Parse the file into one or more scene nodes.
    fn load(&self, path: &Path) -> Result<Vec<MeshNode>, LoadError>;
}

/// Compute the ordered list of intermediate formats to try.
///
/// The container format goes first, but only when its handler is available
/// and the application revision is at or above `container_min_revision`
/// (older revisions are known to emit broken container files). STL follows
/// whenever its handler is available. An empty result means the revision is
/// unusable and must not be attempted.
pub fn preferred_formats(
    revision_major: u32,
    container_min_revision: u32,
    loaders: &[&dyn MeshLoader],
) -> Vec<IntermediateFormat> {
    [IntermediateFormat::ThreeMf, IntermediateFormat::Stl]
        .into_iter()
        .filter(|format| !(format.is_container() && revision_major < container_min_revision))
        .filter(|format| loaders.iter().any(|loader| loader.can_handle(*format)))
        .collect()
}

/// Whether any loader handles any intermediate format at all. When false,
/// conversion short-circuits before touching any application.
pub fn any_handler_available(loaders: &[&dyn MeshLoader]) -> bool {
    loaders.iter().any(|loader| {
        loader.can_handle(IntermediateFormat::ThreeMf)
            || loader.can_handle(IntermediateFormat::Stl)
    })
}


#[cfg(test)]
mod tests {
    use super::stub::StubLoader;
    use super::*;

    #[test]
    fn test_both_handlers_recent_revision() {
        let three_mf = StubLoader::new(IntermediateFormat::ThreeMf);
        let stl = StubLoader::new(IntermediateFormat::Stl);
        let loaders: Vec<&dyn MeshLoader> = vec![&three_mf, &stl];

        let formats = preferred_formats(25, 25, &loaders);
        assert_eq!(
            formats,
            vec![IntermediateFormat::ThreeMf, IntermediateFormat::Stl]
        );
    }

    #[test]
    fn test_container_skipped_below_revision_threshold() {
        let three_mf = StubLoader::new(IntermediateFormat::ThreeMf);
        let stl = StubLoader::new(IntermediateFormat::Stl);
        let loaders: Vec<&dyn MeshLoader> = vec![&three_mf, &stl];

        let formats = preferred_formats(24, 25, &loaders);
        assert_eq!(formats, vec![IntermediateFormat::Stl]);
    }

    #[test]
    fn test_unavailable_handler_omitted_entirely() {
        let three_mf = StubLoader::new(IntermediateFormat::ThreeMf);
        let loaders: Vec<&dyn MeshLoader> = vec![&three_mf];

        let formats = preferred_formats(26, 25, &loaders);
        assert_eq!(formats, vec![IntermediateFormat::ThreeMf]);

        let none: Vec<&dyn MeshLoader> = Vec::new();
        assert!(preferred_formats(26, 25, &none).is_empty());
        assert!(!any_handler_available(&none));
    }

    #[test]
    fn test_container_only_loader_old_revision_yields_empty() {
        let three_mf = StubLoader::new(IntermediateFormat::ThreeMf);
        let loaders: Vec<&dyn MeshLoader> = vec![&three_mf];

        // Handler exists, but the revision cannot use it and there is no
        // STL fallback: the revision is unusable.
        assert!(preferred_formats(20, 25, &loaders).is_empty());
        assert!(any_handler_available(&loaders));
    }
}
