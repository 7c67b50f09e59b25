//! Foreign document kinds and open-document state.

use std::path::{Path, PathBuf};

use crate::com::Handle;

/// Kind of a foreign CAD document, dispatched from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    /// A single part.
    Part,
    /// An assembly of parts.
    Assembly,
    /// A drawing container referencing parts/assemblies. Never exported
    /// directly; the pipeline resolves its single referenced document.
    Drawing,
}

impl DocumentKind {
    /// Detect the document kind from a path's extension, case-insensitive.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        Self::from_extension(&ext)
    }

    /// Detect the document kind from a bare extension, case-insensitive.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "sldprt" => Some(DocumentKind::Part),
            "sldasm" => Some(DocumentKind::Assembly),
            "slddrw" => Some(DocumentKind::Drawing),
            _ => None,
        }
    }
}

/// A foreign document that has been opened and activated on a live
/// application instance.
#[derive(Debug)]
pub struct OpenedDocument {
    /// Handle to the remote model object.
    pub handle: Handle,
    /// Path of the document actually opened (for drawings this is the
    /// resolved referenced part/assembly, not the drawing itself).
    pub path: PathBuf,
    /// Kind of the opened document.
    pub kind: DocumentKind,
    /// Title used to address the document in close/activate calls.
    pub title: String,
    /// Title of the document that was frontmost before this one displaced
    /// it, to be re-activated on close.
    pub displaced_title: Option<String>,
}
