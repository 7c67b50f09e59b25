//! Scene output model: mesh nodes handed back to the host application.

use nalgebra::{UnitQuaternion, Vector3};
use std::path::{Path, PathBuf};

/// Mesh payload carried by a node.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    /// Provenance: the file this mesh was loaded from. Rewritten to the
    /// original source document after conversion, because the temp export
    /// file is deleted before the caller ever sees the node.
    pub file_name: Option<PathBuf>,
    /// Number of triangles, when the loader reports it.
    pub triangle_count: Option<usize>,
}

impl MeshData {
    /// Replace the provenance path.
    pub fn set_file_name(&mut self, path: &Path) {
        self.file_name = Some(path.to_path_buf());
    }
}

/// One node of the resulting scene. Container formats (3MF) can produce a
/// node per component; simple formats produce a single leaf.
#[derive(Debug, Clone)]
pub struct MeshNode {
    /// Display name, usually derived from the document or component title.
    pub name: String,
    /// Mesh payload; containers may carry none of their own.
    pub mesh: Option<MeshData>,
    /// Child nodes for multi-component results.
    pub children: Vec<MeshNode>,
    /// Accumulated orientation.
    pub orientation: UnitQuaternion<f64>,
}

impl MeshNode {
    /// Create a leaf node with an empty mesh payload.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mesh: Some(MeshData::default()),
            children: Vec::new(),
            orientation: UnitQuaternion::identity(),
        }
    }

    /// Compose a rotation onto this node's orientation.
    pub fn rotate(&mut self, rotation: &UnitQuaternion<f64>) {
        self.orientation = rotation * self.orientation;
    }

    /// Set provenance on this node and every descendant that carries mesh
    /// data.
    pub fn set_source_file(&mut self, path: &Path) {
        if let Some(mesh) = self.mesh.as_mut() {
            mesh.set_file_name(path);
        }
        for child in &mut self.children {
            child.set_source_file(path);
        }
    }
}

/// The fixed +90 degree rotation about the X axis applied to meshes coming
/// out of application revisions with the known coordinate-system defect.
pub fn x_axis_correction() -> UnitQuaternion<f64> {
    UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 90f64.to_radians())
}
