use crate::core::geometry::mesh::{GeometryError, Mesh};
use nalgebra::Point3;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Serialized form of a triangulated mesh with 0-based face indices.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MeshFile {
    pub vertices: Vec<[f64; 3]>,
    pub faces: Vec<[usize; 3]>,
}

#[derive(Debug, Error)]
pub enum MeshLoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Mesh in '{path}' is invalid: {source}")]
    Geometry {
        path: String,
        source: GeometryError,
    },
}

impl MeshFile {
    pub fn into_mesh(self) -> Result<Mesh, GeometryError> {
        let vertices = self
            .vertices
            .into_iter()
            .map(|[x, y, z]| Point3::new(x, y, z))
            .collect();
        let mut mesh = Mesh::new(vertices, self.faces)?;
        mesh.validate_closed_manifold()?;
        if mesh.orient_outward() {
            debug!("Reversed face winding of loaded mesh to point outward.");
        }
        Ok(mesh)
    }
}

/// Loads a closed mesh from a TOML file with `vertices` and `faces` arrays.
pub fn load_mesh(path: &Path) -> Result<Mesh, MeshLoadError> {
    let path_str = || path.to_string_lossy().to_string();
    let content = std::fs::read_to_string(path).map_err(|e| MeshLoadError::Io {
        path: path_str(),
        source: e,
    })?;
    let file: MeshFile = toml::from_str(&content).map_err(|e| MeshLoadError::Toml {
        path: path_str(),
        source: e,
    })?;
    file.into_mesh().map_err(|e| MeshLoadError::Geometry {
        path: path_str(),
        source: e,
    })
}
