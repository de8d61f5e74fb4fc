use super::ids::SurfaceClassId;
use crate::core::geometry::mesh::Mesh;

/// A named mesh bounding a compartment, with at most one active surface class.
#[derive(Debug, Clone)]
pub struct GeometryObject {
    pub name: String,
    pub mesh: Mesh,
    pub surface_class: Option<SurfaceClassId>,
}

impl GeometryObject {
    pub fn new(name: impl Into<String>, mesh: Mesh) -> Self {
        Self {
            name: name.into(),
            mesh,
            surface_class: None,
        }
    }
}
