use super::mesh::{GeometryError, Mesh};
use nalgebra::{Point3, Vector3};
use std::collections::HashMap;

/// Each level quadruples the face count; level 8 already yields 1.3M faces.
pub const MAX_ICOSPHERE_SUBDIVISIONS: u32 = 8;

const ICOSAHEDRON_FACES: [[usize; 3]; 20] = [
    [0, 11, 5],
    [0, 5, 1],
    [0, 1, 7],
    [0, 7, 10],
    [0, 10, 11],
    [1, 5, 9],
    [5, 11, 4],
    [11, 10, 2],
    [10, 7, 6],
    [7, 1, 8],
    [3, 9, 4],
    [3, 4, 2],
    [3, 2, 6],
    [3, 6, 8],
    [3, 8, 9],
    [4, 9, 5],
    [2, 4, 11],
    [6, 2, 10],
    [8, 6, 7],
    [9, 8, 1],
];

/// Tessellates a sphere of `radius` centred on the origin by recursively splitting the
/// faces of a regular icosahedron and projecting the new midpoints onto the sphere.
///
/// The result has `20 * 4^subdivisions` outward-wound faces and `10 * 4^subdivisions + 2`
/// vertices. The construction is deterministic: vertex order depends only on the inputs.
pub fn create_icosphere(radius: f64, subdivisions: u32) -> Result<Mesh, GeometryError> {
    if !(radius.is_finite() && radius > 0.0) {
        return Err(GeometryError::InvalidParameter(format!(
            "icosphere radius must be positive and finite, got {radius}"
        )));
    }
    if subdivisions > MAX_ICOSPHERE_SUBDIVISIONS {
        return Err(GeometryError::InvalidParameter(format!(
            "icosphere subdivisions must be at most {MAX_ICOSPHERE_SUBDIVISIONS}, got {subdivisions}"
        )));
    }

    let t = (1.0 + 5.0_f64.sqrt()) / 2.0;
    let seed = [
        (-1.0, t, 0.0),
        (1.0, t, 0.0),
        (-1.0, -t, 0.0),
        (1.0, -t, 0.0),
        (0.0, -1.0, t),
        (0.0, 1.0, t),
        (0.0, -1.0, -t),
        (0.0, 1.0, -t),
        (t, 0.0, -1.0),
        (t, 0.0, 1.0),
        (-t, 0.0, -1.0),
        (-t, 0.0, 1.0),
    ];
    let project = |v: Vector3<f64>| Point3::from(v.normalize() * radius);

    let mut vertices: Vec<Point3<f64>> = seed
        .iter()
        .map(|&(x, y, z)| project(Vector3::new(x, y, z)))
        .collect();
    let mut faces = ICOSAHEDRON_FACES.to_vec();

    for _ in 0..subdivisions {
        let mut midpoints: HashMap<(usize, usize), usize> = HashMap::with_capacity(faces.len() * 3 / 2);
        let mut midpoint = |a: usize, b: usize, vertices: &mut Vec<Point3<f64>>| -> usize {
            *midpoints.entry((a.min(b), a.max(b))).or_insert_with(|| {
                let mid = (vertices[a].coords + vertices[b].coords) / 2.0;
                vertices.push(project(mid));
                vertices.len() - 1
            })
        };

        let mut next = Vec::with_capacity(faces.len() * 4);
        for &[a, b, c] in &faces {
            let ab = midpoint(a, b, &mut vertices);
            let bc = midpoint(b, c, &mut vertices);
            let ca = midpoint(c, a, &mut vertices);
            next.push([a, ab, ca]);
            next.push([b, bc, ab]);
            next.push([c, ca, bc]);
            next.push([ab, bc, ca]);
        }
        faces = next;
    }

    Mesh::new(vertices, faces)
}

/// An axis-aligned box split into 12 outward-wound triangles.
pub fn create_box(min: &Point3<f64>, max: &Point3<f64>) -> Result<Mesh, GeometryError> {
    if !(min.x < max.x && min.y < max.y && min.z < max.z) {
        return Err(GeometryError::InvalidParameter(format!(
            "box corners must satisfy min < max on every axis, got {min} and {max}"
        )));
    }
    let vertices = vec![
        Point3::new(min.x, min.y, min.z),
        Point3::new(max.x, min.y, min.z),
        Point3::new(max.x, max.y, min.z),
        Point3::new(min.x, max.y, min.z),
        Point3::new(min.x, min.y, max.z),
        Point3::new(max.x, min.y, max.z),
        Point3::new(max.x, max.y, max.z),
        Point3::new(min.x, max.y, max.z),
    ];
    let faces = vec![
        [0, 2, 1],
        [0, 3, 2],
        [4, 5, 6],
        [4, 6, 7],
        [0, 1, 5],
        [0, 5, 4],
        [3, 7, 6],
        [3, 6, 2],
        [0, 4, 7],
        [0, 7, 3],
        [1, 2, 6],
        [1, 6, 5],
    ];
    Mesh::new(vertices, faces)
}
