use super::grid::UniformGrid;
use super::intersect::{Aabb, closest_point_on_triangle, ray_triangle, segment_triangle};
use nalgebra::{Point3, Vector3};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

/// Ray directions used when the axis-aligned containment ray grazes an edge.
const SKEWED_RAY_DIRECTIONS: [[f64; 3]; 3] = [
    [0.813_4, 0.371_7, 0.447_3],
    [-0.267_1, 0.910_5, 0.315_6],
    [0.184_7, -0.428_1, 0.884_6],
];

/// Cells of the face grid span this many mean edge lengths.
const FACE_GRID_EDGE_MULTIPLE: f64 = 2.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Mesh has no faces")]
    Empty,
    #[error("Vertex {vertex} has a non-finite coordinate")]
    NonFiniteVertex { vertex: usize },
    #[error("Face {face} references vertex {index}, but the mesh has {vertex_count} vertices")]
    FaceIndexOutOfRange {
        face: usize,
        index: usize,
        vertex_count: usize,
    },
    #[error("Face {face} repeats a vertex index")]
    DegenerateFace { face: usize },
    #[error("Edge ({a}, {b}) is shared by {count} face(s); a closed manifold requires exactly 2")]
    NonManifoldEdge { a: usize, b: usize, count: usize },
    #[error("Edge ({a}, {b}) is traversed in the same direction by two faces")]
    InconsistentWinding { a: usize, b: usize },
    #[error("Vertex index {index} is out of range for a mesh with {vertex_count} vertices")]
    VertexOutOfRange { index: usize, vertex_count: usize },
    #[error("Displacement for vertex {index} is not finite")]
    NonFiniteDisplacement { index: usize },
    #[error("Invalid primitive parameter: {0}")]
    InvalidParameter(String),
}

/// The first face crossed by a segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceHit {
    pub face: usize,
    /// Fraction of the segment travelled before the crossing, in `(0, 1]`.
    pub t: f64,
    pub point: Point3<f64>,
}

/// A triangulated surface with a buffered, atomically committed vertex-move queue.
///
/// Face normals, bounds and the face lookup grid are derived data, rebuilt whenever
/// vertex positions change. Topology (the face list) never changes after construction.
#[derive(Debug, Clone)]
pub struct Mesh {
    vertices: Vec<Point3<f64>>,
    faces: Vec<[usize; 3]>,
    pending_moves: BTreeMap<usize, Vector3<f64>>,
    normals: Vec<Vector3<f64>>,
    face_bounds: Vec<Aabb>,
    bounds: Aabb,
    face_grid: UniformGrid,
}

impl Mesh {
    /// Builds a mesh, checking that every face references existing, distinct vertices.
    ///
    /// Closure is not required here; see [`Mesh::validate_closed_manifold`].
    pub fn new(vertices: Vec<Point3<f64>>, faces: Vec<[usize; 3]>) -> Result<Self, GeometryError> {
        if faces.is_empty() {
            return Err(GeometryError::Empty);
        }
        if let Some(vertex) = vertices
            .iter()
            .position(|v| !(v.x.is_finite() && v.y.is_finite() && v.z.is_finite()))
        {
            return Err(GeometryError::NonFiniteVertex { vertex });
        }
        for (face, indices) in faces.iter().enumerate() {
            if let Some(&index) = indices.iter().find(|&&i| i >= vertices.len()) {
                return Err(GeometryError::FaceIndexOutOfRange {
                    face,
                    index,
                    vertex_count: vertices.len(),
                });
            }
            let [a, b, c] = *indices;
            if a == b || b == c || a == c {
                return Err(GeometryError::DegenerateFace { face });
            }
        }

        let mut mesh = Self {
            vertices,
            faces,
            pending_moves: BTreeMap::new(),
            normals: Vec::new(),
            face_bounds: Vec::new(),
            bounds: Aabb::empty(),
            face_grid: UniformGrid::new(1.0),
        };
        mesh.refresh();
        Ok(mesh)
    }

    pub fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    pub fn vertex(&self, index: usize) -> Option<&Point3<f64>> {
        self.vertices.get(index)
    }

    pub fn faces(&self) -> &[[usize; 3]] {
        &self.faces
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    pub fn face_points(&self, face: usize) -> [&Point3<f64>; 3] {
        let [a, b, c] = self.faces[face];
        [&self.vertices[a], &self.vertices[b], &self.vertices[c]]
    }

    /// Unit normal of `face`, pointing outward for an outward-wound mesh.
    pub fn face_normal(&self, face: usize) -> &Vector3<f64> {
        &self.normals[face]
    }

    /// Number of distinct undirected edges.
    pub fn edge_count(&self) -> usize {
        self.faces
            .iter()
            .flat_map(|&[a, b, c]| [(a, b), (b, c), (c, a)])
            .map(|(a, b)| (a.min(b), a.max(b)))
            .collect::<HashSet<_>>()
            .len()
    }

    /// `V - E + F`; 2 for a closed surface of genus zero.
    pub fn euler_characteristic(&self) -> i64 {
        self.vertices.len() as i64 - self.edge_count() as i64 + self.faces.len() as i64
    }

    /// Checks that every edge is shared by exactly two faces that traverse it in
    /// opposite directions.
    pub fn validate_closed_manifold(&self) -> Result<(), GeometryError> {
        let mut directed: HashSet<(usize, usize)> = HashSet::with_capacity(self.faces.len() * 3);
        let mut undirected: HashMap<(usize, usize), usize> = HashMap::with_capacity(self.faces.len() * 3 / 2);

        for &[a, b, c] in &self.faces {
            for (from, to) in [(a, b), (b, c), (c, a)] {
                if !directed.insert((from, to)) {
                    return Err(GeometryError::InconsistentWinding { a: from, b: to });
                }
                *undirected.entry((from.min(to), from.max(to))).or_insert(0) += 1;
            }
        }

        for &[a, b, c] in &self.faces {
            for (from, to) in [(a, b), (b, c), (c, a)] {
                let key = (from.min(to), from.max(to));
                let count = undirected.get(&key).copied().unwrap_or(0);
                if count != 2 {
                    return Err(GeometryError::NonManifoldEdge {
                        a: key.0,
                        b: key.1,
                        count,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn is_closed_manifold(&self) -> bool {
        self.validate_closed_manifold().is_ok()
    }

    /// Signed enclosed volume by the divergence theorem; positive for outward winding.
    pub fn signed_volume(&self) -> f64 {
        self.faces
            .iter()
            .map(|&[a, b, c]| {
                let (a, b, c) = (&self.vertices[a].coords, &self.vertices[b].coords, &self.vertices[c].coords);
                a.dot(&b.cross(c))
            })
            .sum::<f64>()
            / 6.0
    }

    pub fn volume(&self) -> f64 {
        self.signed_volume().abs()
    }

    pub fn surface_area(&self) -> f64 {
        (0..self.faces.len())
            .map(|f| {
                let [a, b, c] = self.face_points(f);
                (b - a).cross(&(c - a)).norm() / 2.0
            })
            .sum()
    }

    /// Mean of the vertex positions.
    pub fn centroid(&self) -> Point3<f64> {
        let sum = self
            .vertices
            .iter()
            .fold(Vector3::zeros(), |acc, v| acc + v.coords);
        Point3::from(sum / self.vertices.len().max(1) as f64)
    }

    /// Reverses every face if the mesh encloses negative signed volume.
    ///
    /// Returns whether the winding was flipped.
    pub fn orient_outward(&mut self) -> bool {
        if self.signed_volume() >= 0.0 {
            return false;
        }
        for face in &mut self.faces {
            face.swap(1, 2);
        }
        self.refresh();
        true
    }

    pub fn translate(&mut self, offset: &Vector3<f64>) {
        for v in &mut self.vertices {
            *v += *offset;
        }
        self.refresh();
    }

    /// Parity test along +x; falls back to a vote of skewed rays when the ray grazes an edge.
    pub fn contains_point(&self, p: &Point3<f64>) -> bool {
        if !self.bounds.contains(p) {
            return false;
        }
        let dir = Vector3::x();
        let mut crossings = 0usize;
        for face in self.face_grid.query_row_x(p, self.bounds.max.x) {
            let fb = &self.face_bounds[face];
            if fb.max.x < p.x || p.y < fb.min.y || p.y > fb.max.y || p.z < fb.min.z || p.z > fb.max.z {
                continue;
            }
            let [a, b, c] = self.face_points(face);
            if let Some(hit) = ray_triangle(p, &dir, a, b, c) {
                if hit.t <= 0.0 {
                    continue;
                }
                if hit.is_grazing() {
                    return self.contains_point_by_vote(p);
                }
                crossings += 1;
            }
        }
        crossings % 2 == 1
    }

    fn contains_point_by_vote(&self, p: &Point3<f64>) -> bool {
        let inside_votes = SKEWED_RAY_DIRECTIONS
            .iter()
            .filter(|d| {
                let dir = Vector3::new(d[0], d[1], d[2]).normalize();
                let crossings = (0..self.faces.len())
                    .filter(|&f| {
                        let [a, b, c] = self.face_points(f);
                        ray_triangle(p, &dir, a, b, c).is_some_and(|hit| hit.t > 0.0)
                    })
                    .count();
                crossings % 2 == 1
            })
            .count();
        inside_votes * 2 > SKEWED_RAY_DIRECTIONS.len()
    }

    /// Earliest crossing of the segment `start -> end` with any face other than `skip_face`.
    pub fn first_crossing(
        &self,
        start: &Point3<f64>,
        end: &Point3<f64>,
        skip_face: Option<usize>,
    ) -> Option<SurfaceHit> {
        let segment_bounds = Aabb::from_segment(start, end);
        if !self.bounds.intersects(&segment_bounds) {
            return None;
        }
        let mut best: Option<(usize, f64)> = None;
        for face in self.face_grid.query_box(&segment_bounds) {
            if Some(face) == skip_face || !self.face_bounds[face].intersects(&segment_bounds) {
                continue;
            }
            let [a, b, c] = self.face_points(face);
            if let Some(t) = segment_triangle(start, end, a, b, c) {
                if best.is_none_or(|(_, best_t)| t < best_t) {
                    best = Some((face, t));
                }
            }
        }
        best.map(|(face, t)| SurfaceHit {
            face,
            t,
            point: start + (end - start) * t,
        })
    }

    /// Closest point on the surface to `p`, searching faces within `search_radius` first.
    pub fn closest_surface_point(&self, p: &Point3<f64>, search_radius: f64) -> (usize, Point3<f64>) {
        let nearby = self
            .face_grid
            .query_box(&Aabb::from_segment(p, p).expanded(search_radius));
        let candidates: Box<dyn Iterator<Item = usize>> = if nearby.is_empty() {
            Box::new(0..self.faces.len())
        } else {
            Box::new(nearby.into_iter())
        };

        let mut best = (0, self.vertices[self.faces[0][0]], f64::INFINITY);
        for face in candidates {
            let [a, b, c] = self.face_points(face);
            let q = closest_point_on_triangle(p, a, b, c);
            let d = (q - p).norm_squared();
            if d < best.2 {
                best = (face, q, d);
            }
        }
        (best.0, best.1)
    }

    /// Whether any face's bounds come within `margin` of `p`.
    pub fn is_near_surface(&self, p: &Point3<f64>, margin: f64) -> bool {
        let query = Aabb::from_segment(p, p).expanded(margin);
        if !self.bounds.intersects(&query) {
            return false;
        }
        self.face_grid
            .query_box(&query)
            .into_iter()
            .any(|face| self.face_bounds[face].intersects(&query))
    }

    /// Records a displacement for `index`; repeated moves of one vertex accumulate.
    pub fn buffer_vertex_move(
        &mut self,
        index: usize,
        displacement: Vector3<f64>,
    ) -> Result<(), GeometryError> {
        if index >= self.vertices.len() {
            return Err(GeometryError::VertexOutOfRange {
                index,
                vertex_count: self.vertices.len(),
            });
        }
        if !(displacement.x.is_finite() && displacement.y.is_finite() && displacement.z.is_finite()) {
            return Err(GeometryError::NonFiniteDisplacement { index });
        }
        *self.pending_moves.entry(index).or_insert_with(Vector3::zeros) += displacement;
        Ok(())
    }

    pub fn has_pending_moves(&self) -> bool {
        !self.pending_moves.is_empty()
    }

    pub fn pending_move_count(&self) -> usize {
        self.pending_moves.len()
    }

    /// Commits every buffered displacement at once and clears the buffer.
    ///
    /// Returns the largest single vertex displacement that was applied.
    pub fn apply_vertex_moves(&mut self) -> f64 {
        if self.pending_moves.is_empty() {
            return 0.0;
        }
        let mut max_displacement: f64 = 0.0;
        for (index, displacement) in std::mem::take(&mut self.pending_moves) {
            self.vertices[index] += displacement;
            max_displacement = max_displacement.max(displacement.norm());
        }
        self.refresh();
        max_displacement
    }

    fn refresh(&mut self) {
        self.normals = (0..self.faces.len())
            .map(|f| {
                let [a, b, c] = self.face_points(f);
                (b - a).cross(&(c - a)).try_normalize(0.0).unwrap_or_else(Vector3::zeros)
            })
            .collect();
        self.face_bounds = (0..self.faces.len())
            .map(|f| Aabb::from_points(self.face_points(f)))
            .collect();
        self.bounds = Aabb::from_points(&self.vertices);

        let total_edge: f64 = (0..self.faces.len())
            .map(|f| {
                let [a, b, c] = self.face_points(f);
                (b - a).norm() + (c - b).norm() + (a - c).norm()
            })
            .sum();
        let mean_edge = total_edge / (3 * self.faces.len()).max(1) as f64;
        let mut grid = UniformGrid::new(mean_edge * FACE_GRID_EDGE_MULTIPLE);
        for (face, fb) in self.face_bounds.iter().enumerate() {
            grid.insert_box(face, fb);
        }
        self.face_grid = grid;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::geometry::primitives::create_box;

    pub(crate) fn unit_cube() -> Mesh {
        create_box(&Point3::new(0.0, 0.0, 0.0), &Point3::new(1.0, 1.0, 1.0)).unwrap()
    }

    #[test]
    fn new_rejects_out_of_range_face_index() {
        let result = Mesh::new(
            vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)],
            vec![[0, 1, 3]],
        );
        assert_eq!(
            result.unwrap_err(),
            GeometryError::FaceIndexOutOfRange {
                face: 0,
                index: 3,
                vertex_count: 3
            }
        );
    }

    #[test]
    fn new_rejects_degenerate_face() {
        let result = Mesh::new(
            vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)],
            vec![[0, 1, 1]],
        );
        assert_eq!(result.unwrap_err(), GeometryError::DegenerateFace { face: 0 });
    }

    #[test]
    fn open_mesh_fails_manifold_validation() {
        let mesh = Mesh::new(
            vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)],
            vec![[0, 1, 2]],
        )
        .unwrap();
        assert!(matches!(
            mesh.validate_closed_manifold(),
            Err(GeometryError::NonManifoldEdge { count: 1, .. })
        ));
    }

    #[test]
    fn cube_is_a_closed_manifold_with_unit_volume() {
        let cube = unit_cube();
        cube.validate_closed_manifold().unwrap();
        assert_eq!(cube.euler_characteristic(), 2);
        assert!((cube.signed_volume() - 1.0).abs() < 1e-12);
        assert!((cube.surface_area() - 6.0).abs() < 1e-12);
    }

    #[test]
    fn flipped_winding_is_detected_and_reoriented() {
        let cube = unit_cube();
        let flipped: Vec<[usize; 3]> = cube.faces().iter().map(|&[a, b, c]| [a, c, b]).collect();
        let mut mesh = Mesh::new(cube.vertices().to_vec(), flipped).unwrap();
        assert!(mesh.signed_volume() < 0.0);
        assert!(mesh.orient_outward());
        assert!(mesh.signed_volume() > 0.0);
        assert!(!mesh.orient_outward());
    }

    #[test]
    fn contains_point_handles_axis_aligned_faces_and_diagonals() {
        let cube = unit_cube();
        assert!(cube.contains_point(&Point3::new(0.5, 0.5, 0.5)));
        assert!(cube.contains_point(&Point3::new(0.3, 0.7, 0.2)));
        // Lies on the diagonal of the square faces along the +x ray.
        assert!(cube.contains_point(&Point3::new(0.25, 0.25, 0.25)));
        assert!(!cube.contains_point(&Point3::new(1.5, 0.5, 0.5)));
        assert!(!cube.contains_point(&Point3::new(-0.5, 0.5, 0.5)));
    }

    #[test]
    fn first_crossing_returns_nearest_face() {
        let cube = unit_cube();
        let hit = cube
            .first_crossing(&Point3::new(0.5, 0.5, 0.5), &Point3::new(2.5, 0.5, 0.5), None)
            .unwrap();
        assert!((hit.t - 0.25).abs() < 1e-12);
        assert!((hit.point.x - 1.0).abs() < 1e-12);
        assert!(cube.face_normal(hit.face).x > 0.99);

        let skipped = cube.first_crossing(
            &Point3::new(0.5, 0.5, 0.5),
            &Point3::new(2.5, 0.5, 0.5),
            Some(hit.face),
        );
        assert!(skipped.is_none_or(|h| h.face != hit.face));
    }

    #[test]
    fn segment_inside_does_not_cross() {
        let cube = unit_cube();
        assert!(
            cube.first_crossing(&Point3::new(0.2, 0.2, 0.2), &Point3::new(0.8, 0.7, 0.6), None)
                .is_none()
        );
    }

    #[test]
    fn vertex_moves_are_buffered_until_applied() {
        let mut cube = unit_cube();
        let original = *cube.vertex(6).unwrap();
        cube.buffer_vertex_move(6, Vector3::new(0.5, 0.0, 0.0)).unwrap();
        cube.buffer_vertex_move(6, Vector3::new(0.25, 0.0, 0.0)).unwrap();
        assert_eq!(*cube.vertex(6).unwrap(), original);
        assert_eq!(cube.pending_move_count(), 1);

        let max = cube.apply_vertex_moves();
        assert!((max - 0.75).abs() < 1e-12);
        assert_eq!(*cube.vertex(6).unwrap(), original + Vector3::new(0.75, 0.0, 0.0));
        assert!(!cube.has_pending_moves());
        assert!(cube.bounds().max.x > 1.7);
    }

    #[test]
    fn out_of_range_vertex_move_is_rejected() {
        let mut cube = unit_cube();
        assert_eq!(
            cube.buffer_vertex_move(8, Vector3::x()),
            Err(GeometryError::VertexOutOfRange {
                index: 8,
                vertex_count: 8
            })
        );
        assert!(!cube.has_pending_moves());
    }

    #[test]
    fn move_then_negation_restores_vertices() {
        let mut cube = unit_cube();
        let before = cube.vertices().to_vec();
        for i in 0..cube.vertex_count() {
            cube.buffer_vertex_move(i, Vector3::new(0.1, -0.2, 0.05) * (i as f64)).unwrap();
        }
        cube.apply_vertex_moves();
        for i in 0..cube.vertex_count() {
            cube.buffer_vertex_move(i, -Vector3::new(0.1, -0.2, 0.05) * (i as f64)).unwrap();
        }
        cube.apply_vertex_moves();
        for (a, b) in before.iter().zip(cube.vertices()) {
            assert!((a - b).norm() < 1e-12);
        }
    }

    #[test]
    fn closest_surface_point_projects_onto_nearest_face() {
        let cube = unit_cube();
        let (face, q) = cube.closest_surface_point(&Point3::new(0.5, 0.5, 0.9), 0.2);
        assert!((q - Point3::new(0.5, 0.5, 1.0)).norm() < 1e-12);
        assert!(cube.face_normal(face).z > 0.99);
        assert!(cube.is_near_surface(&Point3::new(0.5, 0.5, 0.95), 0.1));
        assert!(!cube.is_near_surface(&Point3::new(5.0, 5.0, 5.0), 0.1));
    }
}
