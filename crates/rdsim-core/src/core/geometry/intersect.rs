use nalgebra::{Point3, Vector3};

/// Hits closer than this distance to a segment's start, in µm, are treated as the start itself.
///
/// Must stay below every distance a particle is nudged off a surface.
pub const MIN_CROSSING_DISTANCE: f64 = 1e-12;

/// Barycentric margin below which a ray hit is considered to graze an edge or vertex.
pub const GRAZING_TOLERANCE: f64 = 1e-9;

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Aabb {
    /// An inverted box that any `grow` call will replace.
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3<f64>>) -> Self {
        let mut aabb = Self::empty();
        for p in points {
            aabb.grow(p);
        }
        aabb
    }

    pub fn from_segment(start: &Point3<f64>, end: &Point3<f64>) -> Self {
        Self {
            min: start.inf(end),
            max: start.sup(end),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn grow(&mut self, p: &Point3<f64>) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    pub fn expanded(&self, margin: f64) -> Aabb {
        let m = Vector3::repeat(margin);
        Aabb {
            min: self.min - m,
            max: self.max + m,
        }
    }

    pub fn contains(&self, p: &Point3<f64>) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn extent(&self) -> Vector3<f64> {
        self.max - self.min
    }

    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn volume(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let e = self.extent();
        e.x * e.y * e.z
    }
}

/// Parametric hit of a ray against a triangle: `origin + t * dir`, barycentrics `(u, v)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub t: f64,
    pub u: f64,
    pub v: f64,
}

impl RayHit {
    /// Whether the hit lies within `GRAZING_TOLERANCE` of an edge of the triangle.
    pub fn is_grazing(&self) -> bool {
        self.u < GRAZING_TOLERANCE
            || self.v < GRAZING_TOLERANCE
            || (1.0 - self.u - self.v) < GRAZING_TOLERANCE
    }
}

/// Möller–Trumbore ray/triangle intersection. Returns hits for any `t`, including negative.
pub fn ray_triangle(
    origin: &Point3<f64>,
    dir: &Vector3<f64>,
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
) -> Option<RayHit> {
    let e1 = b - a;
    let e2 = c - a;
    let p = dir.cross(&e2);
    let det = e1.dot(&p);
    let scale = e1.norm() * e2.norm() * dir.norm();
    if det.abs() <= f64::EPSILON * scale {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - a;
    let u = s.dot(&p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(&e1);
    let v = dir.dot(&q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(&q) * inv_det;
    Some(RayHit { t, u, v })
}

/// Intersection parameter of the segment `start -> end` with a triangle, ignoring hits
/// within [`MIN_CROSSING_DISTANCE`] of `start`.
pub fn segment_triangle(
    start: &Point3<f64>,
    end: &Point3<f64>,
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
) -> Option<f64> {
    let dir = end - start;
    let length = dir.norm();
    if length == 0.0 {
        return None;
    }
    ray_triangle(start, &dir, a, b, c)
        .map(|hit| hit.t)
        .filter(|t| *t * length > MIN_CROSSING_DISTANCE && *t <= 1.0)
}

/// Closest point to `p` on the triangle `abc` (Ericson, Real-Time Collision Detection §5.1.5).
pub fn closest_point_on_triangle(
    p: &Point3<f64>,
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
) -> Point3<f64> {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return *a;
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return *b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return *c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

/// Specular reflection of `v` about the plane with unit normal `n`.
pub fn reflect(v: &Vector3<f64>, n: &Vector3<f64>) -> Vector3<f64> {
    v - n * (2.0 * v.dot(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-12;

    fn unit_triangle() -> (Point3<f64>, Point3<f64>, Point3<f64>) {
        (
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        )
    }

    #[test]
    fn ray_through_triangle_interior_reports_parameter_and_barycentrics() {
        let (a, b, c) = unit_triangle();
        let hit = ray_triangle(
            &Point3::new(0.25, 0.25, 1.0),
            &Vector3::new(0.0, 0.0, -1.0),
            &a,
            &b,
            &c,
        )
        .unwrap();
        assert!((hit.t - 1.0).abs() < TOLERANCE);
        assert!((hit.u - 0.25).abs() < TOLERANCE);
        assert!((hit.v - 0.25).abs() < TOLERANCE);
        assert!(!hit.is_grazing());
    }

    #[test]
    fn ray_parallel_to_triangle_misses() {
        let (a, b, c) = unit_triangle();
        let hit = ray_triangle(
            &Point3::new(0.25, 0.25, 1.0),
            &Vector3::new(1.0, 0.0, 0.0),
            &a,
            &b,
            &c,
        );
        assert!(hit.is_none());
    }

    #[test]
    fn segment_stopping_short_of_triangle_misses() {
        let (a, b, c) = unit_triangle();
        let t = segment_triangle(
            &Point3::new(0.25, 0.25, 1.0),
            &Point3::new(0.25, 0.25, 0.5),
            &a,
            &b,
            &c,
        );
        assert!(t.is_none());
    }

    #[test]
    fn segment_crossing_triangle_returns_fraction() {
        let (a, b, c) = unit_triangle();
        let t = segment_triangle(
            &Point3::new(0.25, 0.25, 1.0),
            &Point3::new(0.25, 0.25, -1.0),
            &a,
            &b,
            &c,
        )
        .unwrap();
        assert!((t - 0.5).abs() < TOLERANCE);
    }

    #[test]
    fn long_segment_starting_just_off_a_face_still_crosses_it() {
        let (a, b, c) = unit_triangle();
        let t = segment_triangle(
            &Point3::new(0.25, 0.25, 5e-11),
            &Point3::new(0.25, 0.25, 5e-11 - 10.0),
            &a,
            &b,
            &c,
        )
        .unwrap();
        assert!((t * 10.0 - 5e-11).abs() < 1e-15);

        let touching = segment_triangle(
            &Point3::new(0.25, 0.25, 1e-13),
            &Point3::new(0.25, 0.25, -10.0),
            &a,
            &b,
            &c,
        );
        assert!(touching.is_none());
    }

    #[test]
    fn closest_point_projects_onto_interior_and_clamps_to_vertices() {
        let (a, b, c) = unit_triangle();
        let inside = closest_point_on_triangle(&Point3::new(0.2, 0.2, 3.0), &a, &b, &c);
        assert!((inside - Point3::new(0.2, 0.2, 0.0)).norm() < TOLERANCE);

        let corner = closest_point_on_triangle(&Point3::new(-1.0, -1.0, 0.0), &a, &b, &c);
        assert!((corner - a).norm() < TOLERANCE);

        let edge = closest_point_on_triangle(&Point3::new(1.0, 1.0, 0.0), &a, &b, &c);
        assert!((edge - Point3::new(0.5, 0.5, 0.0)).norm() < TOLERANCE);
    }

    #[test]
    fn reflect_flips_normal_component_only() {
        let r = reflect(&Vector3::new(1.0, -2.0, 3.0), &Vector3::new(0.0, 1.0, 0.0));
        assert!((r - Vector3::new(1.0, 2.0, 3.0)).norm() < TOLERANCE);
    }

    #[test]
    fn aabb_union_and_intersection() {
        let a = Aabb::from_points(&[Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)]);
        let b = Aabb::from_segment(&Point3::new(2.0, 2.0, 2.0), &Point3::new(0.5, 0.5, 0.5));
        assert!(a.intersects(&b));
        let u = a.union(&b);
        assert_eq!(u.max, Point3::new(2.0, 2.0, 2.0));
        assert!((u.volume() - 8.0).abs() < TOLERANCE);
        assert!(!Aabb::empty().intersects(&a));
    }
}
