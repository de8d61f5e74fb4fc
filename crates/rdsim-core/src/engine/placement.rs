use crate::core::geometry::mesh::Mesh;
use nalgebra::{Point3, Vector3};
use rand::Rng;
use rand_distr::{Distribution, UnitBall};
use thiserror::Error;
use tracing::instrument;

/// Rejection-sampling attempts allowed per requested particle.
const MAX_ATTEMPTS_PER_PARTICLE: usize = 10_000;

#[derive(Debug, Error, PartialEq)]
pub enum PlacementError {
    #[error("Target mesh is not a closed manifold: {0}")]
    OpenMesh(String),
    #[error("Target mesh encloses no volume")]
    EmptyVolume,
    #[error("Only {placed} of {requested} positions were found inside the target after {attempts} attempts")]
    AttemptsExhausted {
        placed: usize,
        requested: usize,
        attempts: usize,
    },
    #[error("Invalid release diameter: {0}")]
    InvalidDiameter(f64),
}

/// Draws `count` positions uniformly inside the volume enclosed by `mesh`.
#[instrument(level = "debug", skip_all, fields(count = count))]
pub fn sample_in_mesh(
    mesh: &Mesh,
    count: usize,
    rng: &mut impl Rng,
) -> Result<Vec<Point3<f64>>, PlacementError> {
    mesh.validate_closed_manifold()
        .map_err(|e| PlacementError::OpenMesh(e.to_string()))?;
    if mesh.volume() <= 0.0 {
        return Err(PlacementError::EmptyVolume);
    }

    let bounds = mesh.bounds();
    let max_attempts = count.saturating_mul(MAX_ATTEMPTS_PER_PARTICLE).max(MAX_ATTEMPTS_PER_PARTICLE);
    let mut positions = Vec::with_capacity(count);
    let mut attempts = 0;
    while positions.len() < count {
        if attempts >= max_attempts {
            return Err(PlacementError::AttemptsExhausted {
                placed: positions.len(),
                requested: count,
                attempts,
            });
        }
        attempts += 1;
        let candidate = Point3::new(
            rng.gen_range(bounds.min.x..=bounds.max.x),
            rng.gen_range(bounds.min.y..=bounds.max.y),
            rng.gen_range(bounds.min.z..=bounds.max.z),
        );
        if mesh.contains_point(&candidate) {
            positions.push(candidate);
        }
    }
    Ok(positions)
}

/// Draws `count` positions uniformly inside a ball; a zero diameter yields `location` itself.
pub fn sample_in_ball(
    location: &Point3<f64>,
    diameter: f64,
    count: usize,
    rng: &mut impl Rng,
) -> Result<Vec<Point3<f64>>, PlacementError> {
    if !(diameter.is_finite() && diameter >= 0.0) {
        return Err(PlacementError::InvalidDiameter(diameter));
    }
    if diameter == 0.0 {
        return Ok(vec![*location; count]);
    }
    let radius = diameter / 2.0;
    Ok((0..count)
        .map(|_| {
            let [x, y, z]: [f64; 3] = UnitBall.sample(rng);
            location + Vector3::new(x, y, z) * radius
        })
        .collect())
}

/// Volume of a ball of the given diameter in µm³.
pub fn ball_volume(diameter: f64) -> f64 {
    let r = diameter / 2.0;
    4.0 / 3.0 * std::f64::consts::PI * r * r * r
}
