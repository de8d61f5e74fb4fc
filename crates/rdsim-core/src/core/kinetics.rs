//! Unit conversions and rate-to-probability formulas.
//!
//! Model inputs use the conventions of cell-biology model files: lengths in µm,
//! time in seconds, diffusion constants in cm²/s, bimolecular rate constants in
//! M⁻¹s⁻¹ and unimolecular rate constants in s⁻¹.
//!
//! Bimolecular reactions follow the Doi volume-reactivity model. Two particles
//! closer than the reaction radius σ react with intrinsic rate
//! `λ = k / (4/3 π σ³)`, so over one step of length `dt` a candidate pair fires
//! with probability `1 − exp(−λ dt)`. For a well-mixed reaction-limited system
//! this reproduces the macroscopic rate `k` for any `dt`; when the reactants also
//! diffuse, the pair may leave the reaction volume during a step and the error
//! of the discretisation scales as `√(D dt) / σ`.

use std::f64::consts::PI;

/// Avogadro's constant in mol⁻¹.
pub const AVOGADRO: f64 = 6.022_140_76e23;

/// 1 cm²/s expressed in µm²/s.
const CM2_TO_UM2: f64 = 1e8;

/// 1 litre expressed in µm³.
const LITRE_TO_UM3: f64 = 1e15;

/// Per-step probabilities above this value lose accuracy and are reported.
pub const PROBABILITY_WARNING_THRESHOLD: f64 = 0.5;

pub fn diffusion_um2_per_s(d_cm2_per_s: f64) -> f64 {
    d_cm2_per_s * CM2_TO_UM2
}

/// Standard deviation of the per-axis Brownian displacement in µm.
pub fn step_sigma(d_cm2_per_s: f64, dt: f64) -> f64 {
    (2.0 * diffusion_um2_per_s(d_cm2_per_s) * dt).sqrt()
}

/// Converts a molar bimolecular rate constant to µm³/s per particle pair.
pub fn bimolecular_rate_um3_per_s(k_per_molar_second: f64) -> f64 {
    k_per_molar_second * LITRE_TO_UM3 / AVOGADRO
}

pub fn reaction_volume(radius: f64) -> f64 {
    4.0 / 3.0 * PI * radius.powi(3)
}

/// Probability that a pair within `radius` reacts during a step of `dt` seconds.
pub fn bimolecular_probability(k_per_molar_second: f64, radius: f64, dt: f64) -> f64 {
    let volume = reaction_volume(radius);
    if volume <= 0.0 {
        return 0.0;
    }
    let lambda = bimolecular_rate_um3_per_s(k_per_molar_second) / volume;
    -(-lambda * dt).exp_m1()
}

/// Probability that a single particle converts during a step of `dt` seconds.
pub fn unimolecular_probability(k_per_second: f64, dt: f64) -> f64 {
    -(-k_per_second * dt).exp_m1()
}

/// Number of particles for a molar concentration in a volume given in µm³.
pub fn concentration_to_count(molar: f64, volume_um3: f64) -> usize {
    let n = molar * AVOGADRO * volume_um3 / LITRE_TO_UM3;
    if n.is_finite() && n > 0.0 {
        n.round() as usize
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diffusion_step_matches_einstein_relation() {
        // 1e-6 cm²/s = 100 µm²/s; over 1e-5 s the per-axis sigma is sqrt(2e-3).
        let sigma = step_sigma(1e-6, 1e-5);
        assert!((sigma - (2e-3f64).sqrt()).abs() < 1e-12);
        assert_eq!(step_sigma(0.0, 1e-5), 0.0);
    }

    #[test]
    fn bimolecular_probability_reproduces_the_rate_for_small_steps() {
        let k = 5e7;
        let radius = 0.01;
        let dt = 1e-9;
        let p = bimolecular_probability(k, radius, dt);
        let expected = bimolecular_rate_um3_per_s(k) / reaction_volume(radius) * dt;
        assert!((p - expected).abs() / expected < 1e-6);
    }

    #[test]
    fn probabilities_stay_in_the_unit_interval() {
        for &(k, dt) in &[(0.0, 1e-5), (5e7, 1e-5), (1e12, 1.0)] {
            let p = bimolecular_probability(k, 0.01, dt);
            assert!((0.0..=1.0).contains(&p), "p = {p}");
        }
        assert_eq!(bimolecular_probability(5e7, 0.0, 1e-5), 0.0);
        let q = unimolecular_probability(1e3, 1e-5);
        assert!((q - (1.0 - (-1e-2f64).exp())).abs() < 1e-15);
    }

    #[test]
    fn concentration_converts_through_avogadro() {
        // 1 µM in 1 µm³ is about 602 molecules.
        assert_eq!(concentration_to_count(1e-6, 1.0), 602);
        assert_eq!(concentration_to_count(-1.0, 1.0), 0);
    }
}
