// Space Vector PWM (SVPWM) generation
//
// Centred SVM computed from the inverse Clarke transform plus min/max
// common-mode injection instead of explicit sector tables. Output timings use
// the power-stage convention where 0 means the high side is on for the whole
// period and 1 means the low side is, so a positive phase voltage gives a
// timing below 0.5.

use super::transforms::inverse_clarke;
use crate::error::MotorError;

/// Calculate Space Vector PWM timings
///
/// # Arguments
/// * `mod_alpha` - Alpha-axis modulation, voltage divided by (2/3)·V_bus
/// * `mod_beta` - Beta-axis modulation, voltage divided by (2/3)·V_bus
///
/// # Returns
/// Timings for phases (a, b, c), each in [0, 1]
///
/// # Errors
/// * `ModulationIsNan` - an input is not a finite number
/// * `ModulationMagnitude` - the vector lies outside the SVM hexagon
pub fn space_vector_modulation(mod_alpha: f32, mod_beta: f32) -> Result<[f32; 3], MotorError> {
    if !mod_alpha.is_finite() || !mod_beta.is_finite() {
        return Err(MotorError::ModulationIsNan);
    }

    let (a, b, c) = inverse_clarke(mod_alpha, mod_beta);

    // Centre the three phase references between the rails
    let max = a.max(b).max(c);
    let min = a.min(b).min(c);
    let common_mode = (max + min) / 2.0;

    // (2/3) undoes the normalisation applied to the modulation inputs
    let timings = [
        0.5 - (2.0 / 3.0) * (a - common_mode),
        0.5 - (2.0 / 3.0) * (b - common_mode),
        0.5 - (2.0 / 3.0) * (c - common_mode),
    ];

    if timings.iter().all(|t| (0.0..=1.0).contains(t)) {
        Ok(timings)
    } else {
        Err(MotorError::ModulationMagnitude)
    }
}
