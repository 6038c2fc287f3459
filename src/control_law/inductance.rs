// Phase inductance measurement
//
// Toggles the sign of a fixed α voltage every PWM period. As long as the
// period is much shorter than L/R the current ramps linearly, so the summed
// ripple gives di/dt and L = V / (di/dt).

use libm::fabsf;

use super::AlphaBetaController;
use crate::error::MotorError;

/// Square-wave inductance measurement
pub struct InductanceMeasurementControlLaw {
    /// Test voltage amplitude, sign flips on every output [V]
    test_voltage: f32,
    /// Timer clock used to convert timestamps to seconds [Hz]
    clock_hz: u32,
    /// Timestamp of the first measurement, `None` until attached
    start_timestamp: Option<u32>,
    last_timestamp: u32,
    last_i_alpha: f32,
    /// Accumulated current ripple [A]
    delta_i: f32,
    vbus_voltage: f32,
}

impl InductanceMeasurementControlLaw {
    /// Create a new inductance measurement
    ///
    /// # Arguments
    /// * `test_voltage` - Amplitude of the square wave [V]
    /// * `clock_hz` - Clock rate of the measurement timestamps [Hz]
    pub fn new(test_voltage: f32, clock_hz: u32) -> Self {
        Self {
            test_voltage,
            clock_hz,
            start_timestamp: None,
            last_timestamp: 0,
            last_i_alpha: f32::NAN,
            delta_i: 0.0,
            vbus_voltage: f32::NAN,
        }
    }

    /// Accumulated ripple current [A]
    pub fn delta_i(&self) -> f32 {
        self.delta_i
    }

    /// Measured phase inductance [H]
    ///
    /// NaN or infinite when fewer than two measurements were taken.
    pub fn inductance(&self) -> f32 {
        let start = self.start_timestamp.unwrap_or(self.last_timestamp);
        // Wrapping difference survives one counter overflow
        let ticks = self.last_timestamp.wrapping_sub(start);
        let dt = ticks as f32 / self.clock_hz as f32;
        fabsf(self.test_voltage) / (self.delta_i / dt)
    }
}

impl AlphaBetaController for InductanceMeasurementControlLaw {
    fn reset(&mut self) {
        self.start_timestamp = None;
        self.last_i_alpha = f32::NAN;
        self.delta_i = 0.0;
        self.vbus_voltage = f32::NAN;
    }

    fn on_measurement(
        &mut self,
        vbus_voltage: f32,
        i_alpha: f32,
        _i_beta: f32,
        timestamp: u32,
    ) -> Result<(), MotorError> {
        if !vbus_voltage.is_finite() {
            return Err(MotorError::UnknownVbusVoltage);
        }
        if !i_alpha.is_finite() {
            return Err(MotorError::UnknownCurrentMeasurement);
        }
        self.vbus_voltage = vbus_voltage;

        match self.start_timestamp {
            Some(_) => {
                // Sign of the voltage that is about to be replaced
                let sign = if self.test_voltage >= 0.0 { 1.0 } else { -1.0 };
                self.delta_i += -sign * (i_alpha - self.last_i_alpha);
            }
            None => self.start_timestamp = Some(timestamp),
        }

        self.last_i_alpha = i_alpha;
        self.last_timestamp = timestamp;
        Ok(())
    }

    fn get_output(&mut self, _output_timestamp: u32) -> Result<(f32, f32), MotorError> {
        if self.start_timestamp.is_none() {
            return Err(MotorError::ControllerInitializing);
        }
        self.test_voltage = -self.test_voltage;
        Ok((self.test_voltage / ((2.0 / 3.0) * self.vbus_voltage), 0.0))
    }
}
