// Phase resistance measurement
//
// Drives a pure α-axis voltage through an integrator until the measured
// α current matches the test current. At steady state R = V / I.

use libm::fabsf;

use super::AlphaBetaController;
use crate::config::RESISTANCE_KI;
use crate::error::MotorError;

/// Integrator-based resistance measurement
pub struct ResistanceMeasurementControlLaw {
    /// Current the integrator drives towards [A]
    test_current: f32,
    /// Voltage beyond which the measurement is aborted [V]
    max_voltage: f32,
    /// Integrator gain times measurement period [V/A]
    ki_dt: f32,
    /// Integrated α voltage [V], NaN once the measurement failed
    test_voltage: f32,
    /// Output modulation, `None` until the first valid measurement
    test_mod: Option<f32>,
}

impl ResistanceMeasurementControlLaw {
    /// Create a new resistance measurement
    ///
    /// # Arguments
    /// * `test_current` - Target α current [A]
    /// * `max_voltage` - Voltage limit of the integrator [V]
    /// * `current_meas_period` - Time between two measurements [s]
    pub fn new(test_current: f32, max_voltage: f32, current_meas_period: f32) -> Self {
        Self {
            test_current,
            max_voltage,
            ki_dt: RESISTANCE_KI * current_meas_period,
            test_voltage: 0.0,
            test_mod: None,
        }
    }

    /// Integrated test voltage [V]
    pub fn test_voltage(&self) -> f32 {
        self.test_voltage
    }

    /// Measured phase resistance [Ohm]
    ///
    /// NaN if the integrator left the allowed voltage range. Only meaningful
    /// once the integrator has settled.
    pub fn resistance(&self) -> f32 {
        self.test_voltage / self.test_current
    }
}

impl AlphaBetaController for ResistanceMeasurementControlLaw {
    fn reset(&mut self) {
        self.test_voltage = 0.0;
        self.test_mod = None;
    }

    fn on_measurement(
        &mut self,
        vbus_voltage: f32,
        i_alpha: f32,
        _i_beta: f32,
        _timestamp: u32,
    ) -> Result<(), MotorError> {
        if !i_alpha.is_finite() {
            return Err(MotorError::UnknownCurrentMeasurement);
        }

        self.test_voltage += self.ki_dt * (self.test_current - i_alpha);

        if fabsf(self.test_voltage) > self.max_voltage {
            self.test_voltage = f32::NAN;
            self.test_mod = None;
            return Err(MotorError::PhaseResistanceOutOfRange);
        }
        if !vbus_voltage.is_finite() {
            return Err(MotorError::UnknownVbusVoltage);
        }

        self.test_mod = Some(self.test_voltage / ((2.0 / 3.0) * vbus_voltage));
        Ok(())
    }

    fn get_output(&mut self, _output_timestamp: u32) -> Result<(f32, f32), MotorError> {
        self.test_mod
            .map(|test_mod| (test_mod, 0.0))
            .ok_or(MotorError::ControllerInitializing)
    }
}
