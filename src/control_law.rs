// Control laws driven by the PWM interrupt
//
// A control law receives one current measurement per PWM period and produces
// one αβ modulation vector per period. The motor only ever talks to the
// installed law through `ControlLaw`, which also adapts between phase
// quantities and the αβ frame.

pub mod inductance;
pub mod resistance;

pub use inductance::InductanceMeasurementControlLaw;
pub use resistance::ResistanceMeasurementControlLaw;

use crate::current_sense::PhaseCurrents;
use crate::error::MotorError;
use crate::foc::{clarke, space_vector_modulation};

/// Current-controlling strategy working in the stationary αβ frame
pub trait AlphaBetaController {
    /// Clear all internal state. Called once at arm time, before the first
    /// measurement.
    fn reset(&mut self);

    /// Consume one current measurement
    ///
    /// # Arguments
    /// * `vbus_voltage` - DC bus voltage [V], possibly NaN
    /// * `i_alpha` - α-axis current [A], NaN when the measurement is unavailable
    /// * `i_beta` - β-axis current [A], NaN when the measurement is unavailable
    /// * `timestamp` - Timer clock count of the measurement (wraps)
    fn on_measurement(
        &mut self,
        vbus_voltage: f32,
        i_alpha: f32,
        i_beta: f32,
        timestamp: u32,
    ) -> Result<(), MotorError>;

    /// Produce the modulation vector that will be live at `output_timestamp`
    ///
    /// # Returns
    /// (mod_alpha, mod_beta), each normalised to (2/3)·V_bus
    fn get_output(&mut self, output_timestamp: u32) -> Result<(f32, f32), MotorError>;
}

/// Control law installed in a motor while it is armed
pub enum ControlLaw {
    Resistance(ResistanceMeasurementControlLaw),
    Inductance(InductanceMeasurementControlLaw),
    /// Production controller living outside the motor
    External(&'static mut (dyn AlphaBetaController + Send)),
}

impl ControlLaw {
    /// Deliver phase currents to the law after transforming them to αβ
    pub(crate) fn on_phase_measurement(
        &mut self,
        vbus_voltage: f32,
        currents: PhaseCurrents,
        timestamp: u32,
    ) -> Result<(), MotorError> {
        let (i_alpha, i_beta) = clarke(currents.a, currents.b, currents.c);
        self.on_measurement(vbus_voltage, i_alpha, i_beta, timestamp)
    }

    /// Ask the law for its output and turn it into three phase timings
    pub(crate) fn phase_timings(&mut self, output_timestamp: u32) -> Result<[f32; 3], MotorError> {
        let (mod_alpha, mod_beta) = self.get_output(output_timestamp)?;
        space_vector_modulation(mod_alpha, mod_beta)
    }

    fn as_controller(&mut self) -> &mut dyn AlphaBetaController {
        match self {
            ControlLaw::Resistance(law) => law,
            ControlLaw::Inductance(law) => law,
            ControlLaw::External(law) => &mut **law,
        }
    }
}

impl AlphaBetaController for ControlLaw {
    fn reset(&mut self) {
        self.as_controller().reset()
    }

    fn on_measurement(
        &mut self,
        vbus_voltage: f32,
        i_alpha: f32,
        i_beta: f32,
        timestamp: u32,
    ) -> Result<(), MotorError> {
        self.as_controller()
            .on_measurement(vbus_voltage, i_alpha, i_beta, timestamp)
    }

    fn get_output(&mut self, output_timestamp: u32) -> Result<(f32, f32), MotorError> {
        self.as_controller().get_output(output_timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Seen {
        last_measurement: Option<(f32, f32)>,
        resets: u32,
    }

    /// Returns a fixed output and records what it was given
    struct FixedOutput {
        output: (f32, f32),
        seen: Arc<Mutex<Seen>>,
    }

    impl AlphaBetaController for FixedOutput {
        fn reset(&mut self) {
            let mut seen = self.seen.lock().unwrap();
            seen.resets += 1;
            seen.last_measurement = None;
        }

        fn on_measurement(
            &mut self,
            _vbus_voltage: f32,
            i_alpha: f32,
            i_beta: f32,
            _timestamp: u32,
        ) -> Result<(), MotorError> {
            self.seen.lock().unwrap().last_measurement = Some((i_alpha, i_beta));
            Ok(())
        }

        fn get_output(&mut self, _output_timestamp: u32) -> Result<(f32, f32), MotorError> {
            Ok(self.output)
        }
    }

    fn external(output: (f32, f32)) -> (ControlLaw, Arc<Mutex<Seen>>) {
        let seen = Arc::new(Mutex::new(Seen::default()));
        let law = Box::leak(Box::new(FixedOutput {
            output,
            seen: seen.clone(),
        }));
        (ControlLaw::External(law), seen)
    }

    #[test]
    fn test_phase_measurement_is_clarke_transformed() {
        let (mut law, seen) = external((0.0, 0.0));
        let currents = PhaseCurrents::new(2.0, -1.0, -1.0);
        law.on_phase_measurement(24.0, currents, 0).unwrap();
        let (alpha, beta) = seen.lock().unwrap().last_measurement.unwrap();
        assert!((alpha - 2.0).abs() < 1e-6);
        assert!(beta.abs() < 1e-6);
    }

    #[test]
    fn test_reset_dispatches_to_external() {
        let (mut law, seen) = external((0.0, 0.0));
        law.reset();
        law.reset();
        assert_eq!(seen.lock().unwrap().resets, 2);
    }

    #[test]
    fn test_phase_timings_rejects_oversized_vector() {
        let (mut law, _) = external((2.0, 0.0));
        assert_eq!(law.phase_timings(0), Err(MotorError::ModulationMagnitude));
    }

    #[test]
    fn test_phase_timings_rejects_nan() {
        let (mut law, _) = external((f32::NAN, 0.0));
        assert_eq!(law.phase_timings(0), Err(MotorError::ModulationIsNan));
    }
}
