// Phase current sensing
//
// Raw ADC codes -> bounds check -> amps -> missing-phase reconstruction ->
// DC offset calibration -> leakage removal.
//
// A phase that has no sensor or whose sample is unavailable is passed in as
// `None`. Currents that cannot be determined are NaN, never zero.

use libm::fabsf;

use crate::config::{MotorHardwareConfig, DC_CALIB_SETTLE_TAUS, MAX_DC_CALIB_FRACTION};

/// Three phase currents [A]
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhaseCurrents {
    pub a: f32,
    pub b: f32,
    pub c: f32,
}

impl PhaseCurrents {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);
    pub const UNKNOWN: Self = Self::new(f32::NAN, f32::NAN, f32::NAN);

    pub const fn new(a: f32, b: f32, c: f32) -> Self {
        Self { a, b, c }
    }

    /// All three phases carry a number
    pub fn is_valid(&self) -> bool {
        !self.a.is_nan() && !self.b.is_nan() && !self.c.is_nan()
    }

    /// Kirchhoff sum, ideally zero
    pub fn sum(&self) -> f32 {
        self.a + self.b + self.c
    }

    pub fn sum_of_squares(&self) -> f32 {
        self.a * self.a + self.b * self.b + self.c * self.c
    }

    /// Current vector magnitude is above `limit`
    ///
    /// With a + b + c = 0, Id² + Iq² = Iα² + Iβ² = 2/3·(Ia² + Ib² + Ic²).
    /// Unknown currents never exceed.
    pub fn magnitude_exceeds(&self, limit: f32) -> bool {
        2.0 / 3.0 * self.sum_of_squares() > limit * limit
    }

    pub fn as_array(&self) -> [f32; 3] {
        [self.a, self.b, self.c]
    }

    fn map(self, f: impl Fn(f32) -> f32) -> Self {
        Self::new(f(self.a), f(self.b), f(self.c))
    }

    fn zip(self, other: Self, f: impl Fn(f32, f32) -> f32) -> Self {
        Self::new(f(self.a, other.a), f(self.b, other.b), f(self.c, other.c))
    }
}

/// Result of converting one set of ADC samples
#[derive(Debug, Clone, Copy)]
pub struct PhaseSample {
    pub currents: PhaseCurrents,
    /// At least one code fell outside the amplifier's linear window
    pub saturated: bool,
}

/// Rolling estimate of the zero-current sensor offsets
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DcCalibration {
    pub offset: PhaseCurrents,
    /// Time the estimate has been filtered without interruption [s]
    pub running_since: f32,
}

impl DcCalibration {
    pub const fn new() -> Self {
        Self {
            offset: PhaseCurrents::ZERO,
            running_since: 0.0,
        }
    }

    /// Low-pass the offsets towards `currents`, or start over when the
    /// sample is invalid.
    ///
    /// # Arguments
    /// * `currents` - Sample taken while no phase current flows
    /// * `period` - Time since the previous calibration sample [s]
    /// * `tau` - Filter time constant [s]
    pub fn update(&mut self, currents: PhaseCurrents, period: f32, tau: f32) {
        if !currents.is_valid() {
            self.reset();
            return;
        }
        let k = (period / tau).min(1.0);
        self.offset = self
            .offset
            .zip(currents, |offset, sample| offset + (sample - offset) * k);
        self.running_since += period;
    }

    pub fn reset(&mut self) {
        self.offset = PhaseCurrents::ZERO;
        self.running_since = 0.0;
    }

    /// The estimate has settled and every offset is plausible
    pub fn is_trusted(&self, tau: f32, max_offset: f32) -> bool {
        self.running_since >= tau * DC_CALIB_SETTLE_TAUS
            && self.offset.as_array().iter().all(|o| fabsf(*o) < max_offset)
    }
}

impl Default for DcCalibration {
    fn default() -> Self {
        Self::new()
    }
}

/// Current-sense front end of one motor
pub struct CurrentSense {
    sensor_mask: u8,
    shunt_conductance: f32,
    lower_bound: u32,
    upper_bound: u32,
    mid_code: i32,
    volts_per_code: f32,
    /// Inverse of the amplifier gain actually configured [V/V]
    rev_gain: f32,
    max_allowed_current: f32,
    max_dc_calib: f32,
    dc_calib: DcCalibration,
    /// Last Kirchhoff residual [A], NaN when unknown
    i_leak: f32,
}

impl CurrentSense {
    /// Create the front end. Until [`CurrentSense::set_amplifier_gain`] runs
    /// every measurement converts to zero and offsets are never trusted.
    pub fn new(hw: &MotorHardwareConfig) -> Self {
        let (lower_bound, upper_bound) = hw.adc.adc_bounds();
        Self {
            sensor_mask: hw.current_sensor_mask,
            shunt_conductance: hw.shunt_conductance,
            lower_bound,
            upper_bound,
            mid_code: (hw.adc.full_scale() / 2) as i32,
            volts_per_code: hw.adc.volts_per_code(),
            rev_gain: 0.0,
            max_allowed_current: 0.0,
            max_dc_calib: 0.0,
            dc_calib: DcCalibration::new(),
            i_leak: f32::NAN,
        }
    }

    /// Apply the amplifier gain reported by the gate driver
    ///
    /// # Arguments
    /// * `actual_gain` - Configured amplifier gain [V/V]
    /// * `max_unity_gain_current` - Current giving full usable swing at unity gain [A]
    pub fn set_amplifier_gain(&mut self, actual_gain: f32, max_unity_gain_current: f32) {
        self.rev_gain = 1.0 / actual_gain;
        self.max_allowed_current = max_unity_gain_current * self.rev_gain;
        self.max_dc_calib = MAX_DC_CALIB_FRACTION * self.max_allowed_current;
    }

    pub fn phase_current_rev_gain(&self) -> f32 {
        self.rev_gain
    }

    /// Largest current the amplifier can represent [A]
    pub fn max_allowed_current(&self) -> f32 {
        self.max_allowed_current
    }

    pub fn max_dc_calib(&self) -> f32 {
        self.max_dc_calib
    }

    pub fn dc_calibration(&self) -> &DcCalibration {
        &self.dc_calib
    }

    pub fn leakage(&self) -> f32 {
        self.i_leak
    }

    /// Convert a raw code into a phase current [A]
    pub fn phase_current_from_adcval(&self, code: u32) -> f32 {
        let balanced = code as i32 - self.mid_code;
        let amp_out_volt = self.volts_per_code * balanced as f32;
        let shunt_volt = amp_out_volt * self.rev_gain;
        shunt_volt * self.shunt_conductance
    }

    fn in_bounds(&self, code: u32) -> bool {
        (self.lower_bound..=self.upper_bound).contains(&code)
    }

    /// Bounds-check, convert and complete one set of samples
    pub fn convert(&self, adc: [Option<u32>; 3]) -> PhaseSample {
        let mut saturated = false;
        let mut currents = [f32::NAN; 3];
        for (phase, (current, code)) in currents.iter_mut().zip(adc).enumerate() {
            // The channel of a missing sensor floats
            if self.sensor_mask & (1 << phase) == 0 {
                continue;
            }
            match code {
                Some(code) if self.in_bounds(code) => {
                    *current = self.phase_current_from_adcval(code);
                }
                Some(_) => saturated = true,
                None => {}
            }
        }
        let [a, b, c] = currents;
        PhaseSample {
            currents: self.reconstruct(PhaseCurrents::new(a, b, c)),
            saturated,
        }
    }

    /// Fill in the phase without a sensor using a + b + c = 0
    pub fn reconstruct(&self, mut currents: PhaseCurrents) -> PhaseCurrents {
        match self.sensor_mask {
            0b110 => currents.a = -(currents.b + currents.c),
            0b101 => currents.b = -(currents.c + currents.a),
            0b011 => currents.c = -(currents.a + currents.b),
            _ => {}
        }
        currents
    }

    /// Feed a zero-current sample into the offset filter
    pub fn update_dc_calibration(&mut self, currents: PhaseCurrents, period: f32, tau: f32) {
        self.dc_calib.update(currents, period, tau);
    }

    /// Remove offsets and leakage from a live sample
    ///
    /// # Returns
    /// The corrected currents, or all-NaN when the sample is invalid or the
    /// offsets cannot be trusted yet. The leakage of the sample is kept for
    /// [`CurrentSense::leakage`].
    pub fn correct(&mut self, currents: PhaseCurrents, tau: f32) -> PhaseCurrents {
        if !currents.is_valid() || !self.dc_calib.is_trusted(tau, self.max_dc_calib) {
            self.i_leak = f32::NAN;
            return PhaseCurrents::UNKNOWN;
        }
        let corrected = currents.zip(self.dc_calib.offset, |sample, offset| sample - offset);
        let i_leak = corrected.sum();
        self.i_leak = i_leak;
        corrected.map(|current| current - i_leak / 3.0)
    }
}
