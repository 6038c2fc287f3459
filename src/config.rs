//! Configuration module
//!
//! Motor parameters, PWM timer timing and current-sense ADC scaling. Values
//! arrive already validated from whoever owns persistence; this module only
//! derives the quantities the interrupt path needs.

pub mod params;

pub use params::*;

/// Kind of motor attached to an axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MotorType {
    /// Current-sensed motor
    HighCurrent = 0,
    /// Voltage-controlled motor, no calibration needed
    Gimbal = 2,
    /// Induction motor
    Acim = 3,
}

impl TryFrom<u8> for MotorType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MotorType::HighCurrent),
            2 => Ok(MotorType::Gimbal),
            3 => Ok(MotorType::Acim),
            other => Err(other),
        }
    }
}

/// Per-motor configuration
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorConfig {
    /// Skip calibration at startup; resistance and inductance below are trusted
    pub pre_calibrated: bool,
    pub pole_pairs: u8,
    /// Test current of the resistance measurement [A]
    pub calibration_current: f32,
    /// Voltage cap of the resistance measurement, also the inductance test voltage [V]
    pub resistance_calib_max_voltage: f32,
    /// [H]
    pub phase_inductance: f32,
    /// [Ohm]
    pub phase_resistance: f32,
    /// [Nm/A]
    pub torque_constant: f32,
    pub motor_type: MotorType,
    /// [A]
    pub current_lim: f32,
    /// Extra headroom above the current limit before tripping [A]
    pub current_lim_margin: f32,
    /// [Nm]
    pub torque_lim: f32,
    /// Range the current-sense amplifier gain is picked for [A]
    pub requested_current_range: f32,
    /// [rad/s]
    pub current_control_bandwidth: f32,
    /// Time constant of the DC offset filter [s]
    pub dc_calib_tau: f32,
    /// [A]
    pub i_leak_max: f32,
    /// [A]
    pub i_bus_hard_min: f32,
    /// [A]
    pub i_bus_hard_max: f32,
    pub controller_init_timeout_cycles: u32,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            pre_calibrated: false,
            pole_pairs: DEFAULT_POLE_PAIRS,
            calibration_current: DEFAULT_CALIBRATION_CURRENT,
            resistance_calib_max_voltage: DEFAULT_RESISTANCE_CALIB_MAX_VOLTAGE,
            phase_inductance: 0.0,
            phase_resistance: 0.0,
            torque_constant: DEFAULT_TORQUE_CONSTANT,
            motor_type: MotorType::HighCurrent,
            current_lim: DEFAULT_CURRENT_LIM,
            current_lim_margin: DEFAULT_CURRENT_LIM_MARGIN,
            torque_lim: f32::INFINITY,
            requested_current_range: DEFAULT_REQUESTED_CURRENT_RANGE,
            current_control_bandwidth: DEFAULT_CURRENT_CONTROL_BANDWIDTH,
            dc_calib_tau: DEFAULT_DC_CALIB_TAU,
            i_leak_max: DEFAULT_I_LEAK_MAX,
            i_bus_hard_min: f32::NEG_INFINITY,
            i_bus_hard_max: f32::INFINITY,
            controller_init_timeout_cycles: DEFAULT_CONTROLLER_INIT_TIMEOUT_CYCLES,
        }
    }
}

/// PWM timer timing
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerConfig {
    pub clock_hz: u32,
    /// Auto-reload value; a full centre-aligned period is twice this
    pub period_clocks: u16,
    pub repetition_counter: u8,
}

impl TimerConfig {
    /// Timer clocks between two update interrupts
    pub const fn update_ticks(&self) -> u32 {
        self.period_clocks as u32 * (self.repetition_counter as u32 + 1)
    }

    /// Time between two update interrupts [s]
    pub fn interrupt_period(&self) -> f32 {
        self.update_ticks() as f32 / self.clock_hz as f32
    }

    /// Time between two current measurements (one per full PWM period) [s]
    pub fn current_meas_period(&self) -> f32 {
        2.0 * self.interrupt_period()
    }

    /// Compare value giving 50% duty
    pub const fn half_timing(&self) -> u16 {
        self.period_clocks / 2
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            clock_hz: DEFAULT_TIMER_CLOCK_HZ,
            period_clocks: DEFAULT_PERIOD_CLOCKS,
            repetition_counter: DEFAULT_REPETITION_COUNTER,
        }
    }
}

/// Current-sense ADC scaling
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CurrentSenseConfig {
    pub adc_bits: u8,
    pub v_ref: f32,
    /// Lower end of the amplifier's linear output range [V]
    pub min_volt: f32,
    /// Upper end of the amplifier's linear output range [V]
    pub max_volt: f32,
}

impl CurrentSenseConfig {
    pub const fn full_scale(&self) -> u32 {
        1 << self.adc_bits
    }

    /// Inclusive range of raw codes accepted as a valid current sample
    pub fn adc_bounds(&self) -> (u32, u32) {
        let full_scale = self.full_scale() as f32;
        let lower = (full_scale * self.min_volt / self.v_ref) as u32;
        let upper = (full_scale * self.max_volt / self.v_ref) as u32;
        (lower, upper)
    }

    /// Volts per ADC code
    pub fn volts_per_code(&self) -> f32 {
        self.v_ref / self.full_scale() as f32
    }
}

impl Default for CurrentSenseConfig {
    fn default() -> Self {
        Self {
            adc_bits: DEFAULT_ADC_BITS,
            v_ref: DEFAULT_ADC_VREF,
            min_volt: CURRENT_SENSE_MIN_VOLT,
            max_volt: CURRENT_SENSE_MAX_VOLT,
        }
    }
}

/// Board-level facts about one motor channel
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorHardwareConfig {
    /// Bit n set means phase n (A, B, C) has a physical current sensor
    pub current_sensor_mask: u8,
    /// Inverse of the shunt resistance [S]
    pub shunt_conductance: f32,
    pub timer: TimerConfig,
    pub adc: CurrentSenseConfig,
}

impl Default for MotorHardwareConfig {
    fn default() -> Self {
        Self {
            current_sensor_mask: 0b111,
            shunt_conductance: 1.0 / 0.0005,
            timer: TimerConfig::default(),
            adc: CurrentSenseConfig::default(),
        }
    }
}
