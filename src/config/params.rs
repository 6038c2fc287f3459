//! Default board and motor parameters

/// Timer input clock for the PWM timer [Hz]
pub const DEFAULT_TIMER_CLOCK_HZ: u32 = 168_000_000;

/// PWM timer auto-reload value (one half of a centre-aligned period) [clocks]
pub const DEFAULT_PERIOD_CLOCKS: u16 = 3500;

/// PWM timer repetition counter
pub const DEFAULT_REPETITION_COUNTER: u8 = 0;

/// Current-sense ADC resolution [bits]
pub const DEFAULT_ADC_BITS: u8 = 12;

/// Current-sense ADC reference voltage [V]
pub const DEFAULT_ADC_VREF: f32 = 3.3;

/// Lowest amplifier output still considered linear [V]
pub const CURRENT_SENSE_MIN_VOLT: f32 = 0.3;

/// Highest amplifier output still considered linear [V]
pub const CURRENT_SENSE_MAX_VOLT: f32 = 3.0;

/// Usable output swing of the current-sense amplifier around mid-rail [V]
pub const AMP_MAX_OUTPUT_SWING: f32 = 1.35;

/// Share of the amplifier swing actually used when picking a gain
pub const AMP_GAIN_MARGIN: f32 = 0.90;

/// DC offset estimates above this share of the usable current are rejected
pub const MAX_DC_CALIB_FRACTION: f32 = 0.1;

/// Offset estimate is trusted after this many filter time constants
pub const DC_CALIB_SETTLE_TAUS: f32 = 7.5;

/// Integrator gain of the resistance measurement [(V/s)/A]
pub const RESISTANCE_KI: f32 = 10.0;

/// Polling step of the calibration routines [ms]
pub const CALIBRATION_STEP_MS: u32 = 1;

/// Upper bound of resistance-measurement polling steps
pub const RESISTANCE_MEAS_MAX_STEPS: u32 = 3000;

/// Upper bound of inductance-measurement polling steps
pub const INDUCTANCE_MEAS_MAX_STEPS: u32 = 1250;

/// Plausible phase inductance band [H]
pub const MIN_PHASE_INDUCTANCE: f32 = 2e-6;
pub const MAX_PHASE_INDUCTANCE: f32 = 4000e-6;

/// Motor defaults
pub const DEFAULT_POLE_PAIRS: u8 = 7;
pub const DEFAULT_CALIBRATION_CURRENT: f32 = 10.0;
pub const DEFAULT_RESISTANCE_CALIB_MAX_VOLTAGE: f32 = 2.0;
pub const DEFAULT_TORQUE_CONSTANT: f32 = 0.04;
pub const DEFAULT_CURRENT_LIM: f32 = 10.0;
pub const DEFAULT_CURRENT_LIM_MARGIN: f32 = 8.0;
pub const DEFAULT_REQUESTED_CURRENT_RANGE: f32 = 60.0;
pub const DEFAULT_CURRENT_CONTROL_BANDWIDTH: f32 = 1000.0;
pub const DEFAULT_DC_CALIB_TAU: f32 = 0.2;
pub const DEFAULT_I_LEAK_MAX: f32 = 0.1;

/// PWM-update half-cycles a control law may keep reporting
/// "initializing" before the output goes live
pub const DEFAULT_CONTROLLER_INIT_TIMEOUT_CYCLES: u32 = 200;
