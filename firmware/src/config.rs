//! ボード設定
//!
//! STM32G431VB（170MHz）ボード固有の定数とモーター設定。

use g4_current_core::config::{CurrentSenseConfig, TimerConfig};
use g4_current_core::{MotorConfig, MotorHardwareConfig, MotorType};

/// TIM1クロック [Hz]（APB2 = SYSCLK）
pub const TIMER_CLOCK_HZ: u32 = 170_000_000;

/// TIM1 ARR（センターアラインの半周期）[clocks]
///
/// 170MHz / (2 × 3500) ≈ 24.3kHz
pub const PWM_PERIOD_CLOCKS: u16 = 3500;

/// デッドタイム [clocks]
pub const PWM_DEAD_TIME: u16 = 100;

/// シャント抵抗 0.5mΩ の逆数 [S]
pub const SHUNT_CONDUCTANCE: f32 = 2000.0;

/// 内蔵OPAMP（PGA）のゲイン
pub const AMPLIFIER_GAIN: f32 = 16.0;

/// ゲートドライバ監視・電流制限更新の周期 [ms]
pub const SUPERVISION_PERIOD_MS: u64 = 10;

/// DCバス電圧の分圧回路と保護しきい値
pub mod vbus {
    pub const R_UPPER: f32 = 33_300.0;
    pub const R_LOWER: f32 = 3_300.0;
    pub const OVERVOLTAGE: f32 = 30.0;
    pub const UNDERVOLTAGE: f32 = 10.0;
    pub const FILTER_ALPHA: f32 = 0.1;
    /// 監視周期 [ms]
    pub const PERIOD_MS: u64 = 10;
}

/// 相電流の注入変換チャネル
pub mod current_sense {
    /// ADC1 IN3（PA2、OPAMP1出力）: A相
    pub const PHASE_A_CHANNEL: u8 = 3;
    /// ADC2 IN3（PA6、OPAMP2出力）: B相
    pub const PHASE_B_CHANNEL: u8 = 3;
    /// ADC1 IN12（PB1、OPAMP3出力）: C相
    pub const PHASE_C_CHANNEL: u8 = 12;
}

/// モーターコアに渡すボード情報
pub fn hardware_config() -> MotorHardwareConfig {
    MotorHardwareConfig {
        current_sensor_mask: 0b111,
        shunt_conductance: SHUNT_CONDUCTANCE,
        timer: TimerConfig {
            clock_hz: TIMER_CLOCK_HZ,
            period_clocks: PWM_PERIOD_CLOCKS,
            repetition_counter: 0,
        },
        adc: CurrentSenseConfig::default(),
    }
}

/// 起動時のモーター設定
pub fn motor_config() -> MotorConfig {
    MotorConfig {
        motor_type: MotorType::HighCurrent,
        calibration_current: 10.0,
        resistance_calib_max_voltage: 2.0,
        current_lim: 10.0,
        // ボードのPGAゲイン16で表現できる範囲
        requested_current_range: 0.9 * 1.35 * SHUNT_CONDUCTANCE / AMPLIFIER_GAIN,
        ..Default::default()
    }
}
