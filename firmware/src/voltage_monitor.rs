//! DCバス電圧監視
//!
//! M1_BUS_VOLTAGE（PC1ピン）の分圧をフィルタし、過電圧/低電圧を判定します。
//! 判定結果はモーターの高速チェックから参照されます。

use crate::config::vbus;

/// 電圧監視パラメータ
pub struct VoltageMonitorConfig {
    /// 分圧抵抗の上側 [Ω]
    pub r_upper: f32,
    /// 分圧抵抗の下側 [Ω]
    pub r_lower: f32,
    /// ADCフルスケール（12ビット = 4096）
    pub adc_max: u16,
    /// ADC基準電圧 [V]
    pub vref: f32,
    /// ローパスフィルタ係数（0.0-1.0、大きいほど応答速度が速い）
    pub filter_alpha: f32,
    /// 過電圧しきい値 [V]
    pub overvoltage_threshold: f32,
    /// 低電圧しきい値 [V]
    pub undervoltage_threshold: f32,
}

impl Default for VoltageMonitorConfig {
    fn default() -> Self {
        // V_bus = V_adc × (R_upper + R_lower) / R_lower ≈ V_adc × 11.09
        Self {
            r_upper: vbus::R_UPPER,
            r_lower: vbus::R_LOWER,
            adc_max: 4096,
            vref: 3.3,
            filter_alpha: vbus::FILTER_ALPHA,
            overvoltage_threshold: vbus::OVERVOLTAGE,
            undervoltage_threshold: vbus::UNDERVOLTAGE,
        }
    }
}

/// 電圧監視状態
#[derive(Copy, Clone)]
pub struct VoltageMonitorState {
    /// フィルタ済み電圧 [V]
    pub voltage: f32,
    pub overvoltage: bool,
    pub undervoltage: bool,
}

impl VoltageMonitorState {
    pub const fn new() -> Self {
        Self {
            voltage: 0.0,
            overvoltage: false,
            undervoltage: false,
        }
    }

    pub fn is_voltage_ok(&self) -> bool {
        !self.overvoltage && !self.undervoltage
    }
}

/// 電圧監視コントローラ
pub struct VoltageMonitor {
    config: VoltageMonitorConfig,
    state: VoltageMonitorState,
}

impl VoltageMonitor {
    pub fn new(config: VoltageMonitorConfig) -> Self {
        Self {
            config,
            state: VoltageMonitorState::new(),
        }
    }

    /// ADC生値からバス電圧を計算 [V]
    fn adc_to_voltage(&self, adc_raw: u16) -> f32 {
        let v_adc = (adc_raw as f32 / self.config.adc_max as f32) * self.config.vref;
        let divider_ratio = (self.config.r_upper + self.config.r_lower) / self.config.r_lower;
        v_adc * divider_ratio
    }

    fn check_thresholds(&mut self) {
        self.state.overvoltage = self.state.voltage > self.config.overvoltage_threshold;
        self.state.undervoltage = self.state.voltage < self.config.undervoltage_threshold;
    }

    /// フィルタを初回の読み取り値で初期化（起動直後の低電圧誤検出を防ぐ）
    pub fn initialize_with_adc(&mut self, adc_raw: u16) -> VoltageMonitorState {
        self.state.voltage = self.adc_to_voltage(adc_raw);
        self.check_thresholds();
        self.state
    }

    /// 新しいADC値でフィルタとしきい値判定を更新
    pub fn update(&mut self, adc_raw: u16) -> VoltageMonitorState {
        let voltage_raw = self.adc_to_voltage(adc_raw);
        self.state.voltage = self.config.filter_alpha * voltage_raw
            + (1.0 - self.config.filter_alpha) * self.state.voltage;
        self.check_thresholds();
        self.state
    }
}
