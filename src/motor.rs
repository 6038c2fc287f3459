//! モーター
//!
//! arm/disarm状態機械とPWMコンペア値のコミット手順を管理します。
//!
//! PWMタイマーはダブルバッファです。コンペア値とAOE（自動出力許可）は
//! 次の更新イベントでラッチされます。流れは以下の通りです:
//!  - [`Motor::arm`] がarmedフラグを立てる（ハードウェア出力はまだ無効）
//!  - 次の更新割り込みで制御則が出力を計算し、[`Motor::apply_pwm_timings`] が
//!    コンペア値とAOEを書き込む
//!  - その次の更新イベントでコンペア値がラッチされ、同時にMOEが立つ
//!
//! [`Motor::disarm`] はどの時点でもこの流れを中断できます。
//!
//! 割り込み処理は `interrupt.rs`、キャリブレーションは `calibration.rs` にあります。

mod calibration;
mod interrupt;

pub use calibration::StepDelay;

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::config::{
    MotorConfig, MotorHardwareConfig, MotorType, AMP_GAIN_MARGIN, AMP_MAX_OUTPUT_SWING,
};
use crate::control_law::{AlphaBetaController, ControlLaw};
use crate::current_sense::{CurrentSense, DcCalibration, PhaseCurrents};
use crate::error::{ErrorFlags, MotorError};
use crate::foc::ONE_BY_SQRT3;
use crate::hardware::{GateDriver, PowerStage};
use crate::supervisor::{CurrentLimiter, MotorSupervisor};

/// 電流制御器ゲイン
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CurrentGains {
    pub p_gain: f32,
    pub i_gain: f32,
}

impl CurrentGains {
    /// 抵抗・インダクタンスと制御帯域からゲインを計算
    ///
    /// 極零相殺: Kp = ω·L、Ki = (R/L)·Kp
    pub fn from_plant(bandwidth: f32, resistance: f32, inductance: f32) -> Self {
        let p_gain = bandwidth * inductance;
        let plant_pole = resistance / inductance;
        Self {
            p_gain,
            i_gain: plant_pole * p_gain,
        }
    }
}

/// 排他領域で保護されるモーター状態
pub(crate) struct MotorState<P, G> {
    power_stage: P,
    gate_driver: G,
    hw: MotorHardwareConfig,
    config: MotorConfig,
    armed: bool,
    /// arm中の制御則
    control_law: Option<ControlLaw>,
    /// disarmで外された制御則（呼び出し側が回収する）
    detached_law: Option<ControlLaw>,
    errors: ErrorFlags,
    is_calibrated: bool,
    current_gains: CurrentGains,
    sense: CurrentSense,
    /// 最新の電流計測値（オフセット・リーク補正済み、不明ならNaN）
    current_meas: PhaseCurrents,
    /// 推定バス電流 [A]
    i_bus: f32,
    effective_current_lim: f32,
    /// 前回割り込み時のカウント方向（起動直後はNone）
    counting_down: Option<bool>,
    /// タイマークロック単位のタイムスタンプ（ラップする）
    last_update_timestamp: u32,
    /// 出力が有効になる前に「初期化中」を許容した連続回数
    init_cycles: u32,
    /// ロック解放後にブレーキ電流を更新する
    brake_update_pending: bool,
}

impl<P: PowerStage, G: GateDriver> MotorState<P, G> {
    fn disarm(&mut self) -> bool {
        let was_armed = self.armed;
        if was_armed {
            self.gate_driver.set_enabled(false);
        }
        self.armed = false;
        // 古いAOEで次の更新イベントに出力が復活しないようにする
        self.power_stage.set_auto_output_enable(false);
        self.power_stage.disable_output();
        if let Some(law) = self.control_law.take() {
            self.detached_law = Some(law);
        }
        if was_armed {
            self.i_bus = 0.0;
            self.brake_update_pending = true;
            info!("Motor disarmed");
        }
        was_armed
    }

    fn disarm_with_error(&mut self, error: MotorError) {
        if !self.errors.contains(error.into()) {
            error!("Motor error: {}", error);
        }
        self.errors.insert(error.into());
        self.disarm();
        self.brake_update_pending = true;
    }

    fn apply_pwm_timings(&mut self, timings: [u16; 3], tentative: bool, brake_armed: bool) {
        if !brake_armed {
            self.disarm_with_error(MotorError::BrakeResistorDisarmed);
        }

        self.power_stage.set_compare(timings);

        if !tentative && self.armed {
            // 次の更新イベントでMOEが自動的に立つ
            self.power_stage.set_auto_output_enable(true);
        }

        // 書き込み中に更新イベントが起きた場合、シャドウレジスタの
        // 中身が保証できないのでdisarmする
        if self.power_stage.update_event_occurred() {
            self.disarm_with_error(MotorError::ControlDeadlineMissed);
        }
    }

    fn update_current_gains(&mut self) {
        self.current_gains = CurrentGains::from_plant(
            self.config.current_control_bandwidth,
            self.config.phase_resistance,
            self.config.phase_inductance,
        );
    }
}

/// 1軸分のモーター
///
/// 割り込みとフォアグラウンドの両方から `&self` で呼ばれます。状態は
/// すべて1つのクリティカルセクションMutexで保護されます。
pub struct Motor<P, G, S> {
    state: Mutex<CriticalSectionRawMutex, RefCell<MotorState<P, G>>>,
    supervisor: S,
}

impl<P, G, S> Motor<P, G, S>
where
    P: PowerStage,
    G: GateDriver,
    S: MotorSupervisor,
{
    /// 新しいモーターを作成（disarm状態）
    ///
    /// # 引数
    /// * `power_stage` - PWMタイマー
    /// * `gate_driver` - ゲートドライバ
    /// * `supervisor` - バス電圧・ブレーキ抵抗などのシステム側状態
    /// * `hw` - ボード固有の設定
    /// * `config` - モーター設定
    pub fn new(
        power_stage: P,
        gate_driver: G,
        supervisor: S,
        hw: MotorHardwareConfig,
        config: MotorConfig,
    ) -> Self {
        let mut state = MotorState {
            power_stage,
            gate_driver,
            hw,
            config,
            armed: false,
            control_law: None,
            detached_law: None,
            errors: ErrorFlags::empty(),
            is_calibrated: config.pre_calibrated,
            current_gains: CurrentGains {
                p_gain: 0.0,
                i_gain: 0.0,
            },
            sense: CurrentSense::new(&hw),
            current_meas: PhaseCurrents::UNKNOWN,
            i_bus: 0.0,
            effective_current_lim: config.current_lim,
            counting_down: None,
            last_update_timestamp: 0,
            init_cycles: 0,
            brake_update_pending: false,
        };
        state.update_current_gains();
        Self {
            state: Mutex::new(RefCell::new(state)),
            supervisor,
        }
    }

    /// 排他領域で状態を操作する
    ///
    /// ブレーキ電流の更新は再入し得るので、ロック解放後に1回だけ行う。
    fn with_state<R>(&self, f: impl FnOnce(&mut MotorState<P, G>, &S) -> R) -> R {
        let (result, brake_update) = self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            let result = f(&mut state, &self.supervisor);
            let pending = core::mem::take(&mut state.brake_update_pending);
            (result, pending.then_some(state.i_bus))
        });
        if let Some(i_bus) = brake_update {
            self.supervisor.update_brake_current(i_bus);
        }
        result
    }

    pub fn supervisor(&self) -> &S {
        &self.supervisor
    }

    /// ゲートドライバと電流センスアンプを設定
    ///
    /// 要求レンジを満たすアンプゲインを求め、実際に設定されたゲインから
    /// 電流換算係数と許容電流を導出します。
    pub fn setup(&self) -> Result<(), MotorError> {
        self.with_state(|s, _| {
            let max_unity_gain_current =
                AMP_GAIN_MARGIN * AMP_MAX_OUTPUT_SWING * s.hw.shunt_conductance;
            let requested_gain = max_unity_gain_current / s.config.requested_current_range;

            let actual_gain = s
                .gate_driver
                .configure(requested_gain)
                .ok_or(MotorError::DrvFault)?;
            s.sense
                .set_amplifier_gain(actual_gain, max_unity_gain_current);
            info!(
                "Current sense gain: requested={}, actual={}, max current={}A",
                requested_gain,
                actual_gain,
                s.sense.max_allowed_current()
            );

            if !s.gate_driver.init() {
                warn!("Gate driver init failed");
            }
            Ok(())
        })
    }

    /// 設定を差し替え、派生値を再計算
    pub fn set_config(&self, config: MotorConfig) {
        self.with_state(|s, _| {
            s.config = config;
            s.is_calibrated = config.pre_calibrated;
            s.update_current_gains();
        })
    }

    pub fn config(&self) -> MotorConfig {
        self.with_state(|s, _| s.config)
    }

    /// 制御則を渡してarmする
    ///
    /// ハードウェア出力はまだ有効にしません。次のPWM更新で制御則が
    /// 有効な出力を返したときにAOEがセットされます。
    ///
    /// エラーフラグが残っている場合やブレーキ抵抗が使えない場合は
    /// falseを返し、制御則は [`Motor::reclaim_control_law`] で回収できます。
    pub fn arm(&self, law: ControlLaw) -> bool {
        self.with_state(|s, supervisor| {
            let mut law = law;
            if !s.errors.is_empty() {
                warn!("Arm refused, errors: {=u32:#x}", s.errors.bits());
                s.detached_law = Some(law);
                return false;
            }

            supervisor.reset_controllers();
            law.reset();

            if !supervisor.brake_resistor_armed() {
                warn!("Arm refused, brake resistor disarmed");
                s.detached_law = Some(law);
                return false;
            }

            if let Some(previous) = s.control_law.replace(law) {
                s.detached_law = Some(previous);
            }
            s.init_cycles = 0;
            if !s.armed {
                s.gate_driver.set_enabled(true);
                info!("Motor armed");
            }
            s.armed = true;
            true
        })
    }

    /// 出力を即座に無効化してdisarm
    ///
    /// 何度呼んでも安全です。armされていた場合はtrueを返します。
    pub fn disarm(&self) -> bool {
        self.with_state(|s, _| s.disarm())
    }

    /// エラーフラグをセットしてdisarm
    pub fn disarm_with_error(&self, error: MotorError) {
        self.with_state(|s, _| s.disarm_with_error(error))
    }

    /// エラーフラグを明示的にクリア
    pub fn clear_errors(&self) {
        self.with_state(|s, _| s.errors = ErrorFlags::empty())
    }

    /// disarmで外された（またはarmを拒否された）制御則を取り出す
    pub fn reclaim_control_law(&self) -> Option<ControlLaw> {
        self.with_state(|s, _| s.detached_law.take())
    }

    /// PWMコンペア値を書き込む
    ///
    /// # 引数
    /// * `timings` - 3相のコンペア値 [タイマークロック]
    /// * `tentative` - trueの場合は出力を有効にしない（安全側の仮書き込み）
    pub fn apply_pwm_timings(&self, timings: [u16; 3], tentative: bool) {
        self.with_state(|s, supervisor| {
            s.apply_pwm_timings(timings, tentative, supervisor.brake_resistor_armed())
        })
    }

    /// ゲートドライバのフォルトチェック
    pub fn do_checks(&self) -> bool {
        self.with_state(|s, _| {
            s.gate_driver.do_checks();
            if !s.gate_driver.is_ready() {
                s.disarm_with_error(MotorError::DrvFault);
                return false;
            }
            true
        })
    }

    /// 実効電流制限を計算してトリップ判定用に保持 [A]
    ///
    /// 設定値、ハードウェア上限、各リミッタの最小値を取ります。
    pub fn effective_current_lim(&self, limiters: &[&dyn CurrentLimiter]) -> f32 {
        self.with_state(|s, supervisor| {
            let configured = s.config.current_lim;
            let hardware_lim = match s.config.motor_type {
                // ジンバルモーターは電圧制御
                MotorType::Gimbal => 0.98 * ONE_BY_SQRT3 * supervisor.vbus_voltage(),
                _ => s.sense.max_allowed_current(),
            };
            let current_lim = limiters
                .iter()
                .map(|limiter| limiter.get_current_limit(configured))
                .fold(configured.min(hardware_lim), f32::min);
            s.effective_current_lim = current_lim;
            current_lim
        })
    }

    /// 出力可能な最大トルク [Nm]
    ///
    /// # 引数
    /// * `rotor_flux` - 誘導モーターのロータ磁束（他のモーターでは無視）
    pub fn max_available_torque(&self, rotor_flux: f32) -> f32 {
        self.with_state(|s, _| {
            let mut max_torque = s.effective_current_lim * s.config.torque_constant;
            if s.config.motor_type == MotorType::Acim {
                max_torque *= rotor_flux;
            }
            max_torque.max(0.0).min(s.config.torque_lim)
        })
    }

    pub fn is_armed(&self) -> bool {
        self.with_state(|s, _| s.armed)
    }

    pub fn errors(&self) -> ErrorFlags {
        self.with_state(|s, _| s.errors)
    }

    pub fn is_calibrated(&self) -> bool {
        self.with_state(|s, _| s.is_calibrated)
    }

    pub fn current_gains(&self) -> CurrentGains {
        self.with_state(|s, _| s.current_gains)
    }

    /// 最新の相電流 [A]
    pub fn current_meas(&self) -> PhaseCurrents {
        self.with_state(|s, _| s.current_meas)
    }

    /// 推定バス電流 [A]
    pub fn bus_current(&self) -> f32 {
        self.with_state(|s, _| s.i_bus)
    }

    pub fn dc_calibration(&self) -> DcCalibration {
        self.with_state(|s, _| *s.sense.dc_calibration())
    }

    /// 最新のリーク電流 [A]
    pub fn leakage(&self) -> f32 {
        self.with_state(|s, _| s.sense.leakage())
    }

    /// 電流センスが表現できる最大電流 [A]
    pub fn max_allowed_current(&self) -> f32 {
        self.with_state(|s, _| s.sense.max_allowed_current())
    }

    pub fn phase_current_rev_gain(&self) -> f32 {
        self.with_state(|s, _| s.sense.phase_current_rev_gain())
    }

    /// 最後の更新割り込みのタイムスタンプ [タイマークロック]
    pub fn timestamp(&self) -> u32 {
        self.with_state(|s, _| s.last_update_timestamp)
    }
}
