//! モーター自動キャリブレーション
//!
//! 計測用の制御則を渡してarmし、1ms刻みでポーリングしながら計測の
//! 完了を待ちます。結果は設定値に書き戻されます。

use super::Motor;
use crate::config::{
    MotorType, CALIBRATION_STEP_MS, INDUCTANCE_MEAS_MAX_STEPS, MAX_PHASE_INDUCTANCE,
    MIN_PHASE_INDUCTANCE, RESISTANCE_MEAS_MAX_STEPS,
};
use crate::control_law::{
    ControlLaw, InductanceMeasurementControlLaw, ResistanceMeasurementControlLaw,
};
use crate::error::MotorError;
use crate::hardware::{GateDriver, PowerStage};
use crate::supervisor::MotorSupervisor;

/// キャリブレーションのポーリング待ち
///
/// ファームウェアでは `embassy_time::Timer`、テストではシミュレーションを進めます。
#[allow(async_fn_in_trait)]
pub trait StepDelay {
    async fn delay_ms(&mut self, ms: u32);
}

impl<P, G, S> Motor<P, G, S>
where
    P: PowerStage,
    G: GateDriver,
    S: MotorSupervisor,
{
    /// 自動disarmかキャンセルまで待つ（最大 `max_steps` ステップ）
    async fn wait_while_armed<D, C>(&self, max_steps: u32, delay: &mut D, cancelled: &mut C)
    where
        D: StepDelay,
        C: FnMut() -> bool,
    {
        for _ in 0..max_steps {
            if cancelled() || !self.is_armed() {
                break;
            }
            delay.delay_ms(CALIBRATION_STEP_MS).await;
        }
    }

    /// 計測用の制御則でarmする
    ///
    /// 拒否された場合は制御則を回収し、設定には触れずにエラーを返します。
    fn arm_for_measurement(&self, law: ControlLaw) -> Result<(), MotorError> {
        if self.arm(law) {
            return Ok(());
        }
        self.reclaim_control_law();
        // エラーフラグがなければ拒否の理由はブレーキ抵抗
        Err(self
            .errors()
            .first()
            .unwrap_or(MotorError::BrakeResistorDisarmed))
    }

    /// 失敗時に返すエラー（記録済みのエラーがなければ汎用エラー）
    fn failure(&self) -> MotorError {
        self.errors().first().unwrap_or(MotorError::ControllerFailed)
    }

    /// 相抵抗を計測 [Ω]
    ///
    /// # 引数
    /// * `test_current` - 計測電流 [A]
    /// * `max_voltage` - 積分器の電圧上限 [V]
    /// * `delay` - ポーリング待ち
    /// * `cancelled` - 毎ステップ確認する中断条件
    pub async fn measure_phase_resistance<D, C>(
        &self,
        test_current: f32,
        max_voltage: f32,
        delay: &mut D,
        mut cancelled: C,
    ) -> Result<f32, MotorError>
    where
        D: StepDelay,
        C: FnMut() -> bool,
    {
        info!(
            "Measuring phase resistance: I={}A, Vmax={}V",
            test_current, max_voltage
        );
        let period = self.with_state(|s, _| s.hw.timer.current_meas_period());
        let law = ResistanceMeasurementControlLaw::new(test_current, max_voltage, period);
        self.arm_for_measurement(ControlLaw::Resistance(law))?;

        self.wait_while_armed(RESISTANCE_MEAS_MAX_STEPS, delay, &mut cancelled)
            .await;

        let success = self.is_armed();
        self.disarm();

        let resistance = match self.reclaim_control_law() {
            Some(ControlLaw::Resistance(law)) => law.resistance(),
            _ => f32::NAN,
        };
        if !resistance.is_finite() {
            // 計測結果のエラーなのでモーターは既にdisarm済み
            self.disarm_with_error(MotorError::PhaseResistanceOutOfRange);
            return Err(MotorError::PhaseResistanceOutOfRange);
        }
        self.with_state(|s, _| s.config.phase_resistance = resistance);

        if !success {
            return Err(self.failure());
        }
        info!("Phase resistance: {} ohm", resistance);
        Ok(resistance)
    }

    /// 相インダクタンスを計測 [H]
    ///
    /// # 引数
    /// * `test_voltage` - 矩形波の振幅 [V]
    /// * `delay` - ポーリング待ち
    /// * `cancelled` - 毎ステップ確認する中断条件
    pub async fn measure_phase_inductance<D, C>(
        &self,
        test_voltage: f32,
        delay: &mut D,
        mut cancelled: C,
    ) -> Result<f32, MotorError>
    where
        D: StepDelay,
        C: FnMut() -> bool,
    {
        info!("Measuring phase inductance: V={}V", test_voltage);
        let clock_hz = self.with_state(|s, _| s.hw.timer.clock_hz);
        let law = InductanceMeasurementControlLaw::new(test_voltage, clock_hz);
        self.arm_for_measurement(ControlLaw::Inductance(law))?;

        self.wait_while_armed(INDUCTANCE_MEAS_MAX_STEPS, delay, &mut cancelled)
            .await;

        let success = self.is_armed();
        self.disarm();

        let inductance = match self.reclaim_control_law() {
            Some(ControlLaw::Inductance(law)) => law.inductance(),
            _ => f32::NAN,
        };
        if !(MIN_PHASE_INDUCTANCE..=MAX_PHASE_INDUCTANCE).contains(&inductance) {
            warn!("Phase inductance out of range: {} H", inductance);
            self.with_state(|s, _| s.errors.insert(MotorError::PhaseInductanceOutOfRange.into()));
            return Err(MotorError::PhaseInductanceOutOfRange);
        }
        self.with_state(|s, _| s.config.phase_inductance = inductance);

        if !success {
            return Err(self.failure());
        }
        info!("Phase inductance: {} H", inductance);
        Ok(inductance)
    }

    /// モーター種別に応じたキャリブレーションを実行
    ///
    /// 電流センス付きモーター（HighCurrent / ACIM）は抵抗→インダクタンスの順に
    /// 計測します。ジンバルモーターは電圧制御なので計測しません。
    /// 成功したら電流制御ゲインを更新し、キャリブレーション済みにします。
    pub async fn run_calibration<D, C>(&self, delay: &mut D, mut cancelled: C) -> Result<(), MotorError>
    where
        D: StepDelay,
        C: FnMut() -> bool,
    {
        let config = self.config();
        match config.motor_type {
            MotorType::HighCurrent | MotorType::Acim => {
                self.measure_phase_resistance(
                    config.calibration_current,
                    config.resistance_calib_max_voltage,
                    delay,
                    &mut cancelled,
                )
                .await?;
                self.measure_phase_inductance(
                    config.resistance_calib_max_voltage,
                    delay,
                    &mut cancelled,
                )
                .await?;
            }
            MotorType::Gimbal => {
                info!("Gimbal motor: no calibration needed");
            }
        }

        self.with_state(|s, _| {
            s.update_current_gains();
            s.is_calibrated = true;
        });
        info!("Motor calibration completed");
        Ok(())
    }
}
