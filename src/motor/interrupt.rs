//! PWMタイマー更新割り込み
//!
//! センターアラインPWMの上下それぞれの折り返しで1回ずつ呼ばれます。
//!  - ダウンカウント開始時: 全相ハイサイドON（電流ゼロ）のサンプル → DCオフセット校正、PWM更新
//!  - アップカウント開始時: ローサイドON中のサンプル → 電流計測、制御則への入力
//!
//! 途中でエラーが起きてもdisarmするだけで、最後まで処理を続けます。
//! 例外は割り込み抜けの検出で、この場合は即座に戻ります。

use libm::fabsf;

use super::{Motor, MotorState};
use crate::current_sense::PhaseCurrents;
use crate::error::MotorError;
use crate::hardware::{GateDriver, PowerStage};
use crate::supervisor::MotorSupervisor;

impl<P, G, S> Motor<P, G, S>
where
    P: PowerStage,
    G: GateDriver,
    S: MotorSupervisor,
{
    /// タイマー更新イベントの処理
    ///
    /// # 引数
    /// * `adc` - 3相のADC生値。センサーがない相や取得できなかった相は `None`
    pub fn on_timer_update(&self, adc: [Option<u32>; 3]) {
        self.with_state(|s, supervisor| s.on_timer_update(adc, supervisor))
    }
}

impl<P: PowerStage, G: GateDriver> MotorState<P, G> {
    fn on_timer_update<S: MotorSupervisor>(&mut self, adc: [Option<u32>; 3], supervisor: &S) {
        self.power_stage.clear_update_event();
        self.last_update_timestamp = self
            .last_update_timestamp
            .wrapping_add(self.hw.timer.update_ticks());

        // アップカウント中ならベクトル0（実電流）、ダウンカウント中ならベクトル7（電流ゼロ）をサンプルした
        let counting_down = self.power_stage.is_counting_down();
        if self.counting_down == Some(counting_down) {
            self.disarm_with_error(MotorError::TimerUpdateMissed);
            return;
        }
        self.counting_down = Some(counting_down);

        let should_update_pwm = counting_down;
        let was_current_dc_calib = counting_down;
        let was_current_sense = !counting_down;

        if should_update_pwm {
            // 以降の処理が失敗しても前周期の値が残らないよう、50%を仮書き込み
            let half = self.hw.timer.half_timing();
            self.apply_pwm_timings(
                [half, half, half],
                true,
                supervisor.brake_resistor_armed(),
            );
        }

        let sample = self.sense.convert(adc);
        if sample.saturated {
            self.disarm_with_error(MotorError::CurrentSenseSaturation);
        }

        if was_current_dc_calib {
            self.sense.update_dc_calibration(
                sample.currents,
                self.hw.timer.current_meas_period(),
                self.config.dc_calib_tau,
            );
        }

        if was_current_sense {
            self.on_current_sense(sample.currents, supervisor);
        }

        if should_update_pwm {
            self.on_pwm_update(supervisor);
        }
    }

    fn on_current_sense<S: MotorSupervisor>(&mut self, currents: PhaseCurrents, supervisor: &S) {
        self.current_meas = self.sense.correct(currents, self.config.dc_calib_tau);

        // NaNは比較がfalseになるので、不明なリークでは止めない
        if fabsf(self.sense.leakage()) > self.config.i_leak_max {
            self.disarm_with_error(MotorError::ILeakOutOfRange);
        }

        // システムレベルのチェック（過電圧／低電圧など）
        if let Err(error) = supervisor.do_fast_checks() {
            self.disarm_with_error(error);
        }

        let i_trip = self.effective_current_lim + self.config.current_lim_margin;
        if self.current_meas.magnitude_exceeds(i_trip) {
            self.disarm_with_error(MotorError::CurrentLimitViolation);
        }

        let vbus = supervisor.vbus_voltage();
        let current_meas = self.current_meas;
        let timestamp = self.last_update_timestamp;
        let result = self
            .control_law
            .as_mut()
            .map(|law| law.on_phase_measurement(vbus, current_meas, timestamp));
        if let Some(Err(error)) = result {
            self.disarm_with_error(error);
        }
    }

    fn on_pwm_update<S: MotorSupervisor>(&mut self, supervisor: &S) {
        // 今回の出力は1周期後に有効になる
        let output_timestamp = self
            .last_update_timestamp
            .wrapping_add(2 * self.hw.timer.update_ticks());
        let result = match self.control_law.as_mut() {
            Some(law) => law.phase_timings(output_timestamp),
            None => Err(MotorError::ControllerFailed),
        };

        let mut i_bus = 0.0;
        if self.armed {
            match result {
                Ok(timings) => {
                    // タイミング1がDC-、0がDC+
                    i_bus = timings
                        .iter()
                        .zip(self.current_meas.as_array())
                        .map(|(t, i)| (0.5 - t) * i)
                        .sum();

                    let period = self.hw.timer.period_clocks as f32;
                    let next_timings = timings.map(|t| (t * period) as u16);
                    self.init_cycles = 0;
                    self.apply_pwm_timings(next_timings, false, supervisor.brake_resistor_armed());
                }
                // ソフトウェアではarm済みだがハードウェア出力がまだの間だけ許容
                Err(MotorError::ControllerInitializing)
                    if !self.power_stage.is_output_enabled()
                        && self.init_cycles < self.config.controller_init_timeout_cycles =>
                {
                    self.init_cycles += 1;
                }
                Err(error) => self.disarm_with_error(error),
            }
        }

        if !self.armed {
            i_bus = 0.0;
        }
        self.i_bus = i_bus;

        if !(i_bus >= self.config.i_bus_hard_min && i_bus <= self.config.i_bus_hard_max) {
            self.disarm_with_error(MotorError::IBusOutOfRange);
        }

        self.brake_update_pending = true;
    }
}

#[cfg(test)]
mod tests {
    use crate::config::MotorConfig;
    use crate::control_law::{AlphaBetaController, ControlLaw};
    use crate::error::MotorError;
    use crate::testing::{Bench, Plant};

    /// Fixed αβ output, optionally stuck in "initializing"
    struct Constant {
        output: Result<(f32, f32), MotorError>,
    }

    impl AlphaBetaController for Constant {
        fn reset(&mut self) {}

        fn on_measurement(
            &mut self,
            _vbus_voltage: f32,
            _i_alpha: f32,
            _i_beta: f32,
            _timestamp: u32,
        ) -> Result<(), MotorError> {
            Ok(())
        }

        fn get_output(&mut self, _output_timestamp: u32) -> Result<(f32, f32), MotorError> {
            self.output
        }
    }

    fn constant(output: Result<(f32, f32), MotorError>) -> ControlLaw {
        ControlLaw::External(Box::leak(Box::new(Constant { output })))
    }

    fn warm_bench(config: MotorConfig) -> Bench {
        let bench = Bench::new(Plant::default(), config);
        bench.warm_up();
        bench
    }

    #[test]
    fn test_missed_update_disarms_and_skips_cycle() {
        let bench = warm_bench(MotorConfig::default());
        assert!(bench.motor.arm(constant(Ok((0.1, 0.0)))));
        bench.run_half_cycles(4);
        assert!(bench.motor.is_armed());

        // Interrupt again without the counter changing direction
        let shadow_before = bench.timer().borrow().shadow;
        bench.motor.on_timer_update([Some(2048); 3]);

        assert!(!bench.motor.is_armed());
        assert!(bench.motor.errors().contains(MotorError::TimerUpdateMissed.into()));
        assert_eq!(bench.motor.errors().iter().count(), 1);
        assert_eq!(bench.timer().borrow().shadow, shadow_before);
    }

    #[test]
    fn test_first_interrupt_is_not_a_missed_update() {
        let bench = Bench::new(Plant::default(), MotorConfig::default());
        bench.run_half_cycles(1);
        assert!(bench.motor.errors().is_empty());
    }

    #[test]
    fn test_output_goes_live_after_two_updates() {
        let bench = warm_bench(MotorConfig::default());
        assert!(bench.motor.arm(constant(Ok((0.2, 0.0)))));
        assert!(!bench.timer().borrow().moe);
        // At most one PWM update plus one latch
        bench.run_half_cycles(3);
        let timer = bench.timer();
        let timer = timer.borrow();
        assert!(timer.moe);
        // Phase A high side conducts more than half the period
        assert!(timer.active[0] < 1750);
        assert!(timer.active[1] > 1750);
    }

    #[test]
    fn test_saturated_sample_disarms() {
        let bench = warm_bench(MotorConfig::default());
        assert!(bench.motor.arm(constant(Ok((0.0, 0.0)))));
        bench.run_half_cycles(2);
        bench.plant().borrow_mut().force_code = Some([100, 2048, 2048]);
        bench.run_half_cycles(2);
        assert!(!bench.motor.is_armed());
        assert!(bench.motor.errors().contains(MotorError::CurrentSenseSaturation.into()));
        assert!(!bench.timer().borrow().moe);
    }

    #[test]
    fn test_saturation_resets_dc_calibration() {
        let bench = warm_bench(MotorConfig::default());
        assert!(bench.motor.dc_calibration().running_since > 0.0);
        bench.plant().borrow_mut().force_code = Some([4000, 2048, 2048]);
        bench.run_half_cycles(2);
        let calib = bench.motor.dc_calibration();
        assert_eq!(calib.running_since, 0.0);
        assert_eq!(calib.offset.a, 0.0);
        assert!(!bench.motor.current_meas().is_valid());
    }

    #[test]
    fn test_current_limit_trip() {
        // Limit 10 A, no margin: trip when 2/3·ΣI² > 100
        let config = MotorConfig {
            current_lim: 10.0,
            current_lim_margin: 0.0,
            ..Default::default()
        };

        let bench = warm_bench(config);
        assert_eq!(bench.motor.effective_current_lim(&[]), 10.0);
        assert!(bench.motor.arm(constant(Ok((0.0, 0.0)))));
        // 2/3 · (64 + 16 + 16) = 64
        bench.plant().borrow_mut().force_current = Some([8.0, -4.0, -4.0]);
        bench.run_half_cycles(2);
        assert!(bench.motor.is_armed());
        assert!(bench.motor.errors().is_empty());

        // 2/3 · (196 + 49 + 49) = 196
        bench.plant().borrow_mut().force_current = Some([14.0, -7.0, -7.0]);
        bench.run_half_cycles(2);
        assert!(!bench.motor.is_armed());
        assert!(bench.motor.errors().contains(MotorError::CurrentLimitViolation.into()));
    }

    #[test]
    fn test_leakage_disarms() {
        let bench = warm_bench(MotorConfig::default());
        assert!(bench.motor.arm(constant(Ok((0.0, 0.0)))));
        bench.plant().borrow_mut().force_current = Some([1.0, 0.0, 0.0]);
        bench.run_half_cycles(2);
        assert!(!bench.motor.is_armed());
        assert!(bench.motor.errors().contains(MotorError::ILeakOutOfRange.into()));
        // The leakage-corrected sample is still published
        let meas = bench.motor.current_meas();
        assert!(meas.is_valid());
        assert!(meas.sum().abs() < 1e-4);
    }

    #[test]
    fn test_fast_check_failure_disarms() {
        let bench = warm_bench(MotorConfig::default());
        assert!(bench.motor.arm(constant(Ok((0.0, 0.0)))));
        bench.supervisor().set_fast_check(Err(MotorError::SystemLevel));
        bench.run_half_cycles(2);
        assert!(!bench.motor.is_armed());
        assert!(bench.motor.errors().contains(MotorError::SystemLevel.into()));
    }

    #[test]
    fn test_untrusted_offsets_fail_the_measurement() {
        // Not warmed up: the DC calibration has not settled yet
        let bench = Bench::new(Plant::default(), MotorConfig::default());
        let law = ControlLaw::Resistance(
            crate::control_law::ResistanceMeasurementControlLaw::new(1.0, 2.0, 1e-4),
        );
        assert!(bench.motor.arm(law));
        bench.run_half_cycles(4);
        assert!(!bench.motor.is_armed());
        assert!(bench
            .motor
            .errors()
            .contains(MotorError::UnknownCurrentMeasurement.into()));
    }

    #[test]
    fn test_initializing_tolerated_until_timeout() {
        let config = MotorConfig {
            controller_init_timeout_cycles: 5,
            ..Default::default()
        };
        let bench = warm_bench(config);
        assert!(bench.motor.arm(constant(Err(MotorError::ControllerInitializing))));

        // Five PWM updates are tolerated
        bench.run_half_cycles(10);
        assert!(bench.motor.is_armed());
        assert!(bench.motor.errors().is_empty());

        // The sixth is not
        bench.run_half_cycles(2);
        assert!(!bench.motor.is_armed());
        assert!(bench.motor.errors().contains(MotorError::ControllerInitializing.into()));
    }

    #[test]
    fn test_controller_failure_disarms() {
        let bench = warm_bench(MotorConfig::default());
        assert!(bench.motor.arm(constant(Err(MotorError::ControllerFailed))));
        bench.run_half_cycles(2);
        assert!(!bench.motor.is_armed());
        assert!(bench.motor.errors().contains(MotorError::ControllerFailed.into()));
    }

    #[test]
    fn test_modulation_error_disarms() {
        let bench = warm_bench(MotorConfig::default());
        assert!(bench.motor.arm(constant(Ok((1.5, 0.0)))));
        bench.run_half_cycles(2);
        assert!(!bench.motor.is_armed());
        assert!(bench.motor.errors().contains(MotorError::ModulationMagnitude.into()));
    }

    #[test]
    fn test_bus_current_estimate() {
        let config = MotorConfig {
            i_leak_max: 100.0,
            ..Default::default()
        };
        let bench = warm_bench(config);
        bench.plant().borrow_mut().force_current = Some([2.0, -1.0, -1.0]);
        assert!(bench.motor.arm(constant(Ok((0.3, 0.0)))));
        bench.run_half_cycles(4);
        assert!(bench.motor.is_armed());

        // t = 0.5 - (2/3)·(m - (max + min)/2) with m = (0.3, -0.15, -0.15)
        let t_a = 0.5 - (2.0 / 3.0) * (0.3 - 0.075);
        let t_bc = 0.5 - (2.0 / 3.0) * (-0.15 - 0.075);
        let meas = bench.motor.current_meas();
        let expected = (0.5 - t_a) * meas.a + (0.5 - t_bc) * (meas.b + meas.c);
        assert!((bench.motor.bus_current() - expected).abs() < 1e-4);
        assert!(bench.motor.bus_current() > 0.0);
        assert!(bench.supervisor().last_brake_current() > 0.0);

        bench.motor.disarm();
        assert_eq!(bench.motor.bus_current(), 0.0);
        assert_eq!(bench.supervisor().last_brake_current(), 0.0);
    }

    #[test]
    fn test_bus_current_hard_limit() {
        let config = MotorConfig {
            i_leak_max: 100.0,
            i_bus_hard_max: 0.1,
            ..Default::default()
        };
        let bench = warm_bench(config);
        bench.plant().borrow_mut().force_current = Some([2.0, -1.0, -1.0]);
        assert!(bench.motor.arm(constant(Ok((0.3, 0.0)))));
        bench.run_half_cycles(4);
        assert!(!bench.motor.is_armed());
        assert!(bench.motor.errors().contains(MotorError::IBusOutOfRange.into()));
        assert_eq!(bench.motor.bus_current(), 0.0);
    }

    #[test]
    fn test_timestamps_advance_per_update() {
        let bench = warm_bench(MotorConfig::default());
        let before = bench.motor.timestamp();
        bench.run_half_cycles(3);
        assert_eq!(bench.motor.timestamp().wrapping_sub(before), 3 * 3500);
    }
}
