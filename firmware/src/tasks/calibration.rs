//! キャリブレーションタスク
//!
//! 要求を受けるたびに相抵抗・相インダクタンスを計測し、結果をログに出します。

use core::sync::atomic::Ordering;

use embassy_time::Timer;
use g4_current_core::StepDelay;

use crate::state::{CALIBRATION_CANCEL, CALIBRATION_REQUEST, MOTOR};

/// embassy-timeによるポーリング待ち
struct TimerDelay;

impl StepDelay for TimerDelay {
    async fn delay_ms(&mut self, ms: u32) {
        Timer::after_millis(ms as u64).await;
    }
}

#[embassy_executor::task]
pub async fn calibration_task() {
    let motor = MOTOR.get().await;
    info!("Calibration task started");

    loop {
        CALIBRATION_REQUEST.wait().await;
        CALIBRATION_CANCEL.store(false, Ordering::Relaxed);

        if !motor.errors().is_empty() {
            warn!(
                "Calibration skipped, errors: {=u32:#x}",
                motor.errors().bits()
            );
            continue;
        }

        let result = motor
            .run_calibration(&mut TimerDelay, || {
                CALIBRATION_CANCEL.load(Ordering::Relaxed)
            })
            .await;

        match result {
            Ok(()) => {
                let config = motor.config();
                let gains = motor.current_gains();
                info!(
                    "Calibration OK: R={} ohm, L={} H, Kp={}, Ki={}",
                    config.phase_resistance,
                    config.phase_inductance,
                    gains.p_gain,
                    gains.i_gain
                );
            }
            Err(error) => error!("Calibration failed: {}", error),
        }
    }
}
