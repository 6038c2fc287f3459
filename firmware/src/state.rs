//! グローバル共有状態管理
//!
//! 割り込みからも読む値はアトミックで共有します。
//! モーター本体は起動時に一度だけ初期化される `OnceLock` に置きます。

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::once_lock::OnceLock;
use embassy_sync::signal::Signal;
use g4_current_core::supervisor::MotorSupervisor;
use g4_current_core::{Motor, MotorError};

use crate::hardware::{BoardGateDriver, Tim1PowerStage};

pub type BoardMotor = Motor<Tim1PowerStage, BoardGateDriver, Board>;

/// モーター（起動時に初期化）
pub static MOTOR: OnceLock<BoardMotor> = OnceLock::new();

/// f32をビット列で保持するアトミック
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub const fn new(bits: u32) -> Self {
        Self(AtomicU32::new(bits))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed)
    }
}

/// f32::NANのビット列
const NAN_BITS: u32 = 0x7FC0_0000;

/// DCバス電圧 [V]（最初の計測まではNaN）
pub static VBUS_VOLTAGE: AtomicF32 = AtomicF32::new(NAN_BITS);

/// 過電圧/低電圧フラグ
pub static VOLTAGE_FAULT: AtomicBool = AtomicBool::new(false);

/// 最新の推定バス電流 [A]
pub static BUS_CURRENT: AtomicF32 = AtomicF32::new(0);

/// キャリブレーション開始要求
pub static CALIBRATION_REQUEST: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// 実行中のキャリブレーションの中断要求
pub static CALIBRATION_CANCEL: AtomicBool = AtomicBool::new(false);

/// ボード側のシステム状態
///
/// このボードにはブレーキ抵抗がないので常に使用可能として扱います。
pub struct Board;

impl MotorSupervisor for Board {
    fn vbus_voltage(&self) -> f32 {
        VBUS_VOLTAGE.load()
    }

    fn brake_resistor_armed(&self) -> bool {
        true
    }

    fn update_brake_current(&self, i_bus: f32) {
        BUS_CURRENT.store(i_bus);
    }

    fn do_fast_checks(&self) -> Result<(), MotorError> {
        if VOLTAGE_FAULT.load(Ordering::Relaxed) {
            return Err(MotorError::SystemLevel);
        }
        Ok(())
    }
}
