//! システム側の協調オブジェクト
//!
//! バス電圧、ブレーキ抵抗、システムレベルの高速チェックなど、
//! モーターの外側で管理される状態へのインターフェースです。

use crate::error::MotorError;

/// モーターを見守るシステム側の状態
///
/// 割り込みコンテキストからも呼ばれるため、実装はブロックしてはいけません。
/// [`MotorSupervisor::update_brake_current`] 以外はモーターの状態を借用したまま
/// 呼ばれるので、実装から `Motor` のメソッドを呼んではいけません（二重借用で
/// panicします）。
pub trait MotorSupervisor {
    /// DCバス電圧 [V]。不明な場合はNaN
    fn vbus_voltage(&self) -> f32;

    /// ブレーキ抵抗が使用可能か。ブレーキ抵抗がないボードは常にtrue
    fn brake_resistor_armed(&self) -> bool;

    /// 推定バス電流をブレーキ抵抗制御へ通知 [A]
    ///
    /// モーターのロック外で呼ばれるので、ここからモーターを
    /// disarmしても構いません。
    fn update_brake_current(&self, i_bus: f32);

    /// 電流計測ごとに呼ばれる高速チェック（過電圧／低電圧など）
    ///
    /// 異常は戻り値で報告します。モーターのdisarmは呼び出し側が行います。
    fn do_fast_checks(&self) -> Result<(), MotorError> {
        Ok(())
    }

    /// arm時にコントローラの積分器などをリセット
    fn reset_controllers(&self) {}
}

impl<T: MotorSupervisor + ?Sized> MotorSupervisor for &T {
    fn vbus_voltage(&self) -> f32 {
        (**self).vbus_voltage()
    }

    fn brake_resistor_armed(&self) -> bool {
        (**self).brake_resistor_armed()
    }

    fn update_brake_current(&self, i_bus: f32) {
        (**self).update_brake_current(i_bus)
    }

    fn do_fast_checks(&self) -> Result<(), MotorError> {
        (**self).do_fast_checks()
    }

    fn reset_controllers(&self) {
        (**self).reset_controllers()
    }
}

/// 軸側の電流制限（温度ディレーティングなど）
pub trait CurrentLimiter {
    /// 設定された電流制限を受け取り、このリミッタが許す電流を返す [A]
    fn get_current_limit(&self, configured_limit: f32) -> f32;
}
