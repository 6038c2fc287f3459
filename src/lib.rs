//! 電流制御コア
//!
//! PWMタイマー割り込みの中で電流計測・DCオフセット校正・電流制限・制御則の
//! 呼び出しを行い、PWMタイミングをパワーステージへ書き戻します。
//! 位相抵抗／インダクタンス計測用の制御則とキャリブレーション手順も含みます。
//!
//! レジスタ操作は一切含まず、ハードウェアは [`hardware`] と [`supervisor`] の
//! トレイト越しに扱います。
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod config;
pub mod control_law;
pub mod current_sense;
pub mod error;
pub mod foc;
pub mod hardware;
pub mod motor;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use config::{MotorConfig, MotorHardwareConfig, MotorType};
pub use control_law::{AlphaBetaController, ControlLaw};
pub use error::{ErrorFlags, MotorError};
pub use motor::{Motor, StepDelay};
