//! Motor error taxonomy
//!
//! Every fault detected by the motor core is "disarm and report": it sets a
//! sticky bit in [`ErrorFlags`] and the motor is disarmed. Nothing here is
//! retried automatically and flags are only cleared by an explicit call.

use bitflags::bitflags;

bitflags! {
    /// Sticky error bitmask of a motor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ErrorFlags: u32 {
        const PHASE_RESISTANCE_OUT_OF_RANGE = 1 << 0;
        const PHASE_INDUCTANCE_OUT_OF_RANGE = 1 << 1;
        const DRV_FAULT = 1 << 3;
        const CONTROL_DEADLINE_MISSED = 1 << 4;
        const MODULATION_MAGNITUDE = 1 << 7;
        const CURRENT_SENSE_SATURATION = 1 << 10;
        const CURRENT_LIMIT_VIOLATION = 1 << 12;
        const MODULATION_IS_NAN = 1 << 16;
        const TIMER_UPDATE_MISSED = 1 << 19;
        const CONTROLLER_FAILED = 1 << 21;
        const I_BUS_OUT_OF_RANGE = 1 << 22;
        const BRAKE_RESISTOR_DISARMED = 1 << 23;
        const SYSTEM_LEVEL = 1 << 24;
        const UNKNOWN_CURRENT_MEASUREMENT = 1 << 25;
        const UNKNOWN_VBUS_VOLTAGE = 1 << 26;
        const CONTROLLER_INITIALIZING = 1 << 27;
        const I_LEAK_OUT_OF_RANGE = 1 << 28;
    }
}

/// A single error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum MotorError {
    PhaseResistanceOutOfRange = ErrorFlags::PHASE_RESISTANCE_OUT_OF_RANGE.bits(),
    PhaseInductanceOutOfRange = ErrorFlags::PHASE_INDUCTANCE_OUT_OF_RANGE.bits(),
    DrvFault = ErrorFlags::DRV_FAULT.bits(),
    ControlDeadlineMissed = ErrorFlags::CONTROL_DEADLINE_MISSED.bits(),
    ModulationMagnitude = ErrorFlags::MODULATION_MAGNITUDE.bits(),
    CurrentSenseSaturation = ErrorFlags::CURRENT_SENSE_SATURATION.bits(),
    CurrentLimitViolation = ErrorFlags::CURRENT_LIMIT_VIOLATION.bits(),
    ModulationIsNan = ErrorFlags::MODULATION_IS_NAN.bits(),
    TimerUpdateMissed = ErrorFlags::TIMER_UPDATE_MISSED.bits(),
    ControllerFailed = ErrorFlags::CONTROLLER_FAILED.bits(),
    IBusOutOfRange = ErrorFlags::I_BUS_OUT_OF_RANGE.bits(),
    BrakeResistorDisarmed = ErrorFlags::BRAKE_RESISTOR_DISARMED.bits(),
    SystemLevel = ErrorFlags::SYSTEM_LEVEL.bits(),
    UnknownCurrentMeasurement = ErrorFlags::UNKNOWN_CURRENT_MEASUREMENT.bits(),
    UnknownVbusVoltage = ErrorFlags::UNKNOWN_VBUS_VOLTAGE.bits(),
    ControllerInitializing = ErrorFlags::CONTROLLER_INITIALIZING.bits(),
    ILeakOutOfRange = ErrorFlags::I_LEAK_OUT_OF_RANGE.bits(),
}

impl From<MotorError> for ErrorFlags {
    fn from(error: MotorError) -> Self {
        ErrorFlags::from_bits_retain(error as u32)
    }
}

impl TryFrom<ErrorFlags> for MotorError {
    type Error = ErrorFlags;

    /// Succeeds only for a single named flag.
    fn try_from(flag: ErrorFlags) -> Result<Self, ErrorFlags> {
        Ok(match flag {
            ErrorFlags::PHASE_RESISTANCE_OUT_OF_RANGE => Self::PhaseResistanceOutOfRange,
            ErrorFlags::PHASE_INDUCTANCE_OUT_OF_RANGE => Self::PhaseInductanceOutOfRange,
            ErrorFlags::DRV_FAULT => Self::DrvFault,
            ErrorFlags::CONTROL_DEADLINE_MISSED => Self::ControlDeadlineMissed,
            ErrorFlags::MODULATION_MAGNITUDE => Self::ModulationMagnitude,
            ErrorFlags::CURRENT_SENSE_SATURATION => Self::CurrentSenseSaturation,
            ErrorFlags::CURRENT_LIMIT_VIOLATION => Self::CurrentLimitViolation,
            ErrorFlags::MODULATION_IS_NAN => Self::ModulationIsNan,
            ErrorFlags::TIMER_UPDATE_MISSED => Self::TimerUpdateMissed,
            ErrorFlags::CONTROLLER_FAILED => Self::ControllerFailed,
            ErrorFlags::I_BUS_OUT_OF_RANGE => Self::IBusOutOfRange,
            ErrorFlags::BRAKE_RESISTOR_DISARMED => Self::BrakeResistorDisarmed,
            ErrorFlags::SYSTEM_LEVEL => Self::SystemLevel,
            ErrorFlags::UNKNOWN_CURRENT_MEASUREMENT => Self::UnknownCurrentMeasurement,
            ErrorFlags::UNKNOWN_VBUS_VOLTAGE => Self::UnknownVbusVoltage,
            ErrorFlags::CONTROLLER_INITIALIZING => Self::ControllerInitializing,
            ErrorFlags::I_LEAK_OUT_OF_RANGE => Self::ILeakOutOfRange,
            _ => return Err(flag),
        })
    }
}

impl ErrorFlags {
    /// Lowest set error, if any.
    pub fn first(&self) -> Option<MotorError> {
        self.iter().next().and_then(|flag| MotorError::try_from(flag).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accumulate() {
        let mut flags = ErrorFlags::empty();
        assert!(flags.is_empty());
        flags.insert(MotorError::CurrentLimitViolation.into());
        flags.insert(MotorError::DrvFault.into());
        flags.insert(MotorError::CurrentLimitViolation.into());
        assert!(flags.contains(MotorError::CurrentLimitViolation.into()));
        assert!(flags.contains(ErrorFlags::DRV_FAULT));
        assert!(!flags.contains(MotorError::TimerUpdateMissed.into()));
        assert_eq!(flags.iter().count(), 2);
    }

    #[test]
    fn first_is_lowest_bit() {
        let mut flags = ErrorFlags::from(MotorError::ILeakOutOfRange);
        assert_eq!(flags.first(), Some(MotorError::ILeakOutOfRange));
        flags.insert(MotorError::PhaseInductanceOutOfRange.into());
        assert_eq!(flags.first(), Some(MotorError::PhaseInductanceOutOfRange));
        assert_eq!(ErrorFlags::empty().first(), None);
    }

    #[test]
    fn every_flag_maps_to_an_error() {
        for flag in ErrorFlags::all().iter() {
            let error = MotorError::try_from(flag).unwrap();
            assert_eq!(ErrorFlags::from(error), flag);
        }
        assert!(MotorError::try_from(ErrorFlags::DRV_FAULT | ErrorFlags::SYSTEM_LEVEL).is_err());
    }
}
