//! Payload codes carried by Status, Mode, Warning, Error and Calibration
//! messages

/// Operating mode of the device context (Mode command and Status report)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum OperatingMode {
    Standby = 0,
    Feeding = 1,
    Calibrating = 2,
    Autotuning = 3,
    Emergency = 4,
}

impl OperatingMode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(OperatingMode::Standby),
            1 => Some(OperatingMode::Feeding),
            2 => Some(OperatingMode::Calibrating),
            3 => Some(OperatingMode::Autotuning),
            4 => Some(OperatingMode::Emergency),
            _ => None,
        }
    }
}

/// Fatal conditions for the current operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum ErrorCode {
    None = 0,
    /// Stepper driver does not answer on its configuration link
    DriverConnection = 1,
    /// Drivetrain fault that could not be classified
    StepperUnknown = 2,
    /// Slider is jammed and could not be freed
    StepperJammed = 3,
    /// Load cell does not deliver samples
    ScaleConnection = 4,
    /// Persistent store unavailable
    FileSystem = 5,
    /// Too many feed cycles without dispensed food
    FeedCycles = 6,
    /// Stall autotune fell below the sensitivity floor
    StallCalibration = 7,
    /// Inter-context channel overflowed or carried an unexpected message
    ChannelFault = 8,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(ErrorCode::None),
            1 => Some(ErrorCode::DriverConnection),
            2 => Some(ErrorCode::StepperUnknown),
            3 => Some(ErrorCode::StepperJammed),
            4 => Some(ErrorCode::ScaleConnection),
            5 => Some(ErrorCode::FileSystem),
            6 => Some(ErrorCode::FeedCycles),
            7 => Some(ErrorCode::StallCalibration),
            8 => Some(ErrorCode::ChannelFault),
            _ => None,
        }
    }

    pub fn is_none(self) -> bool {
        self == ErrorCode::None
    }
}

/// Degraded-but-safe conditions; the operation continued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum WarningCode {
    None = 0,
    /// Slider was stuck and has been freed
    StepperFreed = 1,
    /// Home sensor is suspect; homed with stall detection instead
    EndstopSuspect = 2,
    /// Stall during a feed cycle that could not be compensated
    StallDetected = 3,
    /// Stall sensitivity has been lowered after a stall
    StallReduced = 4,
    /// No stored scale calibration; built-in default in use
    ScaleUncalibrated = 5,
    /// No stored stall thresholds; built-in default in use
    StallUncalibrated = 6,
    /// Mode command with an unknown mode value
    InvalidMode = 7,
    /// Food container is running low
    RefillFood = 8,
}

impl WarningCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(WarningCode::None),
            1 => Some(WarningCode::StepperFreed),
            2 => Some(WarningCode::EndstopSuspect),
            3 => Some(WarningCode::StallDetected),
            4 => Some(WarningCode::StallReduced),
            5 => Some(WarningCode::ScaleUncalibrated),
            6 => Some(WarningCode::StallUncalibrated),
            7 => Some(WarningCode::InvalidMode),
            8 => Some(WarningCode::RefillFood),
            _ => None,
        }
    }

    pub fn is_none(self) -> bool {
        self == WarningCode::None
    }
}

/// Observable states of a scale calibration session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum CalibrationStep {
    /// Waiting for the scale to be emptied
    Waiting = 0,
    /// Zeroing the empty scale
    Tare = 1,
    /// Waiting for the reference mass
    PlaceReference = 2,
    /// Computing the scale factor
    Computing = 3,
    /// Persisting the scale factor
    Saving = 4,
    Finished = 5,
    Error = 6,
}

impl CalibrationStep {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(CalibrationStep::Waiting),
            1 => Some(CalibrationStep::Tare),
            2 => Some(CalibrationStep::PlaceReference),
            3 => Some(CalibrationStep::Computing),
            4 => Some(CalibrationStep::Saving),
            5 => Some(CalibrationStep::Finished),
            6 => Some(CalibrationStep::Error),
            _ => None,
        }
    }

    /// Session has reached a state it will not leave on its own
    pub fn is_terminal(self) -> bool {
        matches!(self, CalibrationStep::Finished | CalibrationStep::Error)
    }
}
