use thiserror::Error;

/// Typed failures of core operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IrrigoError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("timeout waiting for sensor")]
    Timeout,
    #[error("invalid data: {0}")]
    Validation(String),
    #[error("channel {channel} out of range (0..{count})")]
    InvalidChannel { channel: usize, count: usize },
    #[error("calibration incomplete: {0}")]
    CalibrationState(String),
    #[error("insufficient samples: got {obtained} valid of {requested} requested")]
    InsufficientSamples { obtained: u32, requested: u32 },
    #[error("{actuator} journal shows an interrupted move near position {position}; acknowledge before moving")]
    CrashConsistency { actuator: String, position: i32 },
    #[error("{0} is busy")]
    Busy(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("io error: {0}")]
    Io(String),
}

/// Coarse error classes; each maps to a distinct recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Device not ready in time; retryable.
    Timing,
    /// Malformed or out-of-range input; the offending unit is rejected.
    Validation,
    /// A calibration stage has not been completed yet.
    CalibrationState,
    /// Interrupted move detected; needs operator acknowledgment.
    CrashConsistency,
    /// Another operation already owns the resource.
    ResourceContention,
    Hardware,
    State,
    Io,
}

impl IrrigoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IrrigoError::Timeout => ErrorKind::Timing,
            IrrigoError::InsufficientSamples { .. } => ErrorKind::Timing,
            IrrigoError::Validation(_) | IrrigoError::InvalidChannel { .. } => {
                ErrorKind::Validation
            }
            IrrigoError::CalibrationState(_) => ErrorKind::CalibrationState,
            IrrigoError::CrashConsistency { .. } => ErrorKind::CrashConsistency,
            IrrigoError::Busy(_) => ErrorKind::ResourceContention,
            IrrigoError::Hardware(_) | IrrigoError::HardwareFault(_) => ErrorKind::Hardware,
            IrrigoError::State(_) => ErrorKind::State,
            IrrigoError::Io(_) => ErrorKind::Io,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timing | ErrorKind::ResourceContention)
    }
}

/// Caveat attached to an otherwise successful result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftWarning {
    /// Only one sample was requested; the spread is the sentinel value.
    SingleSample,
    /// Some samples failed and were dropped.
    SamplesDropped { requested: u32, obtained: u32 },
}

impl std::fmt::Display for SoftWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SoftWarning::SingleSample => f.write_str("single sample, no spread estimate"),
            SoftWarning::SamplesDropped {
                requested,
                obtained,
            } => write!(f, "{obtained} of {requested} samples valid"),
        }
    }
}

pub type Result<T> = std::result::Result<T, IrrigoError>;
pub use eyre::Report;
