//! Maps `Box<dyn Error>` from trait boundaries to typed `IrrigoError`.
//!
//! The traits in `irrigo_traits` use `Box<dyn Error + Send + Sync>` for maximum
//! flexibility; this module converts those to our typed error enum, with an
//! optional feature-gated path for `irrigo_hardware::HwError` downcasting.

use crate::error::IrrigoError;

/// Map a trait-boundary error to a typed `IrrigoError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> IrrigoError {
    // Feature-gated: try to downcast to HwError for precise mapping
    #[cfg(feature = "hardware-errors")]
    {
        use irrigo_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::DataReadyTimeout => IrrigoError::Timeout,
                HwError::Io(io) => IrrigoError::Io(io.to_string()),
                other => IrrigoError::HardwareFault(other.to_string()),
            };
        }
    }

    if let Some(io) = e.downcast_ref::<std::io::Error>() {
        return if io.kind() == std::io::ErrorKind::TimedOut {
            IrrigoError::Timeout
        } else {
            IrrigoError::Io(io.to_string())
        };
    }

    // Fallback: string-based detection
    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        IrrigoError::Timeout
    } else {
        IrrigoError::Hardware(s)
    }
}

/// Convenience for `map_err` on boxed trait results.
pub fn map_boxed(e: irrigo_traits::BoxError) -> IrrigoError {
    map_hw_error(e.as_ref())
}
