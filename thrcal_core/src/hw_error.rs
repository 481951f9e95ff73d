//! Maps `Box<dyn Error>` from the acquirer boundary to typed `CalibError`.
//!
//! `thrcal_traits::Acquirer` returns boxed errors so any transport can plug in;
//! this module recovers a typed error, with an optional feature-gated path for
//! `thrcal_hardware::HwError` downcasting.

use crate::error::CalibError;

/// Map a transport error to a typed `CalibError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> CalibError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<thrcal_hardware::HwError>() {
            return match hw {
                thrcal_hardware::HwError::Timeout => CalibError::Timeout,
                other => CalibError::Hardware(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        CalibError::Timeout
    } else {
        CalibError::Hardware(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_fallback() {
        let e: Box<dyn std::error::Error + Send + Sync> = "link timeout on fiber 3".into();
        assert_eq!(map_hw_error(&*e), CalibError::Timeout);
        let e: Box<dyn std::error::Error + Send + Sync> = "parity".into();
        assert_eq!(map_hw_error(&*e), CalibError::Hardware("parity".into()));
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn downcasts_hw_error() {
        let e: Box<dyn std::error::Error + Send + Sync> =
            Box::new(thrcal_hardware::HwError::NoResponse(4));
        assert_eq!(
            map_hw_error(&*e),
            CalibError::Hardware("no response from channel 4".into())
        );
        let e: Box<dyn std::error::Error + Send + Sync> = Box::new(thrcal_hardware::HwError::Timeout);
        assert_eq!(map_hw_error(&*e), CalibError::Timeout);
    }
}
