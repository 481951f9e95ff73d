//! Human-readable error descriptions and structured JSON error formatting.

use thrcal_core::error::{CalibError, RunError, SetupError};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(se) = err.downcast_ref::<SetupError>() {
        return match se {
            SetupError::NoDevices => {
                "What happened: No devices to calibrate.\nLikely causes: The config has no [[devices]] tables and no --devices CSV was given, or every entry lists no vmms.\nHow to fix: Add [[devices]] entries (name, side, sector, flavor, vmms) or pass --devices <CSV>.".to_string()
            }
            SetupError::NoChannels(dev) => format!(
                "What happened: Device {dev} has zero channels.\nLikely causes: `channels = 0` in its [[devices]] entry.\nHow to fix: Remove the override or set a positive channel count."
            ),
            SetupError::MissingAcquirer | SetupError::MissingDevice => format!(
                "What happened: The calibrator was built without all of its parts ({se}).\nLikely causes: Internal wiring error.\nHow to fix: Re-run with --log-level=debug and report the output."
            ),
            SetupError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/thrcal.toml for a sample."
            ),
        };
    }

    if let Some(re) = err.downcast_ref::<RunError>() {
        return match re {
            RunError::Interrupted { completed, total } => format!(
                "What happened: Run interrupted after {completed} of {total} devices.\nLikely causes: Ctrl-C or SIGTERM.\nHow to fix: Outputs for the finished devices were written; rerun to calibrate the rest."
            ),
            RunError::AllDevicesFailed { devices } => format!(
                "What happened: None of the {devices} devices could be calibrated.\nLikely causes: Front-end not answering, or threshold response outside the slope band.\nHow to fix: Check the per-device causes in the log and config.json (every device is masked); run `self-check` first."
            ),
        };
    }

    if let Some(ce) = err.downcast_ref::<CalibError>() {
        if matches!(ce, CalibError::Timeout) {
            return "What happened: Front-end read timed out.\nLikely causes: Link down or front-end not powered.\nHow to fix: Check the readout link and raise sampling.max_attempts or sampling.retry_delay_ms.".to_string();
        }
        return format!(
            "What happened: {ce}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
        );
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("read config") {
        return format!(
            "What happened: Could not read the config file.\nLikely causes: Wrong --config path.\nHow to fix: Pass --config <FILE>; see etc/thrcal.toml for a sample. ({msg})"
        );
    }

    if lower.contains("parse config") || lower.contains("invalid configuration") {
        let cause = err.root_cause().to_string();
        return format!(
            "What happened: Configuration is invalid or incomplete.\nLikely causes: {cause}\nHow to fix: Edit the TOML config and try again."
        );
    }

    if lower.contains("device csv must have headers") {
        return "Invalid headers in device CSV. Expected 'name,side,sector,flavor,vmms'.".to_string();
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: 3 setup, 4 nothing calibrated, 5 interrupted, 1 anything else.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<SetupError>().is_some() || is_config_error(err) {
        return 3;
    }
    match err.downcast_ref::<RunError>() {
        Some(RunError::AllDevicesFailed { .. }) => 4,
        Some(RunError::Interrupted { .. }) => 5,
        None => 1,
    }
}

fn is_config_error(err: &eyre::Report) -> bool {
    let lower = err.to_string().to_ascii_lowercase();
    lower.contains("invalid configuration") || lower.contains("parse config")
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if err.downcast_ref::<SetupError>().is_some() || is_config_error(err) {
        return "Setup";
    }
    match err.downcast_ref::<RunError>() {
        Some(RunError::AllDevicesFailed { .. }) => "AllDevicesFailed",
        Some(RunError::Interrupted { .. }) => "Interrupted",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let details = match err.downcast_ref::<RunError>() {
        Some(RunError::Interrupted { completed, total }) => {
            Some(json!({ "completed": completed, "total": total }))
        }
        Some(RunError::AllDevicesFailed { devices }) => Some(json!({ "devices": devices })),
        None => None,
    };
    let mut obj = json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    });
    if let (Some(d), Some(map)) = (details, obj.as_object_mut()) {
        map.insert("details".into(), d);
    }
    obj.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_errors_get_stable_codes() {
        let e = eyre::Report::new(SetupError::NoDevices);
        assert_eq!(exit_code_for_error(&e), 3);
        assert!(humanize(&e).contains("No devices"));

        let e = eyre::Report::new(RunError::AllDevicesFailed { devices: 2 });
        assert_eq!(exit_code_for_error(&e), 4);

        let e = eyre::Report::new(RunError::Interrupted {
            completed: 1,
            total: 3,
        });
        assert_eq!(exit_code_for_error(&e), 5);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&e)).unwrap();
        assert_eq!(v["reason"], "Interrupted");
        assert_eq!(v["details"]["total"], 3);
    }

    #[test]
    fn wrapped_typed_errors_still_match() {
        use eyre::WrapErr;
        let r: Result<(), SetupError> = Err(SetupError::NoChannels("X/vmm0".into()));
        let e = r.wrap_err("setup").unwrap_err();
        assert_eq!(exit_code_for_error(&e), 3);
    }

    #[test]
    fn untyped_errors_fall_back() {
        let e = eyre::eyre!("something odd");
        assert_eq!(exit_code_for_error(&e), 1);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&e)).unwrap();
        assert_eq!(v["reason"], "Error");
        assert!(v.get("details").is_none());

        let e = eyre::eyre!("trim.high must not exceed trim.trim_max").wrap_err("invalid configuration");
        assert_eq!(exit_code_for_error(&e), 3);
        assert!(humanize(&e).contains("trim.high must not exceed"));
    }
}
