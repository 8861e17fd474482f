//! Human-readable error descriptions and structured JSON error formatting.

use irrigo_core::{ErrorKind, IrrigoError};
use irrigo_hardware::HwError;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(ie) = err.downcast_ref::<IrrigoError>() {
        return match ie {
            IrrigoError::Timeout => "What happened: Load cell read timed out.\nLikely causes: HX711 not wired correctly, no power/ground, a disconnected cell on the selected channel, or timeout too low.\nHow to fix: Verify DT/SCK and selector pins and power, and consider increasing acquisition.read_timeout_ms in the config.".to_string(),
            IrrigoError::InsufficientSamples { obtained, requested } => format!(
                "What happened: Only {obtained} of {requested} samples could be read.\nLikely causes: Intermittent wiring or an overloaded bus.\nHow to fix: Check the cell connector on this channel and retry; raise acquisition.read_timeout_ms if reads are slow."
            ),
            IrrigoError::CalibrationState(msg) => format!(
                "What happened: {msg}.\nLikely causes: The channel has not been calibrated (offset first, then slope).\nHow to fix: Run `irrigo calibrate offset <channel>` on the empty cell, then `irrigo calibrate slope <channel> --weight <grams>` with a reference weight."
            ),
            IrrigoError::CrashConsistency { actuator, position } => format!(
                "What happened: The {actuator} journal shows a move that never finished (last position {position}).\nLikely causes: Power was lost or the process was killed while the {actuator} was moving.\nHow to fix: Check the mechanism by hand, then run `irrigo journal clear {actuator}` (add --position <p> if you re-homed it)."
            ),
            IrrigoError::InvalidChannel { channel, count } => format!(
                "What happened: Channel {channel} does not exist.\nLikely causes: This board addresses channels 0..{count}.\nHow to fix: Pick a channel below {count} or add selector lines to pins.mux_select."
            ),
            IrrigoError::Busy(what) => format!(
                "What happened: The {what} is still busy.\nLikely causes: A previous move has not finished.\nHow to fix: Wait for it to finish or raise --wait-ms."
            ),
            IrrigoError::HardwareFault(msg) => format!(
                "What happened: Hardware fault ({msg}).\nLikely causes: A driver or journal write failed mid-move.\nHow to fix: Inspect the actuator, then acknowledge it with `irrigo journal clear`."
            ),
            IrrigoError::Validation(msg) => format!(
                "What happened: Invalid data ({msg}).\nLikely causes: A malformed or out-of-range value in the input.\nHow to fix: Correct the value and retry."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    if let Some(HwError::DataReadyTimeout) = err.downcast_ref::<HwError>() {
        return "What happened: HX711 did not produce data within the configured timeout.\nLikely causes: Wrong DT/SCK pins, wiring/power issues, or timeout configured too low.\nHow to fix: Check [pins] in the config, verify 5V/GND, and raise acquisition.read_timeout_ms.".to_string();
    }

    // String-based heuristics for errors coming from init or config
    let msg = err
        .chain()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("open hx711")
        || lower.contains("open selector pins")
        || lower.contains("open stepper pins")
        || lower.contains("open servo pin")
        || lower.contains("open pump pin")
    {
        return "What happened: Failed to initialize hardware pins.\nLikely causes: Incorrect pin numbers or insufficient GPIO permissions.\nHow to fix: Fix the [pins] values in the config; ensure the process has permission to access GPIO.".to_string();
    }

    if lower.contains("invalid configuration") || lower.contains("parse config") {
        let detail = err
            .chain()
            .skip(1)
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(": ");
        return format!(
            "What happened: Configuration is invalid or incomplete ({detail}).\nLikely causes: Missing [pins] entries or out-of-range values.\nHow to fix: Edit the TOML config and try again."
        );
    }

    if lower.contains("calibration csv must have headers") {
        return "Invalid headers in calibration CSV. Expected 'slot,offset,offset_error,slope,slope_error'.".to_string();
    }

    if lower.contains("no run configuration") {
        return "What happened: No run configuration was found.\nLikely causes: Nothing has been saved to the data directory yet.\nHow to fix: Pass --run-file <json> to `irrigo run`.".to_string();
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

fn core_kind(err: &eyre::Report) -> Option<ErrorKind> {
    err.downcast_ref::<IrrigoError>().map(IrrigoError::kind)
}

/// Stable exit codes per error class; anything unclassified exits with 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match core_kind(err) {
        Some(ErrorKind::Timing) => 3,
        Some(ErrorKind::Validation) => 4,
        Some(ErrorKind::CalibrationState) => 5,
        Some(ErrorKind::CrashConsistency) => 6,
        Some(ErrorKind::ResourceContention) => 7,
        Some(ErrorKind::Hardware) => 8,
        Some(ErrorKind::State | ErrorKind::Io) | None => {
            if matches!(err.downcast_ref::<HwError>(), Some(HwError::DataReadyTimeout)) {
                3
            } else {
                1
            }
        }
    }
}

pub fn kind_name(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Timing => "Timing",
        ErrorKind::Validation => "Validation",
        ErrorKind::CalibrationState => "CalibrationState",
        ErrorKind::CrashConsistency => "CrashConsistency",
        ErrorKind::ResourceContention => "ResourceContention",
        ErrorKind::Hardware => "Hardware",
        ErrorKind::State => "State",
        ErrorKind::Io => "Io",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let reason = core_kind(err).map_or("Error", kind_name);
    let mut obj = json!({ "reason": reason, "message": humanize(err) });
    if let Some(IrrigoError::CrashConsistency { actuator, position }) =
        err.downcast_ref::<IrrigoError>()
    {
        obj["details"] = json!({ "actuator": actuator, "position": position });
    }
    obj.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_maps_to_timing_code() {
        let e = eyre::Report::new(IrrigoError::Timeout);
        assert_eq!(exit_code_for_error(&e), 3);
        assert!(humanize(&e).starts_with("What happened: Load cell read timed out"));
    }

    #[test]
    fn context_does_not_hide_the_kind() {
        use eyre::WrapErr;
        let r: std::result::Result<(), IrrigoError> = Err(IrrigoError::CrashConsistency {
            actuator: "pump".into(),
            position: 12,
        });
        let e = r.wrap_err("start actuators").unwrap_err();
        assert_eq!(exit_code_for_error(&e), 6);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&e)).unwrap();
        assert_eq!(v["reason"], "CrashConsistency");
        assert_eq!(v["details"]["position"], 12);
    }

    #[test]
    fn unknown_errors_fall_back() {
        let e = eyre::eyre!("something odd");
        assert_eq!(exit_code_for_error(&e), 1);
        assert!(humanize(&e).contains("Original: something odd"));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&e)).unwrap();
        assert_eq!(v["reason"], "Error");
    }
}
