//! Short-key JSON shapes for persisted documents.
//!
//! These mirror the on-disk layout one-to-one and carry no invariants of
//! their own; converting into the domain types validates them.
//!
//! Calibration set (array):
//! `{"l": slot, "o": offset, "oe": offset_err, "s": slope, "se": slope_err}`
//! with `s`/`se` omitted until the slope is calibrated.
//!
//! Run record:
//! `{"p": [position], "q": [protocol], "m": sensor_period_ms}` where
//! - position: `{"l": slot, "p": stepper, "v": servo_deg, "d": pump_us, "i": intensity_pct}`
//! - protocol: `{"l": slot, "s": [step], "c": cyclic, "x"?: step, "y"?: cycle}`
//! - step: `{"t": 1, "w": wait_ms}`, `{"t": 2, "w": target, "a": tol, "m": hold_ms}`
//!   or `{"t": 3, "l": lower, "u": upper, "n": cycles, "p": pause_ms}`, each
//!   with optional progress `{"i": phase, "e": elapsed_ms, "k": cycles_done}`.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    #[serde(rename = "l")]
    pub slot: u32,
    #[serde(rename = "o")]
    pub offset: f64,
    #[serde(rename = "oe")]
    pub offset_error: f64,
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub slope: Option<f64>,
    #[serde(rename = "se", default, skip_serializing_if = "Option::is_none")]
    pub slope_error: Option<f64>,
}

pub const STEP_WAIT: u8 = 1;
pub const STEP_HOLD_WEIGHT: u8 = 2;
pub const STEP_OSCILLATE: u8 = 3;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StepRecord {
    #[serde(rename = "t")]
    pub kind: u8,
    /// Wait duration in ms (`t = 1`) or target weight (`t = 2`)
    #[serde(rename = "w", default, skip_serializing_if = "Option::is_none")]
    pub w: Option<serde_json::Number>,
    #[serde(rename = "a", default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    #[serde(rename = "m", default, skip_serializing_if = "Option::is_none")]
    pub min_hold_ms: Option<u32>,
    #[serde(rename = "l", default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    #[serde(rename = "u", default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
    #[serde(rename = "n", default, skip_serializing_if = "Option::is_none")]
    pub cycles: Option<u32>,
    #[serde(rename = "p", default, skip_serializing_if = "Option::is_none")]
    pub pause_ms: Option<u32>,
    #[serde(rename = "i", default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<u8>,
    #[serde(rename = "e", default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u32>,
    #[serde(rename = "k", default, skip_serializing_if = "Option::is_none")]
    pub cycles_done: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolRecord {
    #[serde(rename = "l")]
    pub slot: u32,
    #[serde(rename = "s")]
    pub steps: Vec<StepRecord>,
    #[serde(rename = "c", default)]
    pub cyclic: bool,
    #[serde(rename = "x", default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<u32>,
    #[serde(rename = "y", default, skip_serializing_if = "Option::is_none")]
    pub current_cycle: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRecord {
    #[serde(rename = "l")]
    pub slot: u32,
    #[serde(rename = "p")]
    pub stepper: i32,
    #[serde(rename = "v")]
    pub servo: i32,
    #[serde(rename = "d")]
    pub pump_time_us: u32,
    #[serde(rename = "i")]
    pub pump_intensity: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    #[serde(rename = "p")]
    pub positions: Vec<PositionRecord>,
    #[serde(rename = "q")]
    pub protocols: Vec<ProtocolRecord>,
    #[serde(rename = "m")]
    pub sensor_period_ms: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slope_keys_omitted_until_set() {
        let e = CalibrationEntry {
            slot: 3,
            offset: 1000.0,
            offset_error: 2.5,
            slope: None,
            slope_error: None,
        };
        let s = serde_json::to_string(&e).unwrap();
        assert_eq!(s, r#"{"l":3,"o":1000.0,"oe":2.5}"#);
    }

    #[test]
    fn step_shapes_parse() {
        let wait: StepRecord = serde_json::from_str(r#"{"t":1,"w":60000}"#).unwrap();
        assert_eq!(wait.kind, STEP_WAIT);
        assert_eq!(wait.w.as_ref().and_then(serde_json::Number::as_u64), Some(60_000));

        let hold: StepRecord =
            serde_json::from_str(r#"{"t":2,"w":500.5,"a":1,"m":0,"i":1,"e":250}"#).unwrap();
        assert_eq!(hold.kind, STEP_HOLD_WEIGHT);
        assert_eq!(hold.w.as_ref().and_then(serde_json::Number::as_f64), Some(500.5));
        assert_eq!(hold.elapsed_ms, Some(250));

        let osc: StepRecord =
            serde_json::from_str(r#"{"t":3,"l":10,"u":20,"n":2,"p":100}"#).unwrap();
        assert_eq!(osc.kind, STEP_OSCILLATE);
        assert_eq!(osc.cycles, Some(2));
    }

    #[test]
    fn run_record_shape() {
        let r: RunRecord = serde_json::from_str(
            r#"{"p":[{"l":0,"p":200,"v":45,"d":500000,"i":80}],
                "q":[{"l":0,"s":[{"t":1,"w":10}],"c":true}],
                "m":1000}"#,
        )
        .unwrap();
        assert_eq!(r.positions[0].pump_intensity, 80);
        assert!(r.protocols[0].cyclic);
        assert_eq!(r.sensor_period_ms, 1000);
    }
}
