use irrigo_core::error::IrrigoError;
use irrigo_core::mocks::MemoryStore;
use irrigo_core::run::{RunConfig, RunLimits};
use irrigo_hardware::DirStore;
use rstest::rstest;

const DOC: &str = r#"{
    "p": [
        {"l": 0, "p": 0,   "v": 20, "d": 400000, "i": 100},
        {"l": 2, "p": 800, "v": 70, "d": 150000, "i": 50}
    ],
    "q": [
        {"l": 2, "s": [{"t": 2, "w": 300.0, "a": 5.0, "m": 60000}], "c": true},
        {"l": 0, "s": [{"t": 1, "w": 1000}, {"t": 3, "l": 100, "u": 150, "n": 3, "p": 500}], "c": false}
    ],
    "m": 1000
}"#;

fn limits() -> RunLimits {
    RunLimits::new(4)
}

#[test]
fn all_ingestion_paths_agree() {
    let value: serde_json::Value = serde_json::from_str(DOC).unwrap();
    let a = RunConfig::from_value(value, &limits(), 0).unwrap();
    let b = RunConfig::from_slice(DOC.as_bytes(), &limits(), 0).unwrap();
    let c = RunConfig::from_reader(std::io::Cursor::new(DOC), &limits(), 0).unwrap();
    assert_eq!(a, b);
    assert_eq!(b, c);
    assert_eq!(a.active_channels().collect::<Vec<_>>(), vec![0, 2]);
}

#[rstest]
#[case::position_without_protocol(
    r#"{"p":[{"l":0,"p":0,"v":0,"d":1,"i":1},{"l":1,"p":0,"v":0,"d":1,"i":1}],
        "q":[{"l":0,"s":[{"t":1,"w":1}],"c":false}],"m":10}"#,
    "slot 1 has a position but no protocol"
)]
#[case::protocol_without_position(
    r#"{"p":[],"q":[{"l":3,"s":[{"t":1,"w":1}],"c":false}],"m":10}"#,
    "slot 3 has a protocol but no position"
)]
#[case::duplicate_slot(
    r#"{"p":[{"l":0,"p":0,"v":0,"d":1,"i":1},{"l":0,"p":5,"v":0,"d":1,"i":1}],
        "q":[{"l":0,"s":[{"t":1,"w":1}],"c":false}],"m":10}"#,
    "duplicate position slot 0"
)]
#[case::slot_out_of_range(
    r#"{"p":[{"l":9,"p":0,"v":0,"d":1,"i":1}],
        "q":[{"l":9,"s":[{"t":1,"w":1}],"c":false}],"m":10}"#,
    "out of range"
)]
#[case::servo_out_of_range(
    r#"{"p":[{"l":0,"p":0,"v":181,"d":1,"i":1}],
        "q":[{"l":0,"s":[{"t":1,"w":1}],"c":false}],"m":10}"#,
    "servo angle 181"
)]
#[case::zero_cadence(
    r#"{"p":[{"l":0,"p":0,"v":0,"d":1,"i":1}],
        "q":[{"l":0,"s":[{"t":1,"w":1}],"c":false}],"m":0}"#,
    "sensor period"
)]
#[case::bad_step(
    r#"{"p":[{"l":0,"p":0,"v":0,"d":1,"i":1}],
        "q":[{"l":0,"s":[{"t":2,"w":1}],"c":false}],"m":10}"#,
    "step 0"
)]
fn inconsistent_records_are_rejected(#[case] doc: &str, #[case] expect: &str) {
    let Err(IrrigoError::Validation(msg)) = RunConfig::from_slice(doc.as_bytes(), &limits(), 0)
    else {
        panic!("expected a validation error for {doc}");
    };
    assert!(msg.contains(expect), "{msg}");
}

#[test]
fn malformed_json_is_a_validation_error() {
    assert!(matches!(
        RunConfig::from_slice(b"{\"p\": [", &limits(), 0),
        Err(IrrigoError::Validation(_))
    ));
}

#[test]
fn progress_survives_save_and_load() {
    let mut cfg = RunConfig::from_slice(DOC.as_bytes(), &limits(), 0).unwrap();
    let seq = cfg.sequencer_mut(0).unwrap();
    // finish the wait, then start the oscillation draining
    seq.tick(0.0, 0);
    seq.tick(0.0, 1_000);
    seq.tick(160.0, 1_100);

    let mut store = MemoryStore::new();
    cfg.save(&mut store, "rundata.json", 1_300).unwrap();
    let doc: serde_json::Value = serde_json::from_slice(store.get("rundata.json").unwrap()).unwrap();
    let q0 = &doc["q"].as_array().unwrap().iter().find(|q| q["l"] == 0).unwrap().clone();
    assert_eq!(q0["x"], 1);
    assert_eq!(q0["s"][1]["i"], 1);
    assert_eq!(q0["s"][1]["e"], 200);

    let back = RunConfig::load(&store, "rundata.json", &limits(), 50_000)
        .unwrap()
        .unwrap();
    let seq = back.sequencer(0).unwrap();
    assert_eq!(seq.current_step(), 1);
    assert_eq!(seq.steps()[1].progress(50_000).elapsed_ms, 200);
}

#[test]
fn dir_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = DirStore::open(dir.path()).unwrap();
    let cfg = RunConfig::from_slice(DOC.as_bytes(), &limits(), 0).unwrap();
    cfg.save(&mut store, "rundata.json", 0).unwrap();
    let back = RunConfig::load(&store, "rundata.json", &limits(), 0)
        .unwrap()
        .unwrap();
    assert_eq!(back.to_record(0), cfg.to_record(0));
    assert_eq!(back.position(2).unwrap().pump_intensity, 50);
}
