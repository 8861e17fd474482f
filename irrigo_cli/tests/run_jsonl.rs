use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::{TempDir, tempdir};

fn write_config(dir: &TempDir) -> PathBuf {
    let toml = format!(
        r#"
[pins]
hx711_dt = 5
hx711_sck = 6
mux_select = [16, 20]
stepper = [17, 27, 22, 23]
servo = 12
pump = 13

[acquisition]
samples_per_read = 2
read_timeout_ms = 50
poll_interval_us = 200

[stepper]
step_delay_us = 100

[servo]
step_delay_us = 200

[pump]
pulse_us = 10000

[runner]
idle_sleep_ms = 1

[storage]
data_dir = '{}'
"#,
        dir.path().join("data").display()
    );
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn write_run(dir: &TempDir, doc: &Value) -> PathBuf {
    let path = dir.path().join("run.json");
    fs::write(&path, serde_json::to_vec_pretty(doc).unwrap()).unwrap();
    path
}

fn irrigo(cfg: &Path) -> Command {
    let mut cmd = Command::cargo_bin("irrigo").unwrap();
    cmd.arg("--config").arg(cfg).arg("--log-level").arg("error");
    cmd.env_remove("RUST_LOG")
        .env_remove("IRRIGO_SIM_WEIGHT")
        .env_remove("IRRIGO_SIM_TIMEOUT")
        .env_remove("IRRIGO_SIM_FLOW");
    cmd
}

fn json_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap_or_else(|e| panic!("bad json line {l:?}: {e}")))
        .collect()
}

/// Channel 0 fills to 40 ± 20 g; channel 1 only waits.
fn fill_doc() -> Value {
    json!({
        "p": [
            {"l": 0, "p": 0, "v": 0, "d": 100000, "i": 100},
            {"l": 1, "p": 200, "v": 30, "d": 100000, "i": 100}
        ],
        "q": [
            {"l": 0, "s": [{"t": 2, "w": 40.0, "a": 20.0, "m": 0}], "c": false},
            {"l": 1, "s": [{"t": 1, "w": 50}], "c": false}
        ],
        "m": 20
    })
}

/// A protocol that never finishes.
fn endless_doc() -> Value {
    json!({
        "p": [{"l": 2, "p": 0, "v": 0, "d": 10000, "i": 50}],
        "q": [{"l": 2, "s": [{"t": 1, "w": 60000}], "c": true}],
        "m": 10
    })
}

#[rstest]
fn fill_run_finishes_and_is_saved() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);
    let run = write_run(&dir, &fill_doc());

    let out = irrigo(&cfg)
        .env("IRRIGO_SIM_FLOW", "3")
        .args(["--json", "run", "--passes", "500", "--run-file"])
        .arg(&run)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let lines = json_lines(&out);
    assert!(lines.len() >= 2, "expected pass lines and a summary");
    let (summary, passes) = lines.split_last().unwrap();
    assert_eq!(summary["finished"], true);
    assert_eq!(summary["passes"].as_u64().unwrap(), passes.len() as u64);
    assert!(passes.len() < 500);

    for (i, p) in passes.iter().enumerate() {
        assert_eq!(p["pass"].as_u64().unwrap(), i as u64 + 1);
        assert!(p["t_ms"].is_u64());
        let chans = p["channels"].as_array().unwrap();
        assert_eq!(chans.len(), 2);
        for c in chans {
            for key in ["channel", "weight", "stdev", "step", "cycle", "finished", "water", "error"] {
                assert!(c.get(key).is_some(), "missing {key} in {c}");
            }
        }
    }
    let first = &passes[0]["channels"][0];
    assert_eq!(first["channel"], 0);
    assert_eq!(first["water"], "started");

    let last = &passes.last().unwrap()["channels"][0];
    let w = last["weight"].as_f64().unwrap();
    assert!((20.0..=60.0).contains(&w), "final weight {w}");

    let saved: Value =
        serde_json::from_slice(&fs::read(dir.path().join("data").join("rundata.json")).unwrap())
            .unwrap();
    assert_eq!(saved["m"], 20);
    assert_eq!(saved["q"].as_array().unwrap().len(), 2);
}

#[rstest]
fn pass_limit_stops_and_records() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);
    let run = write_run(&dir, &endless_doc());
    let csv = dir.path().join("log.csv");

    irrigo(&cfg)
        .env("IRRIGO_SIM_WEIGHT", "5")
        .args(["run", "--passes", "3", "--record"])
        .arg(&csv)
        .arg("--run-file")
        .arg(&run)
        .assert()
        .success()
        .stdout(predicate::str::contains("pass 3: ch2"))
        .stdout(predicate::str::contains("3 passes, stopped"));

    let text = fs::read_to_string(&csv).unwrap();
    let rows: Vec<_> = text.lines().collect();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0], "pass,t_ms,channel,weight,stdev,step,cycle,finished,water,error");
    let last: Vec<_> = rows[3].split(',').collect();
    assert_eq!(last[0], "3");
    assert_eq!(last[2], "2");
    // the bed drains slowly from its starting 5 g
    let w: f64 = last[3].parse().unwrap();
    assert!((4.0..=5.0).contains(&w), "weight {w}");
    assert_eq!(last[8], "none");
}

#[rstest]
fn stored_run_is_resumed() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);
    let run = write_run(&dir, &endless_doc());

    irrigo(&cfg)
        .args(["run", "--passes", "1", "--run-file"])
        .arg(&run)
        .assert()
        .success();

    let out = irrigo(&cfg)
        .args(["--json", "run", "--passes", "2", "--no-save"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let lines = json_lines(&out);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["channels"][0]["channel"], 2);
    assert_eq!(lines[2], json!({"passes": 2, "finished": false}));
}

#[rstest]
fn missing_run_configuration_is_explained() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);
    irrigo(&cfg)
        .arg("run")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No run configuration was found"));
}

#[rstest]
#[case::slot_out_of_range(json!({
    "p": [{"l": 9, "p": 0, "v": 0, "d": 1000, "i": 50}],
    "q": [{"l": 9, "s": [{"t": 1, "w": 10}], "c": false}],
    "m": 10
}))]
#[case::protocol_without_position(json!({
    "p": [],
    "q": [{"l": 0, "s": [{"t": 1, "w": 10}], "c": false}],
    "m": 10
}))]
#[case::zero_sensor_period(json!({
    "p": [{"l": 0, "p": 0, "v": 0, "d": 1000, "i": 50}],
    "q": [{"l": 0, "s": [{"t": 1, "w": 10}], "c": false}],
    "m": 0
}))]
fn bad_run_files_are_rejected(#[case] doc: Value) {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);
    let run = write_run(&dir, &doc);

    let out = irrigo(&cfg)
        .args(["--json", "check-config", "--run-file"])
        .arg(&run)
        .assert()
        .code(4)
        .get_output()
        .stdout
        .clone();
    let v: Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(v["reason"], "Validation");
}

#[rstest]
fn check_config_counts_run_channels() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);
    let run = write_run(&dir, &fill_doc());
    irrigo(&cfg)
        .args(["check-config", "--run-file"])
        .arg(&run)
        .assert()
        .success()
        .stdout(predicate::str::contains("config ok: 4 channels, run configures 2"));
}
