use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;

fn cfg_with_timeout(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let toml = format!(
        r#"
[pins]
hx711_dt = 5
hx711_sck = 6
mux_select = [16]
stepper = [17, 27, 22, 23]
servo = 12
pump = 13

[acquisition]
samples_per_read = 3
read_timeout_ms = 20
poll_interval_us = 500

[storage]
data_dir = '{}'
"#,
        dir.path().join("data").display()
    );
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn irrigo_disconnected(cfg: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("irrigo").unwrap();
    cmd.env("IRRIGO_SIM_TIMEOUT", "1")
        .env_remove("RUST_LOG")
        .env_remove("IRRIGO_SIM_WEIGHT")
        .arg("--config")
        .arg(cfg)
        .arg("--log-level")
        .arg("error");
    cmd
}

#[test]
fn read_timeout_exits_with_timing_code() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = cfg_with_timeout(&dir);

    irrigo_disconnected(&cfg)
        .args(["read", "0", "--raw"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains(
            "What happened: Load cell read timed out",
        ));
}

#[test]
fn json_mode_reports_timing_reason() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = cfg_with_timeout(&dir);

    let out = irrigo_disconnected(&cfg)
        .args(["--json", "calibrate", "offset", "1"])
        .assert()
        .code(3)
        .get_output()
        .stdout
        .clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(v["reason"], "Timing");
    assert!(
        v["message"]
            .as_str()
            .unwrap()
            .contains("read_timeout_ms")
    );
    assert!(!dir.path().join("data").join("hxcalib.json").exists());
}

#[test]
fn run_survives_a_disconnected_cell() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = cfg_with_timeout(&dir);
    let run = dir.path().join("run.json");
    fs::write(
        &run,
        r#"{"p":[{"l":1,"p":0,"v":0,"d":1000,"i":10}],"q":[{"l":1,"s":[{"t":1,"w":60000}],"c":false}],"m":10}"#,
    )
    .unwrap();

    let out = irrigo_disconnected(&cfg)
        .args(["--json", "run", "--passes", "2", "--no-save", "--run-file"])
        .arg(&run)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    let ch = &lines[0]["channels"][0];
    assert_eq!(ch["channel"], 1);
    assert!(ch["weight"].is_null());
    assert_eq!(ch["error"], "timeout waiting for sensor");
}
