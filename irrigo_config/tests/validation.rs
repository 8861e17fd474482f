use irrigo_config::load_toml;
use rstest::rstest;

const PINS: &str = r#"
[pins]
hx711_dt = 5
hx711_sck = 6
mux_select = [16, 20, 21, 26]
stepper = [17, 27, 22, 23]
servo = 12
pump = 13
"#;

fn with_pins(extra: &str) -> String {
    format!("{PINS}\n{extra}")
}

#[test]
fn accepts_minimal_config() {
    let cfg = load_toml(PINS).expect("parse TOML");
    cfg.validate().expect("minimal config should validate");
}

#[rstest]
#[case("[acquisition]\nsamples_per_read = 0", "samples_per_read must be >= 1")]
#[case("[acquisition]\nread_timeout_ms = 0", "read_timeout_ms must be >= 1")]
#[case("[acquisition]\nread_timeout_ms = 120000", "unreasonably large")]
#[case("[stepper]\nstep_delay_us = 0", "stepper.step_delay_us must be >= 1")]
#[case("[servo]\nmin_angle = 90\nmax_angle = 90", "min_angle must be <")]
#[case("[servo]\nmax_angle = 400", "servo angles must be in")]
#[case("[servo]\nfrequency_hz = 0.0", "servo.frequency_hz must be > 0")]
#[case("[pump]\npulse_us = 0", "pump.pulse_us must be >= 1")]
#[case("[pump]\nfrequency_hz = -5.0", "pump.frequency_hz must be > 0")]
#[case("[storage]\ncalibration_file = \"a.json\"\nrun_file = \"a.json\"", "must differ")]
#[case("[logging]\nrotation = \"weekly\"", "never|daily|hourly")]
fn rejects_out_of_range(#[case] section: &str, #[case] needle: &str) {
    let cfg = load_toml(&with_pins(section)).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    let msg = format!("{err}").to_lowercase();
    assert!(msg.contains(needle), "message {msg:?} lacks {needle:?}");
}

#[test]
fn rejects_shared_pins() {
    let toml = r#"
[pins]
hx711_dt = 5
hx711_sck = 6
mux_select = [16, 20, 21, 5]
stepper = [17, 27, 22, 23]
servo = 12
pump = 13
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("dt reused as selector");
    assert!(format!("{err}").contains("pin 5 is used twice"));
}

#[rstest]
#[case("[16, 20]", 4)]
#[case("[16, 20, 21]", 8)]
#[case("[16, 20, 21, 26]", 16)]
fn channel_count_follows_selector_width(#[case] lines: &str, #[case] channels: usize) {
    let toml = format!(
        "[pins]\nhx711_dt = 5\nhx711_sck = 6\nmux_select = {lines}\nstepper = [17, 27, 22, 23]\nservo = 12\npump = 13\n"
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    cfg.validate().unwrap();
    assert_eq!(cfg.channel_count(), channels);
}

#[test]
fn stepper_needs_four_coils() {
    let toml = r#"
[pins]
hx711_dt = 5
hx711_sck = 6
mux_select = [16]
stepper = [17, 27, 22]
servo = 12
pump = 13
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    assert!(cfg.validate().is_err());
}

#[test]
fn gain_parses_lowercase() {
    let cfg = load_toml(&with_pins("[acquisition]\ngain = \"b32\"")).unwrap();
    assert_eq!(cfg.acquisition.gain, irrigo_config::GainCfg::B32);
}
