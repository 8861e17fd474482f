use std::fs::File;
use std::io::Write;

use irrigo_config::load_calibration_csv;
use rstest::rstest;
use tempfile::tempdir;

fn write_csv(body: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("calib.csv");
    let mut f = File::create(&path).unwrap();
    f.write_all(body.as_bytes()).unwrap();
    (dir, path)
}

#[rstest]
fn loads_offset_only_and_full_rows() {
    let (_d, path) = write_csv(
        "slot,offset,offset_error,slope,slope_error\n0,84291.5,12.1,0.0021,0.00001\n2,90210,9.8,,\n",
    );
    let rows = load_calibration_csv(&path).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].slot, 0);
    assert_eq!(rows[0].slope, Some(0.0021));
    assert_eq!(rows[1].slot, 2);
    assert_eq!(rows[1].slope, None);
    assert_eq!(rows[1].slope_error, None);
}

#[rstest]
#[case("raw,grams\n1,2\n", "must have headers")]
#[case("slot,offset,offset_error,slope,slope_error\n", "has no rows")]
#[case("slot,offset,offset_error,slope,slope_error\nx,1,1,,\n", "invalid csv row 2")]
#[case(
    "slot,offset,offset_error,slope,slope_error\n1,1,1,0.5,\n",
    "both be set or both be empty"
)]
fn rejects_bad_files(#[case] body: &str, #[case] needle: &str) {
    let (_d, path) = write_csv(body);
    let err = load_calibration_csv(&path).expect_err("should reject");
    let msg = format!("{err}").to_lowercase();
    assert!(msg.contains(needle), "message {msg:?} lacks {needle:?}");
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempdir().unwrap();
    let err = load_calibration_csv(&dir.path().join("nope.csv")).expect_err("missing");
    assert!(format!("{err}").contains("open calibration CSV"));
}
