#![no_main]
use irrigo_core::{RunConfig, RunLimits};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let limits = RunLimits::new(16);
    let Ok(run) = RunConfig::from_slice(data, &limits, 0) else {
        return;
    };
    // anything accepted must survive a save/load cycle
    let bytes = run.to_json(0).expect("serialize accepted run");
    let back = RunConfig::from_slice(&bytes, &limits, 0).expect("reload saved run");
    assert_eq!(back.len(), run.len());
});
