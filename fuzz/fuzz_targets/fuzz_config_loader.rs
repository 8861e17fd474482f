#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse or validation errors are fine; panics are not.
    if let Ok(cfg) = irrigo_config::load_toml(data) {
        if cfg.validate().is_ok() {
            // validated configs address at most 256 channels
            assert!(cfg.channel_count() <= 256);
        }
    }
});
