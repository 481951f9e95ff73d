#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not.
    if let Ok(cfg) = thrcal_config::load_toml(data) {
        if cfg.validate().is_ok() {
            // A validated config always has a usable trim ladder and guess set.
            assert!(cfg.trim.low < cfg.trim.mid && cfg.trim.mid < cfg.trim.high);
            assert!(cfg.threshold.guess_points.len() >= 2);
        }
    }
});
