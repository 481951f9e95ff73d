#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(vmms) = thrcal_config::parse_vmm_spec(data) {
        // Ranges come back ascending and gap-free.
        if data.contains('-') {
            assert!(vmms.windows(2).all(|w| w[1] == w[0] + 1));
        }
    }
});
