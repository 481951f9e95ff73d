use rstest::rstest;
use thrcal_config::{Flavor, RunMode, Side, load_toml};

const FULL: &str = r#"
[run]
mode = "threshold"
jobs = 2
write_back = true

[sampling]
sample_count = 20
oversampling = 5
prune_cutoff_mv = 8.0
max_attempts = 4
retry_delay_ms = 10

[threshold]
rms_factor = 7.5
guess_points = [120, 220, 320]

[trim]
low = 0
mid = 14
high = 31

[[devices]]
name = "MMFE8_L1P1_HOL"
side = "A"
sector = 3
flavor = "mmfe8"
vmms = "0-7"

[[devices]]
name = "SFEB8_Q1_IP"
side = "C"
sector = 12
flavor = "sfeb"
vmms = [1, 2]

[[geometry]]
pattern = "L1P1"
vmm = 0
first = 0
last = 3
"#;

#[test]
fn parses_full_document() {
    let cfg = load_toml(FULL).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert_eq!(cfg.run.mode, RunMode::Threshold);
    assert_eq!(cfg.run.jobs, 2);
    assert!(cfg.run.write_back);
    assert_eq!(cfg.sampling.sample_count, 20);
    assert_eq!(cfg.threshold.guess_points, vec![120, 220, 320]);
    // untouched sections keep defaults
    assert_eq!(cfg.classifier.rms_cutoff_mv, 30.0);
    assert_eq!(cfg.devices.len(), 2);
    assert_eq!(cfg.devices[0].vmms, (0..8).collect::<Vec<u8>>());
    assert_eq!(cfg.devices[0].side, Side::A);
    assert_eq!(cfg.devices[1].flavor, Flavor::Sfeb);
    assert_eq!(cfg.devices[1].vmms, vec![1, 2]);
    assert_eq!(cfg.devices[1].channels, 64);
    assert_eq!(cfg.geometry[0].last, 3);
}

#[rstest]
#[case("[run]\njobs = 0", "run.jobs")]
#[case("[sampling]\nsample_count = 0", "sampling.sample_count")]
#[case("[sampling]\nmax_attempts = 0", "sampling.max_attempts")]
#[case("[classifier]\nhot_factor = 0.9", "classifier.hot_factor")]
#[case("[classifier]\ndead_factor = 1.2", "classifier.dead_factor")]
#[case("[threshold]\nguess_points = [100]", "at least two")]
#[case("[threshold]\nguess_points = [100, 100]", "distinct")]
#[case("[threshold]\nguess_points = [100, 2000]", "thdac_max")]
#[case("[threshold]\nslope_min = 5.0\nslope_max = 1.0", "slope_min")]
#[case("[trim]\nlow = 14\nmid = 14", "low < mid < high")]
#[case("[trim]\nhigh = 40", "trim.high")]
#[case("[[geometry]]\npattern = \"P1\"\nvmm = 0\nfirst = 9\nlast = 2", "first must be <= last")]
#[case("[simulation]\nfailure_rate = 2.0", "simulation.failure_rate")]
fn rejects_invalid(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    let msg = format!("{err}");
    assert!(msg.contains(needle), "{msg:?} does not mention {needle:?}");
}

#[test]
fn rejects_unknown_flavor_at_parse_time() {
    let toml = r#"
[[devices]]
name = "X"
side = "A"
sector = 1
flavor = "toaster"
"#;
    assert!(load_toml(toml).is_err());
}

#[test]
fn rejects_device_without_vmms() {
    let toml = r#"
[[devices]]
name = "X"
side = "C"
sector = 1
flavor = "pfeb"
vmms = []
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("empty vmms");
    assert!(format!("{err}").contains("vmms must not be empty"));
}
