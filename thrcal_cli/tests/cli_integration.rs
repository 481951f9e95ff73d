use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Two small boards on the simulated front-end
fn write_valid_config(dir: &tempfile::TempDir, extra: &str) -> PathBuf {
    let toml = format!(
        r#"
[run]
jobs = 2

[sampling]
# keep retries fast in tests
retry_delay_ms = 1

[simulation]
seed = 7
outlier_rate = 0.0

[[devices]]
name = "MMFE8_L1P1_HOL"
side = "A"
sector = 3
flavor = "mmfe8"
vmms = "0-1"

[[devices]]
name = "PFEB_Q2"
side = "C"
sector = 3
flavor = "pfeb"
vmms = [0]
{extra}
"#
    );
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn thrcal() -> Command {
    Command::cargo_bin("thrcal").unwrap()
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["self-check"], 0, "OK (3 devices probed)", "stdout")]
#[case(&["calibrate", "--mode", "bogus"], 2, "invalid value", "stderr")]
#[case(&["frobnicate"], 2, "unrecognized subcommand", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "");

    let mut cmd = thrcal();
    cmd.arg("--config").arg(&cfg);
    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[test]
fn calibrate_writes_row_log_and_document() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "");
    let out = dir.path().join("out");

    thrcal()
        .arg("--config")
        .arg(&cfg)
        .arg("calibrate")
        .arg("--out-dir")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("3/3 devices resolved"))
        .stdout(predicate::str::contains("MMFE8_L1P1_HOL/vmm0: resolved"));

    let tsv = fs::read_to_string(out.join("thresholds.tsv")).unwrap();
    let mut lines = tsv.lines();
    let header = lines.next().unwrap();
    assert_eq!(header.split('\t').count(), 20);
    assert!(header.starts_with("side\tsector\tdevice\tvmm\tchannel"));
    assert_eq!(lines.count(), 3 * 64);

    let doc: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("config.json")).unwrap()).unwrap();
    let hol = &doc["MMFE8_L1P1_HOL"];
    assert!(hol["vmm0"]["thresholdDac"].as_u64().unwrap() < 1023);
    // Built-in geometry: vmm0 channels 0-7 of this board have no sensor
    let mask = hol["vmm0"]["channel_mask"].as_array().unwrap();
    assert!(mask[..8].iter().all(|m| m == 1));
    assert_eq!(hol["vmm0"]["channel_trim"][0], 0);
    assert_eq!(doc["PFEB_Q2"]["vmm0"]["channel_trim"].as_array().unwrap().len(), 64);
}

#[test]
fn baseline_mode_leaves_threshold_at_max() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "");
    let out = dir.path().join("out");

    thrcal()
        .arg("--config")
        .arg(&cfg)
        .arg("calibrate")
        .arg("--mode")
        .arg("baseline")
        .arg("--out-dir")
        .arg(&out)
        .assert()
        .success();

    let doc: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("config.json")).unwrap()).unwrap();
    assert_eq!(doc["MMFE8_L1P1_HOL"]["vmm1"]["thresholdDac"], 1023);
    assert_eq!(doc["MMFE8_L1P1_HOL"]["vmm1"]["channel_trim"][20], 14);
}

#[test]
fn silent_front_end_fails_every_device() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "");
    // Every channel silent: baselines fail, every device masked
    let text = fs::read_to_string(&cfg).unwrap().replace(
        "outlier_rate = 0.0",
        &format!(
            "outlier_rate = 0.0\nsilent_channels = [{}]",
            (0..64).map(|c| c.to_string()).collect::<Vec<_>>().join(", ")
        ),
    );
    fs::write(&cfg, text).unwrap();
    let out = dir.path().join("out");

    thrcal()
        .arg("--config")
        .arg(&cfg)
        .arg("calibrate")
        .arg("--out-dir")
        .arg(&out)
        .assert()
        .code(4)
        .stderr(predicate::str::contains("None of the 3 devices"));

    // Outputs are still written with register defaults
    let doc: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("config.json")).unwrap()).unwrap();
    assert_eq!(doc["PFEB_Q2"]["vmm0"]["thresholdDac"], 1023);
    assert_eq!(doc["PFEB_Q2"]["vmm0"]["channel_mask"][40], 1);
}

#[test]
fn invalid_config_exits_with_setup_code() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "\n[trim]\nlow = 20\nmid = 14\n");

    thrcal()
        .arg("--config")
        .arg(&cfg)
        .arg("self-check")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Configuration is invalid"));
}

#[test]
fn missing_config_is_explained() {
    let dir = tempdir().unwrap();
    thrcal()
        .arg("--config")
        .arg(dir.path().join("nope.toml"))
        .arg("self-check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Could not read the config file"));
}

#[test]
fn empty_device_list_is_a_setup_error() {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("cfg.toml");
    fs::write(&cfg, "[run]\njobs = 1\n").unwrap();

    thrcal()
        .arg("--config")
        .arg(&cfg)
        .arg("calibrate")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("No devices to calibrate"));
}

#[test]
fn device_csv_replaces_config_devices() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "");
    let csv = dir.path().join("devices.csv");
    let mut f = fs::File::create(&csv).unwrap();
    writeln!(f, "name,side,sector,flavor,vmms").unwrap();
    writeln!(f, "SFEB8_Q4_HO,C,12,sfeb,0;3").unwrap();
    drop(f);

    thrcal()
        .arg("--config")
        .arg(&cfg)
        .arg("--devices")
        .arg(&csv)
        .arg("self-check")
        .assert()
        .success()
        .stdout(predicate::str::contains("OK (2 devices probed)"));
}

#[test]
fn device_csv_with_bad_header_is_rejected() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "");
    let csv = dir.path().join("devices.csv");
    fs::write(&csv, "board,side,sector,flavor,vmms\nX,A,1,mmfe8,0\n").unwrap();

    thrcal()
        .arg("--config")
        .arg(&cfg)
        .arg("--devices")
        .arg(&csv)
        .arg("self-check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid headers in device CSV"));
}
