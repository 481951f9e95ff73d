use rstest::rstest;
use thrcal_hardware::{SimParams, SimulatedFrontend};
use thrcal_traits::{Acquirer, DacSettings, DeviceKey};

fn mean(v: &[u16]) -> f64 {
    v.iter().map(|&x| f64::from(x)).sum::<f64>() / v.len() as f64
}

#[rstest]
#[case(100)]
#[case(250)]
#[case(400)]
fn threshold_level_follows_dac(#[case] dac: u16) {
    let params = SimParams {
        noise_rms_adc: 5.0,
        outlier_rate: 0.0,
        ..SimParams::default()
    };
    let key = DeviceKey::new("MMFE8_L2P4_HOR", 1);
    let mut sim = SimulatedFrontend::for_device(params, &key).unwrap();
    let ch = key.channel(10);
    let settings = DacSettings::threshold(dac, 14);
    let expected = sim.expected_level(10, settings).unwrap();
    let batch = sim.acquire(&ch, settings, 400).unwrap();
    assert_eq!(batch.len(), 400);
    // 5-count noise, 400 samples: mean is well within 2 counts
    assert!((mean(&batch) - expected).abs() < 2.0);
}

#[test]
fn hot_channel_sits_above_siblings() {
    let params = SimParams {
        hot_channels: vec![7],
        outlier_rate: 0.0,
        ..SimParams::default()
    };
    let sim = SimulatedFrontend::new(params).unwrap();
    let hot = sim.expected_level(7, DacSettings::baseline()).unwrap();
    let normal = sim.expected_level(8, DacSettings::baseline()).unwrap();
    assert!(hot > normal * 1.15);
}

#[test]
fn failure_rate_one_always_times_out() {
    let params = SimParams {
        failure_rate: 1.0,
        ..SimParams::default()
    };
    let mut sim = SimulatedFrontend::new(params).unwrap();
    let key = DeviceKey::new("D", 0).channel(0);
    let err = sim.acquire(&key, DacSettings::baseline(), 5).unwrap_err();
    assert!(err.to_string().to_lowercase().contains("timeout"));
    assert_eq!(sim.acquisitions(), 1);
}

#[test]
fn register_writes_are_recorded() {
    let mut sim = SimulatedFrontend::new(SimParams::default()).unwrap();
    let dev = DeviceKey::new("D", 2);
    let regs = thrcal_traits::RegisterMap {
        threshold_dac: 210,
        channel_trim: vec![14; 64],
        channel_mask: vec![false; 64],
    };
    sim.write_device_config(&dev, &regs).unwrap();
    assert_eq!(sim.written().len(), 1);
    assert_eq!(sim.written()[0].1.threshold_dac, 210);
}
