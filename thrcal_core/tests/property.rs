use proptest::prelude::*;
use thrcal_core::stats::{
    check_slopes, fit_line, median, mean, mv_to_sample, prune_outliers, rms, sample_to_mv,
};
use thrcal_core::trim::find_region;
use thrcal_core::{DeviceFlavor, TrimCfg};

fn flavor() -> impl Strategy<Value = DeviceFlavor> {
    prop_oneof![
        Just(DeviceFlavor::Mmfe8),
        Just(DeviceFlavor::Sfeb),
        Just(DeviceFlavor::Pfeb),
    ]
}

proptest! {
    #[test]
    fn median_is_an_element(v in prop::collection::vec(0u16..4096, 1..300)) {
        let m = median(&v).unwrap();
        prop_assert!(v.contains(&m));
    }

    #[test]
    fn median_ignores_order(v in prop::collection::vec(0u16..4096, 1..300), seed in any::<u64>()) {
        let mut shuffled = v.clone();
        // Deterministic rotation plus reversal as the permutation.
        let k = (seed as usize) % shuffled.len();
        shuffled.rotate_left(k);
        if seed % 2 == 0 {
            shuffled.reverse();
        }
        prop_assert_eq!(median(&v), median(&shuffled));
    }

    #[test]
    fn rms_non_negative(v in prop::collection::vec(0u16..4096, 1..300)) {
        let r = rms(&v, mean(&v));
        prop_assert!(r >= 0.0);
        prop_assert!(r.is_finite());
    }

    #[test]
    fn mv_round_trip_within_one_count(mv in 0.0f64..1500.0, f in flavor()) {
        let back = sample_to_mv(mv_to_sample(mv, f), f);
        let one_count = sample_to_mv(1.0, f);
        prop_assert!((back - mv).abs() <= one_count);
    }

    #[test]
    fn pruned_samples_are_within_cutoff(
        v in prop::collection::vec(0u16..4096, 1..300),
        cutoff in 0.5f64..100.0,
        f in flavor(),
    ) {
        let center = f64::from(median(&v).unwrap());
        let (kept, pruned) = prune_outliers(&v, center, cutoff, f);
        prop_assert_eq!(kept.len() + pruned, v.len());
        for s in kept {
            prop_assert!((sample_to_mv(f64::from(s), f) - sample_to_mv(center, f)).abs() < cutoff);
        }
    }

    #[test]
    fn fit_recovers_noiseless_line(
        slope in -10.0f64..10.0,
        intercept in -500.0f64..500.0,
        xs in prop::collection::btree_set(0u16..1024, 2..12),
    ) {
        let xs: Vec<f64> = xs.into_iter().map(f64::from).collect();
        let ys: Vec<f64> = xs.iter().map(|x| slope * x + intercept).collect();
        let fit = fit_line(&xs, &ys).unwrap();
        prop_assert!((fit.slope - slope).abs() < 1e-6);
        prop_assert!((fit.intercept - intercept).abs() < 1e-4);
    }

    #[test]
    fn equal_slopes_always_agree(m in -100.0f64..100.0, tol in 0.0f64..10.0) {
        prop_assert!(check_slopes(m, m, tol));
    }

    #[test]
    fn slopes_further_than_tolerance_disagree(m in -100.0f64..100.0, tol in 0.0f64..10.0, extra in 0.001f64..50.0) {
        prop_assert!(!check_slopes(m, m + tol + extra, tol));
    }

    #[test]
    fn region_search_depth_is_bounded(
        effs in prop::collection::vec(-200.0f64..200.0, 32),
    ) {
        let cfg = TrimCfg::default();
        let mut calls = 0u32;
        let r = find_region(
            |t| {
                calls += 1;
                Ok(effs[usize::from(t)])
            },
            &cfg,
        )
        .unwrap();
        prop_assert!(r.depth <= u32::from(cfg.high - cfg.mid) / 2);
        // low, mid and one high point per level.
        prop_assert_eq!(calls, r.depth + 3);
        if r.trim_max > 0 {
            prop_assert!(r.trim_max > cfg.mid && r.trim_max <= cfg.high);
        }
    }
}
