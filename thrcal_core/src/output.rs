//! Row log and configuration document assembled from device contexts.
//!
//! Every channel of every device gets a row, measured or not. Quantities that
//! were never measured are written as `0.0`; an unmeasured baseline RMS is
//! written as `-1`.

use std::io;

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::context::DeviceContext;
use crate::error::Result;
use crate::stats::sample_to_mv;

/// One line of the row log. Field order is column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelRow {
    pub side: String,
    pub sector: u8,
    pub device: String,
    pub vmm: u8,
    pub channel: u8,
    pub channel_baseline_mv: f64,
    pub channel_baseline_rms_mv: f64,
    pub channel_mid_eff_thresh_mv: f64,
    pub channel_eff_thresh_slope: f64,
    pub device_baseline_mv: f64,
    pub device_baseline_rms_mv: f64,
    pub device_mid_trim_median_mv: f64,
    pub device_eff_thresh_mv: f64,
    pub threshold_dac: u16,
    pub best_trim: u8,
    pub trimmed_threshold_mv: f64,
    pub eff_thresh_with_best_trim_mv: f64,
    pub threshold_dac_slope: f64,
    pub threshold_dac_offset: f64,
    pub masked: u8,
}

/// Rows for every channel of `ctx`, in channel order.
pub fn channel_rows(ctx: &DeviceContext) -> Vec<ChannelRow> {
    let flavor = ctx.spec.flavor;
    let mv = |adc: f64| sample_to_mv(adc, flavor);
    let device = ctx.device_baseline;
    let mid = ctx.mid.as_ref();
    let threshold = ctx.threshold;

    (0..ctx.channels())
        .map(|ch| {
            let b = ctx.baseline(ch);
            let trim = ctx.trim(ch);
            let masked = ctx.mask.is_masked(ch);
            let mid_eff = mid
                .and_then(|m| m.channel_eff.get(usize::from(ch)).copied().flatten())
                .unwrap_or(0.0);
            ChannelRow {
                side: ctx.spec.side.to_string(),
                sector: ctx.spec.sector,
                device: ctx.spec.key.device.clone(),
                vmm: ctx.spec.key.vmm,
                channel: ch,
                channel_baseline_mv: mv(b.median),
                channel_baseline_rms_mv: if b.is_measured() { mv(b.rms) } else { b.rms },
                channel_mid_eff_thresh_mv: mv(mid_eff),
                channel_eff_thresh_slope: trim.map_or(0.0, |t| mv(t.slope)),
                device_baseline_mv: device.map_or(0.0, |d| mv(d.median)),
                device_baseline_rms_mv: device.map_or(0.0, |d| mv(d.rms)),
                device_mid_trim_median_mv: mid.map_or(0.0, |m| mv(m.device_eff)),
                device_eff_thresh_mv: match (threshold, device) {
                    (Some(t), Some(d)) => mv(t.realized - d.median),
                    _ => 0.0,
                },
                threshold_dac: ctx.threshold_dac(),
                best_trim: ctx.channel_trim(ch),
                trimmed_threshold_mv: if masked { 0.0 } else { trim.map_or(0.0, |t| mv(t.median)) },
                eff_thresh_with_best_trim_mv: if masked { 0.0 } else { trim.map_or(0.0, |t| mv(t.eff)) },
                threshold_dac_slope: threshold.map_or(0.0, |t| mv(t.slope)),
                threshold_dac_offset: threshold.map_or(0.0, |t| mv(t.intercept)),
                masked: u8::from(masked),
            }
        })
        .collect()
}

/// Write rows tab-delimited with a header line.
pub fn write_rows<W: io::Write>(out: W, rows: &[ChannelRow]) -> Result<()> {
    let mut w = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_writer(out);
    for row in rows {
        w.serialize(row)?;
    }
    w.flush()?;
    Ok(())
}

/// Per-device register document:
///
/// ```json
/// { "<device>": { "vmm<i>": { "thresholdDac": 300, "channel_trim": [...], "channel_mask": [...] } } }
/// ```
pub fn config_document(ctx: &DeviceContext) -> Value {
    let regs = ctx.register_map();
    let mask: Vec<u8> = regs.channel_mask.iter().map(|&m| u8::from(m)).collect();
    let registers = json!({
        "thresholdDac": regs.threshold_dac,
        "channel_trim": regs.channel_trim,
        "channel_mask": mask,
    });
    let mut vmm = Map::new();
    vmm.insert(format!("vmm{}", ctx.spec.key.vmm), registers);
    let mut doc = Map::new();
    doc.insert(ctx.spec.key.device.clone(), Value::Object(vmm));
    Value::Object(doc)
}

/// Deep-merge `doc` into `into`. Objects merge key by key; anything else in
/// `doc` replaces what was there.
pub fn merge_config_documents(into: &mut Value, doc: Value) {
    match (into, doc) {
        (Value::Object(dst), Value::Object(src)) => {
            for (k, v) in src {
                match dst.get_mut(&k) {
                    Some(existing) => merge_config_documents(existing, v),
                    None => {
                        dst.insert(k, v);
                    }
                }
            }
        }
        (dst, src) => *dst = src,
    }
}

/// One merged document for a set of devices.
pub fn merged_config<'a>(contexts: impl IntoIterator<Item = &'a DeviceContext>) -> Value {
    let mut doc = Value::Object(Map::new());
    for ctx in contexts {
        merge_config_documents(&mut doc, config_document(ctx));
    }
    doc
}
