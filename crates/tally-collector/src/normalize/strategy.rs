//! Flattening strategies: each turns one upstream metric into samples.
//!
//! Names are passed in already composed (prefix applied); the strategies
//! only append suffixes and synthetic tags.

use super::compose::{build_metric, format_float};
use super::{Histogram, Summary};
use std::collections::HashMap;
use tally_common::types::{Labels, Sample};

fn synthetic(key: &str, value: String) -> Labels {
    let mut labels = HashMap::with_capacity(1);
    labels.insert(key.to_string(), value);
    labels
}

/// `_count`, `_sum`, then one sample per quantile in declared order.
///
/// Values are emitted as-is, NaN included.
pub fn flatten_summary(base: &str, summary: &Summary, labels: &Labels) -> Vec<Sample> {
    let mut samples = Vec::with_capacity(2 + summary.quantiles.len());
    samples.push(Sample::new(
        build_metric(&[base, "count"]),
        summary.sample_count as f64,
        &[labels],
    ));
    samples.push(Sample::new(build_metric(&[base, "sum"]), summary.sample_sum, &[labels]));

    for q in &summary.quantiles {
        let tag = synthetic("quantile", format_float(q.quantile));
        samples.push(Sample::new(base, q.value, &[labels, &tag]));
    }
    samples
}

/// `_count`, `_sum`, the synthetic `+Inf` bucket, then one `_bucket` sample
/// per declared bound in declared order.
///
/// Values are emitted as-is, NaN included.
pub fn flatten_histogram(base: &str, histogram: &Histogram, labels: &Labels) -> Vec<Sample> {
    let bucket_name = build_metric(&[base, "bucket"]);
    let total = histogram.sample_count as f64;

    let mut samples = Vec::with_capacity(3 + histogram.buckets.len());
    samples.push(Sample::new(build_metric(&[base, "count"]), total, &[labels]));
    samples.push(Sample::new(build_metric(&[base, "sum"]), histogram.sample_sum, &[labels]));
    samples.push(Sample::new(
        bucket_name.clone(),
        total,
        &[labels, &synthetic("le", "+Inf".to_string())],
    ));

    for b in &histogram.buckets {
        let tag = synthetic("le", format_float(b.upper_bound));
        samples.push(Sample::new(bucket_name.clone(), b.cumulative_count as f64, &[labels, &tag]));
    }
    samples
}

/// A single sample, or nothing when the value is NaN or absent.
pub fn flatten_scalar(name: String, value: Option<f64>, labels: &Labels) -> Option<Sample> {
    match value {
        Some(v) if !v.is_nan() => Some(Sample::new(name, v, &[labels])),
        _ => None,
    }
}
