//! Metric normalization: flattens upstream metric families (counters,
//! gauges, summaries, histograms) into [`Sample`]s with deterministic names
//! and tags.
//!
//! The [`Flattener`] holds an instance's name prefix and static tags. For
//! every metric it composes tags (instance tags, then the metric's upstream
//! labels, then synthetic `quantile`/`le` tags), classifies the metric by its
//! family's declared kind and runs the matching strategy in [`strategy`].

pub mod compose;
pub mod strategy;

use compose::{compose, compose_labels};
use tally_common::types::{Labels, Sample};
use tally_common::SampleList;

/// Declared kind of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Summary,
    Histogram,
    Untyped,
    /// Any kind the source declared that is not one of the above.
    Unknown,
}

impl std::str::FromStr for MetricType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "counter" => MetricType::Counter,
            "gauge" => MetricType::Gauge,
            "summary" => MetricType::Summary,
            "histogram" => MetricType::Histogram,
            "untyped" => MetricType::Untyped,
            _ => MetricType::Unknown,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantile {
    pub quantile: f64,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub sample_count: u64,
    pub sample_sum: f64,
    pub quantiles: Vec<Quantile>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    pub upper_bound: f64,
    pub cumulative_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Histogram {
    pub sample_count: u64,
    pub sample_sum: f64,
    pub buckets: Vec<Bucket>,
}

/// The observed value of one upstream metric.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(f64),
    Untyped(f64),
    Summary(Summary),
    Histogram(Histogram),
}

impl MetricValue {
    /// The single numeric value, for the scalar kinds.
    pub fn scalar(&self) -> Option<f64> {
        match self {
            MetricValue::Gauge(v) | MetricValue::Counter(v) | MetricValue::Untyped(v) => Some(*v),
            MetricValue::Summary(_) | MetricValue::Histogram(_) => None,
        }
    }
}

/// One labelled observation within a family.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub labels: Vec<(String, String)>,
    pub value: MetricValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: String,
    pub kind: MetricType,
    pub metrics: Vec<Metric>,
}

/// Flattening strategy selected for a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Summary,
    Histogram,
    Scalar,
}

/// Picks the strategy for a family's declared kind. Every kind other than
/// summary and histogram, unknown ones included, takes the scalar path.
pub fn classify(kind: MetricType) -> Strategy {
    match kind {
        MetricType::Summary => Strategy::Summary,
        MetricType::Histogram => Strategy::Histogram,
        MetricType::Counter | MetricType::Gauge | MetricType::Untyped | MetricType::Unknown => {
            Strategy::Scalar
        }
    }
}

/// Per-instance flattening context.
pub struct Flattener<'a> {
    prefix: &'a str,
    labels: &'a Labels,
}

impl<'a> Flattener<'a> {
    pub fn new(prefix: &'a str, labels: &'a Labels) -> Self {
        Self { prefix, labels }
    }

    /// Flattens every metric of every family, in order, into `slist`.
    pub fn flatten_into(&self, families: &[MetricFamily], slist: &SampleList) {
        for family in families {
            slist.push_batch(self.flatten_family(family));
        }
    }

    pub fn flatten_family(&self, family: &MetricFamily) -> Vec<Sample> {
        family
            .metrics
            .iter()
            .flat_map(|m| self.flatten_metric(&family.name, family.kind, m))
            .collect()
    }

    /// Flattens one metric. A family declared as summary or histogram whose
    /// metric carries another value shape is read as an empty summary or
    /// histogram.
    pub fn flatten_metric(&self, family: &str, kind: MetricType, metric: &Metric) -> Vec<Sample> {
        let labels = compose_labels(self.labels, &metric.labels);

        match classify(kind) {
            Strategy::Summary => {
                let empty = Summary::default();
                let summary = match &metric.value {
                    MetricValue::Summary(s) => s,
                    _ => &empty,
                };
                let base = compose(self.prefix, family, None);
                strategy::flatten_summary(&base, summary, &labels)
            }
            Strategy::Histogram => {
                let empty = Histogram::default();
                let histogram = match &metric.value {
                    MetricValue::Histogram(h) => h,
                    _ => &empty,
                };
                let base = compose(self.prefix, family, None);
                strategy::flatten_histogram(&base, histogram, &labels)
            }
            Strategy::Scalar => {
                let name = compose(self.prefix, family, None);
                strategy::flatten_scalar(name, metric.value.scalar(), &labels)
                    .into_iter()
                    .collect()
            }
        }
    }
}
