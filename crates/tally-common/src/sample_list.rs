use crate::types::{Labels, Sample};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Append-only sink shared by every task gathering during one tick.
///
/// Cloning is cheap and yields a handle to the same buffer, so concurrent
/// per-entity tasks can each hold one. Samples with an empty metric name are
/// never stored.
#[derive(Debug, Clone, Default)]
pub struct SampleList {
    inner: Arc<Mutex<VecDeque<Sample>>>,
}

impl SampleList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, sample: Sample) {
        if sample.metric().is_empty() {
            return;
        }
        self.inner.lock().push_back(sample);
    }

    /// Builds and appends one sample; `extra` layers are merged over `labels`.
    pub fn push_sample(&self, metric: impl Into<String>, value: f64, labels: &Labels, extra: &[&Labels]) {
        let mut layers: Vec<&Labels> = Vec::with_capacity(extra.len() + 1);
        layers.push(labels);
        layers.extend_from_slice(extra);
        self.push(Sample::new(metric, value, &layers));
    }

    /// Appends one sample per field, named `<prefix>_<field>` (or just the
    /// field when `prefix` is empty). The fields are appended as a single
    /// batch, so their relative order survives concurrent pushes.
    pub fn push_samples<'a, I>(&self, prefix: &str, fields: I, labels: &Labels)
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let batch = fields
            .into_iter()
            .map(|(field, value)| {
                let metric = if prefix.is_empty() {
                    field.to_string()
                } else {
                    format!("{prefix}_{field}")
                };
                Sample::new(metric, value, &[labels])
            })
            .collect();
        self.push_batch(batch);
    }

    /// Appends a prepared batch contiguously.
    pub fn push_batch(&self, samples: Vec<Sample>) {
        let mut buf = self.inner.lock();
        buf.extend(samples.into_iter().filter(|s| !s.metric().is_empty()));
    }

    pub fn drain_all(&self) -> Vec<Sample> {
        self.inner.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn push_samples_prefixes_fields() {
        let list = SampleList::new();
        let mut tags = HashMap::new();
        tags.insert("owner".to_string(), "octocat".to_string());

        list.push_samples("github", [("stars", 10.0), ("forks", 2.0)], &tags);
        let samples = list.drain_all();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].metric(), "github_stars");
        assert_eq!(samples[1].metric(), "github_forks");
        assert_eq!(samples[1].labels()["owner"], "octocat");
        assert!(list.is_empty());
    }

    #[test]
    fn empty_metric_names_are_dropped() {
        let list = SampleList::new();
        list.push_sample("", 1.0, &HashMap::new(), &[]);
        list.push_samples("", [("", 2.0), ("ok", 3.0)], &HashMap::new());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn clones_share_the_buffer() {
        let list = SampleList::new();
        let handle = list.clone();
        let threads: Vec<_> = (0..4)
            .map(|i| {
                let handle = handle.clone();
                std::thread::spawn(move || {
                    handle.push_samples("t", [("a", i as f64), ("b", i as f64)], &HashMap::new());
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let samples = list.drain_all();
        assert_eq!(samples.len(), 8);
        // each batch stays contiguous
        for pair in samples.chunks(2) {
            assert_eq!(pair[0].metric(), "t_a");
            assert_eq!(pair[1].metric(), "t_b");
            assert_eq!(pair[0].value(), pair[1].value());
        }
    }
}
