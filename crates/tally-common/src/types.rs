use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tag set attached to a [`Sample`].
pub type Labels = HashMap<String, String>;

/// The canonical unit every input emits: a named value with tags, stamped
/// at construction time.
///
/// A sample is not modified after it is built; the accessors hand out
/// shared references only.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use tally_common::types::Sample;
///
/// let mut instance = HashMap::new();
/// instance.insert("env".to_string(), "prod".to_string());
/// let mut bucket = HashMap::new();
/// bucket.insert("le".to_string(), "0.5".to_string());
///
/// let sample = Sample::new("latency_bucket", 12.0, &[&instance, &bucket]);
/// assert_eq!(sample.metric(), "latency_bucket");
/// assert_eq!(sample.labels()["le"], "0.5");
/// assert_eq!(sample.labels()["env"], "prod");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    metric: String,
    #[serde(with = "value_repr")]
    value: f64,
    labels: Labels,
    timestamp: DateTime<Utc>,
}

impl Sample {
    /// Builds a sample whose tags are the given layers merged in order.
    /// Keys in later layers overwrite the same keys in earlier ones.
    pub fn new(metric: impl Into<String>, value: f64, layers: &[&Labels]) -> Self {
        Self {
            metric: metric.into(),
            value,
            labels: merge_labels(layers),
            timestamp: Utc::now(),
        }
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Exposition-style rendering, `name{k="v",...} value`, labels sorted by key.
impl std::fmt::Display for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.metric)?;
        if !self.labels.is_empty() {
            write!(f, "{{{}}}", format_labels(&self.labels))?;
        }
        match special_token(self.value) {
            Some(token) => write!(f, " {token}"),
            None => write!(f, " {}", self.value),
        }
    }
}

/// Text form of the non-finite values, as the exposition format spells them.
fn special_token(value: f64) -> Option<&'static str> {
    if value.is_nan() {
        Some("NaN")
    } else if value == f64::INFINITY {
        Some("+Inf")
    } else if value == f64::NEG_INFINITY {
        Some("-Inf")
    } else {
        None
    }
}

/// JSON has no NaN or infinities, so those values travel as the strings
/// `"NaN"`, `"+Inf"` and `"-Inf"`; finite values stay plain numbers.
mod value_repr {
    use super::special_token;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        match special_token(*value) {
            Some(token) => serializer.serialize_str(token),
            None => serializer.serialize_f64(*value),
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Token(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(v),
            Repr::Token(token) => match token.as_str() {
                "NaN" => Ok(f64::NAN),
                "+Inf" | "Inf" => Ok(f64::INFINITY),
                "-Inf" => Ok(f64::NEG_INFINITY),
                other => Err(D::Error::custom(format!("invalid sample value {other:?}"))),
            },
        }
    }
}

/// Merges tag layers into a fresh map. The inputs are only read, so the
/// result can be mutated without touching any caller-owned layer.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use tally_common::types::merge_labels;
///
/// let mut base = HashMap::new();
/// base.insert("le".to_string(), "static".to_string());
/// let mut synthetic = HashMap::new();
/// synthetic.insert("le".to_string(), "+Inf".to_string());
///
/// let merged = merge_labels(&[&base, &synthetic]);
/// assert_eq!(merged["le"], "+Inf");
/// assert_eq!(base["le"], "static");
/// ```
pub fn merge_labels(layers: &[&Labels]) -> Labels {
    let capacity = layers.iter().map(|l| l.len()).sum();
    let mut merged = HashMap::with_capacity(capacity);
    for layer in layers {
        for (key, value) in layer.iter() {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Renders labels as `k="v"` pairs sorted by key, quotes and backslashes
/// escaped.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use tally_common::types::format_labels;
///
/// let mut labels = HashMap::new();
/// labels.insert("repo".to_string(), "octocat/Hello-World".to_string());
/// labels.insert("le".to_string(), "+Inf".to_string());
/// assert_eq!(format_labels(&labels), r#"le="+Inf",repo="octocat/Hello-World""#);
/// ```
pub fn format_labels(labels: &Labels) -> String {
    let mut keys: Vec<&String> = labels.keys().collect();
    keys.sort_unstable();

    let mut out = String::new();
    for key in keys {
        if !out.is_empty() {
            out.push(',');
        }
        out.push_str(key);
        out.push_str("=\"");
        for c in labels[key].chars() {
            match c {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                c => out.push(c),
            }
        }
        out.push('"');
    }
    out
}
