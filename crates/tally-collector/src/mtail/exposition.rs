//! Parser for the Prometheus text exposition format (0.0.4), the format the
//! log-metrics engine serves its registry in.
//!
//! Summary and histogram series (`_sum`, `_count`, `_bucket`, `quantile`)
//! are folded back into one [`Metric`] per label set. The explicit
//! `le="+Inf"` bucket is dropped: the histogram strategy synthesizes it from
//! the sample count.

use crate::error::{CollectorError, Result};
use crate::normalize::{Bucket, Histogram, Metric, MetricFamily, MetricType, MetricValue, Quantile, Summary};
use std::collections::HashMap;

type LabelPairs = Vec<(String, String)>;

/// Parses a full exposition document into families, in first-seen order.
///
/// # Errors
///
/// Returns [`CollectorError::Exposition`] for the first malformed line.
pub fn parse(text: &str) -> Result<Vec<MetricFamily>> {
    let mut families = Families::default();

    for (idx, raw) in text.lines().enumerate() {
        let number = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            families.comment(comment.trim_start(), number)?;
            continue;
        }
        let sample = parse_sample(line, number)?;
        families.add(sample, number)?;
    }

    Ok(families.finish())
}

struct RawSample {
    name: String,
    labels: LabelPairs,
    value: f64,
}

#[derive(Default)]
struct Families {
    order: Vec<FamilyBuilder>,
    index: HashMap<String, usize>,
}

struct FamilyBuilder {
    name: String,
    help: String,
    kind: MetricType,
    /// Set once a `# TYPE` line declared this family.
    declared: bool,
    metrics: Vec<Metric>,
    /// Sorted label set to its position in `metrics`, for folded kinds.
    groups: HashMap<LabelPairs, usize>,
}

impl Families {
    fn entry(&mut self, name: &str) -> &mut FamilyBuilder {
        let idx = match self.index.get(name) {
            Some(idx) => *idx,
            None => {
                self.order.push(FamilyBuilder {
                    name: name.to_string(),
                    help: String::new(),
                    kind: MetricType::Untyped,
                    declared: false,
                    metrics: Vec::new(),
                    groups: HashMap::new(),
                });
                self.index.insert(name.to_string(), self.order.len() - 1);
                self.order.len() - 1
            }
        };
        &mut self.order[idx]
    }

    fn kind_of(&self, name: &str) -> Option<MetricType> {
        self.index.get(name).map(|idx| self.order[*idx].kind)
    }

    fn is_declared(&self, name: &str) -> bool {
        self.index.get(name).is_some_and(|idx| self.order[*idx].declared)
    }

    fn comment(&mut self, comment: &str, number: usize) -> Result<()> {
        let mut parts = comment.splitn(3, char::is_whitespace);
        let keyword = parts.next().unwrap_or("");
        if keyword != "TYPE" && keyword != "HELP" {
            return Ok(());
        }
        let name = parts.next().unwrap_or("");
        if name.is_empty() {
            return Err(parse_error(number, format!("{keyword} without a metric name")));
        }
        let rest = parts.next().unwrap_or("").trim();

        if keyword == "TYPE" {
            let kind = rest.parse().unwrap_or(MetricType::Unknown);
            let family = self.entry(name);
            family.kind = kind;
            family.declared = true;
        } else {
            self.entry(name).help = unescape_help(rest);
        }
        Ok(())
    }

    fn add(&mut self, sample: RawSample, number: usize) -> Result<()> {
        // a family declared under the sample's own name wins over folding
        let suffixes: &[&str] = if self.is_declared(&sample.name) {
            &[]
        } else {
            &["_bucket", "_count", "_sum"]
        };
        for &suffix in suffixes {
            let Some(base) = sample.name.strip_suffix(suffix) else {
                continue;
            };
            match self.kind_of(base) {
                Some(MetricType::Histogram) => {
                    return self.entry(base).fold_histogram(suffix, sample, number);
                }
                Some(MetricType::Summary) if suffix != "_bucket" => {
                    return self.entry(base).fold_summary(suffix, sample, number);
                }
                _ => {}
            }
        }

        let family = self.entry(&sample.name);
        match family.kind {
            MetricType::Summary => family.fold_summary("", sample, number),
            MetricType::Histogram => Err(parse_error(
                number,
                format!("sample {} has no histogram suffix", sample.name),
            )),
            kind => {
                let value = match kind {
                    MetricType::Counter => MetricValue::Counter(sample.value),
                    MetricType::Gauge => MetricValue::Gauge(sample.value),
                    _ => MetricValue::Untyped(sample.value),
                };
                family.metrics.push(Metric {
                    labels: sample.labels,
                    value,
                });
                Ok(())
            }
        }
    }

    fn finish(self) -> Vec<MetricFamily> {
        self.order
            .into_iter()
            .map(|f| MetricFamily {
                name: f.name,
                help: f.help,
                kind: f.kind,
                metrics: f.metrics,
            })
            .collect()
    }
}

impl FamilyBuilder {
    /// Returns the metric for `labels`, creating it with `empty` when this
    /// label set has not been seen yet.
    fn group(&mut self, labels: LabelPairs, empty: MetricValue) -> &mut MetricValue {
        let mut key = labels.clone();
        key.sort_unstable();
        let next = self.metrics.len();
        let idx = *self.groups.entry(key).or_insert(next);
        if idx == next {
            self.metrics.push(Metric { labels, value: empty });
        }
        &mut self.metrics[idx].value
    }

    fn fold_summary(&mut self, suffix: &str, mut sample: RawSample, number: usize) -> Result<()> {
        let quantile = take_label(&mut sample.labels, "quantile");
        let value = self.group(sample.labels, MetricValue::Summary(Summary::default()));
        let MetricValue::Summary(summary) = value else {
            return Ok(());
        };

        match (suffix, quantile) {
            ("_count", _) => summary.sample_count = sample.value as u64,
            ("_sum", _) => summary.sample_sum = sample.value,
            (_, Some(q)) => {
                let quantile = parse_value(&q)
                    .ok_or_else(|| parse_error(number, format!("invalid quantile {q:?}")))?;
                summary.quantiles.push(Quantile {
                    quantile,
                    value: sample.value,
                });
            }
            (_, None) => {
                return Err(parse_error(number, "summary sample without quantile label"));
            }
        }
        Ok(())
    }

    fn fold_histogram(&mut self, suffix: &str, mut sample: RawSample, number: usize) -> Result<()> {
        let le = take_label(&mut sample.labels, "le");
        let value = self.group(sample.labels, MetricValue::Histogram(Histogram::default()));
        let MetricValue::Histogram(histogram) = value else {
            return Ok(());
        };

        match suffix {
            "_count" => histogram.sample_count = sample.value as u64,
            "_sum" => histogram.sample_sum = sample.value,
            _ => {
                let le = le.ok_or_else(|| parse_error(number, "bucket without le label"))?;
                let upper_bound =
                    parse_value(&le).ok_or_else(|| parse_error(number, format!("invalid le {le:?}")))?;
                if upper_bound == f64::INFINITY {
                    return Ok(());
                }
                histogram.buckets.push(Bucket {
                    upper_bound,
                    cumulative_count: sample.value as u64,
                });
            }
        }
        Ok(())
    }
}

fn take_label(labels: &mut LabelPairs, key: &str) -> Option<String> {
    let pos = labels.iter().position(|(k, _)| k == key)?;
    Some(labels.remove(pos).1)
}

fn parse_error(line: usize, message: impl Into<String>) -> CollectorError {
    CollectorError::Exposition {
        line,
        message: message.into(),
    }
}

fn parse_value(token: &str) -> Option<f64> {
    match token {
        "NaN" => Some(f64::NAN),
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        _ => token.parse().ok(),
    }
}

fn unescape_help(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn is_metric_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

struct Cursor<'a> {
    line: &'a str,
    pos: usize,
    number: usize,
}

impl<'a> Cursor<'a> {
    fn rest(&self) -> &'a str {
        &self.line[self.pos..]
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let rest = self.rest();
        let end = rest.find(|c: char| !pred(c)).unwrap_or(rest.len());
        self.pos += end;
        &rest[..end]
    }

    fn eat(&mut self, c: char) -> bool {
        if self.rest().starts_with(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> CollectorError {
        parse_error(self.number, message)
    }

    /// Reads a quoted label value; the opening quote is already consumed.
    fn label_value(&mut self) -> Result<String> {
        let mut out = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += i + 1;
                    return Ok(out);
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, '\\')) => out.push('\\'),
                    Some((_, '"')) => out.push('"'),
                    Some((_, other)) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => break,
                },
                c => out.push(c),
            }
        }
        Err(self.error("unterminated label value"))
    }
}

fn parse_sample(line: &str, number: usize) -> Result<RawSample> {
    let mut cur = Cursor { line, pos: 0, number };

    let name = cur.take_while(is_metric_char);
    if name.is_empty() {
        return Err(cur.error("missing metric name"));
    }
    cur.skip_ws();

    let mut labels = Vec::new();
    if cur.eat('{') {
        loop {
            cur.skip_ws();
            if cur.eat('}') {
                break;
            }
            let key = cur.take_while(is_label_char);
            if key.is_empty() {
                return Err(cur.error("missing label name"));
            }
            cur.skip_ws();
            if !cur.eat('=') {
                return Err(cur.error(format!("expected '=' after label {key}")));
            }
            cur.skip_ws();
            if !cur.eat('"') {
                return Err(cur.error(format!("expected quoted value for label {key}")));
            }
            let value = cur.label_value()?;
            labels.push((key.to_string(), value));

            cur.skip_ws();
            if cur.eat(',') {
                continue;
            }
            if cur.eat('}') {
                break;
            }
            return Err(cur.error("expected ',' or '}' in label set"));
        }
    }

    cur.skip_ws();
    let token = cur.take_while(|c| !c.is_whitespace());
    let value = parse_value(token).ok_or_else(|| cur.error(format!("invalid sample value {token:?}")))?;

    // optional timestamp, ignored: samples are stamped at emission
    cur.skip_ws();
    let timestamp = cur.take_while(|c| !c.is_whitespace());
    if !timestamp.is_empty() && timestamp.parse::<i64>().is_err() {
        return Err(cur.error(format!("invalid timestamp {timestamp:?}")));
    }
    cur.skip_ws();
    if !cur.rest().is_empty() {
        return Err(cur.error("trailing characters after sample"));
    }

    Ok(RawSample {
        name: name.to_string(),
        labels,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MTAIL_SCRAPE: &str = r#"
# HELP lines_total number of lines read
# TYPE lines_total counter
lines_total{prog="nginx.mtail",filename="/var/log/nginx/access.log"} 1024
# TYPE request_latency histogram
request_latency_bucket{prog="nginx.mtail",le="0.1"} 5
request_latency_bucket{prog="nginx.mtail",le="0.5"} 12
request_latency_bucket{prog="nginx.mtail",le="+Inf"} 20
request_latency_sum{prog="nginx.mtail"} 3.4
request_latency_count{prog="nginx.mtail"} 20
# TYPE rpc_seconds summary
rpc_seconds{quantile="0.5"} 0.01
rpc_seconds{quantile="0.99"} 0.2
rpc_seconds_sum 8.5
rpc_seconds_count 300
# TYPE temperature gauge
temperature NaN 1700000000000
"#;

    #[test]
    fn parses_every_family_kind() {
        let families = parse(MTAIL_SCRAPE).unwrap();
        let names: Vec<&str> = families.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["lines_total", "request_latency", "rpc_seconds", "temperature"]);

        let lines = &families[0];
        assert_eq!(lines.kind, MetricType::Counter);
        assert_eq!(lines.help, "number of lines read");
        assert_eq!(lines.metrics[0].value, MetricValue::Counter(1024.0));
        assert_eq!(lines.metrics[0].labels.len(), 2);

        let MetricValue::Histogram(h) = &families[1].metrics[0].value else {
            panic!("expected histogram");
        };
        assert_eq!(h.sample_count, 20);
        assert_eq!(h.sample_sum, 3.4);
        assert_eq!(
            h.buckets,
            vec![
                Bucket { upper_bound: 0.1, cumulative_count: 5 },
                Bucket { upper_bound: 0.5, cumulative_count: 12 },
            ]
        );
        assert_eq!(families[1].metrics[0].labels, vec![("prog".to_string(), "nginx.mtail".to_string())]);

        let MetricValue::Summary(s) = &families[2].metrics[0].value else {
            panic!("expected summary");
        };
        assert_eq!(s.sample_count, 300);
        assert_eq!(s.quantiles.len(), 2);
        assert_eq!(s.quantiles[1], Quantile { quantile: 0.99, value: 0.2 });

        assert!(families[3].metrics[0].value.scalar().unwrap().is_nan());
    }

    #[test]
    fn groups_series_by_label_set() {
        let text = r#"
# TYPE latency histogram
latency_bucket{code="200",le="1"} 3
latency_bucket{code="500",le="1"} 1
latency_count{code="500"} 2
latency_count{code="200"} 4
"#;
        let families = parse(text).unwrap();
        assert_eq!(families[0].metrics.len(), 2);
        let MetricValue::Histogram(ok) = &families[0].metrics[0].value else {
            panic!("expected histogram");
        };
        assert_eq!(ok.sample_count, 4);
        assert_eq!(ok.buckets[0].cumulative_count, 3);
    }

    #[test]
    fn untyped_without_type_line() {
        let families = parse("up 1\nup{job=\"x\"} 0\n").unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].kind, MetricType::Untyped);
        assert_eq!(families[0].metrics.len(), 2);
    }

    #[test]
    fn unknown_type_is_kept_as_unknown() {
        let families = parse("# TYPE odd gaugehistogram\nodd 3\n").unwrap();
        assert_eq!(families[0].kind, MetricType::Unknown);
        assert_eq!(families[0].metrics[0].value, MetricValue::Untyped(3.0));
    }

    #[test]
    fn label_values_are_unescaped() {
        let families = parse(r#"msg{text="say \"hi\"\nbye",path="C:\\tmp"} 1"#).unwrap();
        let labels = &families[0].metrics[0].labels;
        assert_eq!(labels[0].1, "say \"hi\"\nbye");
        assert_eq!(labels[1].1, "C:\\tmp");
    }

    #[test]
    fn trailing_comma_in_label_set() {
        let families = parse(r#"x{a="1",} 2"#).unwrap();
        assert_eq!(families[0].metrics[0].labels.len(), 1);
    }

    #[test]
    fn malformed_lines_report_their_number() {
        let err = parse("ok 1\nbroken{a=1} 2\n").err().unwrap();
        match err {
            CollectorError::Exposition { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error {other}"),
        }

        assert!(parse("x abc").is_err());
        assert!(parse("x{a=\"1\" 2").is_err());
        assert!(parse("x 1 notatimestamp").is_err());
    }

    #[test]
    fn label_order_does_not_split_a_series() {
        let text = r#"
# TYPE rpc summary
rpc{a="1",b="2",quantile="0.5"} 0.1
rpc_sum{b="2",a="1"} 4
rpc_count{b="2",a="1"} 9
"#;
        let families = parse(text).unwrap();
        assert_eq!(families[0].metrics.len(), 1);
        let MetricValue::Summary(s) = &families[0].metrics[0].value else {
            panic!("expected summary");
        };
        assert_eq!(s.sample_count, 9);
        assert_eq!(s.quantiles.len(), 1);
    }

    #[test]
    fn large_histogram_parses_quickly() {
        let series = 5_000;
        let mut text = String::from("# TYPE latency histogram\n");
        for i in 0..series {
            for le in ["0.1", "0.5", "1", "+Inf"] {
                text.push_str(&format!("latency_bucket{{path=\"/p{i}\",code=\"200\",le=\"{le}\"}} {i}\n"));
            }
            text.push_str(&format!("latency_sum{{code=\"200\",path=\"/p{i}\"}} 1.5\n"));
            text.push_str(&format!("latency_count{{path=\"/p{i}\",code=\"200\"}} {i}\n"));
        }

        let started = std::time::Instant::now();
        let families = parse(&text).unwrap();
        let elapsed = started.elapsed();

        assert_eq!(families.len(), 1);
        assert_eq!(families[0].metrics.len(), series);
        let MetricValue::Histogram(last) = &families[0].metrics[series - 1].value else {
            panic!("expected histogram");
        };
        assert_eq!(last.buckets.len(), 3);
        assert_eq!(last.sample_count, (series - 1) as u64);
        assert!(elapsed < std::time::Duration::from_secs(5), "parse took {elapsed:?}");
    }

    #[test]
    fn declared_family_is_not_folded_into_a_histogram() {
        let text = r#"
# TYPE req histogram
req_bucket{le="1"} 2
req_count 2
req_sum 0.7
# TYPE req_count counter
req_count{job="api"} 7
"#;
        let families = parse(text).unwrap();
        let summary: Vec<(&str, MetricType, usize)> = families
            .iter()
            .map(|f| (f.name.as_str(), f.kind, f.metrics.len()))
            .collect();
        assert_eq!(
            summary,
            vec![("req", MetricType::Histogram, 1), ("req_count", MetricType::Counter, 1)]
        );
        assert_eq!(families[1].metrics[0].value, MetricValue::Counter(7.0));
    }

    #[test]
    fn histogram_sample_without_suffix_is_rejected() {
        assert!(parse("# TYPE h histogram\nh 1\n").is_err());
    }
}
