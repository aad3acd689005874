use tally_common::types::Labels;

/// Joins the non-empty parts with `_`.
///
/// # Examples
///
/// ```
/// use tally_collector::normalize::compose::build_metric;
///
/// assert_eq!(build_metric(&["mtail", "lines", "count"]), "mtail_lines_count");
/// assert_eq!(build_metric(&["", "lines", ""]), "lines");
/// ```
pub fn build_metric(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts.iter().filter(|p| !p.is_empty()) {
        if !out.is_empty() {
            out.push('_');
        }
        out.push_str(part);
    }
    out
}

/// Returns the prefix to apply to `name`: empty when `name` already starts
/// with it, so a prefixed upstream name is never prefixed twice.
pub fn effective_prefix<'a>(prefix: &'a str, name: &str) -> &'a str {
    if name.starts_with(prefix) {
        ""
    } else {
        prefix
    }
}

/// Composes the final metric name for `name` with an optional suffix
/// (`count`, `sum`, `bucket`).
///
/// # Examples
///
/// ```
/// use tally_collector::normalize::compose::compose;
///
/// assert_eq!(compose("mtail", "requests", None), "mtail_requests");
/// assert_eq!(compose("mtail", "mtail_requests", None), "mtail_requests");
/// assert_eq!(compose("mtail", "latency", Some("bucket")), "mtail_latency_bucket");
/// ```
pub fn compose(prefix: &str, name: &str, suffix: Option<&str>) -> String {
    build_metric(&[effective_prefix(prefix, name), name, suffix.unwrap_or("")])
}

/// Copies the instance tags and overlays the upstream label pairs.
pub fn compose_labels(instance: &Labels, upstream: &[(String, String)]) -> Labels {
    let mut labels = instance.clone();
    for (key, value) in upstream {
        labels.insert(key.clone(), value.clone());
    }
    labels
}

/// Renders a float the way quantile and bucket tags expect: shortest
/// round-trip digits, scientific notation (`1e+06`, `1e-05`) outside the
/// decimal exponent range [-4, 6), and `+Inf`/`-Inf`/`NaN` for the specials.
///
/// # Examples
///
/// ```
/// use tally_collector::normalize::compose::format_float;
///
/// assert_eq!(format_float(0.5), "0.5");
/// assert_eq!(format_float(1.0), "1");
/// assert_eq!(format_float(1e6), "1e+06");
/// assert_eq!(format_float(f64::INFINITY), "+Inf");
/// ```
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }

    let sci = format!("{value:e}");
    let Some((mantissa, exponent)) = sci.split_once('e') else {
        return value.to_string();
    };
    let Ok(exponent) = exponent.parse::<i32>() else {
        return value.to_string();
    };

    if (-4..6).contains(&exponent) {
        value.to_string()
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.abs())
    }
}
