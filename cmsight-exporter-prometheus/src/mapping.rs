//! Naming and value formatting rules for exposed metrics.

use cmsight_common::build_fq_name;

/// Sanitize a metric name component to be Prometheus-compatible.
///
/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
/// Invalid characters become underscores, runs of underscores collapse,
/// and a leading digit gets an underscore prefix.
pub fn sanitize_metric_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 1);
    let mut last_was_underscore = false;

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        result.push('_');
        last_was_underscore = true;
    }

    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == ':' {
            result.push(c);
            last_was_underscore = false;
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        result.push_str("unnamed");
    }

    result
}

/// Build the exposed name of a module metric.
///
/// Format: `{namespace}_{module}_{metric}`, each part sanitized.
pub fn build_metric_name(namespace: &str, module: &str, metric: &str) -> String {
    let namespace = if namespace.is_empty() {
        String::new()
    } else {
        sanitize_metric_name(namespace)
    };

    build_fq_name(
        &namespace,
        &sanitize_metric_name(module),
        &sanitize_metric_name(metric),
    )
}

/// Help text used when a binding does not provide one.
///
/// `health_bad_rate` becomes `HEALTH BAD RATE`.
pub fn default_help(metric: &str) -> String {
    metric.to_uppercase().replace('_', " ")
}

/// Escape special characters in label values.
pub fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape help text (backslash and newline only).
pub fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a floating point value for the text exposition format.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}
