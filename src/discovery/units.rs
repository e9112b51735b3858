//! Kubernetes quantity and duration parsing used when sizing settings.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context};
use once_cell::sync::Lazy;
use regex::Regex;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

static MEMORY: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*([KMGTPE]i?|B)?\s*$"));

static DURATION_PART: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s*([smhdw]?)"));

fn pattern(compiled: &'static Result<Regex, regex::Error>) -> anyhow::Result<&'static Regex> {
    compiled.as_ref().map_err(|err| anyhow!("invalid built-in pattern: {err}"))
}

fn unit_factor(unit: &str) -> f64 {
    match unit {
        "K" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        _ => 1.0,
    }
}

/// `"1Gi"` → `1.0`, `"512Mi"` → `0.5`, bare numbers are bytes.
pub fn memory_gib(raw: &str) -> anyhow::Result<f64> {
    let captures = pattern(&MEMORY)?
        .captures(raw)
        .with_context(|| format!("unrecognized memory quantity `{raw}`"))?;
    let amount: f64 = captures[1]
        .parse()
        .with_context(|| format!("unrecognized memory quantity `{raw}`"))?;
    let factor = captures.get(2).map(|unit| unit_factor(unit.as_str())).unwrap_or(1.0);
    Ok(amount * factor / GIB)
}

/// `"250m"` → `0.25`, `"2"` → `2.0`.
pub fn cpu_cores(raw: &str) -> anyhow::Result<f64> {
    let raw = raw.trim();
    let parsed = match raw.strip_suffix('m') {
        Some(millis) => millis.parse::<f64>().map(|value| value / 1000.0),
        None => raw.parse::<f64>(),
    };
    parsed.with_context(|| format!("unrecognized cpu quantity `{raw}`"))
}

/// Range around `value` scaled by the two multipliers and snapped to `step`.
/// The minimum never exceeds `value` and never drops below one `step`.
pub fn min_max(value: f64, step: f64, min_mult: f64, max_mult: f64) -> (f64, f64) {
    let max = ((value * max_mult) / step).floor() * step;
    let diff = (1.0 - min_mult) * value;
    let min = value.min(step.max(value - (diff / step).floor() * step));
    (min, max)
}

/// Reads `5m`, `1h30m`, `90` style durations as seconds. A bare number is
/// seconds. When a unit repeats, its last amount wins.
pub fn duration_seconds(raw: &str) -> anyhow::Result<u64> {
    let mut parts: BTreeMap<u64, u64> = BTreeMap::new();
    for captures in pattern(&DURATION_PART)?.captures_iter(raw) {
        let amount: u64 = captures[1]
            .parse()
            .with_context(|| format!("duration `{raw}` is too large"))?;
        let multiplier = match captures[2].to_ascii_lowercase().as_str() {
            "m" => 60,
            "h" => 60 * 60,
            "d" => 60 * 60 * 24,
            "w" => 60 * 60 * 24 * 7,
            _ => 1,
        };
        parts.insert(multiplier, amount);
    }
    if parts.is_empty() {
        bail!("`{raw}` is not a duration such as 5m or 1h30m");
    }
    parts
        .into_iter()
        .try_fold(0u64, |total, (multiplier, amount)| {
            amount
                .checked_mul(multiplier)
                .and_then(|seconds| total.checked_add(seconds))
        })
        .with_context(|| format!("duration `{raw}` is too large"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_units_convert_to_gib() {
        assert_eq!(memory_gib("1Gi").unwrap(), 1.0);
        assert_eq!(memory_gib("128Mi").unwrap(), 0.125);
        assert_eq!(memory_gib("1073741824").unwrap(), 1.0);
        assert!((memory_gib("1G").unwrap() - 0.931).abs() < 0.001);
        assert!(memory_gib("lots").is_err());
    }

    #[test]
    fn cpu_millicores_convert_to_cores() {
        assert_eq!(cpu_cores("100m").unwrap(), 0.1);
        assert_eq!(cpu_cores("2").unwrap(), 2.0);
        assert!(cpu_cores("two").is_err());
    }

    #[test]
    fn min_max_snaps_to_step() {
        assert_eq!(min_max(1.0, 0.125, 0.25, 4.0), (0.25, 4.0));
        assert_eq!(min_max(4.0, 1.0, 0.25, 4.0), (1.0, 16.0));
        // Small values keep a floor of one step but never exceed the value.
        assert_eq!(min_max(0.1, 0.125, 0.25, 4.0), (0.1, 0.375));
    }

    #[test]
    fn durations_sum_their_parts() {
        assert_eq!(duration_seconds("5m").unwrap(), 300);
        assert_eq!(duration_seconds("1h30m").unwrap(), 5400);
        assert_eq!(duration_seconds("90").unwrap(), 90);
        assert_eq!(duration_seconds("2D").unwrap(), 172_800);
        assert!(duration_seconds("soon").is_err());
    }

    #[test]
    fn repeated_units_keep_the_last_amount() {
        assert_eq!(duration_seconds("5m5m").unwrap(), 300);
        assert_eq!(duration_seconds("1m10s20s").unwrap(), 80);
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let err = duration_seconds("99999999999999999w").unwrap_err();
        assert!(err.to_string().contains("too large"));
        assert!(duration_seconds("99999999999999999999999").is_err());
        assert!(duration_seconds("18446744073709551615s1m").is_err());
    }
}
