use crate::Capabilities;
use std::time::Instant;

/// Outcome of the compiled statement cache lookup that preceded an execution.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    /// The statement has no cache key.
    #[default]
    NoKey,
    Hit,
    Miss,
    Disabled,
    /// The dialect opted out of statement caching.
    NoDialectSupport,
}

impl CacheStatus {
    /// Diagnostic line, `generated_at` is `None` for raw SQL.
    pub fn render(&self, capabilities: &Capabilities, generated_at: Option<Instant>) -> String {
        let Some(generated_at) = generated_at else {
            return "raw sql".into();
        };
        let elapsed = generated_at.elapsed().as_secs_f64();
        let status = if capabilities.supports_statement_cache {
            self
        } else {
            &CacheStatus::NoDialectSupport
        };
        match status {
            CacheStatus::NoKey => format!("no key {elapsed:.5}s"),
            CacheStatus::Hit => format!("cached since {}s ago", general_format(elapsed, 4)),
            CacheStatus::Miss => format!("generated in {elapsed:.5}s"),
            CacheStatus::Disabled => format!("caching disabled {elapsed:.5}s"),
            CacheStatus::NoDialectSupport => format!(
                "dialect {}+{} does not support caching {elapsed:.5}s",
                capabilities.name, capabilities.driver
            ),
        }
    }
}

/// Shortest rendering with `digits` significant digits, scientific for very small or large values.
fn general_format(value: f64, digits: usize) -> String {
    if value == 0.0 || !value.is_finite() {
        return format!("{value}");
    }
    let exponent = value.abs().log10().floor() as i32;
    if exponent < -4 || exponent >= digits as i32 {
        let formatted = format!("{:.*e}", digits.saturating_sub(1), value);
        let (mantissa, exponent) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        let mantissa = trim_fraction(mantissa);
        let exponent: i32 = exponent.parse().unwrap_or_default();
        format!("{mantissa}e{}{:02}", if exponent < 0 { '-' } else { '+' }, exponent.abs())
    } else {
        let decimals = (digits as i32 - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{value:.decimals$}")).to_string()
    }
}

fn trim_fraction(value: &str) -> &str {
    if value.contains('.') {
        value.trim_end_matches('0').trim_end_matches('.')
    } else {
        value
    }
}
