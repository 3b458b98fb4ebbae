use crate::Value;
use std::fmt::Write;

pub fn separated_by<T, F>(
    out: &mut String,
    values: impl IntoIterator<Item = T>,
    mut f: F,
    separator: &str,
) where
    F: FnMut(&mut String, T),
{
    let mut len = out.len();
    for v in values {
        if out.len() > len {
            out.push_str(separator);
        }
        len = out.len();
        f(out, v);
    }
}

/// Largest index not greater than `index` that lies on a char boundary of `value`.
pub fn floor_char_boundary(value: &str, index: usize) -> usize {
    if index >= value.len() {
        return value.len();
    }
    let mut index = index;
    while !value.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Compact rendering of a list of values for logs and error messages.
pub fn printable_values<'a>(values: impl IntoIterator<Item = &'a Value>) -> String {
    let mut out = String::from("(");
    separated_by(&mut out, values, |out, v| drop(write!(out, "{:?}", v)), ", ");
    out.push(')');
    out
}

#[macro_export]
macro_rules! truncate_long {
    ($query:expr) => {{
        let query: &str = &$query;
        let end = $crate::floor_char_boundary(query, 497);
        format!(
            "{}{}",
            query[..end].trim_end(),
            if query.len() > end { "..." } else { "" },
        )
    }};
}

/// Logs a warning when a secondary operation fails, the error is not propagated.
#[macro_export]
macro_rules! log_failure {
    ($result:expr, $($arg:tt)+) => {{
        if let Err(e) = $result {
            log::warn!("{}: {:#}", format_args!($($arg)+), e);
        }
    }};
}
