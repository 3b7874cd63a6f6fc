//! String helpers shared by name derivation and value conversion.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static SPECIAL_CHARACTERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W").expect("valid regex"));
static LONG_FLOATS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\.\d{5,}").expect("valid regex"));

/// Replaces every non-word character with `_`.
#[must_use]
pub fn expression_safe_name(name: &str) -> String {
    SPECIAL_CHARACTERS.replace_all(name, "_").into_owned()
}

/// Whether `name` is usable as an identifier inside expressions.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Shortens long floats inside free text to three decimals.
///
/// `"scan eta 74.89533603616637 76.495"` becomes `"scan eta 74.895 76.495"`.
#[must_use]
pub fn round_string_floats(text: &str) -> String {
    LONG_FLOATS
        .replace_all(text, |caps: &Captures<'_>| {
            let matched = &caps[0];
            match matched.parse::<f64>() {
                Ok(value) => format_rounded(value),
                Err(_) => matched.to_string(),
            }
        })
        .into_owned()
}

fn format_rounded(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    let text = format!("{rounded:.3}");
    let trimmed = text.trim_end_matches('0');
    if trimmed.ends_with('.') {
        format!("{trimmed}0")
    } else {
        trimmed.to_string()
    }
}
