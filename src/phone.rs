pub const DEFAULT_COUNTRY_PREFIX: &str = "55";

/// Canonicalizes a phone number to `+<country><number>`.
///
/// Returns `None` when nothing is left after stripping separators, so callers can
/// treat an empty cell as a row error instead of sending to a bare prefix.
pub fn normalize_phone(raw: &str, country_prefix: &str) -> Option<String> {
    let digits: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')'))
        .collect();
    let digits = digits.strip_prefix('+').unwrap_or(&digits);
    if digits.is_empty() {
        return None;
    }
    if digits.starts_with(country_prefix) {
        Some(format!("+{}", digits))
    } else {
        Some(format!("+{}{}", country_prefix, digits))
    }
}
