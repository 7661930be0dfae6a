//! Currency amounts as they appear in reply text (`₹1234.50`).

/// Currency glyph preceding every amount in reply text.
pub const CURRENCY_GLYPH: char = '₹';

/// Render an amount with the glyph and two decimals.
pub fn format_amount(amount: f64) -> String {
    format!("{CURRENCY_GLYPH}{amount:.2}")
}

/// Parse an amount field, ignoring surrounding whitespace and glyphs.
///
/// Returns `None` unless the remainder is a finite number.
pub fn parse_amount(field: &str) -> Option<f64> {
    field
        .trim_matches(|c: char| c == CURRENCY_GLYPH || c.is_whitespace())
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

/// Text after the last glyph in `line` (the whole line if there is none).
pub fn after_last_glyph(line: &str) -> &str {
    line.rsplit(CURRENCY_GLYPH).next().unwrap_or(line).trim()
}
