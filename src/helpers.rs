//! Display formatting helpers for provider quantities and labels.

/// Format a quantity rounded to whole units with `,` thousands separators.
///
/// Returns "0" for non-finite inputs (NaN, ±Inf).
pub(crate) fn format_thousands(v: f64) -> String {
    if !v.is_finite() {
        tracing::warn!(
            "format_thousands received non-finite value {}, defaulting to 0",
            v
        );
        return "0".to_string();
    }

    let rounded = format!("{:.0}", v);
    let (sign, digits) = match rounded.strip_prefix('-') {
        Some(rest) if rest.chars().any(|c| c != '0') => ("-", rest),
        Some(rest) => ("", rest),
        None => ("", rounded.as_str()),
    };

    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    format!("{}{}", sign, out)
}

/// Truncate to at most `max_chars` characters, respecting char boundaries.
pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Scale a quantity in tonnes to a display magnitude:
/// billions when ≥ 1e9, millions otherwise.
pub(crate) fn scale_quantity(quantity: f64) -> f64 {
    if quantity >= 1e9 {
        quantity / 1e9
    } else {
        quantity / 1e6
    }
}
