use super::Cents;

/// Parses a positive decimal amount with at most two fractional digits,
/// e.g. `"20"`, `"12.5"` or `"0.07"`, into cents.
pub fn parse_cents(text: &str) -> Option<Cents> {
    let text = text.trim();
    let (units, fraction) = text.split_once('.').unwrap_or((text, ""));

    if units.is_empty() && fraction.is_empty() {
        return None;
    }
    if fraction.len() > 2
        || !units.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let units: Cents = if units.is_empty() { 0 } else { units.parse().ok()? };
    let fraction: Cents = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<Cents>().ok()? * 10,
        _ => fraction.parse().ok()?,
    };

    units
        .checked_mul(100)?
        .checked_add(fraction)
        .filter(|cents| *cents > 0)
}

pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}
