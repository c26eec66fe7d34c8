//! Parsing for the feed's formatted time and gap strings.
//!
//! Lap and sector times arrive as `"M:SS.mmm"` or `"SS.mmm"`; gaps arrive
//! as `"+12.345"`, or contain `"LAP"` for lapped cars (which carries no
//! numeric gap at all - lapped is not a gap of zero).

/// Parse a lap or sector time string into seconds.
///
/// `"1:22.167"` → `82.167`, `"28.903"` → `28.903`. Anything else,
/// including the empty string, parses to `None`.
pub fn parse_lap_time(value: &str) -> Option<f64> {
    if value.is_empty() {
        return None;
    }

    match value.split_once(':') {
        Some((mins, secs)) => {
            let mins: u32 = mins.parse().ok()?;
            let secs: f64 = parse_fractional_seconds(secs)?;
            Some(f64::from(mins) * 60.0 + secs)
        }
        None => parse_fractional_seconds(value),
    }
}

// Requires an explicit fractional part; bare integers like "28" are not a
// time the feed emits.
fn parse_fractional_seconds(value: &str) -> Option<f64> {
    let (whole, frac) = value.split_once('.')?;
    if whole.is_empty()
        || frac.is_empty()
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !frac.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    value.parse().ok()
}

/// Parse a gap string into seconds.
///
/// `"+12.345"` → `12.345`. Values containing `"LAP"` (`"1 LAP"`, `"LAP"`)
/// parse to `None`, never zero. Non-numeric residue is also `None`.
pub fn parse_gap(value: &str) -> Option<f64> {
    if value.is_empty() || value.contains("LAP") {
        return None;
    }

    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse().ok()
}

/// Format seconds back into the display form used by the archive tables.
///
/// `82.167` → `"1:22.167"`, `28.903` → `"28.903"`. Non-positive values
/// have no display form.
pub fn format_lap_time(seconds: f64) -> Option<String> {
    if seconds <= 0.0 {
        return None;
    }
    let mins = (seconds / 60.0).floor() as u32;
    let secs = seconds - f64::from(mins) * 60.0;
    if mins > 0 {
        Some(format!("{mins}:{secs:06.3}"))
    } else {
        Some(format!("{secs:.3}"))
    }
}
