//! Compact duration strings such as `6h30m` or `1d5f`.
//!
//! Each digit run is followed by a unit letter (`w`, `d`, `h`, `m`, `s`,
//! case-insensitive). A digit run followed by `f` sets the fudge seconds
//! instead of adding to the total. A trailing digit run with no unit counts
//! as seconds.
//!
//! Parsing is best effort: a unit with no digits in front of it, or any
//! character that is not a digit or a known unit, stops the walk and the
//! seconds accumulated so far are returned.

/// Fudge seconds used when the spec does not carry an `f` suffix.
pub const DEFAULT_FUDGE_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpec {
    pub seconds: u64,
    pub fudge: u64,
}

impl Default for TimeSpec {
    fn default() -> Self {
        Self {
            seconds: 0,
            fudge: DEFAULT_FUDGE_SECS,
        }
    }
}

fn unit_seconds(unit: char) -> Option<u64> {
    match unit.to_ascii_lowercase() {
        'w' => Some(604_800),
        'd' => Some(86_400),
        'h' => Some(3_600),
        'm' => Some(60),
        's' => Some(1),
        _ => None,
    }
}

pub fn parse(input: &str) -> TimeSpec {
    let mut spec = TimeSpec::default();
    let mut digits = String::new();

    for ch in input.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }

        let is_fudge = ch.eq_ignore_ascii_case(&'f');
        let multiplier = unit_seconds(ch);
        if (!is_fudge && multiplier.is_none()) || digits.is_empty() {
            tracing::debug!(input, at = %ch, seconds = spec.seconds, "Timespec parse stopped early");
            return spec;
        }

        let value = parse_digits(&digits);
        digits.clear();
        match multiplier {
            Some(multiplier) => {
                spec.seconds = spec.seconds.saturating_add(value.saturating_mul(multiplier))
            }
            None => spec.fudge = value,
        }
    }

    if !digits.is_empty() {
        spec.seconds = spec.seconds.saturating_add(parse_digits(&digits));
    }
    spec
}

fn parse_digits(digits: &str) -> u64 {
    // Only overflow can fail here; clamp instead of dropping the value.
    digits.parse().unwrap_or(u64::MAX)
}
