use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A non-negative amount in minor units (cents).
///
/// Listings carry their totals as display strings such as `"$1,120.50"`;
/// they are parsed into `Money` before anything is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money {
    cents: i64,
}

impl Money {
    pub const fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    pub const fn cents(&self) -> i64 {
        self.cents
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.cents / 100, self.cents % 100)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("amount is empty")]
    Empty,

    #[error("malformed amount: {0}")]
    Malformed(String),

    #[error("amount out of range: {0}")]
    Overflow(String),
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let unsigned = trimmed.strip_prefix('$').unwrap_or(trimmed).trim_start();
        if unsigned.is_empty() {
            return Err(MoneyError::Empty);
        }

        let (grouped, fraction) = match unsigned.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (unsigned, ""),
        };
        let whole = ungroup_thousands(grouped).ok_or_else(|| MoneyError::Malformed(raw.to_string()))?;
        let whole = whole.as_str();

        let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        if (whole.is_empty() && fraction.is_empty())
            || !all_digits(whole)
            || !all_digits(fraction)
            || fraction.len() > 2
        {
            return Err(MoneyError::Malformed(raw.to_string()));
        }

        let whole_units: i64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| MoneyError::Overflow(raw.to_string()))?
        };
        // "5" means 50 cents, "05" means 5
        let fraction_cents: i64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().unwrap_or(0) * 10,
            _ => fraction.parse::<i64>().unwrap_or(0),
        };

        whole_units
            .checked_mul(100)
            .and_then(|c| c.checked_add(fraction_cents))
            .map(Money::from_cents)
            .ok_or_else(|| MoneyError::Overflow(raw.to_string()))
    }
}

/// Strip `,` thousands separators: the first group has 1-3 digits, every
/// later group exactly 3. `None` when commas appear anywhere else.
fn ungroup_thousands(whole: &str) -> Option<String> {
    if !whole.contains(',') {
        return Some(whole.to_string());
    }
    let mut groups = whole.split(',');
    let first = groups.next()?;
    if first.is_empty() || first.len() > 3 {
        return None;
    }
    let mut digits = first.to_string();
    for group in groups {
        if group.len() != 3 {
            return None;
        }
        digits.push_str(group);
    }
    Some(digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_listing_totals() {
        assert_eq!("$120.50".parse::<Money>().unwrap().cents(), 12050);
        assert_eq!("120".parse::<Money>().unwrap().cents(), 12000);
        assert_eq!("$1,120.5".parse::<Money>().unwrap().cents(), 112050);
        assert_eq!(" $ 0.07 ".parse::<Money>().unwrap().cents(), 7);
        assert_eq!(".99".parse::<Money>().unwrap().cents(), 99);
        assert_eq!("$12,345,678.00".parse::<Money>().unwrap().cents(), 1_234_567_800);
    }

    #[test]
    fn test_rejects_malformed_totals() {
        assert_eq!("".parse::<Money>(), Err(MoneyError::Empty));
        assert_eq!("$".parse::<Money>(), Err(MoneyError::Empty));
        assert!(matches!("12.345".parse::<Money>(), Err(MoneyError::Malformed(_))));
        assert!(matches!("-4.00".parse::<Money>(), Err(MoneyError::Malformed(_))));
        assert!(matches!("ten dollars".parse::<Money>(), Err(MoneyError::Malformed(_))));
        assert!(matches!("1.2.3".parse::<Money>(), Err(MoneyError::Malformed(_))));
        assert!(matches!("1,,2".parse::<Money>(), Err(MoneyError::Malformed(_))));
        assert!(matches!(",5".parse::<Money>(), Err(MoneyError::Malformed(_))));
        assert!(matches!("1,20".parse::<Money>(), Err(MoneyError::Malformed(_))));
        assert!(matches!("1234,567".parse::<Money>(), Err(MoneyError::Malformed(_))));
        assert!(matches!("1.2,0".parse::<Money>(), Err(MoneyError::Malformed(_))));
        assert!(matches!(
            "99999999999999999999".parse::<Money>(),
            Err(MoneyError::Overflow(_))
        ));
    }

    #[test]
    fn test_display_keeps_two_decimals() {
        assert_eq!(Money::from_cents(12050).to_string(), "120.50");
        assert_eq!(Money::from_cents(7).to_string(), "0.07");
    }
}
