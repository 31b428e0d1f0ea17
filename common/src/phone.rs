//! E.164 phone numbers.
//!
//! Riders enter numbers in whatever form their keypad produces: `0712 345
//! 678`, `254712345678`, `+254712345678`. [`PhoneNumber::normalize`] accepts
//! all of these and stores the canonical E.164 form. Only Kenyan mobile
//! numbers (+254, 9 national digits) are accepted.
//!
//! Phone numbers are personal data: `Debug` renders the tail only, and log
//! statements should use [`PhoneNumber::tail`].

use std::fmt::{self, Display};
use std::str::FromStr;

use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;

const COUNTRY_CODE: &str = "254";
/// E.164 national significant number length for Kenyan mobiles.
const NSN_LEN: usize = 9;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum Error {
    #[error("phone number contains invalid characters")]
    InvalidCharacter,

    #[error("phone number has the wrong length")]
    BadLength,

    #[error("phone number is not a Kenyan mobile number")]
    NotKenyanMobile,
}

/// A validated E.164 Kenyan phone number, e.g. `+254712345678`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[derive(SerializeDisplay, DeserializeFromStr)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Normalize arbitrary user input to E.164.
    ///
    /// Accepted forms (whitespace, dashes and parens are stripped):
    /// - `+254712345678`
    /// - `254712345678`
    /// - `0712345678` / `0112345678`
    /// - `712345678` / `112345678`
    pub fn normalize(input: &str) -> Result<Self, Error> {
        let mut digits = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();

        // A single leading '+' is allowed.
        if chars.peek() == Some(&'+') {
            chars.next();
        }

        for c in chars {
            match c {
                '0'..='9' => digits.push(c),
                ' ' | '-' | '(' | ')' | '.' => (),
                _ => return Err(Error::InvalidCharacter),
            }
        }

        let nsn = match digits.len() {
            // 254712345678
            12 => digits
                .strip_prefix(COUNTRY_CODE)
                .ok_or(Error::NotKenyanMobile)?,
            // 0712345678
            10 => digits.strip_prefix('0').ok_or(Error::NotKenyanMobile)?,
            // 712345678
            NSN_LEN => digits.as_str(),
            _ => return Err(Error::BadLength),
        };

        debug_assert_eq!(nsn.len(), NSN_LEN);

        // Mobile numbers start with 7 (Safaricom/Airtel classic ranges) or
        // 1 (newer allocations).
        if !nsn.starts_with('7') && !nsn.starts_with('1') {
            return Err(Error::NotKenyanMobile);
        }

        Ok(Self(format!("+{COUNTRY_CODE}{nsn}")))
    }

    /// The canonical E.164 string, e.g. `+254712345678`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last four digits, for log statements.
    pub fn tail(&self) -> &str {
        &self.0[self.0.len() - 4..]
    }
}

impl Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Masked: `PhoneNumber(..5678)`.
impl fmt::Debug for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhoneNumber(..{})", self.tail())
    }
}

/// `FromStr` normalizes, so any accepted input form parses.
impl FromStr for PhoneNumber {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s)
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl proptest::arbitrary::Arbitrary for PhoneNumber {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;
    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        use proptest::strategy::Strategy;
        (0u32..100_000_000)
            .prop_map(|n| Self(format!("+2547{n:08}")))
            .boxed()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::roundtrip;

    #[test]
    fn normalize_accepted_forms() {
        let canonical = "+254712345678";
        for input in [
            "+254712345678",
            "254712345678",
            "0712345678",
            "712345678",
            "0712 345 678",
            "+254-712-345-678",
        ] {
            let phone = PhoneNumber::normalize(input).unwrap();
            assert_eq!(phone.as_str(), canonical, "input: {input}");
        }

        let newer = PhoneNumber::normalize("0112345678").unwrap();
        assert_eq!(newer.as_str(), "+254112345678");
    }

    #[test]
    fn normalize_rejections() {
        assert!(PhoneNumber::normalize("").is_err());
        assert!(PhoneNumber::normalize("07123").is_err());
        assert!(PhoneNumber::normalize("+14155550100").is_err());
        assert!(PhoneNumber::normalize("0812345678").is_err());
        assert!(PhoneNumber::normalize("07123456xx").is_err());
        // Double plus
        assert!(PhoneNumber::normalize("++254712345678").is_err());
    }

    #[test]
    fn debug_is_masked() {
        let phone = PhoneNumber::normalize("0712345678").unwrap();
        assert_eq!(format!("{phone:?}"), "PhoneNumber(..5678)");
        assert_eq!(phone.tail(), "5678");
    }

    #[test]
    fn phone_json_roundtrip() {
        roundtrip::json_string_roundtrip_proptest::<PhoneNumber>();
    }
}
