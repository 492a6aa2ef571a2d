//! Uplocoin <-> hastings unit conversion
//!
//! One uplocoin (UC) is 10^24 hastings. Conversions are carried out on
//! [`BigDecimal`] by shifting the decimal exponent, so multiplication is
//! exact and division only rounds past [`DISPLAY_DECIMAL_PLACES`] fractional
//! digits.
//!
//! Results come back as [`Amount`], whose `Display` and `Serialize` always
//! write plain decimal notation, so an amount can go straight into a query
//! parameter or a JSON body.
//!
//! # Example
//! ```
//! use uplo_sdk::units::{hastings_to_uplocoins, uplocoins_to_hastings};
//!
//! let hastings = uplocoins_to_hastings("1.5").unwrap();
//! assert_eq!(hastings.to_string(), "1500000000000000000000000");
//!
//! let uplocoins = hastings_to_uplocoins(&hastings).unwrap();
//! assert_eq!(uplocoins.to_string(), "1.5");
//! ```

use crate::error::{Error, Result};
use bigdecimal::{BigDecimal, RoundingMode};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Decimal exponent between the display unit and the base unit
pub const HASTINGS_EXPONENT: i64 = 24;

/// Fractional digits kept when converting down to uplocoins
pub const DISPLAY_DECIMAL_PLACES: i64 = 30;

/// Largest decimal exponent (either sign) an [`Amount`] may carry
pub const MAX_EXPONENT: i64 = 4096;

// Scales beyond this are rejected before normalizing, which subtracts the
// trailing-zero count from the scale.
const MAX_RAW_SCALE: u64 = 1 << 62;

/// A currency amount, always rendered in plain decimal notation.
///
/// The value is kept normalized (no trailing fractional zeros) and its
/// decimal exponent is bounded by [`MAX_EXPONENT`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(BigDecimal);

impl Amount {
    /// Wrap a decimal, rejecting exponents outside `±MAX_EXPONENT`.
    pub fn new(value: BigDecimal) -> Result<Self> {
        let (_, scale) = value.as_bigint_and_exponent();
        if scale.unsigned_abs() > MAX_RAW_SCALE {
            return Err(exponent_out_of_range(scale));
        }
        let value = value.normalized();
        let (_, scale) = value.as_bigint_and_exponent();
        if scale.unsigned_abs() > MAX_EXPONENT as u64 {
            return Err(exponent_out_of_range(scale));
        }
        Ok(Amount(value))
    }

    pub fn as_decimal(&self) -> &BigDecimal {
        &self.0
    }

    pub fn into_decimal(self) -> BigDecimal {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (digits, scale) = self.0.as_bigint_and_exponent();
        let digits = digits.to_string();
        let (sign, magnitude) = match digits.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", digits.as_str()),
        };

        if magnitude == "0" {
            return f.write_str("0");
        }

        // |scale| <= MAX_EXPONENT, so the padding below stays small
        if scale <= 0 {
            let zeros = "0".repeat(scale.unsigned_abs() as usize);
            return write!(f, "{}{}{}", sign, magnitude, zeros);
        }

        let scale = scale as usize;
        let padded = if magnitude.len() <= scale {
            format!("{}{}", "0".repeat(scale + 1 - magnitude.len()), magnitude)
        } else {
            magnitude.to_string()
        };
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        write!(f, "{}{}.{}", sign, int_part, frac_part)
    }
}

impl FromStr for Amount {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let value = BigDecimal::from_str(s.trim())
            .map_err(|e| Error::InvalidAmount(format!("{:?}: {}", s, e)))?;
        Amount::new(value)
    }
}

impl TryFrom<BigDecimal> for Amount {
    type Error = Error;

    fn try_from(value: BigDecimal) -> Result<Self> {
        Amount::new(value)
    }
}

impl From<Amount> for BigDecimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct AmountVisitor;

        impl<'de> de::Visitor<'de> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal amount as a string or integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Amount, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Amount, E> {
                v.into_amount().map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Amount, E> {
                v.into_amount().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

/// Anything that can be read as a currency amount.
pub trait IntoAmount {
    fn into_amount(self) -> Result<Amount>;
}

impl IntoAmount for Amount {
    fn into_amount(self) -> Result<Amount> {
        Ok(self)
    }
}

impl IntoAmount for &Amount {
    fn into_amount(self) -> Result<Amount> {
        Ok(self.clone())
    }
}

impl IntoAmount for BigDecimal {
    fn into_amount(self) -> Result<Amount> {
        Amount::new(self)
    }
}

impl IntoAmount for &BigDecimal {
    fn into_amount(self) -> Result<Amount> {
        Amount::new(self.clone())
    }
}

impl IntoAmount for &str {
    fn into_amount(self) -> Result<Amount> {
        self.parse()
    }
}

impl IntoAmount for String {
    fn into_amount(self) -> Result<Amount> {
        self.as_str().into_amount()
    }
}

impl IntoAmount for &String {
    fn into_amount(self) -> Result<Amount> {
        self.as_str().into_amount()
    }
}

macro_rules! impl_into_amount_for_int {
    ($($t:ty),*) => {
        $(
            impl IntoAmount for $t {
                fn into_amount(self) -> Result<Amount> {
                    Amount::new(BigDecimal::from(self))
                }
            }
        )*
    };
}

impl_into_amount_for_int!(u32, i32, u64, i64);

/// Convert uplocoins to hastings.
///
/// # Arguments
/// * `uplocoins` - Amount in uplocoins (integer, decimal string, `BigDecimal` or `Amount`)
///
/// # Returns
/// Amount in hastings, exact
pub fn uplocoins_to_hastings(uplocoins: impl IntoAmount) -> Result<Amount> {
    let amount = uplocoins.into_amount()?;
    Amount::new(shift(amount.as_decimal(), HASTINGS_EXPONENT)?)
}

/// Convert hastings to uplocoins.
///
/// # Arguments
/// * `hastings` - Amount in hastings (integer, decimal string, `BigDecimal` or `Amount`)
///
/// # Returns
/// Amount in uplocoins, rounded half-up to 30 fractional digits
pub fn hastings_to_uplocoins(hastings: impl IntoAmount) -> Result<Amount> {
    let amount = hastings.into_amount()?;
    let uplocoins = shift(amount.as_decimal(), -HASTINGS_EXPONENT)?;
    let (_, scale) = uplocoins.as_bigint_and_exponent();
    let uplocoins = if scale > DISPLAY_DECIMAL_PLACES {
        uplocoins.with_scale_round(DISPLAY_DECIMAL_PLACES, RoundingMode::HalfUp)
    } else {
        uplocoins
    };
    Amount::new(uplocoins)
}

/// Format an amount in uplocoins for display (e.g., "1.5 UC")
pub fn format_uplocoins(uplocoins: &Amount) -> String {
    format!("{} UC", uplocoins)
}

/// Format an amount in hastings for display (e.g., "1500 H")
pub fn format_hastings(hastings: &Amount) -> String {
    format!("{} H", hastings)
}

/// Multiply by 10^exponent by moving the decimal point.
fn shift(amount: &BigDecimal, exponent: i64) -> Result<BigDecimal> {
    let (digits, scale) = amount.as_bigint_and_exponent();
    let scale = scale
        .checked_sub(exponent)
        .ok_or_else(|| exponent_out_of_range(scale))?;
    Ok(BigDecimal::new(digits, scale))
}

fn exponent_out_of_range(scale: i64) -> Error {
    Error::InvalidAmount(format!(
        "decimal exponent {} is outside ±{}",
        -(scale as i128),
        MAX_EXPONENT
    ))
}
