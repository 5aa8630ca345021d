use std::fmt;

/// Fixed-point decimal with 4 decimal places, stored as a scaled integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Amount(i64);

impl Amount {
    const SCALE: i64 = 10_000;
    /// Scaled units in one cent.
    const CENT: i128 = 100;

    pub const ZERO: Amount = Amount(0);

    pub fn from_float(value: f64) -> Self {
        Amount((value * Self::SCALE as f64).round() as i64)
    }

    pub fn from_scaled(value: i64) -> Self {
        Amount(value)
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    /// `percent`% of this amount, rounded half away from zero to the scale.
    pub fn percent(self, percent: u8) -> Self {
        Amount(saturate(div_round(self.0 as i128 * percent as i128, 100)))
    }

    /// Multiply by every factor and round the product to whole cents.
    ///
    /// The product is computed in `i128` so rounding happens once. Results
    /// outside the `i64` range saturate.
    pub fn scale_to_cents(self, factors: &[Factor]) -> Self {
        let mut numerator = self.0 as i128;
        let mut denominator: i128 = 1;
        for factor in factors {
            numerator = numerator.saturating_mul(factor.0 as i128);
            denominator *= Factor::SCALE as i128;
        }
        let cents = div_round(numerator, denominator * Self::CENT);
        Amount(saturate(cents.saturating_mul(Self::CENT)))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_scaled(f, self.0, Self::SCALE)
    }
}

/// Dimensionless multiplier with 4 decimal places (`1.2` is stored as `12_000`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Factor(i64);

impl Factor {
    const SCALE: i64 = 10_000;

    pub const ZERO: Factor = Factor(0);
    pub const ONE: Factor = Factor(Self::SCALE);

    pub fn from_float(value: f64) -> Self {
        Factor((value * Self::SCALE as f64).round() as i64)
    }

    pub fn from_scaled(value: i64) -> Self {
        Factor(value)
    }

    /// A rate of `percent`%, e.g. `from_percent(20.0)` is `0.2`.
    pub fn from_percent(percent: f64) -> Self {
        Self::from_float(percent / 100.0)
    }

    /// `1 - self`, floored at zero.
    pub fn complement(self) -> Self {
        Factor((Self::SCALE - self.0).max(0))
    }
}

impl Default for Factor {
    fn default() -> Self {
        Self::ONE
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_scaled(f, self.0, Self::SCALE)
    }
}

fn write_scaled(f: &mut fmt::Formatter<'_>, value: i64, scale: i64) -> fmt::Result {
    let sign = if value < 0 { "-" } else { "" };
    let abs = value.abs();
    let whole = abs / scale;
    let frac = abs % scale;
    write!(f, "{sign}{whole}.{frac:04}")
}

fn saturate(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Integer division rounding half away from zero.
fn div_round(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if remainder.abs() * 2 >= denominator.abs() {
        quotient + numerator.signum() * denominator.signum()
    } else {
        quotient
    }
}
