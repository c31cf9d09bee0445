use std::fmt;

/// Internal time unit of the demuxer (microseconds), same as `AV_TIME_BASE`.
pub const TIME_BASE: i64 = 1_000_000;

/// `1 / TIME_BASE`, the time base all prediction state is kept in.
pub const TIME_BASE_Q: Rational = Rational::new(1, TIME_BASE as i32);

/// Seconds-per-tick as a fraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rational {
    num: i32,
    den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn numerator(&self) -> i32 {
        self.num
    }

    pub fn denominator(&self) -> i32 {
        self.den
    }

    /// A zero numerator or denominator means "not known".
    pub fn is_valid(&self) -> bool {
        self.num != 0 && self.den != 0
    }

    pub fn to_f64(&self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }
}

impl Default for Rational {
    fn default() -> Self {
        Rational::new(0, 1)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Rational> for Rational {
    fn from(value: ffmpeg_next::Rational) -> Self {
        Rational::new(value.numerator(), value.denominator())
    }
}

/// Rescales `value` from time base `from` into time base `to`, rounding half
/// away from zero. Invalid time bases leave the value unchanged.
pub fn rescale_q(value: i64, from: Rational, to: Rational) -> i64 {
    if !from.is_valid() || !to.is_valid() {
        return value;
    }
    let num = value as i128 * from.num as i128 * to.den as i128;
    let den = from.den as i128 * to.num as i128;
    let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
    let half = den / 2;
    let rounded = if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    };
    rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Seconds expressed in ticks of `time_base`.
pub fn seconds_to_ts(seconds: f64, time_base: Rational) -> i64 {
    if !time_base.is_valid() {
        return (seconds * TIME_BASE as f64).round() as i64;
    }
    (seconds * time_base.den as f64 / time_base.num as f64).round() as i64
}
