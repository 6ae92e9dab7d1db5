//! Generic simulation time.
//!
//! A [`SimTime`] is an absolute instant paired with its relative (duration) type through
//! [`SimTime::Relative`]. Numeric times use the same representation for both, while calendar
//! time pairs [`DateTime<Utc>`] with a [`chrono::Duration`].
//!
//! Implemented for:
//! - `i64` and `u64` (integer ticks),
//! - [`OrderedFloat<f64>`] and [`OrderedFloat<f32>`] with `f64`/`f32` relative values,
//! - [`Duration`] (unit-based physical time, measured from an arbitrary epoch),
//! - [`DateTime<Utc>`] with [`chrono::Duration`] relative values.

use std::convert::TryFrom;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;

use crate::TimeError;

/// Absolute simulation time with an associated relative time type.
///
/// The order of absolute times must be consistent with [`SimTime::plus`] and
/// [`SimTime::minus`]: for any non-negative `delta`, `time.plus(delta) >= time`.
///
/// Relative values can be converted from and to `f64` *model units*. For numeric time types
/// one unit is one tick, for [`Duration`] and [`DateTime<Utc>`] one unit is one second.
pub trait SimTime: Copy + Ord + fmt::Debug + Send + Sync + 'static {
    /// Relative time (duration) type.
    type Relative: Copy + PartialOrd + fmt::Debug + Send + Sync + 'static;

    /// The instant of a freshly created simulator's clock, before a replication sets it.
    fn epoch() -> Self;

    /// Zero-length relative time.
    fn zero_relative() -> Self::Relative;

    /// Returns the instant `delta` after `self`.
    fn plus(self, delta: Self::Relative) -> Self;

    /// Returns the relative time between `earlier` and `self`.
    fn minus(self, earlier: Self) -> Self::Relative;

    /// Multiplies `delta` by `n`, returning `None` on overflow.
    fn scale(delta: Self::Relative, n: u64) -> Option<Self::Relative>;

    /// Converts a relative time to model units.
    fn to_units(delta: Self::Relative) -> f64;

    /// Converts model units to a relative time, or `None` if it cannot be represented.
    /// The input is finite and non-negative.
    fn from_units(units: f64) -> Option<Self::Relative>;

    /// Checks that `delta` is finite and non-negative.
    fn validate_relative(delta: Self::Relative) -> Result<Self::Relative, TimeError> {
        if !Self::to_units(delta).is_finite() {
            return Err(TimeError::NonFinite(format!("{:?}", delta)));
        }
        if delta < Self::zero_relative() {
            return Err(TimeError::Negative(format!("{:?}", delta)));
        }
        Ok(delta)
    }

    /// Validates a value drawn in model units (e.g., from a distribution) and converts it
    /// to a relative time.
    fn relative_from_units(units: f64) -> Result<Self::Relative, TimeError> {
        if !units.is_finite() {
            return Err(TimeError::NonFinite(units.to_string()));
        }
        if units < 0.0 {
            return Err(TimeError::Negative(units.to_string()));
        }
        Self::from_units(units).ok_or(TimeError::Overflow(units))
    }
}

macro_rules! integer_time {
    ($t:ty) => {
        impl SimTime for $t {
            type Relative = $t;

            fn epoch() -> $t {
                0
            }

            fn zero_relative() -> $t {
                0
            }

            fn plus(self, delta: $t) -> $t {
                self.saturating_add(delta)
            }

            fn minus(self, earlier: $t) -> $t {
                self.saturating_sub(earlier)
            }

            fn scale(delta: $t, n: u64) -> Option<$t> {
                delta.checked_mul(<$t>::try_from(n).ok()?)
            }

            #[allow(clippy::cast_precision_loss)]
            fn to_units(delta: $t) -> f64 {
                delta as f64
            }

            #[allow(
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss,
                clippy::cast_precision_loss
            )]
            fn from_units(units: f64) -> Option<$t> {
                let rounded = units.round();
                if rounded >= <$t>::MAX as f64 {
                    None
                } else {
                    Some(rounded as $t)
                }
            }
        }
    };
}

integer_time!(i64);
integer_time!(u64);

macro_rules! float_time {
    ($t:ty) => {
        impl SimTime for OrderedFloat<$t> {
            type Relative = $t;

            fn epoch() -> Self {
                OrderedFloat(0.0)
            }

            fn zero_relative() -> $t {
                0.0
            }

            fn plus(self, delta: $t) -> Self {
                OrderedFloat(self.0 + delta)
            }

            fn minus(self, earlier: Self) -> $t {
                self.0 - earlier.0
            }

            #[allow(clippy::cast_precision_loss)]
            fn scale(delta: $t, n: u64) -> Option<$t> {
                let scaled = delta * n as $t;
                if scaled.is_finite() {
                    Some(scaled)
                } else {
                    None
                }
            }

            fn to_units(delta: $t) -> f64 {
                f64::from(delta)
            }

            #[allow(trivial_numeric_casts, clippy::cast_possible_truncation)]
            fn from_units(units: f64) -> Option<$t> {
                let value = units as $t;
                if value.is_finite() {
                    Some(value)
                } else {
                    None
                }
            }
        }
    };
}

float_time!(f64);
float_time!(f32);

impl SimTime for Duration {
    type Relative = Duration;

    fn epoch() -> Duration {
        Duration::default()
    }

    fn zero_relative() -> Duration {
        Duration::default()
    }

    fn plus(self, delta: Duration) -> Duration {
        self.saturating_add(delta)
    }

    fn minus(self, earlier: Duration) -> Duration {
        self.saturating_sub(earlier)
    }

    fn scale(delta: Duration, n: u64) -> Option<Duration> {
        delta.checked_mul(u32::try_from(n).ok()?)
    }

    fn to_units(delta: Duration) -> f64 {
        delta.as_secs_f64()
    }

    fn from_units(units: f64) -> Option<Duration> {
        Duration::try_from_secs_f64(units).ok()
    }
}

impl SimTime for DateTime<Utc> {
    type Relative = chrono::Duration;

    fn epoch() -> Self {
        DateTime::<Utc>::from(std::time::UNIX_EPOCH)
    }

    fn zero_relative() -> chrono::Duration {
        chrono::Duration::zero()
    }

    fn plus(self, delta: chrono::Duration) -> Self {
        self.checked_add_signed(delta).unwrap_or(if delta < chrono::Duration::zero() {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        })
    }

    fn minus(self, earlier: Self) -> chrono::Duration {
        self.signed_duration_since(earlier)
    }

    fn scale(delta: chrono::Duration, n: u64) -> Option<chrono::Duration> {
        delta.checked_mul(i32::try_from(n).ok()?)
    }

    #[allow(clippy::cast_precision_loss)]
    fn to_units(delta: chrono::Duration) -> f64 {
        delta.num_microseconds().map_or_else(
            || delta.num_milliseconds() as f64 / 1e3,
            |micros| micros as f64 / 1e6,
        )
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn from_units(units: f64) -> Option<chrono::Duration> {
        let micros = (units * 1e6).round();
        if micros >= i64::MAX as f64 {
            None
        } else {
            Some(chrono::Duration::microseconds(micros as i64))
        }
    }
}
