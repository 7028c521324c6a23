//! Provides traits for numbers.
//!
//! Focuses on vector element and index types used by the search engine.

/// Represents a number that has zero.
pub trait Zero {
    /// Returns zero.
    fn zero() -> Self;
}

impl Zero for f32 {
    fn zero() -> f32 {
        0.0f32
    }
}

impl Zero for f64 {
    fn zero() -> f64 {
        0.0f64
    }
}

impl Zero for u8 {
    fn zero() -> u8 {
        0u8
    }
}

impl Zero for i8 {
    fn zero() -> i8 {
        0i8
    }
}

impl Zero for u32 {
    fn zero() -> u32 {
        0u32
    }
}

impl Zero for u64 {
    fn zero() -> u64 {
        0u64
    }
}

/// Represents a number converted from another primitive type.
pub trait FromAs<T> {
    /// Returns the converted number.
    fn from_as(t: T) -> Self;
}

impl FromAs<f32> for f32 {
    fn from_as(t: f32) -> f32 {
        t
    }
}

impl FromAs<f64> for f32 {
    fn from_as(t: f64) -> f32 {
        t as f32
    }
}

impl FromAs<u8> for f32 {
    fn from_as(t: u8) -> f32 {
        t as f32
    }
}

impl FromAs<i8> for f32 {
    fn from_as(t: i8) -> f32 {
        t as f32
    }
}

/// Unsigned integer usable as a column index or an external identifier.
///
/// `max_value` marks unused top-k slots when a query matched fewer than
/// `k` vectors.
pub trait IndexInt: Copy + Ord + Send + Sync {
    /// Converts a `usize` into this type.
    fn from_usize(i: usize) -> Self;

    /// Converts this value into a `usize`.
    fn to_usize(self) -> usize;

    /// Returns the maximum representable value.
    fn max_value() -> Self;
}

impl IndexInt for u32 {
    fn from_usize(i: usize) -> u32 {
        i as u32
    }

    fn to_usize(self) -> usize {
        self as usize
    }

    fn max_value() -> u32 {
        u32::MAX
    }
}

impl IndexInt for u64 {
    fn from_usize(i: usize) -> u64 {
        i as u64
    }

    fn to_usize(self) -> usize {
        self as usize
    }

    fn max_value() -> u64 {
        u64::MAX
    }
}

impl IndexInt for usize {
    fn from_usize(i: usize) -> usize {
        i
    }

    fn to_usize(self) -> usize {
        self
    }

    fn max_value() -> usize {
        usize::MAX
    }
}
