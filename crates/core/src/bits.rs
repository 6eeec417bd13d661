//! Bit reinterpretation between primitive payloads and the 64-bit word
//!
//! Every word-sized ref stores its payload in a single `u64` so that one
//! tranlocal layout serves long, int, double and boolean refs alike. The
//! conversions here are bit-exact: a double keeps its IEEE-754 pattern
//! (signed zeros and every NaN payload included).

/// Reinterpret the IEEE-754 bit pattern of a double as a long.
#[inline]
pub fn double_as_long(value: f64) -> i64 {
    value.to_bits() as i64
}

/// Reinterpret a long as the IEEE-754 double with the same bit pattern.
#[inline]
pub fn long_as_double(value: i64) -> f64 {
    f64::from_bits(value as u64)
}

/// `true` is stored as 1, `false` as 0.
#[inline]
pub fn boolean_as_long(value: bool) -> i64 {
    i64::from(value)
}

/// Any non-zero word reads back as `true`.
#[inline]
pub fn long_as_boolean(value: i64) -> bool {
    value != 0
}

/// A primitive that can live in the 64-bit payload word of a ref.
///
/// Implementations must round-trip exactly: `from_word(to_word(x))` is
/// bit-identical to `x`. Equality on the word is what the engine uses to
/// decide whether a write changed anything, so two values with the same
/// word are the same value as far as dirty checking goes.
pub trait TxnWord: Copy + Send + Sync + std::fmt::Debug + 'static {
    /// Short name used in debug strings.
    const KIND: &'static str;

    /// Encode into the payload word.
    fn to_word(self) -> u64;

    /// Decode from the payload word.
    fn from_word(word: u64) -> Self;
}

impl TxnWord for i64 {
    const KIND: &'static str = "long";

    #[inline]
    fn to_word(self) -> u64 {
        self as u64
    }

    #[inline]
    fn from_word(word: u64) -> Self {
        word as i64
    }
}

impl TxnWord for i32 {
    const KIND: &'static str = "int";

    #[inline]
    fn to_word(self) -> u64 {
        // sign-extend so the word compares like the long it represents
        i64::from(self) as u64
    }

    #[inline]
    fn from_word(word: u64) -> Self {
        word as i64 as i32
    }
}

impl TxnWord for f64 {
    const KIND: &'static str = "double";

    #[inline]
    fn to_word(self) -> u64 {
        double_as_long(self) as u64
    }

    #[inline]
    fn from_word(word: u64) -> Self {
        long_as_double(word as i64)
    }
}

impl TxnWord for bool {
    const KIND: &'static str = "boolean";

    #[inline]
    fn to_word(self) -> u64 {
        boolean_as_long(self) as u64
    }

    #[inline]
    fn from_word(word: u64) -> Self {
        long_as_boolean(word as i64)
    }
}
