//! Offset units for stand-off positions
//!
//! Provides [`OffsetCounter`], the strategy that turns appended text into a
//! running position, with one implementation per [`OffsetUnit`]:
//! - [`ByteCounter`]: UTF-8 bytes
//! - [`Utf16Counter`]: UTF-16 code units
//! - [`CodepointCounter`]: Unicode scalar values

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Running position over text appended in document order.
///
/// `append` is called once per text run; `offset` reports the position
/// after everything appended so far.
pub trait OffsetCounter: Default {
    /// The unit this counter measures in
    const UNIT: OffsetUnit;

    /// Number of units occupied by a single character
    fn width(c: char) -> usize;

    /// Number of units occupied by `s`
    fn measure(s: &str) -> usize {
        s.chars().map(Self::width).sum()
    }

    /// Advance past `s`
    fn append(&mut self, s: &str);

    /// Current position
    fn offset(&self) -> usize;
}

/// Counts UTF-8 encoded bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteCounter {
    offset: usize,
}

impl OffsetCounter for ByteCounter {
    const UNIT: OffsetUnit = OffsetUnit::Byte;

    #[inline]
    fn width(c: char) -> usize {
        c.len_utf8()
    }

    #[inline]
    fn measure(s: &str) -> usize {
        s.len()
    }

    #[inline]
    fn append(&mut self, s: &str) {
        self.offset += s.len();
    }

    #[inline]
    fn offset(&self) -> usize {
        self.offset
    }
}

/// Counts UTF-16 code units (astral-plane characters count twice)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Utf16Counter {
    offset: usize,
}

impl OffsetCounter for Utf16Counter {
    const UNIT: OffsetUnit = OffsetUnit::Utf16;

    #[inline]
    fn width(c: char) -> usize {
        c.len_utf16()
    }

    #[inline]
    fn measure(s: &str) -> usize {
        s.encode_utf16().count()
    }

    #[inline]
    fn append(&mut self, s: &str) {
        self.offset += Self::measure(s);
    }

    #[inline]
    fn offset(&self) -> usize {
        self.offset
    }
}

/// Counts Unicode codepoints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodepointCounter {
    offset: usize,
}

impl OffsetCounter for CodepointCounter {
    const UNIT: OffsetUnit = OffsetUnit::Codepoint;

    #[inline]
    fn width(_c: char) -> usize {
        1
    }

    #[inline]
    fn measure(s: &str) -> usize {
        s.chars().count()
    }

    #[inline]
    fn append(&mut self, s: &str) {
        self.offset += Self::measure(s);
    }

    #[inline]
    fn offset(&self) -> usize {
        self.offset
    }
}

/// Selects the counter used by the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetUnit {
    /// UTF-8 bytes
    Byte,
    /// UTF-16 code units
    Utf16,
    /// Unicode codepoints
    #[default]
    Codepoint,
}

impl OffsetUnit {
    /// All supported units
    pub const ALL: [Self; 3] = [Self::Byte, Self::Utf16, Self::Codepoint];

    /// Length of `s` in this unit
    #[inline]
    #[must_use]
    pub fn measure(self, s: &str) -> usize {
        match self {
            Self::Byte => ByteCounter::measure(s),
            Self::Utf16 => Utf16Counter::measure(s),
            Self::Codepoint => CodepointCounter::measure(s),
        }
    }

    /// Lowercase name, as used in configuration files
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Byte => "byte",
            Self::Utf16 => "utf16",
            Self::Codepoint => "codepoint",
        }
    }
}

impl Display for OffsetUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OffsetUnit {
    type Err = UnknownUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "byte" | "bytes" | "utf8" => Ok(Self::Byte),
            "utf16" | "utf-16" => Ok(Self::Utf16),
            "codepoint" | "codepoints" => Ok(Self::Codepoint),
            _ => Err(UnknownUnit(s.to_string())),
        }
    }
}

/// Unrecognised offset unit name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown offset unit '{0}' (expected byte, utf16 or codepoint)")]
pub struct UnknownUnit(pub String);
