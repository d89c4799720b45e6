//! One-based, end-relative addressing of messages within a thread.
//!
//! Positions count from 1 at the oldest message. Negative positions count
//! back from the newest, so `-1` is the last message. The edge marker `.`
//! stands for the first message in a start slot and the last in an end slot.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use crate::error::RangeError;

/// One endpoint of a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    /// `k`-th message from the start (`k >= 1`).
    FromStart(usize),
    /// `k`-th message from the end (`k >= 1`).
    FromEnd(usize),
    /// First message in a start slot, last message in an end slot.
    Edge,
}

impl Position {
    /// The newest message.
    pub const LAST: Self = Self::FromEnd(1);

    fn resolve(self, len: usize, is_start: bool) -> Result<i64, RangeError> {
        let signed_len = len as i64;
        match self {
            Self::FromStart(k) => {
                i64::try_from(k).map_err(|_| RangeError::OutOfBounds { position: i64::MAX, len })
            }
            Self::FromEnd(k) => i64::try_from(k)
                .ok()
                .and_then(|k| signed_len.checked_sub(k))
                .and_then(|position| position.checked_add(1))
                .ok_or(RangeError::OutOfBounds { position: i64::MIN, len }),
            Self::Edge if is_start => Ok(1),
            Self::Edge => Ok(signed_len),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FromStart(k) => write!(f, "{k}"),
            Self::FromEnd(k) => write!(f, "-{k}"),
            Self::Edge => f.write_str("."),
        }
    }
}

impl FromStr for Position {
    type Err = RangeError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        if token == "." {
            return Ok(Self::Edge);
        }

        let value: i64 = token
            .parse()
            .map_err(|_| RangeError::malformed(token, "positions are integers or '.'"))?;
        match value {
            0 => Err(RangeError::malformed(token, "positions start at 1")),
            k if k > 0 => Ok(Self::FromStart(k as usize)),
            k => k
                .checked_neg()
                .map(|k| Self::FromEnd(k as usize))
                .ok_or_else(|| RangeError::malformed(token, "position is too far from the end")),
        }
    }
}

/// A selection of messages before it is checked against a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeSpec {
    Single(Position),
    Pair(Position, Position),
    Whole,
}

impl RangeSpec {
    /// Checks this selection against a thread of `len` messages.
    pub fn resolve(self, len: usize) -> Result<Span, RangeError> {
        resolve(self, len)
    }
}

impl From<Position> for RangeSpec {
    fn from(position: Position) -> Self {
        Self::Single(position)
    }
}

impl FromStr for RangeSpec {
    type Err = RangeError;

    /// Parses `.`, a single position, or two whitespace-separated positions.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = input.split_whitespace().collect();
        match tokens.as_slice() {
            ["."] => Ok(Self::Whole),
            [single] => Ok(Self::Single(single.parse()?)),
            [start, end] => Ok(Self::Pair(start.parse()?, end.parse()?)),
            [] => Err(RangeError::malformed(input, "no positions given")),
            _ => Err(RangeError::malformed(input, "at most two positions")),
        }
    }
}

/// A validated closed window `lo..=hi` of one-based positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    lo: usize,
    hi: usize,
}

impl Span {
    #[must_use]
    pub fn lo(self) -> usize {
        self.lo
    }

    #[must_use]
    pub fn hi(self) -> usize {
        self.hi
    }

    #[must_use]
    pub fn len(self) -> usize {
        self.hi - self.lo + 1
    }

    /// Zero-based index range into a message slice.
    #[must_use]
    pub fn indices(self) -> Range<usize> {
        self.lo - 1..self.hi
    }
}

impl From<Span> for (usize, usize) {
    fn from(span: Span) -> Self {
        (span.lo, span.hi)
    }
}

/// Resolves `spec` against a thread of `len` messages.
///
/// Fails when the thread is empty, when either endpoint lands outside
/// `1..=len`, or when the start comes after the end.
pub fn resolve(spec: RangeSpec, len: usize) -> Result<Span, RangeError> {
    if len == 0 {
        return Err(RangeError::Empty);
    }

    let (lo, hi) = match spec {
        RangeSpec::Whole => (1, len as i64),
        RangeSpec::Single(Position::Edge) => {
            return Err(RangeError::malformed(".", "a single position cannot be an edge"));
        }
        RangeSpec::Single(position) => {
            let resolved = position.resolve(len, true)?;
            (resolved, resolved)
        }
        RangeSpec::Pair(start, end) => (start.resolve(len, true)?, end.resolve(len, false)?),
    };

    for position in [lo, hi] {
        if position < 1 || position > len as i64 {
            return Err(RangeError::OutOfBounds { position, len });
        }
    }

    let (lo, hi) = (lo as usize, hi as usize);
    if lo > hi {
        return Err(RangeError::Reversed { lo, hi });
    }

    Ok(Span { lo, hi })
}

/// Resolves one endpoint on its own. `is_start` selects what the edge marker means.
pub fn resolve_position(position: Position, len: usize, is_start: bool) -> Result<usize, RangeError> {
    if len == 0 {
        return Err(RangeError::Empty);
    }

    let resolved = position.resolve(len, is_start)?;
    if resolved < 1 || resolved > len as i64 {
        return Err(RangeError::OutOfBounds {
            position: resolved,
            len,
        });
    }
    Ok(resolved as usize)
}

/// Span of the first `k` messages, clamped to the thread length.
pub fn first(k: usize, len: usize) -> Result<Span, RangeError> {
    if k == 0 {
        return Err(RangeError::malformed("0", "count must be at least 1"));
    }
    if len == 0 {
        return Err(RangeError::Empty);
    }
    Ok(Span { lo: 1, hi: k.min(len) })
}

/// Span of the last `k` messages, clamped to the thread length.
pub fn last(k: usize, len: usize) -> Result<Span, RangeError> {
    if k == 0 {
        return Err(RangeError::malformed("0", "count must be at least 1"));
    }
    if len == 0 {
        return Err(RangeError::Empty);
    }
    Ok(Span {
        lo: len - k.min(len) + 1,
        hi: len,
    })
}
