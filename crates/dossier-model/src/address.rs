use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rows in an Excel worksheet.
pub const EXCEL_MAX_ROWS: u32 = 1_048_576;
/// Columns in an Excel worksheet (`A` through `XFD`).
pub const EXCEL_MAX_COLS: u32 = 16_384;

/// Cell address with 0-based `row` and `col`, so `B14` is `CellRef { row: 13, col: 1 }`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    #[inline]
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    pub fn to_a1(self) -> String {
        format!("{}{}", column_name(self.col), u64::from(self.row) + 1)
    }

    /// Parse `B14`, `$B$14` or `b14`. Surrounding whitespace is ignored.
    pub fn from_a1(a1: &str) -> Result<Self, A1ParseError> {
        let s = a1.trim();
        if s.is_empty() {
            return Err(A1ParseError::Empty);
        }

        let s = s.strip_prefix('$').unwrap_or(s);
        let (letters, rest) = s.split_at(
            s.find(|c: char| !c.is_ascii_alphabetic())
                .unwrap_or(s.len()),
        );
        if letters.is_empty() {
            return Err(A1ParseError::MissingColumn);
        }

        let rest = rest.strip_prefix('$').unwrap_or(rest);
        let (digits, trailing) = rest.split_at(
            rest.find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len()),
        );
        if digits.is_empty() {
            return Err(A1ParseError::MissingRow);
        }
        if !trailing.is_empty() {
            return Err(A1ParseError::TrailingCharacters);
        }

        let col = column_index(letters)?;
        let row = match digits.parse::<u32>() {
            Ok(row_1) if (1..=EXCEL_MAX_ROWS).contains(&row_1) => row_1 - 1,
            _ => return Err(A1ParseError::InvalidRow),
        };
        Ok(Self::new(row, col))
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

impl FromStr for CellRef {
    type Err = A1ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_a1(s)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum A1ParseError {
    #[error("empty cell reference")]
    Empty,
    #[error("cell reference has no column letters")]
    MissingColumn,
    #[error("cell reference has no row number")]
    MissingRow,
    #[error("column is outside A..XFD")]
    InvalidColumn,
    #[error("row is outside 1..1048576")]
    InvalidRow,
    #[error("unexpected characters after the row number")]
    TrailingCharacters,
}

/// Bijective base-26: 0 -> `A`, 25 -> `Z`, 26 -> `AA`.
fn column_name(col: u32) -> String {
    let mut letters = Vec::with_capacity(3);
    let mut n = u64::from(col) + 1;
    while n > 0 {
        n -= 1;
        letters.push(b'A' + (n % 26) as u8);
        n /= 26;
    }
    letters.iter().rev().map(|&b| char::from(b)).collect()
}

/// Inverse of [`column_name`] for ASCII letters of either case.
fn column_index(letters: &str) -> Result<u32, A1ParseError> {
    let number = letters
        .bytes()
        .try_fold(0u32, |acc, b| {
            let digit = u32::from(b.to_ascii_uppercase() - b'A') + 1;
            acc.checked_mul(26)?.checked_add(digit)
        })
        .ok_or(A1ParseError::InvalidColumn)?;
    match number {
        1..=EXCEL_MAX_COLS => Ok(number - 1),
        _ => Err(A1ParseError::InvalidColumn),
    }
}
