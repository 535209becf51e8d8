use crate::domain::error::{AppError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static CELL_REFERENCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?:'((?:[^']|'')+)'|([^!]+))!)?\$?([A-Za-z]{1,3})\$?([0-9]{1,7})$").unwrap()
});

/// Excel limits.
const MAX_ROW: u32 = 1_048_576;
const MAX_COL: u32 = 16_384;

/// A single A1-style address, optionally qualified by sheet. Row and column are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    pub sheet: Option<String>,
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let captures = CELL_REFERENCE_PATTERN.captures(trimmed).ok_or_else(|| {
            AppError::ValidationError(format!("Invalid cell reference: {}", raw))
        })?;

        let sheet = captures
            .get(1)
            .map(|quoted| quoted.as_str().replace("''", "'"))
            .or_else(|| captures.get(2).map(|plain| plain.as_str().trim().to_string()))
            .filter(|sheet| !sheet.is_empty());
        let col = column_index(&captures[3]);
        let row: u32 = captures[4].parse().unwrap_or(0);

        if row == 0 || row > MAX_ROW || col == 0 || col > MAX_COL {
            return Err(AppError::ValidationError(format!(
                "Cell reference out of bounds: {}",
                raw
            )));
        }
        Ok(Self { sheet, row, col })
    }

    /// Address without the sheet part, e.g. `B5`.
    pub fn a1(&self) -> String {
        format!("{}{}", column_letters(self.col), self.row)
    }

    pub fn zero_based(&self) -> (u32, u16) {
        (self.row - 1, (self.col - 1) as u16)
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sheet {
            Some(sheet) => write!(f, "{}!{}", sheet, self.a1()),
            None => f.write_str(&self.a1()),
        }
    }
}

/// `A` -> 1, `AB` -> 28.
pub fn column_index(letters: &str) -> u32 {
    letters
        .chars()
        .filter(|ch| ch.is_ascii_alphabetic())
        .fold(0, |acc, ch| acc * 26 + (ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1))
}

pub fn column_letters(mut col: u32) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        col = (col - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Splits an `r` attribute like `AB12` into 1-based (row, col).
pub fn split_a1(address: &str) -> Option<(u32, u32)> {
    let letters: String = address.chars().take_while(|ch| ch.is_ascii_alphabetic()).collect();
    let digits = &address[letters.len()..];
    if letters.is_empty() || digits.is_empty() {
        return None;
    }
    let row = digits.parse::<u32>().ok()?;
    Some((row, column_index(&letters)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_absolute_and_qualified() {
        let plain = CellRef::parse("B5").unwrap();
        assert_eq!((plain.row, plain.col, plain.sheet.as_deref()), (5, 2, None));

        let absolute = CellRef::parse(" $AB$12 ").unwrap();
        assert_eq!((absolute.row, absolute.col), (12, 28));

        let qualified = CellRef::parse("Protokoll!C7").unwrap();
        assert_eq!(qualified.sheet.as_deref(), Some("Protokoll"));

        let quoted = CellRef::parse("'Bob''s sheet'!A1").unwrap();
        assert_eq!(quoted.sheet.as_deref(), Some("Bob's sheet"));
        assert_eq!(quoted.to_string(), "Bob's sheet!A1");
    }

    #[test]
    fn test_rejects_garbage() {
        for raw in ["", "5B", "B0", "ABCD1", "B5:C6", "XFE1"] {
            assert!(CellRef::parse(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn test_column_letters_round_trip() {
        for col in [1, 26, 27, 52, 703, 16_384] {
            assert_eq!(column_index(&column_letters(col)), col);
        }
        assert_eq!(column_letters(28), "AB");
        assert_eq!(split_a1("AB12"), Some((12, 28)));
        assert_eq!(split_a1("12"), None);
    }
}
