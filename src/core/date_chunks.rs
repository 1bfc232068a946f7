use crate::types::{DateChunk, OpcaError, OpcaResult};
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use std::sync::OnceLock;

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").expect("date pattern is a valid regex")
    })
}

/// Parse a strict `YYYY-MM-DD` date
pub fn parse_date(value: &str) -> OpcaResult<NaiveDate> {
    let captures = date_pattern().captures(value.trim()).ok_or_else(|| {
        OpcaError::InvalidRange(format!("'{}' is not a YYYY-MM-DD date", value))
    })?;

    let year: i32 = captures[1].parse().map_err(|_| malformed(value))?;
    let month: u32 = captures[2].parse().map_err(|_| malformed(value))?;
    let day: u32 = captures[3].parse().map_err(|_| malformed(value))?;

    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| malformed(value))
}

fn malformed(value: &str) -> OpcaError {
    OpcaError::InvalidRange(format!("'{}' is not a valid calendar date", value))
}

/// Year-by-year split of a date range.
///
/// Every chunk reuses the month/day of the requested start and end, only the
/// year varies. The sequence is materialised once so it can be iterated,
/// indexed and measured repeatedly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRanges {
    chunks: Vec<DateChunk>,
}

impl DateRanges {
    /// Chunk a range given as `YYYY-MM-DD` strings
    pub fn new(start: &str, end: &str) -> OpcaResult<Self> {
        Self::from_dates(parse_date(start)?, parse_date(end)?)
    }

    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> OpcaResult<Self> {
        if start.year() > end.year() {
            return Err(OpcaError::InvalidRange(format!(
                "start year {} is after end year {}",
                start.year(),
                end.year()
            )));
        }

        let chunks = (start.year()..=end.year())
            .map(|year| {
                let chunk_start = with_year(start, year)?;
                let chunk_end = with_year(end, year)?;
                if chunk_start > chunk_end {
                    return Err(OpcaError::InvalidRange(format!(
                        "chunk for {} would start on {} after it ends on {}",
                        year, chunk_start, chunk_end
                    )));
                }
                Ok(DateChunk {
                    start: chunk_start,
                    end: chunk_end,
                })
            })
            .collect::<OpcaResult<Vec<_>>>()?;

        log::debug!(
            "Split {}..{} into {} yearly chunk(s)",
            start,
            end,
            chunks.len()
        );

        Ok(Self { chunks })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DateChunk> {
        self.chunks.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DateChunk> {
        self.chunks.iter()
    }

    pub fn as_slice(&self) -> &[DateChunk] {
        &self.chunks
    }
}

impl std::ops::Index<usize> for DateRanges {
    type Output = DateChunk;

    fn index(&self, index: usize) -> &DateChunk {
        &self.chunks[index]
    }
}

impl<'a> IntoIterator for &'a DateRanges {
    type Item = &'a DateChunk;
    type IntoIter = std::slice::Iter<'a, DateChunk>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.iter()
    }
}

/// Swap the year. Feb 29 onto a non-leap year is an error, never clamped.
fn with_year(date: NaiveDate, year: i32) -> OpcaResult<NaiveDate> {
    NaiveDate::from_ymd_opt(year, date.month(), date.day()).ok_or_else(|| {
        OpcaError::InvalidRange(format!(
            "{:04}-{:02}-{:02} does not exist",
            year,
            date.month(),
            date.day()
        ))
    })
}

/// Convenience wrapper returning the chunks as `(start, end)` strings
pub fn chunk(start: &str, end: &str) -> OpcaResult<Vec<(String, String)>> {
    Ok(DateRanges::new(start, end)?
        .iter()
        .map(DateChunk::as_strings)
        .collect())
}
