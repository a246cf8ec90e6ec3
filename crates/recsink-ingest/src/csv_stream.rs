//! Streaming CSV to [`RawRow`] conversion
//!
//! [`CsvRowStream`] pulls records from any [`Read`] one at a time, so an
//! object is never materialized as a full table. The first non-empty line is
//! the header; each following record is zipped against it.
//!
//! The `csv` reader is lenient about quoting: an opening quote that never
//! closes silently swallows the rest of the input, and a `"` inside an
//! unquoted field is kept as a literal. The stream follows quote state as
//! bytes pass through and reports these as [`ParseError::UnterminatedQuote`]
//! and [`ParseError::StrayQuote`].

use std::io::{self, Read};

use csv::{ReaderBuilder, StringRecord};
use recsink_common::types::RawRow;

use crate::error::ParseError;

const QUOTE: u8 = b'"';
const BOM: char = '\u{feff}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldState {
    Start,
    Unquoted,
    Quoted,
    /// A quote seen inside a quoted field: either the close or half of `""`
    QuoteInQuoted,
}

/// Read adapter that follows CSV quote state and end of input.
struct QuoteTracker<R> {
    inner: R,
    state: FieldState,
    line: u64,
    stray_at: Option<u64>,
    exhausted: bool,
}

impl<R> QuoteTracker<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            state: FieldState::Start,
            line: 1,
            stray_at: None,
            exhausted: false,
        }
    }

    fn unterminated_at_eof(&self) -> bool {
        self.exhausted && self.state == FieldState::Quoted
    }

    fn observe(&mut self, byte: u8) {
        use FieldState::*;

        if byte == b'\n' {
            self.line += 1;
        }

        self.state = match (self.state, byte) {
            (Quoted, QUOTE) => QuoteInQuoted,
            (Quoted, _) => Quoted,
            (Start, QUOTE) | (QuoteInQuoted, QUOTE) => Quoted,
            (_, b',' | b'\n' | b'\r') => Start,
            (Unquoted, QUOTE) | (QuoteInQuoted, _) => {
                if self.stray_at.is_none() {
                    self.stray_at = Some(self.line);
                }
                Unquoted
            },
            (Start | Unquoted, _) => Unquoted,
        };
    }
}

impl<R: Read> Read for QuoteTracker<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.exhausted = true;
        }
        for &byte in &buf[..n] {
            self.observe(byte);
        }
        Ok(n)
    }
}

/// Lazy, fused sequence of rows parsed from CSV bytes.
///
/// Yields `Err` at most once; after an error or the last row the stream
/// returns `None` forever.
pub struct CsvRowStream<R: Read> {
    reader: csv::Reader<QuoteTracker<R>>,
    header: Option<Vec<String>>,
    record: StringRecord,
    done: bool,
}

impl<R: Read> CsvRowStream<R> {
    pub fn new(source: R) -> Self {
        let reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(QuoteTracker::new(source));

        Self {
            reader,
            header: None,
            record: StringRecord::new(),
            done: false,
        }
    }

    /// Column names, once the header line has been read.
    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    fn read_next(&mut self) -> Result<bool, ParseError> {
        let more = self.reader.read_record(&mut self.record)?;
        let tracker = self.reader.get_ref();
        if let Some(line) = tracker.stray_at {
            return Err(ParseError::StrayQuote { line });
        }
        if tracker.unterminated_at_eof() {
            return Err(ParseError::UnterminatedQuote {
                line: self.reader.position().line(),
            });
        }
        Ok(more)
    }

    fn next_row(&mut self) -> Result<Option<RawRow>, ParseError> {
        if self.header.is_none() {
            if !self.read_next()? {
                return Ok(None);
            }
            let header = self
                .record
                .iter()
                .enumerate()
                .map(|(i, column)| {
                    let column = if i == 0 { column.trim_start_matches(BOM) } else { column };
                    column.to_string()
                })
                .collect();
            self.header = Some(header);
        }

        if !self.read_next()? {
            return Ok(None);
        }

        let header = self.header.as_deref().unwrap_or_default();
        Ok(Some(
            header
                .iter()
                .zip(self.record.iter())
                .map(|(column, value)| (column.as_str(), value))
                .collect(),
        ))
    }
}

impl<R: Read> Iterator for CsvRowStream<R> {
    type Item = Result<RawRow, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            },
            Err(err) => {
                self.done = true;
                Some(Err(err))
            },
        }
    }
}

impl<R: Read> std::iter::FusedIterator for CsvRowStream<R> {}

/// Parse an in-memory CSV payload.
pub fn parse_rows(bytes: &[u8]) -> CsvRowStream<&[u8]> {
    CsvRowStream::new(bytes)
}
