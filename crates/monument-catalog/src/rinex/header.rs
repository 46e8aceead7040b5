//! RINEX header scanning
//!
//! Header records carry their content in columns 1-60 and a label in
//! columns 61-80. Only the fields the catalog needs are extracted. Scanning
//! stops at `END OF HEADER` or after a bounded number of lines, so a
//! multi-megabyte observation file costs a few kilobytes of reading.

use crate::error::{CatalogError, CatalogResult};
use crate::geodesy::EcefPosition;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor};
use std::path::PathBuf;
use tracing::{debug, instrument};

/// Column where the record label starts
pub const LABEL_COLUMN: usize = 60;

/// Default number of lines scanned before giving up on `END OF HEADER`
pub const DEFAULT_HEADER_LINE_LIMIT: usize = 250;

/// Where header bytes come from.
///
/// The variant is chosen once by the caller; parsing only ever sees the
/// bounded line iterator produced by [`HeaderSource::lines`].
pub enum HeaderSource {
    /// A file on the local filesystem, read through a buffered reader
    Path(PathBuf),
    /// Bytes already in memory, such as a fresh upload
    Bytes(Vec<u8>),
    /// Any other buffered stream
    Reader(Box<dyn BufRead + Send>),
}

impl fmt::Debug for HeaderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            HeaderSource::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            HeaderSource::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

impl HeaderSource {
    /// Open the source and yield at most `limit` lines
    pub fn lines(self, limit: usize) -> io::Result<HeaderLines> {
        let reader: Box<dyn BufRead + Send> = match self {
            HeaderSource::Path(path) => Box::new(BufReader::new(File::open(path)?)),
            HeaderSource::Bytes(bytes) => Box::new(Cursor::new(bytes)),
            HeaderSource::Reader(reader) => reader,
        };
        Ok(HeaderLines {
            reader,
            remaining: limit,
            buf: Vec::with_capacity(128),
        })
    }
}

/// One header line split into its content and trimmed label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRecord {
    pub content: String,
    pub label: String,
}

impl HeaderRecord {
    /// Split raw line bytes at the label column, then decode each half
    /// lossily. Stray non-UTF-8 bytes never move the label boundary. Lines
    /// too short to reach the label column have an empty label.
    pub fn from_bytes(line: &[u8]) -> Self {
        let end = line
            .iter()
            .rposition(|b| *b != b'\n' && *b != b'\r')
            .map_or(0, |i| i + 1);
        let line = &line[..end];
        let (content, label) = line.split_at(line.len().min(LABEL_COLUMN));
        Self {
            content: String::from_utf8_lossy(content).into_owned(),
            label: String::from_utf8_lossy(label).trim().to_string(),
        }
    }
}

/// Bounded record iterator over a header source
pub struct HeaderLines {
    reader: Box<dyn BufRead + Send>,
    remaining: usize,
    buf: Vec<u8>,
}

impl Iterator for HeaderLines {
    type Item = io::Result<HeaderRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.buf.clear();

        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => Some(Ok(HeaderRecord::from_bytes(&self.buf))),
            Err(e) => Some(Err(e)),
        }
    }
}

/// Fields extracted from an observation file header
#[derive(Debug, Clone, PartialEq)]
pub struct RinexHeader {
    /// Trimmed, upper-cased `MARKER NAME`
    pub marker_name: String,
    pub approx_position: EcefPosition,
    pub time_of_first_obs: String,
    pub time_of_last_obs: Option<String>,
    pub receiver_number: Option<String>,
    /// Antenna height (H component of `ANTENNA: DELTA H/E/N`)
    pub antenna_height: Option<f64>,
    pub version: Option<String>,
    /// Type flag from `RINEX VERSION / TYPE`, `O` for observation data
    pub file_type: Option<char>,
    pub comments: Vec<String>,
    /// Whether `END OF HEADER` was seen within the line limit
    pub complete: bool,
}

impl RinexHeader {
    pub fn is_observation(&self) -> bool {
        self.file_type.map_or(true, |t| t.eq_ignore_ascii_case(&'O'))
    }
}

#[derive(Default)]
struct HeaderFields {
    marker_name: Option<String>,
    approx_position: Option<EcefPosition>,
    time_of_first_obs: Option<String>,
    time_of_last_obs: Option<String>,
    receiver_number: Option<String>,
    antenna_height: Option<f64>,
    version: Option<String>,
    file_type: Option<char>,
    comments: Vec<String>,
    complete: bool,
}

impl HeaderFields {
    /// Apply one record. Returns false once `END OF HEADER` is reached.
    fn apply(&mut self, record: &HeaderRecord) -> bool {
        let content = record.content.as_str();
        let value = content.trim();

        match record.label.as_str() {
            "MARKER NAME" => self.marker_name = Some(value.to_string()),
            "APPROX POSITION XYZ" => {
                let coords: Vec<f64> = value
                    .split_whitespace()
                    .take(3)
                    .map_while(|v| v.parse().ok())
                    .collect();
                if let [x, y, z] = coords[..] {
                    self.approx_position = Some(EcefPosition::new(x, y, z));
                }
            },
            "TIME OF FIRST OBS" | "TIME OF FIRST OBSER" => {
                self.time_of_first_obs = Some(value.to_string())
            },
            "TIME OF LAST OBS" | "TIME OF LAST OBSER" => {
                self.time_of_last_obs = Some(value.to_string())
            },
            "REC # / TYPE / VERS" => {
                self.receiver_number = value.split_whitespace().next().map(str::to_string)
            },
            "ANTENNA: DELTA H/E/N" => {
                if let Some(h) = value.split_whitespace().next().and_then(|v| v.parse().ok()) {
                    self.antenna_height = Some(h);
                }
            },
            "RINEX VERSION / TYPE" => {
                self.version = value.split_whitespace().next().map(str::to_string);
                self.file_type = content.chars().nth(20).filter(|c| !c.is_whitespace());
            },
            "COMMENT" => self.comments.push(value.to_string()),
            "END OF HEADER" => {
                self.complete = true;
                return false;
            },
            _ => {},
        }
        true
    }

    fn finish(self) -> CatalogResult<RinexHeader> {
        let marker_name = self
            .marker_name
            .map(|m| m.trim().to_uppercase())
            .filter(|m| !m.is_empty())
            .ok_or(CatalogError::MissingHeaderField("MARKER NAME"))?;
        let approx_position = self
            .approx_position
            .ok_or(CatalogError::MissingHeaderField("APPROX POSITION XYZ"))?;
        let time_of_first_obs = self
            .time_of_first_obs
            .ok_or(CatalogError::MissingHeaderField("TIME OF FIRST OBS"))?;

        Ok(RinexHeader {
            marker_name,
            approx_position,
            time_of_first_obs,
            time_of_last_obs: self.time_of_last_obs,
            receiver_number: self.receiver_number,
            antenna_height: self.antenna_height,
            version: self.version,
            file_type: self.file_type,
            comments: self.comments,
            complete: self.complete,
        })
    }
}

/// Scan the header of an observation file.
///
/// Missing marker name, approximate position or first observation time is
/// fatal; any other malformed record is skipped.
#[instrument(skip(source), fields(source = ?source))]
pub fn parse_header(source: HeaderSource, line_limit: usize) -> CatalogResult<RinexHeader> {
    let mut fields = HeaderFields::default();

    for record in source.lines(line_limit)? {
        if !fields.apply(&record?) {
            break;
        }
    }

    if !fields.complete {
        debug!(line_limit, "END OF HEADER not found within line limit");
    }

    fields.finish()
}
