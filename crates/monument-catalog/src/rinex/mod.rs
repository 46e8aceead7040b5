//! RINEX observation header parsing

pub mod epoch;
pub mod header;

pub use epoch::{parse_epoch, session_duration};
pub use header::{parse_header, HeaderRecord, HeaderSource, RinexHeader, DEFAULT_HEADER_LINE_LIMIT};
