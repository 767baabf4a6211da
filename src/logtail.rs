//! Incremental reads of growing log files.
//!
//! Clients hold a byte offset and ask for whatever was appended since. A
//! client offset past the end of the file means the file was rotated or
//! truncated, and the client is told to reset its cursor.

use std::fs::File;
use std::io::{self, Read as _, Seek as _, SeekFrom};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

pub const DEFAULT_MAX_BYTES: u64 = 65_536;
pub const DEFAULT_BACK_BYTES: u64 = 8_192;
const LIMIT_BYTES: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LogReadRequest {
    /// Next byte to read; negative (or absent) means "tail from the end".
    #[serde(default = "default_offset")]
    pub offset: i64,
    #[serde(default = "default_max")]
    pub max: u64,
    #[serde(default = "default_back")]
    pub back: u64,
}

fn default_offset() -> i64 {
    -1
}

fn default_max() -> u64 {
    DEFAULT_MAX_BYTES
}

fn default_back() -> u64 {
    DEFAULT_BACK_BYTES
}

impl Default for LogReadRequest {
    fn default() -> Self {
        Self::tail()
    }
}

impl LogReadRequest {
    pub fn tail() -> Self {
        Self {
            offset: -1,
            max: DEFAULT_MAX_BYTES,
            back: DEFAULT_BACK_BYTES,
        }
    }

    pub fn from_offset(offset: u64) -> Self {
        Self {
            offset: i64::try_from(offset).unwrap_or(i64::MAX),
            ..Self::tail()
        }
    }

    pub fn with_max(mut self, max: u64) -> Self {
        self.max = max;
        self
    }

    pub fn with_back(mut self, back: u64) -> Self {
        self.back = back;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max == 0 || self.max > LIMIT_BYTES {
            return Err(FleetError::invalid_settings(
                "max",
                format!("must be within 1..={}", LIMIT_BYTES),
            ));
        }
        if self.back > LIMIT_BYTES {
            return Err(FleetError::invalid_settings(
                "back",
                format!("must be within 0..={}", LIMIT_BYTES),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogChunk {
    #[serde(with = "lossy_text")]
    pub data: Vec<u8>,
    /// Offset the client should send next.
    pub offset: u64,
    /// File size observed for this read.
    pub size: u64,
    pub reset: bool,
}

mod lossy_text {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(data))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadWindow {
    pub start: u64,
    pub length: u64,
    pub reset: bool,
}

fn tail_window(size: u64, max: u64, back: u64, reset: bool) -> ReadWindow {
    let mut start = size.saturating_sub(back);
    let mut length = size - start;
    if length > max {
        start = size - max;
        length = max;
    }
    ReadWindow {
        start,
        length,
        reset,
    }
}

/// Byte range to return for a file of `size` bytes and a client `offset`.
pub fn compute_window(size: u64, offset: i64, max: u64, back: u64) -> ReadWindow {
    let Ok(offset) = u64::try_from(offset) else {
        return tail_window(size, max, back, false);
    };
    if offset > size {
        return tail_window(size, max, back, true);
    }
    ReadWindow {
        start: offset,
        length: (size - offset).min(max),
        reset: false,
    }
}

/// Read the next chunk of `path` for `request`.
///
/// The file size is sampled once and the range is read positionally, so
/// concurrent appends only show up on the next call.
pub fn read_chunk(path: &Path, request: &LogReadRequest) -> Result<LogChunk> {
    request.validate()?;

    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(LogChunk {
                data: Vec::new(),
                offset: 0,
                size: 0,
                reset: false,
            });
        }
        Err(e) => return Err(FleetError::io(format!("{}: {}", path.display(), e))),
    };

    let size = file.metadata()?.len();
    let window = compute_window(size, request.offset, request.max, request.back);

    let mut data = Vec::with_capacity(window.length as usize);
    if window.length > 0 {
        file.seek(SeekFrom::Start(window.start))?;
        (&mut file).take(window.length).read_to_end(&mut data)?;
    }

    Ok(LogChunk {
        offset: window.start + data.len() as u64,
        data,
        size,
        reset: window.reset,
    })
}

/// Client-side cursor that follows one file across calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogCursor {
    offset: i64,
}

impl Default for LogCursor {
    fn default() -> Self {
        Self::tail()
    }
}

impl LogCursor {
    pub fn tail() -> Self {
        Self { offset: -1 }
    }

    pub fn from_start() -> Self {
        Self { offset: 0 }
    }

    /// Read whatever is new and advance.
    pub fn poll(&mut self, path: &Path, max: u64) -> Result<LogChunk> {
        let request = LogReadRequest {
            offset: self.offset,
            max,
            back: if self.offset < 0 { 0 } else { DEFAULT_BACK_BYTES },
        };
        let chunk = read_chunk(path, &request)?;
        self.offset = i64::try_from(chunk.offset).unwrap_or(i64::MAX);
        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write as _;

    use super::*;

    #[test]
    fn window_rules() {
        assert_eq!(
            compute_window(100, -1, 1000, 30),
            ReadWindow { start: 70, length: 30, reset: false }
        );
        assert_eq!(
            compute_window(100, -1, 10, 30),
            ReadWindow { start: 90, length: 10, reset: false }
        );
        assert_eq!(
            compute_window(100, 150, 1000, 30),
            ReadWindow { start: 70, length: 30, reset: true }
        );
        assert_eq!(
            compute_window(100, 40, 25, 30),
            ReadWindow { start: 40, length: 25, reset: false }
        );
        assert_eq!(
            compute_window(100, 100, 25, 30),
            ReadWindow { start: 100, length: 0, reset: false }
        );
        assert_eq!(
            compute_window(10, -5, 1000, 30),
            ReadWindow { start: 0, length: 10, reset: false }
        );
    }

    #[test]
    fn round_trip_then_empty_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.log");
        let body = b"line one\nline two\n";
        fs::write(&path, body).unwrap();
        let n = body.len() as u64;

        let chunk = read_chunk(&path, &LogReadRequest::from_offset(0).with_max(n)).unwrap();
        assert_eq!(chunk.data, body);
        assert_eq!(chunk.offset, n);
        assert!(!chunk.reset);

        let again = read_chunk(&path, &LogReadRequest::from_offset(n)).unwrap();
        assert!(again.data.is_empty());
        assert_eq!(again.offset, n);
        assert!(!again.reset);
    }

    #[test]
    fn rotation_resets_to_tail_of_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.log");
        fs::write(&path, vec![b'a'; 4096]).unwrap();
        let old = read_chunk(&path, &LogReadRequest::from_offset(0).with_max(10_000)).unwrap();
        assert_eq!(old.offset, 4096);

        fs::write(&path, b"fresh file contents").unwrap();
        let chunk = read_chunk(&path, &LogReadRequest::from_offset(old.offset).with_back(5)).unwrap();

        assert!(chunk.reset);
        assert_eq!(chunk.data, b"tents");
        assert_eq!(chunk.offset, 19);
    }

    #[test]
    fn appends_are_picked_up_incrementally() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.log");
        fs::write(&path, b"first\n").unwrap();

        let mut cursor = LogCursor::from_start();
        assert_eq!(cursor.poll(&path, 1024).unwrap().data, b"first\n");

        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"second\n").unwrap();

        assert_eq!(cursor.poll(&path, 1024).unwrap().data, b"second\n");
        assert!(cursor.poll(&path, 1024).unwrap().data.is_empty());
    }

    #[test]
    fn tail_cursor_skips_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.log");
        fs::write(&path, b"old stuff\n").unwrap();

        let mut cursor = LogCursor::tail();
        assert!(cursor.poll(&path, 1024).unwrap().data.is_empty());

        fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"new\n")
            .unwrap();
        assert_eq!(cursor.poll(&path, 1024).unwrap().data, b"new\n");
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = read_chunk(&dir.path().join("nope.log"), &LogReadRequest::tail()).unwrap();
        assert_eq!(chunk.size, 0);
        assert_eq!(chunk.offset, 0);
        assert!(chunk.data.is_empty());
    }

    #[test]
    fn rejects_out_of_range_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.log");
        assert!(read_chunk(&path, &LogReadRequest::tail().with_max(0)).is_err());
        assert!(read_chunk(&path, &LogReadRequest::tail().with_back(2_000_000)).is_err());
    }
}
