//! Decoder for the ascii point files produced by the reconstruction server.
//!
//! Only a minimal subset of ply is understood: the header is scanned for the
//! `element vertex <count>` line and otherwise ignored, and each record after
//! `end_header` is read as `x y z r g b`. Lines are decoded lossily, so header
//! comments in other encodings don't matter.

use std::io;
use std::str::FromStr;

use glam::Vec3;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{Instrument, trace_span};

use crate::cloud::{Point, PointCloud};

const HEADER_END: &str = "end_header";
const FIELD_NAMES: [&str; 6] = ["x", "y", "z", "red", "green", "blue"];

// Header counts come from untrusted files, cap what we reserve up front.
const MAX_PREALLOC: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("I/O error while reading point file.")]
    Io(#[from] io::Error),

    #[error("Invalid vertex count {value:?} on header line {line}")]
    InvalidVertexCount { line: usize, value: String },

    #[error("Invalid {field} value {value:?} on line {line}")]
    InvalidField {
        line: usize,
        field: &'static str,
        value: String,
    },
}

enum Section {
    Header,
    Data,
}

struct LineDecoder {
    section: Section,
    vertex_count: usize,
    points: Vec<Point>,
    skipped: usize,
    line: usize,
}

impl LineDecoder {
    fn new() -> Self {
        Self {
            section: Section::Header,
            vertex_count: 0,
            points: Vec::new(),
            skipped: 0,
            line: 0,
        }
    }

    /// Feed the next line. Returns whether more lines are wanted.
    fn feed(&mut self, raw: &str) -> Result<bool, FormatError> {
        self.line += 1;
        let line = raw.trim_end_matches(['\n', '\r']);

        match self.section {
            Section::Header => self.header_line(line),
            Section::Data => {
                match parse_point(line, self.line)? {
                    Some(point) => self.points.push(point),
                    None => self.skipped += 1,
                }
                Ok(self.points.len() < self.vertex_count)
            }
        }
    }

    fn header_line(&mut self, line: &str) -> Result<bool, FormatError> {
        let mut tokens = line.split_whitespace();

        if tokens.next() == Some("element") && tokens.next() == Some("vertex") {
            let value = tokens.last().unwrap_or_default();
            self.vertex_count =
                value
                    .parse()
                    .map_err(|_e| FormatError::InvalidVertexCount {
                        line: self.line,
                        value: value.to_owned(),
                    })?;
        } else if line.trim() == HEADER_END {
            self.section = Section::Data;
            self.points.reserve(self.vertex_count.min(MAX_PREALLOC));
            return Ok(self.vertex_count > 0);
        }

        Ok(true)
    }

    fn finish(self) -> Result<PointCloud, FormatError> {
        if matches!(self.section, Section::Header) {
            log::warn!("Point file ended before `{HEADER_END}`, nothing to show");
            return Ok(PointCloud::default());
        }

        if self.points.len() < self.vertex_count {
            log::info!(
                "Point file declared {} vertices but only {} were read",
                self.vertex_count,
                self.points.len()
            );
        }
        if self.skipped > 0 {
            log::debug!("Skipped {} short data lines", self.skipped);
        }

        Ok(PointCloud::new(self.points))
    }
}

fn parse_field<T: FromStr>(value: &str, index: usize, line: usize) -> Result<T, FormatError> {
    value.parse().map_err(|_e| FormatError::InvalidField {
        line,
        field: FIELD_NAMES[index],
        value: value.to_owned(),
    })
}

/// Parse one data record. Records with fewer than 6 fields are skipped, not rejected.
fn parse_point(line: &str, line_nr: usize) -> Result<Option<Point>, FormatError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < FIELD_NAMES.len() {
        return Ok(None);
    }

    let position = Vec3::new(
        parse_field(fields[0], 0, line_nr)?,
        parse_field(fields[1], 1, line_nr)?,
        parse_field(fields[2], 2, line_nr)?,
    );
    let color = [
        parse_field(fields[3], 3, line_nr)?,
        parse_field(fields[4], 4, line_nr)?,
        parse_field(fields[5], 5, line_nr)?,
    ];
    Ok(Some(Point::new(position, color)))
}

/// Decode a point file from an async reader.
///
/// Stops reading once the declared number of points has been parsed, so trailing
/// data after the last vertex is never looked at.
pub async fn decode<R: AsyncRead + Unpin>(reader: R) -> Result<PointCloud, FormatError> {
    async move {
        let mut reader = BufReader::new(reader);
        let mut decoder = LineDecoder::new();
        let mut line = Vec::new();

        while reader.read_until(b'\n', &mut line).await? > 0 {
            let wants_more = decoder.feed(&String::from_utf8_lossy(&line))?;
            line.clear();
            if !wants_more {
                break;
            }
        }

        decoder.finish()
    }
    .instrument(trace_span!("Decode point file"))
    .await
}

/// Decode a point file that is already in memory.
pub fn decode_bytes(content: &[u8]) -> Result<PointCloud, FormatError> {
    let _span = trace_span!("Decode point file").entered();

    let mut decoder = LineDecoder::new();
    let mut lines = content.split(|&b| b == b'\n').peekable();
    while let Some(line) = lines.next() {
        // A trailing newline doesn't start another line.
        if line.is_empty() && lines.peek().is_none() {
            break;
        }
        if !decoder.feed(&String::from_utf8_lossy(line))? {
            break;
        }
    }
    decoder.finish()
}

pub fn decode_str(content: &str) -> Result<PointCloud, FormatError> {
    decode_bytes(content.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ascii_ply;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_decode_basic() {
        let ply = ascii_ply(
            3,
            &[
                "0.0 1.0 2.0 255 0 0",
                "-1.5 0.25 3.0 0 255 0",
                "4.0 5.0 6.0 0 0 255",
            ],
        );

        let cloud = decode(Cursor::new(ply.into_bytes())).await.unwrap();
        assert_eq!(cloud.len(), 3);
        assert_eq!(cloud.points()[0].position, glam::vec3(0.0, 1.0, 2.0));
        assert_eq!(cloud.points()[0].color, [255, 0, 0]);
        assert_eq!(cloud.points()[1].position, glam::vec3(-1.5, 0.25, 3.0));
        assert_eq!(cloud.points()[2].color, [0, 0, 255]);
    }

    #[tokio::test]
    async fn test_short_lines_are_skipped() {
        let ply = ascii_ply(
            3,
            &["1 2 3 10 20 30", "1 2 3 10 20", "", "4 5 6 40 50 60"],
        );

        let cloud = decode(Cursor::new(ply.into_bytes())).await.unwrap();
        // The declared count caps accepted records, the short ones don't count.
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.points()[1].color, [40, 50, 60]);
    }

    #[tokio::test]
    async fn test_declared_count_larger_than_data() {
        let ply = ascii_ply(10, &["1 2 3 10 20 30", "4 5 6 40 50 60"]);
        let cloud = decode(Cursor::new(ply.into_bytes())).await.unwrap();
        assert_eq!(cloud.len(), 2);
    }

    #[tokio::test]
    async fn test_stops_at_declared_count() {
        // Anything past the declared count is never parsed.
        let ply = ascii_ply(1, &["1 2 3 10 20 30", "not a number at all !"]);
        let cloud = decode(Cursor::new(ply.into_bytes())).await.unwrap();
        assert_eq!(cloud.len(), 1);

        let ply = ascii_ply(0, &["1 2 3 10 20 30"]);
        let cloud = decode(Cursor::new(ply.into_bytes())).await.unwrap();
        assert!(cloud.is_empty());
    }

    #[tokio::test]
    async fn test_extra_fields_are_ignored() {
        let ply = ascii_ply(1, &["1 2 3 10 20 30 0.5 0.5"]);
        let cloud = decode(Cursor::new(ply.into_bytes())).await.unwrap();
        assert_eq!(cloud.points()[0].color, [10, 20, 30]);
    }

    #[tokio::test]
    async fn test_invalid_vertex_count() {
        for count in ["abc", "-3", "1.5"] {
            let ply = format!("ply\nelement vertex {count}\nend_header\n");
            let result = decode(Cursor::new(ply.into_bytes())).await;
            assert!(
                matches!(result, Err(FormatError::InvalidVertexCount { line: 2, .. })),
                "Expected count error for {count}"
            );
        }

        let result = decode_str("ply\nelement vertex\nend_header\n");
        assert!(matches!(
            result,
            Err(FormatError::InvalidVertexCount { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_fields() {
        let ply = ascii_ply(2, &["1 2 3 10 20 30", "1 2 z 10 20 30"]);
        let err = decode(Cursor::new(ply.into_bytes())).await.unwrap_err();
        match err {
            FormatError::InvalidField { line, field, value } => {
                // 10 header lines, second data line.
                assert_eq!(line, 12);
                assert_eq!(field, "z");
                assert_eq!(value, "z");
            }
            other => panic!("Unexpected error {other:?}"),
        }

        // Colors are 8 bit channels.
        let ply = ascii_ply(1, &["1 2 3 10 256 30"]);
        let err = decode_str(&ply).unwrap_err();
        assert!(matches!(
            err,
            FormatError::InvalidField { field: "green", .. }
        ));

        let ply = ascii_ply(1, &["1 2 3 10 -1 30"]);
        assert!(decode_str(&ply).is_err());
    }

    #[tokio::test]
    async fn test_missing_header_end() {
        let cloud = decode(Cursor::new(b"ply\nelement vertex 3\n".to_vec()))
            .await
            .unwrap();
        assert!(cloud.is_empty());

        let cloud = decode(Cursor::new(Vec::new())).await.unwrap();
        assert!(cloud.is_empty());

        // Data without a header end is never read as points.
        let cloud = decode_str("ply\nelement vertex 2\n1 2 3 4 5 6\n").unwrap();
        assert!(cloud.is_empty());
    }

    #[tokio::test]
    async fn test_non_utf8_header_comment() {
        let mut ply = b"ply\nformat ascii 1.0\ncomment cr\xe9\xe9 par scanner\n".to_vec();
        ply.extend_from_slice(b"element vertex 1\nend_header\n1 2 3 4 5 6\n");

        let cloud = decode(Cursor::new(ply.clone())).await.unwrap();
        assert_eq!(cloud.len(), 1);
        assert_eq!(cloud.points()[0].color, [4, 5, 6]);
        assert_eq!(decode_bytes(&ply).unwrap(), cloud);

        // Garbage in a data line still fails on the field it breaks.
        let ply = b"ply\nelement vertex 1\nend_header\n1 2 \xff 4 5 6\n".to_vec();
        let err = decode(Cursor::new(ply)).await.unwrap_err();
        assert!(matches!(err, FormatError::InvalidField { field: "z", line: 4, .. }));
    }

    #[tokio::test]
    async fn test_header_without_vertex_element() {
        let cloud = decode_str("ply\nformat ascii 1.0\nend_header\n1 2 3 4 5 6\n").unwrap();
        assert!(cloud.is_empty());
    }

    #[tokio::test]
    async fn test_crlf_and_whitespace() {
        let ply = "ply\r\nelement vertex 2\r\nend_header\r\n1 2 3 4 5 6\r\n  7\t8 9   10 11 12  \r\n";
        let cloud = decode(Cursor::new(ply.as_bytes().to_vec())).await.unwrap();
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.points()[1].position, glam::vec3(7.0, 8.0, 9.0));
        assert_eq!(cloud.points()[1].color, [10, 11, 12]);
    }

    #[tokio::test]
    async fn test_sync_and_async_agree() {
        let ply = ascii_ply(
            4,
            &["1 2 3 1 2 3", "bad", "0.1 0.2 0.3 9 8 7", "1e3 -2e-3 0 0 0 0"],
        );
        let from_reader = decode(Cursor::new(ply.clone().into_bytes())).await.unwrap();
        let from_str = decode_str(&ply).unwrap();
        assert_eq!(from_reader, from_str);
        assert_eq!(from_str.len(), 3);
    }
}
