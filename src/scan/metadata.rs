//! Embedded metadata extraction.
//!
//! The scanner asks a [`MetadataExtractor`] for the capture time and caption
//! of a file and falls back to the filesystem modification time when it has
//! nothing. Extraction is best effort: unreadable or metadata-less files
//! yield `None` without logging an error.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Timelike};
use exif::{In, Reader, Tag};
use tracing::trace;

/// What could be read from a file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub date_time: Option<NaiveDateTime>,
    pub caption: Option<String>,
}

pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Option<Metadata>;
}

/// Never finds anything; dates then come from the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMetadata;

impl MetadataExtractor for NoMetadata {
    fn extract(&self, _path: &Path) -> Option<Metadata> {
        None
    }
}

/// Reads EXIF from JPEG, TIFF-based RAW, HEIF, PNG and WebP containers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExifExtractor;

impl MetadataExtractor for ExifExtractor {
    fn extract(&self, path: &Path) -> Option<Metadata> {
        let file = File::open(path).ok()?;
        let mut reader = BufReader::new(file);
        let exif = Reader::new().read_from_container(&mut reader).ok()?;

        let date_time = [Tag::DateTimeOriginal, Tag::DateTime]
            .into_iter()
            .filter_map(|tag| exif.get_field(tag, In::PRIMARY))
            .find_map(|field| ascii_value(&field.value).and_then(parse_exif_datetime));
        let caption = exif
            .get_field(Tag::ImageDescription, In::PRIMARY)
            .and_then(|field| ascii_value(&field.value))
            .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
            .filter(|caption| !caption.is_empty());

        trace!(path = %path.display(), ?date_time, "exif read");
        if date_time.is_none() && caption.is_none() {
            return None;
        }
        Some(Metadata { date_time, caption })
    }
}

fn ascii_value(value: &exif::Value) -> Option<&[u8]> {
    match value {
        exif::Value::Ascii(lines) => lines.first().map(Vec::as_slice),
        _ => None,
    }
}

/// "YYYY:MM:DD HH:MM:SS"; blank or zeroed stamps are rejected.
fn parse_exif_datetime(bytes: &[u8]) -> Option<NaiveDateTime> {
    let dt = exif::DateTime::from_ascii(bytes).ok()?;
    NaiveDate::from_ymd_opt(dt.year.into(), dt.month.into(), dt.day.into())?.and_hms_opt(
        dt.hour.into(),
        dt.minute.into(),
        dt.second.into(),
    )
}

/// Modification time of `path` in local time, to the second
pub fn file_time(path: &Path) -> Option<NaiveDateTime> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    DateTime::<Local>::from(modified).naive_local().with_nanosecond(0)
}
