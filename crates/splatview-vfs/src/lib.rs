mod data_source;

// Resolves whatever the user selected (a point file, some images, a folder of
// images or a url) into something the process can consume.
use std::{
    io::{self, Cursor},
    path::{Path, PathBuf},
};

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

pub use data_source::{DataSource, DataSourceError};

pub trait DynRead: AsyncRead + Send + Unpin {}
impl<T: AsyncRead + Send + Unpin> DynRead for T {}

/// File extensions that are picked up as images when scanning a folder.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// A single image ready to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub name: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

/// The resolved input of a process.
pub enum SourceInput {
    /// A point file to view directly.
    PointFile {
        name: String,
        reader: Box<dyn DynRead>,
    },
    /// Images to send off for reconstruction.
    Images(Vec<ImageUpload>),
}

impl SourceInput {
    pub fn describe(&self) -> String {
        match self {
            Self::PointFile { name, .. } => format!("point file {name}"),
            Self::Images(images) => format!("{} images", images.len()),
        }
    }
}

fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

pub(crate) fn image_mime(path: &Path) -> Option<&'static str> {
    mime_for_extension(path.extension()?.to_str()?)
}

fn sniff_image(peek: &[u8]) -> Option<&'static str> {
    if peek.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if peek.starts_with(b"\x89PNG") {
        Some("image/png")
    } else if peek.len() >= 12 && peek.starts_with(b"RIFF") && &peek[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

async fn read_at_most<R: AsyncRead + Unpin>(reader: &mut R, limit: usize) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(limit);
    reader.take(limit as u64).read_to_end(&mut buffer).await?;
    Ok(buffer)
}

/// Work out what kind of content a reader holds by peeking at its first bytes.
pub async fn sniff_reader(
    name: String,
    reader: impl AsyncRead + Send + Unpin + 'static,
) -> Result<SourceInput, DataSourceError> {
    // Read the first bytes, then chain them back in front of the rest.
    let mut data = BufReader::new(reader);
    let peek = read_at_most(&mut data, 64).await?;
    let mut reader: Box<dyn DynRead> = Box::new(Cursor::new(peek.clone()).chain(data));

    if peek.starts_with(b"ply") {
        Ok(SourceInput::PointFile { name, reader })
    } else if let Some(mime) = sniff_image(&peek) {
        let mut bytes = vec![];
        reader.read_to_end(&mut bytes).await?;
        Ok(SourceInput::Images(vec![ImageUpload { name, mime, bytes }]))
    } else if peek.starts_with(b"<!DOCTYPE html>") || peek.starts_with(b"<html") {
        let mut html = String::new();
        reader.read_to_string(&mut html).await?;
        Err(DataSourceError::InvalidHtml(html))
    } else {
        Err(DataSourceError::UnknownDataType)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

pub(crate) async fn read_image(path: &Path) -> Result<ImageUpload, DataSourceError> {
    let mime = image_mime(path).ok_or_else(|| DataSourceError::NotAnImage(path.to_path_buf()))?;
    let bytes = tokio::fs::read(path).await?;
    Ok(ImageUpload {
        name: file_name(path),
        mime,
        bytes,
    })
}

pub(crate) async fn open_file(path: &Path) -> Result<SourceInput, DataSourceError> {
    let file = tokio::fs::File::open(path).await?;
    sniff_reader(file_name(path), file).await
}

/// All images below a directory, sorted by name.
pub(crate) async fn images_in_dir(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(path) = stack.pop() {
        let mut read_dir = tokio::fs::read_dir(&path).await?;

        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                stack.push(path);
            } else if image_mime(&path).is_some() {
                paths.push(path);
            }
        }
    }

    alphanumeric_sort::sort_path_slice(&mut paths);
    Ok(paths)
}
