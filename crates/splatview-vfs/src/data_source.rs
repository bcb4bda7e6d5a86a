use crate::{SourceInput, images_in_dir, open_file, read_image, sniff_reader};
use rrfd::PickFileError;
use std::{convert::Infallible, path::PathBuf, str::FromStr};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataSource {
    /// Ask the user for a point file.
    PickPly,
    /// Ask the user for one or more images.
    PickImages,
    /// Ask the user for a folder of images.
    PickDirectory,
    Url(String),
    /// A point file, a single image, a folder, or several images.
    Paths(Vec<PathBuf>),
}

impl FromStr for DataSource {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            s if s.starts_with("http://") || s.starts_with("https://") => {
                Ok(Self::Url(s.to_owned()))
            }
            // This path might not exist but that's ok, rather find that out later.
            s => Ok(Self::Paths(vec![PathBuf::from(s)])),
        }
    }
}

#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error(transparent)]
    FilePicking(#[from] PickFileError),
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Got a status page instead of content: \n\n {0}")]
    InvalidHtml(String),
    #[error("Unknown data type. Only ply files and images are supported")]
    UnknownDataType,
    #[error("No images found in {}", .0.display())]
    NoImages(PathBuf),
    #[error("{} is not an image. Multiple files can only be images", .0.display())]
    NotAnImage(PathBuf),
    #[error("Nothing selected")]
    EmptySelection,
}

const PLY_FILTER: rrfd::Filter<'static> = ("Point cloud", &["ply"]);

impl DataSource {
    /// Build a source from command line arguments. A single argument may be a
    /// url, anything else is treated as paths.
    pub fn from_args(args: &[String]) -> Result<Self, DataSourceError> {
        match args {
            [] => Err(DataSourceError::EmptySelection),
            [single] => {
                let Ok(source) = Self::from_str(single);
                Ok(source)
            }
            many => Ok(Self::Paths(many.iter().map(PathBuf::from).collect())),
        }
    }

    pub async fn into_input(self) -> Result<SourceInput, DataSourceError> {
        match self {
            Self::PickPly => {
                let path = rrfd::pick_file(Some(PLY_FILTER)).await?;
                open_file(&path).await
            }
            Self::PickImages => {
                let paths = rrfd::pick_files(Some(("Images", crate::IMAGE_EXTENSIONS))).await?;
                load_paths(&paths).await
            }
            Self::PickDirectory => {
                let dir = rrfd::pick_directory().await?;
                load_paths(&[dir]).await
            }
            Self::Url(url) => Self::fetch_url(url).await,
            Self::Paths(paths) => load_paths(&paths).await,
        }
    }

    async fn fetch_url(url: String) -> Result<SourceInput, DataSourceError> {
        use tokio_stream::StreamExt;
        use tokio_util::io::StreamReader;

        let name = url
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .unwrap_or("download")
            .to_owned();

        let response = reqwest::get(&url).await?.error_for_status()?.bytes_stream();
        let response = response.map(|b| b.map_err(|_e| std::io::ErrorKind::ConnectionAborted));
        let reader = StreamReader::new(response);
        sniff_reader(name, reader).await
    }
}

async fn load_paths(paths: &[PathBuf]) -> Result<SourceInput, DataSourceError> {
    if let [dir] = paths
        && tokio::fs::metadata(dir).await?.is_dir()
    {
        let images = images_in_dir(dir).await?;
        if images.is_empty() {
            return Err(DataSourceError::NoImages(dir.clone()));
        }
        log::info!("Found {} images in {}", images.len(), dir.display());
        return load_images(&images).await;
    }

    match paths {
        [] => Err(DataSourceError::EmptySelection),
        [file] => open_file(file).await,
        many => load_images(many).await,
    }
}

async fn load_images(paths: &[PathBuf]) -> Result<SourceInput, DataSourceError> {
    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        images.push(read_image(path).await?);
    }
    Ok(SourceInput::Images(images))
}
