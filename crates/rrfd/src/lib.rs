//! Thin async wrappers around the native file dialogs.
//!
//! Dialogs only hand back paths, reading the picked files is up to the caller.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PickFileError {
    #[error("No file selected")]
    NoFileSelected,
    #[error("No folder selected")]
    NoDirectorySelected,
}

/// A named extension filter, eg. ("Point cloud", &["ply"]).
pub type Filter<'a> = (&'a str, &'a [&'a str]);

fn dialog(filter: Option<Filter<'_>>) -> rfd::AsyncFileDialog {
    let dialog = rfd::AsyncFileDialog::new();
    match filter {
        Some((name, extensions)) => dialog.add_filter(name, extensions),
        None => dialog,
    }
}

/// Pick a single file.
pub async fn pick_file(filter: Option<Filter<'_>>) -> Result<PathBuf, PickFileError> {
    let file = dialog(filter)
        .pick_file()
        .await
        .ok_or(PickFileError::NoFileSelected)?;
    log::info!("Picked file {}", file.path().display());
    Ok(file.path().to_path_buf())
}

/// Pick one or more files. Returned in the order the dialog reports them.
pub async fn pick_files(filter: Option<Filter<'_>>) -> Result<Vec<PathBuf>, PickFileError> {
    let files = dialog(filter)
        .pick_files()
        .await
        .filter(|files| !files.is_empty())
        .ok_or(PickFileError::NoFileSelected)?;
    log::info!("Picked {} files", files.len());
    Ok(files.iter().map(|f| f.path().to_path_buf()).collect())
}

pub async fn pick_directory() -> Result<PathBuf, PickFileError> {
    let dir = rfd::AsyncFileDialog::new()
        .pick_folder()
        .await
        .ok_or(PickFileError::NoDirectorySelected)?;
    log::info!("Picked folder {}", dir.path().display());
    Ok(dir.path().to_path_buf())
}
