use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_fn_stream::{TryStreamEmitter, try_fn_stream};
use splatview_ply::decode;
use splatview_remote::{JobClient, JobId, RemoteError};
use splatview_vfs::{DataSource, ImageUpload, SourceInput};
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span};

use crate::{config::ProcessArgs, emit_warnings::WarningEmitter, message::ProcessMessage};

/// Load a source and, for images, run it through the reconstruction server.
///
/// Ends with a [`ProcessMessage::ViewPoints`] and [`ProcessMessage::DoneLoading`] on
/// success. Any error ends the stream.
pub fn process_stream(
    source: DataSource,
    args: ProcessArgs,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<ProcessMessage, anyhow::Error>> + 'static {
    try_fn_stream(|emitter| async move {
        log::info!("Starting process with source {source:?}");
        emitter.emit(ProcessMessage::NewSource).await;

        let input = until_cancelled(&cancel, source.into_input()).await??;
        log::info!("Loaded {}", input.describe());

        match input {
            SourceInput::PointFile { name, reader } => {
                emitter
                    .emit(ProcessMessage::StartLoading { remote: false })
                    .await;
                let cloud = until_cancelled(&cancel, decode(reader)).await??;
                log::info!("Decoded {} points from {name}", cloud.len());
                emitter
                    .emit(ProcessMessage::ViewPoints {
                        cloud: Arc::new(cloud),
                    })
                    .await;
            }
            SourceInput::Images(images) => {
                remote_stream(images, &args, &cancel, &emitter)
                    .instrument(info_span!("Remote job"))
                    .await?;
            }
        }

        emitter.emit(ProcessMessage::DoneLoading).await;
        Ok(())
    })
}

async fn remote_stream(
    images: Vec<ImageUpload>,
    args: &ProcessArgs,
    cancel: &CancellationToken,
    emitter: &TryStreamEmitter<ProcessMessage, anyhow::Error>,
) -> anyhow::Result<()> {
    emitter
        .emit(ProcessMessage::StartLoading { remote: true })
        .await;

    let client = JobClient::new(&args.remote)?;
    emitter
        .emit(ProcessMessage::Uploading {
            images: images.len(),
        })
        .await;
    let job = client.submit(images, cancel).await?;
    emitter
        .emit(ProcessMessage::JobSubmitted {
            job: job.id.clone(),
            status: job.status.clone(),
        })
        .await;

    emitter
        .emit(ProcessMessage::Downloading {
            job: job.id.clone(),
        })
        .await;
    let bytes = client.fetch_result(&job.id, cancel).await?;

    if let Some(dir) = &args.view.cache_dir {
        let warner = WarningEmitter::new(emitter);
        if let Some(path) = warner
            .warn_if_err(until_cancelled(cancel, cache_result(dir, &job.id, &bytes)).await?)
            .await
        {
            emitter.emit(ProcessMessage::Cached { path }).await;
        }
    }

    let cloud = until_cancelled(cancel, decode(&bytes[..])).await??;
    log::info!("Decoded {} points from job {}", cloud.len(), job.id);
    emitter
        .emit(ProcessMessage::ViewPoints {
            cloud: Arc::new(cloud),
        })
        .await;
    Ok(())
}

/// Run a future unless the token fires first.
async fn until_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, RemoteError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(RemoteError::Cancelled),
        res = fut => Ok(res),
    }
}

fn cache_file_name(job: &JobId) -> String {
    let id: String = job
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("result_{id}.ply")
}

async fn cache_result(dir: &Path, job: &JobId, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create cache folder {}", dir.display()))?;
    let path = dir.join(cache_file_name(job));
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!("Cached result at {}", path.display());
    Ok(path)
}
