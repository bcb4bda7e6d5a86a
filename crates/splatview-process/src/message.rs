use std::path::PathBuf;
use std::sync::Arc;

use splatview_ply::PointCloud;
use splatview_remote::{JobId, JobStatus};

#[derive(Debug)]
pub enum ProcessMessage {
    NewSource,
    StartLoading {
        /// Whether the input goes through the reconstruction server.
        remote: bool,
    },
    Uploading {
        images: usize,
    },
    JobSubmitted {
        job: JobId,
        status: JobStatus,
    },
    Downloading {
        job: JobId,
    },
    /// The downloaded result was written to the cache folder.
    Cached {
        path: PathBuf,
    },
    /// A point cloud is decoded and ready to view.
    ViewPoints {
        cloud: Arc<PointCloud>,
    },
    DoneLoading,
    /// Something went wrong that doesn't stop the process.
    Warning {
        error: anyhow::Error,
    },
}
