use std::sync::Arc;

use splatview_ply::PointCloud;
use splatview_vfs::DataSource;

pub const NO_SELECTION_STATUS: &str = "Please select images first";

/// The screen currently shown.
#[derive(Debug, Clone, PartialEq)]
pub enum Screen {
    /// Choose images or a point file.
    Picker {
        selection: Option<DataSource>,
        status: Option<String>,
    },
    /// Waiting on a process.
    Processing {
        source: DataSource,
        status: String,
    },
    Viewer {
        cloud: Arc<PointCloud>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScreenEvent {
    SelectionMade(DataSource),
    ProcessRequested,
    /// Progress update of the running process.
    Progress(String),
    JobSucceeded(Arc<PointCloud>),
    JobFailed(String),
    Back,
}

impl Default for Screen {
    fn default() -> Self {
        Self::Picker {
            selection: None,
            status: None,
        }
    }
}

impl Screen {
    pub fn status(&self) -> Option<&str> {
        match self {
            Self::Picker { status, .. } => status.as_deref(),
            Self::Processing { status, .. } => Some(status),
            Self::Viewer { .. } => None,
        }
    }

    pub fn cloud(&self) -> Option<&Arc<PointCloud>> {
        match self {
            Self::Viewer { cloud } => Some(cloud),
            _ => None,
        }
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, Self::Processing { .. })
    }

    /// Apply an event.
    ///
    /// Returns the source to start processing when the event kicks off a process.
    /// Events that don't apply to the current screen are ignored.
    pub fn handle(&mut self, event: ScreenEvent) -> Option<DataSource> {
        let (next, start) = match (std::mem::take(self), event) {
            (Self::Picker { .. }, ScreenEvent::SelectionMade(selection)) => (
                Self::Picker {
                    selection: Some(selection),
                    status: None,
                },
                None,
            ),
            (Self::Picker { selection: None, .. }, ScreenEvent::ProcessRequested) => (
                Self::Picker {
                    selection: None,
                    status: Some(NO_SELECTION_STATUS.to_owned()),
                },
                None,
            ),
            (
                Self::Picker {
                    selection: Some(source),
                    ..
                },
                ScreenEvent::ProcessRequested,
            ) => (
                Self::Processing {
                    source: source.clone(),
                    status: "Starting".to_owned(),
                },
                Some(source),
            ),
            (Self::Processing { source, .. }, ScreenEvent::Progress(status)) => {
                (Self::Processing { source, status }, None)
            }
            (Self::Processing { .. }, ScreenEvent::JobSucceeded(cloud)) => {
                (Self::Viewer { cloud }, None)
            }
            (Self::Processing { source, .. }, ScreenEvent::JobFailed(message)) => (
                Self::Picker {
                    // Keep the selection around so it can be retried.
                    selection: Some(source),
                    status: Some(format!("Failed: {message}")),
                },
                None,
            ),
            (Self::Viewer { .. }, ScreenEvent::Back) => (Self::default(), None),
            (screen, event) => {
                log::debug!("Ignoring {event:?} on {}", screen.name());
                (screen, None)
            }
        };
        *self = next;
        start
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Picker { .. } => "picker",
            Self::Processing { .. } => "processing",
            Self::Viewer { .. } => "viewer",
        }
    }
}
