use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use splatview_ply::{MaxPoints, pack};
use splatview_process::{config::ProcessArgs, message::ProcessMessage, process::process_stream};
use splatview_vfs::DataSource;
use thiserror::Error;
use tokio::sync::{self, mpsc::error::TryRecvError};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::trace_span;

use crate::{
    camera_controls::{CameraController, CameraInput, CameraSettings},
    screen::{Screen, ScreenEvent},
    surface::{SurfaceError, ViewerSurface},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("A process is already running")]
    AlreadyRunning,
    #[error("Nothing selected to process")]
    NoSelection,
}

struct RunningProcess {
    messages: sync::mpsc::Receiver<Result<ProcessMessage>>,
    cancel: CancellationToken,
}

/// A thread-safe wrapper around the screen, camera and running process.
///
/// Locks are only held within these functions, never over an await point.
pub struct UiProcess(RwLock<UiProcessInner>);

impl Default for UiProcess {
    fn default() -> Self {
        Self::new(ProcessArgs::default())
    }
}

impl UiProcess {
    pub fn new(args: ProcessArgs) -> Self {
        Self(RwLock::new(UiProcessInner::new(args)))
    }

    fn read(&self) -> parking_lot::RwLockReadGuard<'_, UiProcessInner> {
        self.0.read()
    }

    fn write(&self) -> parking_lot::RwLockWriteGuard<'_, UiProcessInner> {
        self.0.write()
    }
}

impl UiProcess {
    pub fn screen(&self) -> Screen {
        self.read().screen.clone()
    }

    pub fn status(&self) -> Option<String> {
        self.read().screen.status().map(str::to_owned)
    }

    pub fn is_running(&self) -> bool {
        self.read().running.is_some()
    }

    /// Whether the process action is available right now.
    pub fn can_process(&self) -> bool {
        let inner = self.read();
        inner.running.is_none()
            && matches!(inner.screen, Screen::Picker { selection: Some(_), .. })
    }

    pub fn max_points(&self) -> MaxPoints {
        self.read().args.view.max_points
    }

    pub fn camera(&self) -> CameraController {
        self.read().controls.clone()
    }

    pub fn set_cam_settings(&self, settings: CameraSettings) {
        self.write().controls.settings = settings;
    }

    pub fn tick_controls(&self, input: &CameraInput, delta_time: f32) {
        self.write().controls.tick(input, delta_time);
    }

    pub fn select(&self, source: DataSource) {
        self.write()
            .screen
            .handle(ScreenEvent::SelectionMade(source));
    }

    /// Leave the viewer. The displayed geometry is released on the next sync.
    pub fn back(&self) {
        let mut inner = self.write();
        inner.screen.handle(ScreenEvent::Back);
        inner.geometry_dirty = true;
    }

    /// Start processing the current selection. Needs a tokio runtime.
    pub fn request_process(&self) -> Result<(), StartError> {
        let mut inner = self.write();
        if inner.running.is_some() {
            return Err(StartError::AlreadyRunning);
        }
        let source = inner
            .screen
            .handle(ScreenEvent::ProcessRequested)
            .ok_or(StartError::NoSelection)?;

        let cancel = CancellationToken::new();
        let (sender, receiver) = sync::mpsc::channel(8);
        let stream = process_stream(source, inner.args.clone(), cancel.clone());

        tokio::spawn(async move {
            let mut stream = std::pin::pin!(stream);
            while let Some(msg) = stream.next().await {
                // Stop the process if noone is listening anymore.
                if sender.send(msg).await.is_err() {
                    break;
                }
            }
        });

        inner.running = Some(RunningProcess {
            messages: receiver,
            cancel,
        });
        Ok(())
    }

    /// Abort the running process, if any. It reports back as a failure.
    pub fn cancel(&self) {
        if let Some(process) = &self.read().running {
            log::info!("Cancelling process");
            process.cancel.cancel();
        }
    }

    /// Receive the next message of the running process and apply it.
    pub fn try_recv_message(&self) -> Option<Result<ProcessMessage>> {
        let mut inner = self.write();
        let process = inner.running.as_mut()?;

        match process.messages.try_recv() {
            Ok(msg) => {
                inner.apply(&msg);
                Some(msg)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                inner.running = None;
                inner
                    .screen
                    .handle(ScreenEvent::JobFailed("Process stopped".to_owned()));
                None
            }
        }
    }

    pub fn message_queue(&self) -> Vec<Result<ProcessMessage>> {
        std::iter::from_fn(|| self.try_recv_message()).collect()
    }

    /// Bring the surface geometry in line with the current screen.
    pub fn sync_viewer(&self, surface: &mut impl ViewerSurface) -> Result<(), SurfaceError> {
        let mut inner = self.write();
        if !inner.geometry_dirty {
            return Ok(());
        }

        match &inner.screen {
            Screen::Viewer { cloud } => {
                let _span = trace_span!("Upload points").entered();
                let buffer = pack(cloud, inner.args.view.max_points);
                log::info!("Showing {} of {} points", buffer.count(), cloud.len());
                surface.load_geometry(&buffer)?;
            }
            _ => surface.clear_geometry(),
        }
        inner.geometry_dirty = false;
        Ok(())
    }

    /// Draw a frame if the viewer is showing.
    pub fn draw(&self, surface: &mut impl ViewerSurface) -> Result<(), SurfaceError> {
        self.sync_viewer(surface)?;
        let inner = self.read();
        if matches!(inner.screen, Screen::Viewer { .. }) {
            surface.draw(&inner.controls)?;
        }
        Ok(())
    }
}

struct UiProcessInner {
    screen: Screen,
    controls: CameraController,
    running: Option<RunningProcess>,
    args: ProcessArgs,
    geometry_dirty: bool,
}

impl UiProcessInner {
    fn new(args: ProcessArgs) -> Self {
        Self {
            screen: Screen::default(),
            controls: CameraController::default(),
            running: None,
            args,
            geometry_dirty: false,
        }
    }

    fn progress(&mut self, status: String) {
        self.screen.handle(ScreenEvent::Progress(status));
    }

    fn apply(&mut self, msg: &Result<ProcessMessage>) {
        match msg {
            Ok(ProcessMessage::NewSource) => self.progress("Loading".to_owned()),
            Ok(ProcessMessage::StartLoading { remote }) => {
                let status = if *remote {
                    "Preparing upload"
                } else {
                    "Reading point file"
                };
                self.progress(status.to_owned());
            }
            Ok(ProcessMessage::Uploading { images }) => {
                self.progress(format!("Uploading {images} images"));
            }
            Ok(ProcessMessage::JobSubmitted { job, status }) => {
                self.progress(format!("Job {job} {status}"));
            }
            Ok(ProcessMessage::Downloading { job }) => {
                self.progress(format!("Downloading result of job {job}"));
            }
            Ok(ProcessMessage::Cached { path }) => {
                log::info!("Result kept at {}", path.display());
            }
            Ok(ProcessMessage::ViewPoints { cloud }) => {
                self.controls.frame_cloud(cloud);
                self.screen
                    .handle(ScreenEvent::JobSucceeded(Arc::clone(cloud)));
                self.geometry_dirty = true;
            }
            Ok(ProcessMessage::DoneLoading) => {
                self.running = None;
            }
            Ok(ProcessMessage::Warning { error }) => {
                log::warn!("{error:#}");
            }
            Err(error) => {
                log::error!("Process failed: {error:#}");
                self.running = None;
                self.screen.handle(ScreenEvent::JobFailed(error.to_string()));
            }
        }
    }
}
