use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Error, Parser, ValueEnum, error::ErrorKind};
use glam::{UVec2, Vec2};
use indicatif::{ProgressBar, ProgressStyle};
use splatview_process::{config::ProcessArgs, message::ProcessMessage};
use splatview_ui::camera_controls::CameraInput;
use splatview_ui::surface::SurfaceStats;
use splatview_ui::{HeadlessSurface, Screen, UiProcess, ViewerSurface};
use splatview_vfs::DataSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PickMode {
    /// A single point file.
    Ply,
    /// One or more images.
    Images,
    /// A folder of images.
    Folder,
}

#[derive(Parser)]
#[command(
    author,
    version,
    arg_required_else_help = false,
    about = "Splatview - view point clouds, or reconstruct them from images"
)]
pub struct Cli {
    /// A point file, one or more images, a folder of images or a URL.
    #[arg(value_name = "PATH_OR_URL")]
    pub sources: Vec<String>,

    /// Open a file dialog instead of passing paths.
    #[arg(long, value_enum, conflicts_with = "sources")]
    pub pick: Option<PickMode>,

    /// Size of the viewer surface, eg. 1280x720.
    #[arg(long, default_value = "1280x720", value_parser = parse_size)]
    pub viewport: UVec2,

    /// Orbit the camera around the cloud for this many frames once it's loaded.
    #[arg(long, default_value = "0")]
    pub orbit_frames: u32,

    #[clap(flatten)]
    pub process: ProcessArgs,
}

fn parse_size(s: &str) -> Result<UVec2, String> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| format!("Expected WIDTHxHEIGHT, got {s}"))?;
    let parse = |v: &str| v.trim().parse::<u32>().map_err(|e| format!("{v}: {e}"));
    Ok(UVec2::new(parse(w)?, parse(h)?))
}

impl Cli {
    pub fn validate(self) -> Result<Self, Error> {
        if self.pick.is_none() && self.sources.is_empty() {
            return Err(Error::raw(
                ErrorKind::MissingRequiredArgument,
                "Pass a path or url, or use --pick to open a file dialog",
            ));
        }
        Ok(self)
    }

    pub fn source(&self) -> anyhow::Result<DataSource> {
        let source = match self.pick {
            Some(PickMode::Ply) => DataSource::PickPly,
            Some(PickMode::Images) => DataSource::PickImages,
            Some(PickMode::Folder) => DataSource::PickDirectory,
            None => DataSource::from_args(&self.sources)?,
        };
        Ok(source)
    }
}

/// What ended up on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSummary {
    pub decoded: usize,
    pub shown: usize,
    pub frames: u64,
    pub elapsed: Duration,
}

fn spinner(template: &str, ticks: &[&str]) -> anyhow::Result<ProgressBar> {
    let style = ProgressStyle::with_template(template)
        .context("Invalid indicatif config")?
        .tick_strings(ticks);
    Ok(ProgressBar::new_spinner().with_style(style))
}

fn describe(msg: &ProcessMessage) -> Option<String> {
    match msg {
        ProcessMessage::NewSource => Some("Starting process...".to_owned()),
        ProcessMessage::StartLoading { remote: true } => Some("Preparing upload...".to_owned()),
        ProcessMessage::StartLoading { remote: false } => Some("Loading point file...".to_owned()),
        ProcessMessage::Uploading { images } => Some(format!("Uploading {images} images...")),
        ProcessMessage::JobSubmitted { job, status } => Some(format!("Job {job} is {status}")),
        ProcessMessage::Downloading { job } => Some(format!("Downloading result of job {job}...")),
        ProcessMessage::Cached { path } => Some(format!("Saved result to {}", path.display())),
        ProcessMessage::ViewPoints { cloud } => Some(format!("Loaded {} points", cloud.len())),
        ProcessMessage::DoneLoading | ProcessMessage::Warning { .. } => None,
    }
}

/// Load a source through the ui process and show it on a headless surface,
/// reporting progress on the terminal.
pub async fn process_ui(
    process: &UiProcess,
    surface: &mut HeadlessSurface,
    viewport: UVec2,
    orbit_frames: u32,
) -> anyhow::Result<ViewSummary> {
    let start = Instant::now();
    let sp = indicatif::MultiProgress::new();
    let main_spinner = sp.add(spinner("{spinner:.blue} {msg}", &["◐", "◓", "◑", "◒"])?);
    let stats_spinner = sp.add(spinner("{spinner:.blue} {msg}", &["ℹ️", "ℹ️"])?);

    main_spinner.enable_steady_tick(Duration::from_millis(120));
    stats_spinner.set_message(format!("Showing at most {} points", process.max_points()));

    surface.open(viewport)?;
    let stats = surface.stats();

    while process.is_running() {
        for msg in process.message_queue() {
            match msg {
                Ok(ProcessMessage::Warning { error }) => {
                    let _ = sp.println(format!("⚠️  {error:#}"));
                }
                Ok(msg) => {
                    if let Some(status) = describe(&msg) {
                        log::info!("{status}");
                        main_spinner.set_message(status);
                    }
                }
                Err(error) => {
                    // The error is printed by the caller.
                    let _ = sp.println("❌ Encountered an error");
                    log::debug!("Process failed: {error:#}");
                }
            }
        }
        process.draw(surface)?;
        tokio::time::sleep(Duration::from_millis(16)).await;
    }

    let summary = match process.screen() {
        Screen::Viewer { cloud } => {
            let orbit = CameraInput {
                orbit: Vec2::new(4.0, 0.0),
                viewport: viewport.as_vec2(),
                ..Default::default()
            };
            for _ in 0..orbit_frames {
                process.tick_controls(&orbit, 1.0 / 60.0);
                process.draw(surface)?;
            }
            process.draw(surface)?;

            ViewSummary {
                decoded: cloud.len(),
                shown: surface.geometry().map_or(0, |g| g.count()),
                frames: stats.frames(),
                elapsed: start.elapsed(),
            }
        }
        screen => {
            main_spinner.finish_and_clear();
            let status = screen.status().unwrap_or("Process stopped").to_owned();
            anyhow::bail!(status);
        }
    };

    main_spinner.finish_with_message("Done");
    stats_spinner.finish_with_message(summary_line(&summary, &stats));
    Ok(summary)
}

fn summary_line(summary: &ViewSummary, stats: &SurfaceStats) -> String {
    let elapsed = Duration::from_millis(summary.elapsed.as_millis() as u64);
    format!(
        "Showing {} of {} points, {} frames, {} uploads, took {}",
        summary.shown,
        summary.decoded,
        summary.frames,
        stats.uploads(),
        humantime::format_duration(elapsed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_cli() {
        let cli = Cli::try_parse_from(["splatview", "a.jpg", "b.jpg", "--max-points", "10"])
            .unwrap()
            .validate()
            .unwrap();
        assert_eq!(
            cli.source().unwrap(),
            DataSource::Paths(vec![PathBuf::from("a.jpg"), PathBuf::from("b.jpg")])
        );
        assert_eq!(cli.process.view.max_points.get(), 10);
        assert_eq!(cli.viewport, UVec2::new(1280, 720));

        let cli = Cli::try_parse_from(["splatview", "--pick", "folder", "--viewport", "64x32"])
            .unwrap()
            .validate()
            .unwrap();
        assert_eq!(cli.source().unwrap(), DataSource::PickDirectory);
        assert_eq!(cli.viewport, UVec2::new(64, 32));

        let cli = Cli::try_parse_from(["splatview", "https://example.com/x.ply"]).unwrap();
        assert_eq!(
            cli.source().unwrap(),
            DataSource::Url("https://example.com/x.ply".to_owned())
        );
    }

    #[test]
    fn test_invalid_cli() {
        let cli = Cli::try_parse_from(["splatview"]).unwrap();
        assert!(cli.validate().is_err());
        assert!(Cli::try_parse_from(["splatview", "a.ply", "--pick", "ply"]).is_err());
        assert!(Cli::try_parse_from(["splatview", "a.ply", "--viewport", "big"]).is_err());
    }

    #[tokio::test]
    async fn test_process_ui() {
        let dir = std::env::temp_dir().join(format!("splatview-cli-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("cloud.ply");
        tokio::fs::write(
            &path,
            "ply\nelement vertex 2\nend_header\n0 0 0 1 2 3\n1 1 1 4 5 6\n",
        )
        .await
        .unwrap();

        let process = UiProcess::default();
        process.select(DataSource::Paths(vec![path]));
        process.request_process().unwrap();

        let mut surface = HeadlessSurface::new();
        let summary = process_ui(&process, &mut surface, UVec2::new(64, 64), 3)
            .await
            .unwrap();
        assert_eq!(summary.decoded, 2);
        assert_eq!(summary.shown, 2);
        assert!(summary.frames >= 4);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_process_ui_failure() {
        let process = UiProcess::default();
        process.select(DataSource::Paths(vec![PathBuf::from(
            "/definitely/not/here.ply",
        )]));
        process.request_process().unwrap();

        let mut surface = HeadlessSurface::new();
        let err = process_ui(&process, &mut surface, UVec2::new(64, 64), 0)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Failed: "), "{err}");
    }
}
