use clap::Parser;
use splatview_cli::Cli;
use splatview_ui::{HeadlessSurface, UiProcess};

fn main() -> Result<(), anyhow::Error> {
    let args = Cli::parse().validate()?;

    #[cfg(feature = "tracing")]
    {
        use tracing_subscriber::layer::SubscriberExt;

        tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(tracing_subscriber::fmt::layer()),
        )?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        env_logger::builder()
            .target(env_logger::Target::Stdout)
            .filter_level(log::LevelFilter::Info)
            .parse_default_env()
            .init();

        let source = args.source()?;
        let process = UiProcess::new(args.process.clone());
        process.select(source);
        process.request_process()?;

        let mut surface = HeadlessSurface::new();
        let summary =
            splatview_cli::process_ui(&process, &mut surface, args.viewport, args.orbit_frames)
                .await?;

        let camera = process.camera();
        log::info!(
            "Viewing {} points from {} (focus distance {:.2})",
            summary.shown,
            camera.position,
            camera.focus_distance
        );
        anyhow::Result::<(), anyhow::Error>::Ok(())
    })?;

    Ok(())
}
