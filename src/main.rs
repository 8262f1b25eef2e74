use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use camera_render::config::Configuration;
use camera_render::gpu::{GpuBackend, HeadlessBackend, HeadlessProbe};
use camera_render::tasks::render_thread::{self, BackendFactory};
use camera_render::tasks::{preview, synthetic};
use camera_render::{RenderInputs, RenderStats, SurfaceReady};

#[derive(Debug, Parser)]
#[command(
    name = "camera-render",
    version,
    about = "Live camera preview through the parametric adjustment pipeline"
)]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
    /// Render without a window through the CPU reference backend
    #[arg(long)]
    headless: bool,
    /// Frames to render in headless mode
    #[arg(long, value_name = "N", default_value_t = 120)]
    frames: u64,
    /// Preset to apply instead of `active-preset`
    #[arg(long, value_name = "NAME")]
    preset: Option<String>,
    /// Write the last headless frame to this PNG file
    #[arg(long, value_name = "PNG", requires = "headless")]
    dump: Option<PathBuf>,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive(format!("camera_render={level}").parse()?)
        .add_directive("wgpu=warn".parse()?)
        .add_directive("naga=warn".parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let cfg = Configuration::from_yaml_file(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?
        .validated()
        .context("invalid configuration values")?;
    tracing::debug!("loaded configuration from {}:\n{:#?}", args.config.display(), cfg);

    let params = cfg.initial_parameters(args.preset.as_deref())?;
    let inputs = RenderInputs::new(params, cfg.curves.generate());
    let thread_config = cfg.render.thread_config()?;
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let mut tasks = JoinSet::new();

    // Synthetic gyroscope
    let sensor = inputs
        .sensor_sink(cfg.parallax)
        .context("invalid parallax configuration")?;
    tasks.spawn({
        let synthetic = cfg.synthetic.clone();
        let cancel = cancel.clone();
        async move {
            synthetic::run_gyro(sensor, synthetic, cancel)
                .await
                .context("gyro task failed")
        }
    });

    // Synthetic camera, started once the pipeline hands out its frame sink
    let (sink_tx, sink_rx) = oneshot::channel();
    tasks.spawn({
        let synthetic = cfg.synthetic.clone();
        let cancel = cancel.clone();
        async move {
            let Ok(sink) = sink_rx.await else {
                return Ok(());
            };
            synthetic::run_camera(sink, synthetic, cancel)
                .await
                .context("camera task failed")
        }
    });

    let result = if args.headless {
        let (backend, probe) = HeadlessBackend::with_clear_color(cfg.render.clear_color);
        let factory: BackendFactory = Box::new(move || Ok(Box::new(backend) as Box<dyn GpuBackend>));
        let handle = render_thread::spawn(thread_config, inputs, SurfaceReady::new(1), factory)
            .context("failed to start render thread")?;
        let _ = sink_tx.send(handle.frame_sink());
        run_headless(handle, &probe, args.frames, &cancel).await.and_then(|stats| {
            if let Some(path) = &args.dump {
                dump_framebuffer(&probe, path)?;
            }
            Ok(stats)
        })
    } else {
        preview::run_windowed(
            thread_config,
            cfg.render.clear_color,
            inputs,
            sink_tx,
            cancel.clone(),
        )
    };

    cancel.cancel();
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("task error: {e:?}"),
            Err(e) => tracing::error!("join error: {e}"),
        }
    }

    let stats = result?;
    tracing::info!(
        drawn = stats.drawn,
        fresh = stats.fresh,
        reused = stats.reused,
        lut_uploads = stats.lut_uploads,
        recoveries = stats.recoveries,
        skipped = stats.skipped,
        "render finished"
    );
    Ok(())
}

async fn run_headless(
    handle: render_thread::RenderThreadHandle,
    probe: &HeadlessProbe,
    frames: u64,
    cancel: &CancellationToken,
) -> Result<RenderStats> {
    let mut ticker = tokio::time::interval(Duration::from_millis(10));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if handle.stats().drawn >= frames || handle.has_stopped() {
                    break;
                }
            }
        }
    }
    tracing::debug!(commands = probe.commands().len(), "headless run complete");
    let stats = tokio::task::spawn_blocking(move || handle.shutdown())
        .await
        .context("render shutdown task panicked")?
        .context("render thread failed")?;
    Ok(stats)
}

fn dump_framebuffer(probe: &HeadlessProbe, path: &Path) -> Result<()> {
    let Some(fb) = probe.framebuffer() else {
        bail!("no frame was drawn; nothing to dump");
    };
    let image = image::RgbaImage::from_raw(fb.width, fb.height, fb.pixels)
        .context("framebuffer size does not match its dimensions")?;
    image
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), width = fb.width, height = fb.height, "framebuffer written");
    Ok(())
}
