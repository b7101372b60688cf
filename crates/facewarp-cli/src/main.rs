use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facewarp_core::{Diagnostics, Frame, FrameProcessor, ProcessorOptions, ResultView};
use facewarp_prn::{PrnManifest, PrnOracle};
use facewarp_stream::Controller;
use image::{GrayImage, Luma, RgbImage};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Parser)]
#[command(name = "facewarp", about = "Swap a live face's texture onto a reference face")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every image in a directory through the background pipeline
    Swap {
        /// Image of the face that receives the texture
        #[arg(long)]
        reference: PathBuf,
        /// Directory of input frames, processed in file-name order
        #[arg(long)]
        frames: PathBuf,
        /// Directory for the output PNGs
        #[arg(long)]
        output: PathBuf,
        /// Which image each cycle publishes
        #[arg(long, default_value = "composite")]
        view: ResultView,
        /// Keep pixels outside the face mask instead of blacking them out
        #[arg(long)]
        no_cleanup: bool,
    },
    /// Run one synchronous cycle and dump every intermediate image
    Inspect {
        #[arg(long)]
        reference: PathBuf,
        #[arg(long)]
        frame: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Print the resolved configuration and model manifest
    Info,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Swap {
            reference,
            frames,
            output,
            view,
            no_cleanup,
        } => {
            let options = ProcessorOptions {
                view,
                diagnostics: config.diagnostics,
                boundary_cleanup: !no_cleanup,
                ..ProcessorOptions::default()
            };
            swap(&config, &reference, &frames, &output, options)
        }
        Commands::Inspect {
            reference,
            frame,
            output,
        } => inspect(&config, &reference, &frame, &output),
        Commands::Info => {
            let manifest = PrnManifest::load(&config.model_dir).context("reading model manifest")?;
            let info = serde_json::json!({
                "config": config,
                "manifest": manifest,
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
    }
}

fn load_frame(path: &Path) -> Result<Frame> {
    let img = image::open(path)
        .with_context(|| format!("opening {}", path.display()))?
        .to_rgb8();
    Ok(Frame::from_rgb_image(&img))
}

fn save_rgb(img: &RgbImage, path: &Path) -> Result<()> {
    img.save(path).with_context(|| format!("writing {}", path.display()))
}

fn save_mask(mask: &Array2<f32>, path: &Path) -> Result<()> {
    let (h, w) = mask.dim();
    let img = GrayImage::from_fn(w as u32, h as u32, |x, y| {
        Luma([facewarp_core::types::unit_to_u8(mask[[y as usize, x as usize]])])
    });
    img.save(path).with_context(|| format!("writing {}", path.display()))
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

fn swap(config: &Config, reference: &Path, frames: &Path, output: &Path, options: ProcessorOptions) -> Result<()> {
    let inputs = list_frames(frames)?;
    let Some((first, rest)) = inputs.split_first() else {
        bail!("no images found in {}", frames.display());
    };
    std::fs::create_dir_all(output).with_context(|| format!("creating {}", output.display()))?;

    let oracle = PrnOracle::load(&config.model_dir).context("loading PRN model")?;
    let mut controller = Controller::new(oracle, load_frame(reference)?, options, config.worker_config());

    let started = Instant::now();
    let handle = controller.start(load_frame(first)?)?;
    let mut written = 0usize;

    for (i, path) in inputs.iter().enumerate() {
        let generation = if i == 0 {
            1
        } else {
            handle.update(load_frame(&rest[i - 1])?)
        };
        let cycles_before = i as u64;

        // One cycle consumes each frame since the next is not written until it finishes.
        let deadline = Instant::now() + config.result_timeout();
        loop {
            let s = controller.stats();
            if s.completed + s.skipped + s.failed > cycles_before {
                break;
            }
            if Instant::now() > deadline {
                controller.stop()?;
                bail!("timed out waiting for {}", path.display());
            }
            std::thread::sleep(config.worker_config().idle_wait);
        }

        match handle.read() {
            Some(result) if result.input_generation == generation => {
                let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("frame");
                save_rgb(&result.image.to_rgb_image(), &output.join(format!("{name}.png")))?;
                written += 1;
            }
            _ => tracing::warn!(frame = %path.display(), "no face found; nothing written"),
        }
    }

    controller.stop()?;
    let stats = controller.stats();
    tracing::info!(
        frames = inputs.len(),
        written,
        skipped = stats.skipped,
        failed = stats.failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "swap finished"
    );
    println!("{written}/{} frames written to {}", inputs.len(), output.display());
    Ok(())
}

fn inspect(config: &Config, reference: &Path, frame: &Path, output: &Path) -> Result<()> {
    std::fs::create_dir_all(output).with_context(|| format!("creating {}", output.display()))?;

    let oracle = PrnOracle::load(&config.model_dir).context("loading PRN model")?;
    let options = ProcessorOptions {
        diagnostics: true,
        ..ProcessorOptions::default()
    };
    let mut processor = FrameProcessor::new(oracle, load_frame(reference)?, options);

    let Some(cycle) = processor.process(&load_frame(frame)?)? else {
        bail!("no face found in {} or the reference", frame.display());
    };
    save_rgb(&cycle.image.to_rgb_image(), &output.join("composite.png"))?;

    let Some(diag) = cycle.diagnostics else {
        bail!("processor returned no diagnostics");
    };
    write_diagnostics(&diag, output)?;
    println!("diagnostics written to {}", output.display());
    Ok(())
}

fn write_diagnostics(diag: &Diagnostics, output: &Path) -> Result<()> {
    save_rgb(
        &Frame::from_normalized(diag.texture.view()).to_rgb_image(),
        &output.join("texture.png"),
    )?;
    save_rgb(
        &Frame::from_normalized(diag.masked_texture.view()).to_rgb_image(),
        &output.join("masked_texture.png"),
    )?;
    save_rgb(&diag.blended.to_rgb_image(), &output.join("blended.png"))?;
    save_mask(&diag.uv_mask, &output.join("uv_mask.png"))?;
    save_mask(&diag.face_mask, &output.join("face_mask.png"))?;

    let pose = serde_json::json!({
        "pose": diag.pose,
        "angles_deg": diag.pose.as_ref().map(|p| p.angles.map(f32::to_degrees)),
        "landmarks": diag.landmarks.outer_iter().map(|r| r.to_vec()).collect::<Vec<_>>(),
        "vertices": diag.flipped_vertices.nrows(),
    });
    let path = output.join("pose.json");
    std::fs::write(&path, serde_json::to_string_pretty(&pose)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
