//! build_labels - label every image in a folder and write the dataset manifest
//!
//! Output (relative to the working directory unless `--out-root` is given):
//! - `<out_root>/raw_all/`      archived originals
//! - `<out_root>/labels/`       one JSON record per labeled image
//! - `<out_root>/manifest.csv`  summary table of every input file

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use garment_labeler::{build_detector, build_embedder, LabelerConfig, Pipeline};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Folder of clothing photographs to label.
    input_dir: Option<PathBuf>,
    /// Output root (overrides LABELER_OUT_ROOT and the config file).
    #[arg(long)]
    out_root: Option<PathBuf>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let input_dir = args
        .input_dir
        .ok_or_else(|| anyhow!("usage: build_labels <input_dir>"))?;
    if !input_dir.is_dir() {
        return Err(anyhow!("Folder not found: {}", input_dir.display()));
    }
    // Auto mode stays plain when stdout is piped or NO_COLOR is set.
    let disable_pretty =
        !std::io::stdout().is_terminal() || std::env::var_os("NO_COLOR").is_some();
    let ui = ui::Ui::from_args(
        Some(&args.ui),
        std::io::stderr().is_terminal(),
        disable_pretty,
    );

    let mut cfg = LabelerConfig::load()?;
    if let Some(out_root) = args.out_root {
        cfg.out_root = out_root;
    }

    let mut detector = {
        let _stage = ui.stage("Load person detector");
        let mut detector = build_detector(&cfg.detector)?;
        detector.warm_up()?;
        detector
    };
    let mut embedder = {
        let _stage = ui.stage("Load garment classifier");
        let mut embedder = build_embedder(&cfg.embedder)?;
        embedder.warm_up()?;
        embedder
    };
    log::info!(
        "detector={} embedder={} out_root={}",
        detector.name(),
        embedder.name(),
        cfg.out_root.display()
    );

    let mut pipeline = Pipeline::new(&cfg, detector.as_mut(), embedder.as_mut());
    let summary = pipeline.run_with_progress(&input_dir, |progress| ui.item(progress))?;

    let root = summary
        .layout
        .root
        .canonicalize()
        .unwrap_or_else(|_| summary.layout.root.clone());
    println!();
    println!("DONE");
    println!(
        "{} files: {} labeled, {} unsupported, {} unreadable, {} inference errors",
        summary.counts.total(),
        summary.counts.ok,
        summary.counts.skipped_unsupported_ext,
        summary.counts.skipped_unreadable,
        summary.counts.skipped_inference_error
    );
    println!("Output folder: {}", root.display());
    println!(" - raw_all/ (copied originals)");
    println!(" - labels/  (per-image json)");
    println!(" - manifest.csv (summary table)");
    Ok(())
}
