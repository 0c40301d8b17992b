use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::models::DetectionParams;
use crate::server::build_pipeline;
use crate::services::{AgentService, Pipeline};

#[derive(Parser)]
#[command(name = "biblioscan")]
#[command(author, version, about = "Bookshelf photo scanner: detect spines, read titles, look them up", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the web server
    Serve,

    /// Detect books in an image and print the result as JSON
    Detect {
        /// Shelf photo
        image: PathBuf,
        /// Detection confidence threshold
        #[arg(long)]
        conf: Option<f32>,
        /// NMS IoU threshold
        #[arg(long)]
        iou: Option<f32>,
    },

    /// Detect books, read their spines and print the result as JSON
    Scan {
        /// Shelf photo
        image: PathBuf,
        #[arg(long)]
        conf: Option<f32>,
        #[arg(long)]
        iou: Option<f32>,
        /// Also resolve titles and look them up on Google Books
        #[arg(long)]
        agent: bool,
    },
}

fn prepare(config: &Config, image: &Path) -> anyhow::Result<Pipeline> {
    let bytes = std::fs::read(image)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", image.display(), e))?;
    let pipeline = build_pipeline(config)?;
    pipeline.files().store_upload(&bytes)?;
    info!("Scanning {}", image.display());
    Ok(pipeline)
}

fn params(config: &Config, conf: Option<f32>, iou: Option<f32>) -> DetectionParams {
    DetectionParams {
        conf: conf.unwrap_or(config.default_conf),
        iou: iou.unwrap_or(config.default_iou),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn handle_detect(
    config: &Config,
    image: &Path,
    conf: Option<f32>,
    iou: Option<f32>,
) -> anyhow::Result<()> {
    let pipeline = prepare(config, image)?;
    let response = pipeline.detect(params(config, conf, iou))?;
    print_json(&response)
}

pub fn handle_scan(
    config: &Config,
    image: &Path,
    conf: Option<f32>,
    iou: Option<f32>,
    agent: bool,
) -> anyhow::Result<()> {
    let pipeline = prepare(config, image)?;
    let response = pipeline.detect_and_ocr(params(config, conf, iou))?;
    if !agent {
        return print_json(&response);
    }

    let agent = AgentService::new(&config.agent);
    let rt = tokio::runtime::Runtime::new()?;
    let resolved = rt.block_on(agent.resolve_all(response));
    print_json(&resolved)
}
