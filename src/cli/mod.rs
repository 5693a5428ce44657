//! Command-line interface for hardhat.
//!
//! Provides commands for running the training pipeline, serving the HTTP
//! endpoints, and predicting on a local image file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::PipelineConfig;
use crate::domain::PipelineOutcome;
use crate::pipeline::{PredictionPipeline, TrainPipeline};
use crate::{serve, storage};

/// hardhat - helmet-detection training and serving pipeline
#[derive(Parser, Debug)]
#[command(name = "hardhat")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full training pipeline once
    Train,

    /// Serve the HTTP endpoints (GET /train, POST /predict)
    Serve,

    /// Predict on a local image file using the deployed model
    Predict {
        /// Input image file
        image: PathBuf,

        /// Where to write the annotated JPEG
        #[arg(short, long, default_value = "prediction.jpg")]
        output: PathBuf,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = Arc::new(PipelineConfig::load()?);
        let gateway = storage::connect(&config)?;

        match self.command {
            Commands::Train => train(config, gateway).await,
            Commands::Serve => serve::serve(config, gateway).await,
            Commands::Predict { image, output } => {
                predict_file(config, gateway, &image, &output).await
            }
        }
    }
}

async fn train(
    config: Arc<PipelineConfig>,
    gateway: Arc<dyn storage::StorageGateway>,
) -> Result<()> {
    let outcome = TrainPipeline::new(config, gateway).run().await?;
    match outcome {
        PipelineOutcome::Accepted { evaluation, .. } => {
            info!(metric = evaluation.metric_value, "model accepted and promoted");
            Ok(())
        }
        PipelineOutcome::Rejected { reason, evaluation } => {
            info!(metric = evaluation.metric_value, "model rejected");
            anyhow::bail!("{reason}")
        }
    }
}

async fn predict_file(
    config: Arc<PipelineConfig>,
    gateway: Arc<dyn storage::StorageGateway>,
    image: &PathBuf,
    output: &PathBuf,
) -> Result<()> {
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("failed to read image: {}", image.display()))?;

    let prediction = PredictionPipeline::new(config, gateway).run(&bytes).await?;

    for detection in &prediction.detections {
        info!(
            class = %crate::pipeline::prediction::class_name(detection.label),
            score = detection.score,
            "detection"
        );
    }
    tokio::fs::write(output, prediction.jpeg)
        .await
        .with_context(|| format!("failed to write output: {}", output.display()))?;
    info!(output = %output.display(), "annotated image written");
    Ok(())
}
