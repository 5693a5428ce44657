//! Pipeline configuration and run-scoped artifact layout.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (`HARDHAT_*`)
//! 2. Config file (`hardhat.yaml` in the working directory)
//! 3. Built-in defaults
//!
//! The config is built once at startup and passed by reference into every
//! stage; there is no process-global config state.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::domain::RunId;

/// Default bucket holding the dataset archive and the deployed model.
pub const DEFAULT_BUCKET: &str = "helmet-object-detection";

/// Remote key of the compressed dataset archive.
pub const ARCHIVE_KEY: &str = "data.zip";

/// Remote key of the deployed "best" checkpoint. Promotion overwrites it
/// in place; there is no remote versioning.
pub const DEPLOYED_MODEL_KEY: &str = "model.json";

/// Checkpoint file name used locally for trained and downloaded models.
pub const MODEL_FILE_NAME: &str = "model.json";

/// Side length images are resized to before entering the detector.
pub const INPUT_SIZE: u32 = 416;

/// Raw config file schema (matches YAML structure; every field optional).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub endpoint: Option<String>,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub artifact_root: Option<PathBuf>,
    pub epochs: Option<u32>,
    pub batch_size: Option<usize>,
    pub num_workers: Option<usize>,
    pub seed: Option<u64>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Augmentation probabilities applied by the training transform pipeline.
#[derive(Debug, Clone, Copy)]
pub struct AugmentConfig {
    pub horizontal_flip: f32,
    pub vertical_flip: f32,
    pub brightness_contrast: f32,
    pub color_jitter: f32,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            horizontal_flip: 0.3,
            vertical_flip: 0.3,
            brightness_contrast: 0.1,
            color_jitter: 0.1,
        }
    }
}

/// Resolved pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Object-store endpoint. `file://<path>` selects the directory-backed
    /// gateway; anything else is treated as an S3-compatible HTTP endpoint.
    pub endpoint: String,
    pub bucket: String,
    pub region: String,

    /// Root under which every run writes its timestamped artifact tree
    pub artifact_root: PathBuf,

    pub input_size: u32,
    pub epochs: u32,
    pub batch_size: usize,
    /// Batch size for evaluation passes (the original evaluates one by one)
    pub eval_batch_size: usize,
    /// Decode-worker fan-out inside batch loading; not an orchestration knob
    pub num_workers: usize,
    pub shuffle: bool,
    pub augment: AugmentConfig,

    /// Minimum confidence for a detection to be rendered by `/predict`
    pub score_threshold: f32,
    /// Seed for augmentation sampling and shuffling
    pub seed: u64,

    pub host: String,
    pub port: u16,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoint: format!("file://{}", PathBuf::from("bucket-store").display()),
            bucket: DEFAULT_BUCKET.to_string(),
            region: "ap-south-1".to_string(),
            artifact_root: PathBuf::from("artifacts"),
            input_size: INPUT_SIZE,
            epochs: 1,
            batch_size: 4,
            eval_batch_size: 1,
            num_workers: 2,
            shuffle: true,
            augment: AugmentConfig::default(),
            score_threshold: 0.8,
            seed: 7,
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from `hardhat.yaml` (if present) and environment.
    pub fn load() -> Result<Self> {
        let file = Self::read_config_file(Path::new("hardhat.yaml"))?;
        Ok(Self::resolve(file))
    }

    fn read_config_file(path: &Path) -> Result<ConfigFile> {
        if !path.exists() {
            return Ok(ConfigFile::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    fn resolve(file: ConfigFile) -> Self {
        let defaults = Self::default();

        fn env_str(key: &str) -> Option<String> {
            std::env::var(key).ok()
        }

        // generic: the overridden fields span u32, usize, u64 and u16
        fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.parse().ok())
        }

        Self {
            endpoint: env_str("HARDHAT_ENDPOINT")
                .or(file.endpoint)
                .unwrap_or(defaults.endpoint),
            bucket: env_str("HARDHAT_BUCKET")
                .or(file.bucket)
                .unwrap_or(defaults.bucket),
            region: env_str("HARDHAT_REGION")
                .or(file.region)
                .unwrap_or(defaults.region),
            artifact_root: env_str("HARDHAT_ARTIFACT_ROOT")
                .map(PathBuf::from)
                .or(file.artifact_root)
                .unwrap_or(defaults.artifact_root),
            epochs: env_parse("HARDHAT_EPOCHS")
                .or(file.epochs)
                .unwrap_or(defaults.epochs),
            batch_size: env_parse("HARDHAT_BATCH_SIZE")
                .or(file.batch_size)
                .unwrap_or(defaults.batch_size),
            num_workers: env_parse("HARDHAT_NUM_WORKERS")
                .or(file.num_workers)
                .unwrap_or(defaults.num_workers),
            seed: env_parse("HARDHAT_SEED")
                .or(file.seed)
                .unwrap_or(defaults.seed),
            host: env_str("HARDHAT_HOST").or(file.host).unwrap_or(defaults.host),
            port: env_parse("HARDHAT_PORT")
                .or(file.port)
                .unwrap_or(defaults.port),
            input_size: defaults.input_size,
            eval_batch_size: defaults.eval_batch_size,
            shuffle: defaults.shuffle,
            augment: defaults.augment,
            score_threshold: defaults.score_threshold,
        }
    }

    /// Socket address for the HTTP serving layer.
    pub fn serve_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid serve address {}:{}", self.host, self.port))
    }

    /// Fixed local cache path the prediction pipeline downloads the deployed
    /// model to. Not run-scoped; re-downloaded on every request.
    pub fn predict_model_path(&self) -> PathBuf {
        self.artifact_root.join("PredictModel").join(MODEL_FILE_NAME)
    }
}

/// Artifact directory layout for a single run.
///
/// ```text
/// artifacts/<timestamp>/
///   DataIngestionArtifacts/{data.zip, train/, test/, valid/}
///   DataTransformationArtifacts/{Train/train.json, Test/test.json}
///   TrainedModel/model.json
///   ModelEvaluationArtifacts/{loss.csv, model.json}
/// ```
#[derive(Debug, Clone)]
pub struct RunPaths {
    root: PathBuf,
}

impl RunPaths {
    pub fn new(artifact_root: &Path, run_id: &RunId) -> Self {
        Self {
            root: artifact_root.join(run_id.as_str()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ingestion_dir(&self) -> PathBuf {
        self.root.join("DataIngestionArtifacts")
    }

    pub fn archive_path(&self) -> PathBuf {
        self.ingestion_dir().join(ARCHIVE_KEY)
    }

    pub fn train_dir(&self) -> PathBuf {
        self.ingestion_dir().join("train")
    }

    pub fn test_dir(&self) -> PathBuf {
        self.ingestion_dir().join("test")
    }

    pub fn valid_dir(&self) -> PathBuf {
        self.ingestion_dir().join("valid")
    }

    pub fn transformation_dir(&self) -> PathBuf {
        self.root.join("DataTransformationArtifacts")
    }

    pub fn train_object_path(&self) -> PathBuf {
        self.transformation_dir().join("Train").join("train.json")
    }

    pub fn test_object_path(&self) -> PathBuf {
        self.transformation_dir().join("Test").join("test.json")
    }

    pub fn trained_model_dir(&self) -> PathBuf {
        self.root.join("TrainedModel")
    }

    pub fn trained_model_path(&self) -> PathBuf {
        self.trained_model_dir().join(MODEL_FILE_NAME)
    }

    pub fn evaluation_dir(&self) -> PathBuf {
        self.root.join("ModelEvaluationArtifacts")
    }

    pub fn loss_csv_path(&self) -> PathBuf {
        self.evaluation_dir().join("loss.csv")
    }

    /// Download destination for the currently deployed checkpoint.
    pub fn deployed_model_path(&self) -> PathBuf {
        self.evaluation_dir().join(MODEL_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.bucket, DEFAULT_BUCKET);
        assert_eq!(config.input_size, 416);
        assert_eq!(config.eval_batch_size, 1);
        assert!((config.augment.horizontal_flip - 0.3).abs() < f32::EPSILON);
        assert!((config.score_threshold - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_config_file_overrides_defaults() {
        let file = ConfigFile {
            bucket: Some("other-bucket".to_string()),
            epochs: Some(5),
            ..Default::default()
        };
        let config = PipelineConfig::resolve(file);
        assert_eq!(config.bucket, "other-bucket");
        assert_eq!(config.epochs, 5);
        // untouched fields keep defaults
        assert_eq!(config.batch_size, 4);
    }

    #[test]
    fn test_run_paths_layout() {
        let run_id = RunId::now();
        let paths = RunPaths::new(Path::new("artifacts"), &run_id);

        assert!(paths.train_dir().ends_with("DataIngestionArtifacts/train"));
        assert!(paths
            .train_object_path()
            .ends_with("DataTransformationArtifacts/Train/train.json"));
        assert!(paths.trained_model_path().ends_with("TrainedModel/model.json"));
        assert!(paths
            .loss_csv_path()
            .ends_with("ModelEvaluationArtifacts/loss.csv"));
        assert!(paths.root().starts_with("artifacts"));
    }

    // Single test because it mutates process environment variables; the
    // chosen keys are not asserted by any other test
    #[test]
    fn test_env_overrides_parse_into_typed_fields() {
        std::env::set_var("HARDHAT_SEED", "42");
        std::env::set_var("HARDHAT_PORT", "9001");
        std::env::set_var("HARDHAT_NUM_WORKERS", "3");

        let config = PipelineConfig::resolve(ConfigFile::default());

        assert_eq!(config.seed, 42);
        assert_eq!(config.port, 9001);
        assert_eq!(config.num_workers, 3);

        for key in ["HARDHAT_SEED", "HARDHAT_PORT", "HARDHAT_NUM_WORKERS"] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_config_file_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hardhat.yaml");
        std::fs::write(
            &path,
            "endpoint: file:///tmp/store\nbucket: test-bucket\nbatch_size: 2\n",
        )
        .unwrap();

        let file = PipelineConfig::read_config_file(&path).unwrap();
        assert_eq!(file.endpoint.as_deref(), Some("file:///tmp/store"));
        assert_eq!(file.bucket.as_deref(), Some("test-bucket"));
        assert_eq!(file.batch_size, Some(2));
    }
}
