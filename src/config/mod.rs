use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::repository::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Hosting platform configuration
    pub github: GitHubConfig,

    /// AWS configuration
    pub aws: AwsConfig,

    /// Local whisper configuration
    pub whisper: WhisperConfig,

    /// Application settings
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// Owner of the upstream transcript repository
    pub upstream_owner: String,

    /// Name of the upstream transcript repository
    pub upstream_repo: String,

    /// REST API base URL
    pub api_url: String,

    /// Host used for git over HTTPS
    pub git_host: String,

    /// Personal access token; falls back to GITHUB_TOKEN, GH_TOKEN, then `gh auth token`
    pub token: Option<String>,

    /// Base branch for pull requests (upstream default branch if unset)
    pub base_branch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    /// AWS region
    pub region: String,

    /// S3 bucket for temporary audio storage
    pub s3_bucket: String,

    /// Optional S3 key prefix
    pub s3_key_prefix: Option<String>,

    /// Default language code (auto-detect if not specified)
    pub default_language: Option<String>,

    /// Maximum segment length in seconds
    pub max_segment_length: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperConfig {
    /// Path to the whisper executable
    pub binary: String,

    /// Model name
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionEngine {
    /// AWS Transcribe
    Aws,
    /// Local whisper CLI
    Whisper,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding working copies and transcripts
    pub work_dir: Option<PathBuf>,

    /// Default transcription engine
    pub engine: TranscriptionEngine,

    /// Path to the yt-dlp executable
    pub yt_dlp_path: String,

    /// Timeout for every HTTP request, in seconds
    pub network_timeout_secs: u64,

    /// Timeout for git and yt-dlp invocations, in seconds
    pub command_timeout_secs: u64,

    /// Timeout for a whole transcription run, in seconds
    pub transcription_timeout_secs: u64,

    /// Retry policy for network and hosting API failures
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per step, including the first
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay, in milliseconds
    pub max_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            github: GitHubConfig {
                upstream_owner: "bitcointranscripts".to_string(),
                upstream_repo: "bitcointranscripts".to_string(),
                api_url: "https://api.github.com".to_string(),
                git_host: "https://github.com".to_string(),
                token: None,
                base_branch: None,
            },
            aws: AwsConfig {
                region: "us-east-1".to_string(),
                s3_bucket: "".to_string(),
                s3_key_prefix: Some("transcript-contributor/".to_string()),
                default_language: None,
                max_segment_length: 10.0,
            },
            whisper: WhisperConfig {
                binary: "whisper".to_string(),
                model: "tiny.en".to_string(),
            },
            app: AppConfig {
                work_dir: None,
                engine: TranscriptionEngine::Whisper,
                yt_dlp_path: "yt-dlp".to_string(),
                network_timeout_secs: 30,
                command_timeout_secs: 600,
                transcription_timeout_secs: 4 * 3600,
                retry: RetryConfig {
                    max_attempts: 3,
                    initial_delay_ms: 1000,
                    max_delay_ms: 30_000,
                },
            },
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config: Config = serde_yaml::from_str(&content)
                .context("Failed to parse config file")?;

            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save().await?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(&config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("transcript-contributor").join("config.yaml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.app.engine == TranscriptionEngine::Aws && self.aws.s3_bucket.is_empty() {
            anyhow::bail!("AWS S3 bucket must be configured to use the AWS engine");
        }

        if self.app.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }

        if self.github.upstream_owner.is_empty() || self.github.upstream_repo.is_empty() {
            anyhow::bail!("Upstream repository must be configured");
        }

        Ok(())
    }

    /// Directory for working copies and transcripts
    pub fn work_dir(&self) -> Result<PathBuf> {
        match &self.app.work_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::data_local_dir()
                .or_else(dirs::home_dir)
                .context("Could not determine a data directory")?
                .join("transcript-contributor")),
        }
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.app.network_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.app.command_timeout_secs)
    }

    pub fn transcription_timeout(&self) -> Duration {
        Duration::from_secs(self.app.transcription_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.app.retry.max_attempts,
            initial_delay: Duration::from_millis(self.app.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.app.retry.max_delay_ms),
        }
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!(
            "  Upstream: {}/{}",
            self.github.upstream_owner, self.github.upstream_repo
        );
        println!("  API URL: {}", self.github.api_url);
        println!(
            "  Token: {}",
            if self.github.token.is_some() { "configured" } else { "from environment" }
        );
        println!("  Engine: {:?}", self.app.engine);
        println!("  Whisper Model: {}", self.whisper.model);
        println!("  AWS Region: {}", self.aws.region);
        println!("  S3 Bucket: {}", self.aws.s3_bucket);
        if let Some(dir) = &self.app.work_dir {
            println!("  Work Dir: {}", dir.display());
        }
        println!(
            "  Retries: {} attempts, {}ms initial delay",
            self.app.retry.max_attempts, self.app.retry.initial_delay_ms
        );
        if let Ok(path) = Self::config_path() {
            println!("  Config File: {}", path.display());
        }
    }

    /// Point the user at the file to edit
    pub fn setup_hint(&self) -> Result<()> {
        println!("Edit the config file to change the upstream, engine or credentials:");
        println!("  {}", Self::config_path()?.display());
        println!("Run `contribute config --show` to review the current values.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_policy().max_attempts, 3);
    }

    #[test]
    fn test_aws_engine_requires_bucket() {
        let mut config = Config::default();
        config.app.engine = TranscriptionEngine::Aws;
        assert!(config.validate().is_err());
        config.aws.s3_bucket = "transcripts-staging".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = Config::default();
        config.app.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip_keeps_engine() {
        let mut config = Config::default();
        config.app.engine = TranscriptionEngine::Aws;
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("engine: aws"));
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.app.engine, TranscriptionEngine::Aws);
    }
}
