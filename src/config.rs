use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fmt, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments (CLI wins).
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Blob-store backend: `local` or `s3`.
    pub storage: String,
    pub local_dir: String,
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_endpoint: String,
    pub vision_endpoint: String,
    pub vision_api_key: String,
    pub max_labels: u32,
    pub url_ttl_secs: u64,
    pub timeout_secs: u64,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Image tagging gallery API")]
pub struct Args {
    /// Host to bind to (overrides IMAGE_TAGGER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides IMAGE_TAGGER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Blob-store backend, `local` or `s3` (overrides IMAGE_TAGGER_STORAGE)
    #[arg(long)]
    pub storage: Option<String>,

    /// Root directory for the local backend (overrides IMAGE_TAGGER_LOCAL_DIR)
    #[arg(long)]
    pub local_dir: Option<String>,

    /// Bucket for the s3 backend (overrides IMAGE_TAGGER_S3_BUCKET)
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// Region for the s3 backend (overrides IMAGE_TAGGER_S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// Endpoint override for S3-compatible stores such as MinIO
    /// (overrides IMAGE_TAGGER_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Base URL of the vision API (overrides IMAGE_TAGGER_VISION_ENDPOINT)
    #[arg(long)]
    pub vision_endpoint: Option<String>,

    /// API key for the vision API (overrides IMAGE_TAGGER_VISION_API_KEY)
    #[arg(long)]
    pub vision_api_key: Option<String>,

    /// Maximum labels requested per image (overrides IMAGE_TAGGER_MAX_LABELS)
    #[arg(long)]
    pub max_labels: Option<u32>,

    /// Signed URL lifetime in seconds (overrides IMAGE_TAGGER_URL_TTL_SECS)
    #[arg(long)]
    pub url_ttl_secs: Option<u64>,

    /// Timeout in seconds for each external call (overrides IMAGE_TAGGER_TIMEOUT_SECS)
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Upload body size cap in bytes (overrides IMAGE_TAGGER_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into a validated AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let cfg = Self {
            host: args
                .host
                .unwrap_or_else(|| env_string("IMAGE_TAGGER_HOST", "0.0.0.0")),
            port: match args.port {
                Some(port) => port,
                None => env_parsed("IMAGE_TAGGER_PORT", 3000)?,
            },
            storage: args
                .storage
                .unwrap_or_else(|| env_string("IMAGE_TAGGER_STORAGE", "local")),
            local_dir: args
                .local_dir
                .unwrap_or_else(|| env_string("IMAGE_TAGGER_LOCAL_DIR", "./data/images")),
            s3_bucket: args
                .s3_bucket
                .unwrap_or_else(|| env_string("IMAGE_TAGGER_S3_BUCKET", "")),
            s3_region: args
                .s3_region
                .unwrap_or_else(|| env_string("IMAGE_TAGGER_S3_REGION", "")),
            s3_endpoint: args
                .s3_endpoint
                .unwrap_or_else(|| env_string("IMAGE_TAGGER_S3_ENDPOINT", "")),
            vision_endpoint: args.vision_endpoint.unwrap_or_else(|| {
                env_string(
                    "IMAGE_TAGGER_VISION_ENDPOINT",
                    "https://vision.googleapis.com",
                )
            }),
            vision_api_key: args
                .vision_api_key
                .unwrap_or_else(|| env_string("IMAGE_TAGGER_VISION_API_KEY", "")),
            max_labels: match args.max_labels {
                Some(n) => n,
                None => env_parsed("IMAGE_TAGGER_MAX_LABELS", 10)?,
            },
            url_ttl_secs: match args.url_ttl_secs {
                Some(secs) => secs,
                None => env_parsed("IMAGE_TAGGER_URL_TTL_SECS", 3600)?,
            },
            timeout_secs: match args.timeout_secs {
                Some(secs) => secs,
                None => env_parsed("IMAGE_TAGGER_TIMEOUT_SECS", 30)?,
            },
            max_upload_bytes: match args.max_upload_bytes {
                Some(bytes) => bytes,
                None => env_parsed("IMAGE_TAGGER_MAX_UPLOAD_BYTES", 25 * 1024 * 1024)?,
            },
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        match self.storage.as_str() {
            "local" => {
                if self.local_dir.trim().is_empty() {
                    anyhow::bail!("local storage requires a non-empty --local-dir");
                }
            }
            "s3" => {
                if self.s3_bucket.trim().is_empty() {
                    anyhow::bail!("s3 storage requires --s3-bucket or IMAGE_TAGGER_S3_BUCKET");
                }
            }
            other => {
                anyhow::bail!("unknown storage backend `{}` (expected `local` or `s3`)", other)
            }
        }
        if self.vision_endpoint.trim().is_empty() {
            anyhow::bail!("the vision endpoint must not be empty");
        }
        if self.vision_api_key.trim().is_empty() {
            anyhow::bail!(
                "a vision api key is required (--vision-api-key or IMAGE_TAGGER_VISION_API_KEY)"
            );
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("--timeout-secs must be greater than zero");
        }
        if self.url_ttl_secs == 0 {
            anyhow::bail!("--url-ttl-secs must be greater than zero");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Deadline applied to every external call (vision API and object store).
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validity window of signed image URLs.
    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.url_ttl_secs)
    }
}

// Manual Debug so the startup log can print the config without leaking the
// vision API key.
impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("storage", &self.storage)
            .field("local_dir", &self.local_dir)
            .field("s3_bucket", &self.s3_bucket)
            .field("s3_region", &self.s3_region)
            .field("s3_endpoint", &self.s3_endpoint)
            .field("vision_endpoint", &self.vision_endpoint)
            .field("vision_api_key", &"<redacted>")
            .field("max_labels", &self.max_labels)
            .field("url_ttl_secs", &self.url_ttl_secs)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish()
    }
}

/// Read a string env var with a default.
fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.into())
}

/// Read and parse an env var, keeping the default when it is absent.
fn env_parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            host: "127.0.0.1".into(),
            port: 3000,
            storage: "local".into(),
            local_dir: "./data/images".into(),
            s3_bucket: String::new(),
            s3_region: String::new(),
            s3_endpoint: String::new(),
            vision_endpoint: "https://vision.googleapis.com".into(),
            vision_api_key: "test-key".into(),
            max_labels: 10,
            url_ttl_secs: 3600,
            timeout_secs: 30,
            max_upload_bytes: 25 * 1024 * 1024,
        }
    }

    #[test]
    fn addr_joins_host_and_port() {
        assert_eq!(base_config().addr(), "127.0.0.1:3000");
    }

    #[test]
    fn validate_accepts_the_local_default() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn validate_requires_a_bucket_for_s3() {
        let mut cfg = base_config();
        cfg.storage = "s3".into();
        assert!(cfg.validate().is_err());
        cfg.s3_bucket = "gallery".into();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unknown_backends_and_missing_key() {
        let mut cfg = base_config();
        cfg.storage = "ftp".into();
        assert!(cfg.validate().is_err());

        let mut cfg = base_config();
        cfg.vision_api_key = "  ".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn debug_output_redacts_the_api_key() {
        let cfg = base_config();
        let printed = format!("{:?}", cfg);
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("test-key"));
    }
}
