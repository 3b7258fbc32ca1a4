//! Configuration loading and types for partstream.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`TransferConfig`] struct.  Part-size limits and batch caps mirror the
//! published S3 quotas; the defaults match what the AWS CLI uses.

use serde::Deserialize;
use std::path::Path;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Top-level configuration for the transfer engine.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// Smallest part size the backend accepts (all but the last part).
    #[serde(default = "default_min_part_size")]
    pub min_part_size: u64,

    /// Part size used when the payload fits in `max_part_count` default
    /// sized parts.  Payloads below this size are sent single-shot.
    #[serde(default = "default_part_size")]
    pub default_part_size: u64,

    /// Largest part size the backend accepts.
    #[serde(default = "default_max_part_size")]
    pub max_part_size: u64,

    /// Hard cap on parts per multi-part transfer.
    #[serde(default = "default_max_part_count")]
    pub max_part_count: u64,

    /// Keys per batched delete request.  Kept below the backend's hard
    /// limit of 1000 as a safety margin.
    #[serde(default = "default_delete_batch_max")]
    pub delete_batch_max: usize,

    /// Worker threads for the runtime driving backend sub-operations.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Which backend to use: `aws` or `memory`.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// AWS backend settings.
    #[serde(default)]
    pub aws: AwsConfig,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            min_part_size: default_min_part_size(),
            default_part_size: default_part_size(),
            max_part_size: default_max_part_size(),
            max_part_count: default_max_part_count(),
            delete_batch_max: default_delete_batch_max(),
            worker_threads: default_worker_threads(),
            backend: default_backend(),
            aws: AwsConfig::default(),
        }
    }
}

/// AWS S3 backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsConfig {
    /// AWS region.
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom S3-compatible endpoint (e.g. MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: String,

    /// Force path-style URL addressing.  Required by LocalStack;
    /// deprecated for new buckets on real S3.
    #[serde(default)]
    pub use_path_style: bool,

    /// Explicit AWS access key (falls back to env/credential chain).
    #[serde(default)]
    pub access_key_id: String,

    /// Explicit AWS secret key (falls back to env/credential chain).
    #[serde(default)]
    pub secret_access_key: String,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: String::new(),
            use_path_style: false,
            access_key_id: String::new(),
            secret_access_key: String::new(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_min_part_size() -> u64 {
    5 * MIB
}

fn default_part_size() -> u64 {
    8 * MIB
}

fn default_max_part_size() -> u64 {
    5 * GIB
}

fn default_max_part_count() -> u64 {
    10_000
}

fn default_delete_batch_max() -> usize {
    995
}

fn default_worker_threads() -> usize {
    36
}

fn default_backend() -> String {
    "aws".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<TransferConfig> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: TransferConfig = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend_quotas() {
        let cfg = TransferConfig::default();
        assert_eq!(cfg.min_part_size, 5 * MIB);
        assert_eq!(cfg.default_part_size, 8 * MIB);
        assert_eq!(cfg.max_part_size, 5 * GIB);
        assert_eq!(cfg.max_part_count, 10_000);
        assert!(cfg.delete_batch_max < 1000);
        assert_eq!(cfg.aws.region, "us-east-1");
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let cfg: TransferConfig = serde_yaml::from_str(
            "default_part_size: 16777216\naws:\n  region: eu-west-1\n  use_path_style: true\n",
        )
        .unwrap();
        assert_eq!(cfg.default_part_size, 16 * MIB);
        assert_eq!(cfg.min_part_size, 5 * MIB);
        assert_eq!(cfg.aws.region, "eu-west-1");
        assert!(cfg.aws.use_path_style);
    }
}
