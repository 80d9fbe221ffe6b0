//! Utility functions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Version information for the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Calculate SHA256 hash of data as lowercase hex
pub fn sha256_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Time-ordered identifier: `<prefix>-<yyyymmddHHMMSS>-<8 hex>`
///
/// The random suffix keeps ids unique when two are generated within the
/// same second.
pub fn time_based_id(prefix: &str, at: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, at.format("%Y%m%d%H%M%S"), &suffix[..8])
}

/// Container image architecture for the host (`amd64`, `arm64`, ...)
pub fn image_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "arm",
        other => other,
    }
}

/// Ratio helper that treats an empty denominator as `empty`
pub fn ratio(numerator: usize, denominator: usize, empty: f64) -> f64 {
    if denominator == 0 {
        empty
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hash() {
        let hash = sha256_hash(b"hello world");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_time_based_id_shape() {
        let at = DateTime::parse_from_rfc3339("2026-10-18T09:30:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let id = time_based_id("rb", at);
        assert!(id.starts_with("rb-20261018093005-"));
        assert_eq!(id.len(), "rb-20261018093005-".len() + 8);
        assert_ne!(id, time_based_id("rb", at));
    }

    #[test]
    fn test_ratio_empty_denominator() {
        assert_eq!(ratio(0, 0, 1.0), 1.0);
        assert_eq!(ratio(3, 4, 0.0), 0.75);
    }
}
