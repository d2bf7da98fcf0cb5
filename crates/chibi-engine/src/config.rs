use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chibi_contracts::models::ModelTiers;

use crate::gemini::DEFAULT_API_BASE;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub scan_tiers: ModelTiers,
    pub image_tiers: ModelTiers,
    pub request_timeout: Duration,
    /// Photo paths handed to the pipeline are resolved against this directory.
    pub media_root: PathBuf,
    pub output_dir: PathBuf,
    /// Prefix of the paths returned to the record store, e.g. `/uploads`.
    pub public_prefix: String,
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let scan_tiers = match get("CHIBI_SCAN_MODELS") {
            Some(raw) => ModelTiers::from_csv(&raw).context("invalid CHIBI_SCAN_MODELS")?,
            None => ModelTiers::default_scan(),
        };
        let image_tiers = match get("CHIBI_IMAGE_MODELS") {
            Some(raw) => ModelTiers::from_csv(&raw).context("invalid CHIBI_IMAGE_MODELS")?,
            None => ModelTiers::default_image(),
        };
        let timeout_s = clamped_seconds(get("CHIBI_REQUEST_TIMEOUT").as_deref(), 90.0, 15.0, 300.0);
        let media_root =
            PathBuf::from(get("CHIBI_MEDIA_ROOT").unwrap_or_else(|| "uploads".to_string()));
        let output_dir = get("CHIBI_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| media_root.clone());

        Ok(Self {
            api_key: get("GEMINI_API_KEY").or_else(|| get("GOOGLE_API_KEY")),
            api_base: get("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            scan_tiers,
            image_tiers,
            request_timeout: Duration::from_secs_f64(timeout_s),
            media_root,
            output_dir,
            public_prefix: get("CHIBI_PUBLIC_PREFIX").unwrap_or_else(|| "/uploads".to_string()),
        })
    }
}

fn clamped_seconds(raw: Option<&str>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .map(|value| value.clamp(min, max))
        .unwrap_or(default)
}
