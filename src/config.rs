use anyhow::{Context, Result};
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::env;

use crate::extractor::{BlurMethod, ExtractorConfig, SignatureMethod};

pub type Number = f64;

pub const EPSILON: Number = 1e-6;

pub const DEFAULT_DIMENSIONS: usize = 200;
pub const DEFAULT_TOP_K: usize = 10;
pub const DEFAULT_COMPARE_THRESHOLD: Number = 0.5;

#[derive(Deserialize)]
pub struct SpektaConfig {
    pub path: Option<String>,
    pub dimensions: Option<usize>,
    pub top_k: Option<usize>,
    pub threshold: Option<Number>,
    pub compare_threshold: Option<Number>,
    pub blur_kernel_size: Option<usize>,
    pub blur_method: Option<String>,
    pub binarization_threshold: Option<f32>,
    pub row_bounds: Option<String>,
    pub signature_method: Option<String>,
}

impl SpektaConfig {
    pub fn try_from(config: &Config) -> Result<Self, ConfigError> {
        Ok(SpektaConfig {
            path: optional(config, "path")?,
            dimensions: optional(config, "dimensions")?,
            top_k: optional(config, "top_k")?,
            threshold: optional(config, "threshold")?,
            compare_threshold: optional(config, "compare_threshold")?,
            blur_kernel_size: optional(config, "blur_kernel_size")?,
            blur_method: optional(config, "blur_method")?,
            binarization_threshold: optional(config, "binarization_threshold")?,
            row_bounds: optional(config, "row_bounds")?,
            signature_method: optional(config, "signature_method")?,
        })
    }
}

/// `None` when `key` is absent; a value that is present but does not parse is
/// an error rather than a silent fallback to the default.
fn optional<T: DeserializeOwned>(config: &Config, key: &str) -> Result<Option<T>, ConfigError> {
    match config.get::<T>(key) {
        Ok(value) => Ok(Some(value)),
        Err(ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Effective runtime settings, resolved once at startup and passed by reference.
pub struct State {
    pub path: String,
    pub dimensions: usize,
    pub top_k: usize,
    pub threshold: Number,
    pub compare_threshold: Number,
    pub extractor: ExtractorConfig,
}

impl State {
    pub fn new() -> Result<Self> {
        let config = Config::builder()
            .add_source(ConfigFile::with_name("spekta_config").required(false))
            .add_source(Environment::with_prefix("SPEKTA"))
            .build()?;

        Self::from_config(SpektaConfig::try_from(&config)?)
    }

    pub fn from_config(spekta_config: SpektaConfig) -> Result<Self> {
        let path = spekta_config
            .path
            .context("SPEKTA_PATH not set in config or environment")?;

        let dimensions = spekta_config.dimensions.unwrap_or(DEFAULT_DIMENSIONS);
        if dimensions == 0 {
            anyhow::bail!("SPEKTA_DIMENSIONS must be at least 1.");
        }

        let top_k = spekta_config.top_k.unwrap_or(DEFAULT_TOP_K);
        if top_k == 0 {
            anyhow::bail!("SPEKTA_TOP_K must be at least 1.");
        }
        let threshold = spekta_config.threshold.unwrap_or(0.0);
        let compare_threshold = spekta_config
            .compare_threshold
            .unwrap_or(DEFAULT_COMPARE_THRESHOLD);

        let defaults = ExtractorConfig::default();

        let blur_method = match spekta_config.blur_method {
            Some(raw) => raw.parse::<BlurMethod>()?,
            None => defaults.blur_method,
        };

        let signature_method = match spekta_config.signature_method {
            Some(raw) => raw.parse::<SignatureMethod>()?,
            None => defaults.signature_method,
        };

        let row_bounds = match spekta_config.row_bounds {
            Some(raw) => parse_row_bounds(&raw)?,
            None => defaults.row_bounds,
        };

        let extractor = ExtractorConfig {
            blur_kernel_size: spekta_config
                .blur_kernel_size
                .unwrap_or(defaults.blur_kernel_size),
            blur_method,
            binarization_threshold: spekta_config
                .binarization_threshold
                .unwrap_or(defaults.binarization_threshold),
            row_bounds,
            signature_method,
        };
        extractor
            .validate()
            .context("Invalid extractor settings in config or environment")?;

        Ok(Self {
            path,
            dimensions,
            top_k,
            threshold,
            compare_threshold,
            extractor,
        })
    }

    pub fn print_config(&self) {
        println!("path={}", self.path);
        println!("dimensions={}", self.dimensions);
        println!("top_k={}", self.top_k);
        println!("threshold={}", self.threshold);
        println!("compare_threshold={}", self.compare_threshold);
        println!("blur_kernel_size={}", self.extractor.blur_kernel_size);
        println!("blur_method={}", self.extractor.blur_method);
        println!(
            "binarization_threshold={}",
            self.extractor.binarization_threshold
        );
        match self.extractor.row_bounds {
            Some((start, end)) => println!("row_bounds={},{}", start, end),
            None => println!("row_bounds=none"),
        }
        println!("signature_method={}", self.extractor.signature_method);
    }
}

/// Parses `"150,250"` into a half-open row band, `"none"` into auto-detection.
pub fn parse_row_bounds(raw: &str) -> Result<Option<(usize, usize)>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let (start, end) = trimmed
        .split_once(',')
        .with_context(|| format!("row_bounds '{}' must look like 'start,end' or 'none'", raw))?;
    let start: usize = start
        .trim()
        .parse()
        .with_context(|| format!("Invalid row_bounds start in '{}'", raw))?;
    let end: usize = end
        .trim()
        .parse()
        .with_context(|| format!("Invalid row_bounds end in '{}'", raw))?;
    Ok(Some((start, end)))
}

pub fn verbose_enabled() -> bool {
    env::var("SPEKTA_VERBOSE").unwrap_or_else(|_| "false".to_string()) == "true"
}
