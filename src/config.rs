use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::constants;
use crate::error::{DatasetError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub output: OutputConfig,
    pub columns: ColumnConfig,
    pub validation: ValidationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub users_path: PathBuf,
    pub recordings_path: PathBuf,
    pub delimiter: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            users_path: PathBuf::from(constants::DEFAULT_USERS_PATH),
            recordings_path: PathBuf::from(constants::DEFAULT_RECORDINGS_PATH),
            delimiter: "\t".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub path: PathBuf,
    pub delimiter: String,
    /// Where to write the Prometheus exposition text at the end of a run
    pub metrics_path: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(constants::DEFAULT_OUTPUT_PATH),
            delimiter: ",".to_string(),
            metrics_path: None,
        }
    }
}

/// Raw column names in the two source exports
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    pub user_id: String,
    pub signup_time: String,
    pub pro_subscription_time: String,
    pub recording_id: String,
    pub recording_time: String,
    pub activity_type: String,
    pub updated_time: String,
    pub payload: String,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            user_id: constants::RAW_USER_ID.to_string(),
            signup_time: constants::RAW_SIGNUP_DATE.to_string(),
            pro_subscription_time: constants::RAW_PRO_START_DATE.to_string(),
            recording_id: constants::RAW_RECORDING_ID.to_string(),
            recording_time: constants::RAW_RECORDING_TIME.to_string(),
            activity_type: constants::RAW_ACTIVITY_TYPE.to_string(),
            updated_time: constants::RAW_UPDATED_TIME.to_string(),
            payload: constants::RAW_PAYLOAD.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub rules_path: PathBuf,
    /// Activity types an outlier rule may reference
    pub activity_types: Vec<String>,
    /// Columns whose null counts are reported after validation
    pub null_rate_columns: Vec<String>,
    pub max_duplicate_user_ids: usize,
    pub max_null_user_ids: usize,
    pub max_null_signup_times: usize,
    pub fail_on_duplicate_recording_id: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            rules_path: PathBuf::from(constants::DEFAULT_RULES_PATH),
            activity_types: [
                "Hiking",
                "Backpacking",
                "Walking",
                "Running",
                "Trail running",
                "Mountain biking",
                "Biking",
                "Road biking",
                "Snowshoeing",
                "Skiing",
                "Cross-country skiing",
                "Scenic driving",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            null_rate_columns: vec![
                constants::USER_ID.to_string(),
                constants::ACCOUNT_SIGNUP_TIME.to_string(),
                constants::FIRST_RECORDING_ID.to_string(),
                constants::FIRST_RECORDING_TIME.to_string(),
                constants::FIRST_RECORDING_TOTAL_TIME_SECONDS.to_string(),
                constants::FIRST_RECORDING_AVG_SPEED.to_string(),
            ],
            max_duplicate_user_ids: 0,
            max_null_user_ids: 0,
            max_null_signup_times: 0,
            fail_on_duplicate_recording_id: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path).map_err(|e| {
            DatasetError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Resolve the config path from an explicit flag, the environment, or
    /// the default location.
    pub fn resolve_path(explicit: Option<PathBuf>) -> PathBuf {
        explicit
            .or_else(|| std::env::var(constants::CONFIG_PATH_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_CONFIG_PATH))
    }
}

/// Convert a configured delimiter into the single byte the csv reader expects.
/// Accepts a literal character or the escapes `\t` and `tab`.
pub fn delimiter_byte(delimiter: &str) -> Result<u8> {
    match delimiter {
        "\\t" | "tab" | "\t" => Ok(b'\t'),
        d if d.len() == 1 => Ok(d.as_bytes()[0]),
        other => Err(DatasetError::Config(format!(
            "Delimiter must be a single byte, got '{}'",
            other
        ))),
    }
}
