use std::{env, path::PathBuf, str::FromStr};

use neuroscan_vision::{
    ValidationPolicy, interpret::DEFAULT_MIN_CONFIDENCE, preprocess::DEFAULT_INPUT_SIZE,
};

pub const DEFAULT_MODEL_PATH: &str = "./models/brain_tumor_model.onnx";
pub const DEFAULT_UPLOAD_DIR: &str = "./uploads";
pub const DEFAULT_MAX_BATCH_SIZE: usize = 20;
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;
pub const DEFAULT_JWT_EXPIRATION_HOURS: i64 = 24;
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// Everything the service reads from the environment, minus the listen port.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub model_path: PathBuf,
    /// JSON class-label table; the built-in four-class table when unset.
    pub labels_path: Option<PathBuf>,
    pub input_size: u32,
    pub min_confidence: f32,
    pub validation: ValidationPolicy,
    pub max_batch_size: usize,
    pub upload_dir: PathBuf,
    pub database_url: Option<String>,
    pub history_capacity: usize,
    /// Stored predictions older than this many days are pruned hourly. Database only.
    pub retention_days: Option<u32>,
    /// Record the first `x-forwarded-for` hop as the client address. Only safe behind a proxy
    /// that overwrites the header.
    pub trust_forwarded_for: bool,
    /// A random per-process secret is generated when unset.
    pub jwt_secret: Option<String>,
    pub jwt_expiration_hours: i64,
    pub bcrypt_cost: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            labels_path: None,
            input_size: DEFAULT_INPUT_SIZE,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            validation: ValidationPolicy::default(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            database_url: None,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            retention_days: None,
            trust_forwarded_for: false,
            jwt_secret: None,
            jwt_expiration_hours: DEFAULT_JWT_EXPIRATION_HOURS,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let min_confidence: f32 = parse_or(&get, "MIN_CONFIDENCE", defaults.min_confidence)?;
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(ConfigError::InvalidValue("MIN_CONFIDENCE".to_string()));
        }

        let validation = ValidationPolicy {
            max_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", defaults.validation.max_bytes)?,
            min_dimension: parse_or(
                &get,
                "MIN_IMAGE_DIMENSION",
                defaults.validation.min_dimension,
            )?,
            max_dimension: parse_or(
                &get,
                "MAX_IMAGE_DIMENSION",
                defaults.validation.max_dimension,
            )?,
        };
        if validation.min_dimension > validation.max_dimension {
            return Err(ConfigError::InvalidValue(
                "MIN_IMAGE_DIMENSION > MAX_IMAGE_DIMENSION".to_string(),
            ));
        }

        let input_size: u32 = parse_or(&get, "INPUT_SIZE", defaults.input_size)?;
        let max_batch_size: usize = parse_or(&get, "MAX_BATCH_SIZE", defaults.max_batch_size)?;
        if input_size == 0 {
            return Err(ConfigError::InvalidValue("INPUT_SIZE".to_string()));
        }
        if max_batch_size == 0 {
            return Err(ConfigError::InvalidValue("MAX_BATCH_SIZE".to_string()));
        }

        let retention_days = match get("HISTORY_RETENTION_DAYS") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(days) if days > 0 => Some(days),
                _ => return Err(ConfigError::InvalidValue("HISTORY_RETENTION_DAYS".to_string())),
            },
            None => None,
        };

        Ok(Self {
            model_path: get("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),
            labels_path: get("LABELS_PATH").map(PathBuf::from),
            input_size,
            min_confidence,
            validation,
            max_batch_size,
            upload_dir: get("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            database_url: get("DATABASE_URL"),
            history_capacity: parse_or(&get, "HISTORY_CAPACITY", defaults.history_capacity)?,
            retention_days,
            trust_forwarded_for: parse_or(
                &get,
                "TRUST_FORWARDED_FOR",
                defaults.trust_forwarded_for,
            )?,
            jwt_secret: get("JWT_SECRET_KEY"),
            jwt_expiration_hours: parse_or(
                &get,
                "JWT_EXPIRATION_HOURS",
                defaults.jwt_expiration_hours,
            )?,
            bcrypt_cost: parse_or(&get, "BCRYPT_COST", defaults.bcrypt_cost)?,
        })
    }

    /// Request body cap: a full batch of maximum-size images plus multipart overhead.
    pub fn body_limit(&self) -> usize {
        self.validation
            .max_bytes
            .saturating_mul(self.max_batch_size)
            .saturating_add(1024 * 1024)
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(var) => write!(f, "Invalid value for: {}", var),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = ServiceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.input_size, 224);
        assert!((config.min_confidence - 0.55).abs() < f32::EPSILON);
        assert_eq!(config.validation.max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.max_batch_size, 20);
        assert_eq!(config.history_capacity, 1000);
        assert!(config.database_url.is_none());
        assert!(config.jwt_secret.is_none());
        assert!(config.retention_days.is_none());
        assert!(!config.trust_forwarded_for);
    }

    #[test]
    fn reads_overrides() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("MIN_CONFIDENCE", "0.7"),
            ("MAX_BATCH_SIZE", "5"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("LABELS_PATH", "/etc/labels.json"),
            ("JWT_SECRET_KEY", "   "),
            ("HISTORY_RETENTION_DAYS", "30"),
            ("TRUST_FORWARDED_FOR", "true"),
        ]))
        .unwrap();
        assert!((config.min_confidence - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.max_batch_size, 5);
        assert_eq!(config.database_url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(
            config.labels_path.as_deref(),
            Some(std::path::Path::new("/etc/labels.json"))
        );
        assert!(config.jwt_secret.is_none());
        assert_eq!(config.retention_days, Some(30));
        assert!(config.trust_forwarded_for);
        assert_eq!(config.body_limit(), 5 * 10 * 1024 * 1024 + 1024 * 1024);
    }

    #[test]
    fn rejects_unparsable_values() {
        for (key, value) in [
            ("MIN_CONFIDENCE", "high"),
            ("MIN_CONFIDENCE", "1.5"),
            ("MAX_UPLOAD_BYTES", "-1"),
            ("MAX_BATCH_SIZE", "0"),
            ("BCRYPT_COST", "twelve"),
            ("HISTORY_RETENTION_DAYS", "0"),
            ("TRUST_FORWARDED_FOR", "yes"),
        ] {
            let err = ServiceConfig::from_lookup(lookup(&[(key, value)])).unwrap_err();
            assert!(err.to_string().contains(key), "{key}={value}");
        }
    }
}
