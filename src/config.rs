use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub retry_max_elapsed_ms: u64,
    pub handler: HandlerConfig,
}

/// Settings the transfer state machine reads on every message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    /// `from` of hub-originated notifications
    pub hub_name: String,
    pub amount_scale: u32,
    pub amount_precision: u32,
    pub payee_participant_currency_validation: bool,
    pub enable_on_us_transfers: bool,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        HandlerConfig {
            hub_name: "Hub".to_string(),
            amount_scale: 4,
            amount_precision: 18,
            payee_participant_currency_validation: false,
            enable_on_us_transfers: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("3001")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let retry_max_elapsed_ms = env_map
            .get("RETRY_MAX_ELAPSED_MS")
            .map(|s| s.as_str())
            .unwrap_or("30000")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "RETRY_MAX_ELAPSED_MS".to_string(),
                    "must be a valid u64".to_string(),
                )
            })?;

        let defaults = HandlerConfig::default();

        let hub_name = env_map
            .get("HUB_NAME")
            .map(|s| s.trim().to_string())
            .unwrap_or(defaults.hub_name);
        if hub_name.is_empty() {
            return Err(ConfigError::InvalidValue(
                "HUB_NAME".to_string(),
                "must not be empty".to_string(),
            ));
        }

        let amount_scale = parse_u32(&env_map, "AMOUNT_SCALE", defaults.amount_scale)?;
        let amount_precision =
            parse_u32(&env_map, "AMOUNT_PRECISION", defaults.amount_precision)?;
        if amount_precision == 0 || amount_scale > amount_precision {
            return Err(ConfigError::InvalidValue(
                "AMOUNT_PRECISION".to_string(),
                format!(
                    "must be positive and at least AMOUNT_SCALE ({})",
                    amount_scale
                ),
            ));
        }

        let payee_participant_currency_validation = parse_bool(
            &env_map,
            "PAYEE_PARTICIPANT_CURRENCY_VALIDATION_ENABLED",
            defaults.payee_participant_currency_validation,
        )?;
        let enable_on_us_transfers = parse_bool(
            &env_map,
            "ENABLE_ON_US_TRANSFERS",
            defaults.enable_on_us_transfers,
        )?;

        Ok(Config {
            port,
            database_path,
            retry_max_elapsed_ms,
            handler: HandlerConfig {
                hub_name,
                amount_scale,
                amount_precision,
                payee_participant_currency_validation,
                enable_on_us_transfers,
            },
        })
    }
}

fn parse_u32(
    env_map: &HashMap<String, String>,
    key: &str,
    default: u32,
) -> Result<u32, ConfigError> {
    match env_map.get(key) {
        Some(value) => value.trim().parse::<u32>().map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), "must be a valid u32".to_string())
        }),
        None => Ok(default),
    }
}

fn parse_bool(
    env_map: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match env_map.get(key).map(|s| s.trim()) {
        None => Ok(default),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("must be true, false, 1 or 0, got {}", other),
        )),
    }
}
