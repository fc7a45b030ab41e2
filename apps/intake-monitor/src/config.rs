//! Configuração via variáveis de ambiente

use intake_core::tolerance::{ToleranceRule, ToleranceTable, DEFAULT_RULES};
use intake_core::StoreConfig;
use thiserror::Error;

pub const ENV_DB_PATH: &str = "INTAKE_DB_PATH";
pub const ENV_DB_MAX_CONNECTIONS: &str = "INTAKE_DB_MAX_CONNECTIONS";
pub const ENV_LOG_FILTER: &str = "INTAKE_LOG_FILTER";
pub const ENV_LOG_JSON: &str = "INTAKE_LOG_JSON";
pub const ENV_TOLERANCE_MINUTES: &str = "INTAKE_TOLERANCE_MINUTES";

pub const DEFAULT_LOG_FILTER: &str = "info,sqlx=warn";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Valor inválido para {name}: '{value}'")]
    InvalidValue { name: &'static str, value: String },

    #[error(transparent)]
    Rules(#[from] intake_core::IntakeError),
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub store: StoreConfig,
    pub log_filter: String,
    pub json_logs: bool,
    pub rules: ToleranceTable,
}

impl MonitorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Monta a configuração a partir de uma função de busca (testável)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut store = StoreConfig::default();
        if let Some(path) = lookup(ENV_DB_PATH) {
            store.db_path = path;
        }
        if let Some(value) = lookup(ENV_DB_MAX_CONNECTIONS) {
            store.max_connections = match value.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => return Err(invalid(ENV_DB_MAX_CONNECTIONS, value)),
            };
        }

        let json_logs = match lookup(ENV_LOG_JSON).as_deref() {
            None | Some("") | Some("0") | Some("false") => false,
            Some("1") | Some("true") => true,
            Some(other) => return Err(invalid(ENV_LOG_JSON, other.to_string())),
        };

        let rules = match lookup(ENV_TOLERANCE_MINUTES) {
            None => ToleranceTable::default(),
            Some(value) => {
                let minutes = value
                    .parse::<i64>()
                    .map_err(|_| invalid(ENV_TOLERANCE_MINUTES, value.clone()))?;
                uniform_rules(minutes)?
            }
        };

        Ok(Self {
            store,
            log_filter: lookup(ENV_LOG_FILTER).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            json_logs,
            rules,
        })
    }
}

/// Mesmas faixas padrão, com a mesma tolerância em todas
fn uniform_rules(minutes: i64) -> Result<ToleranceTable, ConfigError> {
    let rules: Vec<ToleranceRule> = DEFAULT_RULES
        .iter()
        .map(|rule| ToleranceRule {
            tolerance_minutes: minutes,
            ..*rule
        })
        .collect();
    Ok(ToleranceTable::new(rules)?)
}

fn invalid(name: &'static str, value: String) -> ConfigError {
    ConfigError::InvalidValue { name, value }
}
