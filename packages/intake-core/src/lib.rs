//! Intake Core - Motor de status de tomadas e adesão
//!
//! Esta biblioteca fornece:
//! - Classificação do status de cada tomada (no horário, atrasada, pulada, perdida)
//! - Detecção de tomadas pendentes que passaram da tolerância
//! - Estatísticas de adesão (contadores vitalícios e porcentagens de 7/30 dias)
//! - Histórico filtrado e recuperação de tomadas perdidas
//! - Fonte de tomadas em SQLite com migrações automáticas

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

pub mod adherence;
pub mod catchup;
pub mod error;
pub mod history;
pub mod migrations;
pub mod missed;
pub mod models;
pub mod monitor;
pub mod status;
pub mod store;
pub mod tolerance;

pub use error::{IntakeError, StoreError};
pub use models::{AdherenceSnapshot, DisplayStatus, DoseEvent, DoseUpdate, RawStatus};
pub use monitor::{IntakeMonitor, SnapshotState};
pub use store::{DoseEventStore, SqliteDoseEventStore};

/// Configuração da conexão com o banco de dados de tomadas
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Caminho para o arquivo SQLite
    pub db_path: String,
    /// Número máximo de conexões no pool
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "data/intake.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Inicializa o pool SQLite e aplica as migrações pendentes
pub async fn init_store_pool(config: &StoreConfig) -> Result<SqlitePool> {
    let db_path = Path::new(&config.db_path);

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .context("Falha ao criar diretório para banco de dados")?;
        }
    }

    let connection_options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true)
        .pragma("synchronous", "NORMAL");

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(connection_options)
        .await
        .context("Falha ao conectar ao banco de dados SQLite")?;

    migrations::run_migrations(&pool)
        .await
        .context("Falha ao aplicar migrações")?;

    info!("Banco de dados inicializado com sucesso: {}", config.db_path);
    Ok(pool)
}
