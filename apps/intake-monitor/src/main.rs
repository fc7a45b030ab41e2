//! Intake Monitor - executa uma verificação de tomadas perdidas e de adesão
//! e imprime o relatório em JSON na saída padrão.
//!
//! Código de saída 2 quando a fonte de tomadas não pôde ser lida.

mod config;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use intake_core::models::MissedReport;
use intake_core::{init_store_pool, IntakeMonitor, SnapshotState, SqliteDoseEventStore};
use serde::Serialize;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::MonitorConfig;

#[derive(Debug, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
enum MissedView {
    Available { report: MissedReport },
    Unavailable { reason: String },
}

#[derive(Debug, Serialize)]
struct Report {
    generated_at: DateTime<Utc>,
    missed: MissedView,
    adherence: SnapshotState,
}

fn init_tracing(config: &MonitorConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    // Logs vão para stderr; stdout fica reservado ao relatório
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let config = MonitorConfig::from_env().context("Configuração inválida")?;
    init_tracing(&config);

    info!("Intake Monitor v{} iniciando", env!("CARGO_PKG_VERSION"));

    let pool = init_store_pool(&config.store).await?;
    let monitor = IntakeMonitor::with_rules(SqliteDoseEventStore::new(pool), config.rules.clone());
    let now = Local::now();

    let missed = match monitor.missed_doses(&now).await {
        Ok(report) => {
            info!("{} tomada(s) perdida(s)", report.total_missed);
            MissedView::Available { report }
        }
        Err(e) => {
            warn!("Não foi possível detectar tomadas perdidas: {}", e);
            MissedView::Unavailable { reason: e.to_string() }
        }
    };

    let adherence_ok = monitor.refresh_adherence(&now).await.is_ok();
    let missed_ok = matches!(missed, MissedView::Available { .. });

    let report = Report {
        generated_at: now.with_timezone(&Utc),
        missed,
        adherence: monitor.snapshot_state(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Falha ao serializar relatório")?
    );

    if missed_ok && adherence_ok {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(2))
    }
}
