//! Migrações do esquema de tomadas
//!
//! A versão aplicada fica em `PRAGMA user_version`; a migração N leva o
//! banco da versão N-1 para N dentro de uma transação.

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;
use tracing::{debug, info};

pub(crate) struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

pub(crate) const MIGRATIONS: &[Migration] = &[Migration {
    name: "treatments_schema",
    sql: r#"
    -- Tratamentos do usuário; só os ativos participam das estatísticas
    CREATE TABLE IF NOT EXISTS treatments (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    );

    -- Medicamentos de cada tratamento
    CREATE TABLE IF NOT EXISTS medications (
        id TEXT PRIMARY KEY NOT NULL,
        treatment_id TEXT NOT NULL,
        name TEXT NOT NULL,
        current_stock INTEGER,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        FOREIGN KEY (treatment_id) REFERENCES treatments (id) ON DELETE CASCADE
    );

    -- Uma linha por tomada agendada (horários em RFC 3339 UTC)
    CREATE TABLE IF NOT EXISTS medication_intakes (
        id TEXT PRIMARY KEY NOT NULL,
        medication_id TEXT NOT NULL,
        scheduled_time TEXT NOT NULL,
        taken_at TEXT,
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'taken', 'skipped', 'missed')),
        notes TEXT,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        updated_at TEXT,
        FOREIGN KEY (medication_id) REFERENCES medications (id) ON DELETE CASCADE
    );

    -- Índices para otimização
    CREATE INDEX IF NOT EXISTS idx_medications_treatment_id ON medications (treatment_id);
    CREATE INDEX IF NOT EXISTS idx_intakes_medication_id ON medication_intakes (medication_id);
    CREATE INDEX IF NOT EXISTS idx_intakes_scheduled_time ON medication_intakes (scheduled_time);
    CREATE INDEX IF NOT EXISTS idx_intakes_status ON medication_intakes (status);
    "#,
}];

fn schema_version() -> i64 {
    MIGRATIONS.len() as i64
}

/// Tabelas de usuário presentes no banco, em ordem alfabética
pub(crate) async fn list_tables(pool: &SqlitePool) -> Result<Vec<String>> {
    sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .context("Falha ao listar tabelas")
}

/// Leva o banco até a versão mais recente do esquema.
///
/// Um banco numa versão mais nova que a conhecida é recusado.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await
        .context("Falha ao ler a versão do esquema")?;

    if current > schema_version() {
        bail!(
            "Banco na versão {} do esquema, mais recente que a suportada ({})",
            current,
            schema_version()
        );
    }
    if current == schema_version() {
        debug!("Esquema de tomadas já na versão {}", current);
        return Ok(());
    }

    info!("Esquema de tomadas na versão {}, alvo {}", current, schema_version());
    for (index, migration) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        apply_migration(pool, index as i64 + 1, migration).await?;
    }

    let tables = list_tables(pool).await?;
    info!(
        "Esquema de tomadas na versão {} (tabelas: {})",
        schema_version(),
        tables.join(", ")
    );
    Ok(())
}

async fn apply_migration(pool: &SqlitePool, version: i64, migration: &Migration) -> Result<()> {
    let label = format!("{:03}_{}", version, migration.name);
    let mut transaction = pool
        .begin()
        .await
        .with_context(|| format!("Falha ao iniciar transação da migração {}", label))?;

    sqlx::query(migration.sql)
        .execute(&mut *transaction)
        .await
        .with_context(|| format!("Falha ao executar migração {}", label))?;

    // PRAGMA não aceita parâmetros
    sqlx::query(&format!("PRAGMA user_version = {}", version))
        .execute(&mut *transaction)
        .await
        .with_context(|| format!("Falha ao registrar versão da migração {}", label))?;

    transaction
        .commit()
        .await
        .with_context(|| format!("Falha ao confirmar migração {}", label))?;

    info!("Migração {} aplicada", label);
    Ok(())
}
