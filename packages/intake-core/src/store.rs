//! Fonte de tomadas
//!
//! O motor não é dono do armazenamento: ele lê e grava através de
//! `DoseEventStore`. A implementação SQLite garante o filtro de
//! tratamentos ativos com um JOIN em `treatments.is_active`.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::{FromRow, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{DoseEvent, DoseUpdate, RawStatus};

/// Contrato com a fonte de tomadas
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DoseEventStore: Send + Sync {
    /// Tomadas pendentes de tratamentos ativos com horário previsto em
    /// `[scheduled_after, scheduled_before]`
    async fn fetch_pending_dose_events(
        &self,
        scheduled_after: DateTime<Utc>,
        scheduled_before: DateTime<Utc>,
    ) -> Result<Vec<DoseEvent>, StoreError>;

    /// Todo o histórico `taken`/`skipped` de tratamentos ativos
    async fn fetch_resolved_dose_events(&self) -> Result<Vec<DoseEvent>, StoreError>;

    /// Resolve uma tomada pendente; tomadas já resolvidas não mudam
    async fn mark_dose_event(&self, id: Uuid, update: &DoseUpdate) -> Result<(), StoreError>;

    /// Decrementa o estoque do medicamento, sem passar de zero
    async fn decrement_stock(&self, medication_id: Uuid) -> Result<(), StoreError>;

    /// Marca a tomada como `taken` e decrementa o estoque atomicamente:
    /// se qualquer passo falhar, nenhum dos dois é gravado.
    async fn record_taken_dose(
        &self,
        id: Uuid,
        medication_id: Uuid,
        update: &DoseUpdate,
    ) -> Result<(), StoreError>;
}

/// Formato gravado no banco: RFC 3339 em UTC com milissegundos e sufixo `Z`,
/// para que a ordem lexical coincida com a cronológica.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|parsed| parsed.with_timezone(&Utc))
}

/// Linha bruta de `medication_intakes`, antes da validação
#[derive(Debug, Clone)]
struct DoseEventRow {
    id: String,
    medication_id: String,
    scheduled_time: String,
    taken_at: Option<String>,
    status: String,
}

impl FromRow<'_, SqliteRow> for DoseEventRow {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            medication_id: row.try_get("medication_id")?,
            scheduled_time: row.try_get("scheduled_time")?,
            taken_at: row.try_get("taken_at")?,
            status: row.try_get("status")?,
        })
    }
}

impl DoseEventRow {
    fn into_event(self) -> Result<DoseEvent, String> {
        let id = Uuid::parse_str(&self.id).map_err(|e| format!("id inválido: {}", e))?;
        let medication_id = Uuid::parse_str(&self.medication_id)
            .map_err(|e| format!("medication_id inválido: {}", e))?;
        let scheduled_time = parse_timestamp(&self.scheduled_time)
            .map_err(|e| format!("scheduled_time inválido '{}': {}", self.scheduled_time, e))?;
        let taken_at = self
            .taken_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .map_err(|e| format!("taken_at inválido: {}", e))?;
        let raw_status = self.status.parse::<RawStatus>().map_err(|e| e.to_string())?;

        Ok(DoseEvent {
            id,
            medication_id,
            scheduled_time,
            taken_at,
            raw_status,
        })
    }
}

/// Descarta linhas malformadas sem abortar o lote
fn decode_rows(rows: Vec<DoseEventRow>) -> Vec<DoseEvent> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            match row.into_event() {
                Ok(event) => Some(event),
                Err(reason) => {
                    warn!("Tomada {} descartada: {}", id, reason);
                    None
                }
            }
        })
        .collect()
}

const SELECT_ACTIVE_INTAKES: &str = r#"
    SELECT i.id, i.medication_id, i.scheduled_time, i.taken_at, i.status
    FROM medication_intakes i
    INNER JOIN medications m ON m.id = i.medication_id
    INNER JOIN treatments t ON t.id = m.treatment_id
    WHERE t.is_active = 1
"#;

/// Implementação SQLite da fonte de tomadas
#[derive(Debug, Clone)]
pub struct SqliteDoseEventStore {
    pool: SqlitePool,
}

impl SqliteDoseEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert_treatment(&self, id: Uuid, name: &str, is_active: bool) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO treatments (id, name, is_active) VALUES (?1, ?2, ?3)")
            .bind(id.to_string())
            .bind(name)
            .bind(is_active)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_treatment_active(&self, id: Uuid, is_active: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE treatments SET is_active = ?1 WHERE id = ?2")
            .bind(is_active)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("tratamento {}", id)));
        }
        Ok(())
    }

    pub async fn insert_medication(
        &self,
        id: Uuid,
        treatment_id: Uuid,
        name: &str,
        current_stock: Option<i64>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO medications (id, treatment_id, name, current_stock) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(id.to_string())
        .bind(treatment_id.to_string())
        .bind(name)
        .bind(current_stock)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Materializa uma tomada agendada
    pub async fn insert_dose_event(&self, event: &DoseEvent) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO medication_intakes (id, medication_id, scheduled_time, taken_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(event.id.to_string())
        .bind(event.medication_id.to_string())
        .bind(format_timestamp(event.scheduled_time))
        .bind(event.taken_at.map(format_timestamp))
        .bind(event.raw_status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Lê uma tomada qualquer, independente do tratamento estar ativo
    pub async fn fetch_dose_event(&self, id: Uuid) -> Result<Option<DoseEvent>, StoreError> {
        let row = sqlx::query_as::<_, DoseEventRow>(
            "SELECT id, medication_id, scheduled_time, taken_at, status
             FROM medication_intakes WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(None),
            Some(row) => {
                let id = row.id.clone();
                row.into_event()
                    .map(Some)
                    .map_err(|reason| StoreError::QueryError(format!("tomada {} malformada: {}", id, reason)))
            }
        }
    }

    pub async fn dose_notes(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        let notes: Option<String> =
            sqlx::query_scalar("SELECT notes FROM medication_intakes WHERE id = ?1")
                .bind(id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(notes)
    }

    pub async fn current_stock(&self, medication_id: Uuid) -> Result<Option<i64>, StoreError> {
        let stock: Option<i64> =
            sqlx::query_scalar("SELECT current_stock FROM medications WHERE id = ?1")
                .bind(medication_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(stock)
    }
}

#[async_trait]
impl DoseEventStore for SqliteDoseEventStore {
    async fn fetch_pending_dose_events(
        &self,
        scheduled_after: DateTime<Utc>,
        scheduled_before: DateTime<Utc>,
    ) -> Result<Vec<DoseEvent>, StoreError> {
        let sql = format!(
            "{} AND i.status = 'pending' AND i.scheduled_time >= ?1 AND i.scheduled_time <= ?2
             ORDER BY i.scheduled_time DESC",
            SELECT_ACTIVE_INTAKES
        );
        let rows = sqlx::query_as::<_, DoseEventRow>(&sql)
            .bind(format_timestamp(scheduled_after))
            .bind(format_timestamp(scheduled_before))
            .fetch_all(&self.pool)
            .await?;

        debug!("{} tomadas pendentes lidas", rows.len());
        Ok(decode_rows(rows))
    }

    async fn fetch_resolved_dose_events(&self) -> Result<Vec<DoseEvent>, StoreError> {
        let sql = format!(
            "{} AND i.status IN ('taken', 'skipped') ORDER BY i.scheduled_time DESC",
            SELECT_ACTIVE_INTAKES
        );
        let rows = sqlx::query_as::<_, DoseEventRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        debug!("{} tomadas resolvidas lidas", rows.len());
        Ok(decode_rows(rows))
    }

    async fn mark_dose_event(&self, id: Uuid, update: &DoseUpdate) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        mark_pending(&mut conn, id, update).await
    }

    async fn decrement_stock(&self, medication_id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        decrement_stock_on(&mut conn, medication_id).await
    }

    async fn record_taken_dose(
        &self,
        id: Uuid,
        medication_id: Uuid,
        update: &DoseUpdate,
    ) -> Result<(), StoreError> {
        if update.status() != RawStatus::Taken {
            return Err(StoreError::ConstraintViolation(format!(
                "tomada {} registrada como {} junto com baixa de estoque",
                id,
                update.status()
            )));
        }

        // Sem commit, o drop da transação desfaz a marcação
        let mut transaction = self.pool.begin().await?;
        mark_pending(&mut transaction, id, update).await?;
        decrement_stock_on(&mut transaction, medication_id).await?;
        transaction.commit().await?;
        Ok(())
    }
}

/// Resolve uma tomada `pending`/`missed`; distingue inexistente de já resolvida
async fn mark_pending(
    conn: &mut SqliteConnection,
    id: Uuid,
    update: &DoseUpdate,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE medication_intakes
         SET status = ?1, taken_at = ?2, notes = COALESCE(?3, notes), updated_at = ?4
         WHERE id = ?5 AND status IN ('pending', 'missed')",
    )
    .bind(update.status().as_str())
    .bind(update.taken_at().map(format_timestamp))
    .bind(update.notes())
    .bind(format_timestamp(Utc::now()))
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() > 0 {
        debug!("Tomada {} marcada como {}", id, update.status());
        return Ok(());
    }

    let current: Option<String> =
        sqlx::query_scalar("SELECT status FROM medication_intakes WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await?;

    match current {
        None => Err(StoreError::NotFound(format!("tomada {}", id))),
        Some(status) => Err(StoreError::AlreadyResolved(format!("tomada {} ({})", id, status))),
    }
}

async fn decrement_stock_on(conn: &mut SqliteConnection, medication_id: Uuid) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE medications SET current_stock = MAX(COALESCE(current_stock, 0) - 1, 0)
         WHERE id = ?1",
    )
    .bind(medication_id.to_string())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("medicamento {}", medication_id)));
    }
    Ok(())
}
