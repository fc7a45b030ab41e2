//! Classificador de status de tomadas

use chrono::{DateTime, Duration, Utc};

use crate::models::{DisplayStatus, RawStatus};

/// Atraso máximo (inclusivo) para uma tomada contar como "no horário"
pub const ON_TIME_WINDOW_MINUTES: i64 = 30;

/// Janela "no horário" como `Duration`
pub fn on_time_window() -> Duration {
    Duration::minutes(ON_TIME_WINDOW_MINUTES)
}

/// Tomada registrada mais de 30 minutos após o horário previsto.
/// Tomadas antecipadas nunca são atrasadas.
pub fn is_late(scheduled_time: DateTime<Utc>, taken_at: DateTime<Utc>) -> bool {
    taken_at - scheduled_time > on_time_window()
}

/// Deriva o status de exibição. Função total: `taken_at` é ignorado
/// para qualquer status diferente de `taken`.
pub fn classify(
    raw_status: RawStatus,
    scheduled_time: DateTime<Utc>,
    taken_at: Option<DateTime<Utc>>,
) -> DisplayStatus {
    match (raw_status, taken_at) {
        (RawStatus::Taken, Some(taken_at)) if is_late(scheduled_time, taken_at) => {
            DisplayStatus::Late
        }
        // Sem taken_at (dado legado) mantemos "no horário".
        (RawStatus::Taken, _) => DisplayStatus::OnTime,
        (RawStatus::Skipped, _) => DisplayStatus::Skipped,
        (RawStatus::Missed, _) => DisplayStatus::Missed,
        (RawStatus::Pending, _) => DisplayStatus::Pending,
    }
}
