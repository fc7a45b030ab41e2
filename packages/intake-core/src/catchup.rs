//! Recuperação de tomadas perdidas
//!
//! O usuário revisa as tomadas perdidas e decide, uma a uma, se foram
//! tomadas no horário previsto, tomadas agora ou puladas. As decisões são
//! gravadas em sequência; a primeira falha interrompe as seguintes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::IntakeError;
use crate::models::{DoseUpdate, MissedDose};
use crate::store::DoseEventStore;

pub const NOTE_TAKEN_AS_SCHEDULED: &str = "Tomado no horário previsto (registrado com atraso)";
pub const NOTE_TAKEN_NOW: &str = "Tomado em recuperação";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatchUpAction {
    /// Tomada no horário previsto, registrada agora
    TakenAsScheduled,
    /// Tomada agora
    TakenNow,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchUpDecision {
    pub event_id: Uuid,
    pub medication_id: Uuid,
    pub scheduled_time: DateTime<Utc>,
    pub action: CatchUpAction,
}

impl CatchUpDecision {
    pub fn for_missed(dose: &MissedDose, action: CatchUpAction) -> Self {
        Self {
            event_id: dose.event_id,
            medication_id: dose.medication_id,
            scheduled_time: dose.scheduled_time,
            action,
        }
    }

    /// Atualização a gravar para esta decisão
    pub fn to_update(&self, now: DateTime<Utc>) -> Result<DoseUpdate, IntakeError> {
        match self.action {
            CatchUpAction::TakenAsScheduled => Ok(DoseUpdate::taken(
                self.scheduled_time,
                Some(NOTE_TAKEN_AS_SCHEDULED.to_string()),
            )),
            CatchUpAction::TakenNow if now < self.scheduled_time => {
                Err(IntakeError::InvalidUpdate(format!(
                    "tomada {} ainda não chegou ao horário previsto",
                    self.event_id
                )))
            }
            CatchUpAction::TakenNow => Ok(DoseUpdate::taken(now, Some(NOTE_TAKEN_NOW.to_string()))),
            CatchUpAction::Skipped => Ok(DoseUpdate::skipped()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatchUpSummary {
    pub processed: usize,
    pub taken: usize,
    pub skipped: usize,
}

/// Grava as decisões; cada tomada registrada baixa o estoque na mesma
/// transação da marcação.
///
/// Todas as decisões são validadas antes da primeira escrita. Decisões
/// anteriores à falha permanecem gravadas.
pub async fn apply_catch_up<S>(
    store: &S,
    decisions: &[CatchUpDecision],
    now: DateTime<Utc>,
) -> Result<CatchUpSummary, IntakeError>
where
    S: DoseEventStore + ?Sized,
{
    if decisions.is_empty() {
        return Err(IntakeError::NothingToSave);
    }

    let updates = decisions
        .iter()
        .map(|decision| decision.to_update(now).map(|update| (decision, update)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut summary = CatchUpSummary::default();
    for (decision, update) in updates {
        let result = if decision.action == CatchUpAction::Skipped {
            store.mark_dose_event(decision.event_id, &update).await
        } else {
            store
                .record_taken_dose(decision.event_id, decision.medication_id, &update)
                .await
        };

        if let Err(e) = result {
            warn!(
                "Falha ao gravar tomada {} após {} de {} decisões: {}",
                decision.event_id,
                summary.processed,
                decisions.len(),
                e
            );
            return Err(IntakeError::Write(e));
        }

        if decision.action == CatchUpAction::Skipped {
            summary.skipped += 1;
        } else {
            summary.taken += 1;
        }
        summary.processed += 1;
    }

    info!(
        "{} tomada(s) tratada(s): {} tomada(s), {} pulada(s)",
        summary.processed, summary.taken, summary.skipped
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::models::RawStatus;
    use crate::store::tests::{dose, open_store, seed_medication};
    use crate::store::MockDoseEventStore;
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn test_empty_decisions_are_rejected() {
        let store = MockDoseEventStore::new();
        let result = apply_catch_up(&store, &[], at(12, 0)).await;
        assert!(matches!(result, Err(IntakeError::NothingToSave)));
    }

    #[tokio::test]
    async fn test_taken_now_before_schedule_is_rejected_without_writes() {
        // Mock sem expectativas: qualquer escrita faria o teste falhar
        let store = MockDoseEventStore::new();
        let decisions = vec![
            CatchUpDecision {
                event_id: Uuid::new_v4(),
                medication_id: Uuid::new_v4(),
                scheduled_time: at(8, 0),
                action: CatchUpAction::Skipped,
            },
            CatchUpDecision {
                event_id: Uuid::new_v4(),
                medication_id: Uuid::new_v4(),
                scheduled_time: at(20, 0),
                action: CatchUpAction::TakenNow,
            },
        ];
        let result = apply_catch_up(&store, &decisions, at(12, 0)).await;
        assert!(matches!(result, Err(IntakeError::InvalidUpdate(_))));
    }

    #[tokio::test]
    async fn test_write_failure_stops_the_batch() {
        let mut store = MockDoseEventStore::new();
        store
            .expect_record_taken_dose()
            .times(1)
            .returning(|_, _, _| Err(StoreError::ConnectionError("offline".to_string())));
        store.expect_mark_dose_event().never();
        store.expect_decrement_stock().never();

        let decisions: Vec<CatchUpDecision> = (0..3)
            .map(|_| CatchUpDecision {
                event_id: Uuid::new_v4(),
                medication_id: Uuid::new_v4(),
                scheduled_time: at(8, 0),
                action: CatchUpAction::TakenAsScheduled,
            })
            .collect();

        let result = apply_catch_up(&store, &decisions, at(12, 0)).await;
        assert!(matches!(result, Err(IntakeError::Write(StoreError::ConnectionError(_)))));
    }

    #[tokio::test]
    async fn test_taken_decisions_never_split_mark_and_stock() {
        let mut store = MockDoseEventStore::new();
        let skipped_id = Uuid::new_v4();
        store
            .expect_mark_dose_event()
            .withf(move |id, update| *id == skipped_id && update.status() == RawStatus::Skipped)
            .times(1)
            .returning(|_, _| Ok(()));
        store
            .expect_record_taken_dose()
            .times(1)
            .returning(|_, _, _| Err(StoreError::NotFound("medicamento".to_string())));
        store.expect_decrement_stock().never();

        let decisions = vec![
            CatchUpDecision {
                event_id: skipped_id,
                medication_id: Uuid::new_v4(),
                scheduled_time: at(7, 0),
                action: CatchUpAction::Skipped,
            },
            CatchUpDecision {
                event_id: Uuid::new_v4(),
                medication_id: Uuid::new_v4(),
                scheduled_time: at(8, 0),
                action: CatchUpAction::TakenAsScheduled,
            },
        ];

        let result = apply_catch_up(&store, &decisions, at(12, 0)).await;
        assert!(matches!(result, Err(IntakeError::Write(StoreError::NotFound(_)))));
    }

    #[tokio::test]
    async fn test_stock_failure_leaves_dose_pending_for_retry() -> anyhow::Result<()> {
        let (_dir, store) = open_store().await?;
        let (_, med) = seed_medication(&store, true, Some(2)).await?;
        let event = dose(med, at(8, 0), RawStatus::Pending, None);
        store.insert_dose_event(&event).await?;

        let mut decision = CatchUpDecision {
            event_id: event.id,
            medication_id: Uuid::new_v4(),
            scheduled_time: event.scheduled_time,
            action: CatchUpAction::TakenAsScheduled,
        };
        let failed = apply_catch_up(&store, &[decision.clone()], at(12, 0)).await;
        assert!(matches!(failed, Err(IntakeError::Write(StoreError::NotFound(_)))));
        let stored = store.fetch_dose_event(event.id).await?.unwrap();
        assert_eq!(stored.raw_status, RawStatus::Pending);

        decision.medication_id = med;
        let summary = apply_catch_up(&store, &[decision], at(12, 0)).await?;
        assert_eq!(summary.taken, 1);
        assert_eq!(store.current_stock(med).await?, Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn test_catch_up_against_sqlite() -> anyhow::Result<()> {
        let (_dir, store) = open_store().await?;
        let (_, med) = seed_medication(&store, true, Some(5)).await?;

        let as_scheduled = dose(med, at(8, 0), RawStatus::Pending, None);
        let now_taken = dose(med, at(9, 0), RawStatus::Pending, None);
        let skipped = dose(med, at(10, 0), RawStatus::Pending, None);
        for event in [&as_scheduled, &now_taken, &skipped] {
            store.insert_dose_event(event).await?;
        }

        let decide = |event: &crate::models::DoseEvent, action| CatchUpDecision {
            event_id: event.id,
            medication_id: event.medication_id,
            scheduled_time: event.scheduled_time,
            action,
        };
        let decisions = vec![
            decide(&as_scheduled, CatchUpAction::TakenAsScheduled),
            decide(&now_taken, CatchUpAction::TakenNow),
            decide(&skipped, CatchUpAction::Skipped),
        ];

        let now = at(14, 0);
        let summary = apply_catch_up(&store, &decisions, now).await?;
        assert_eq!(
            summary,
            CatchUpSummary {
                processed: 3,
                taken: 2,
                skipped: 1
            }
        );

        let first = store.fetch_dose_event(as_scheduled.id).await?.unwrap();
        assert_eq!(first.taken_at, Some(at(8, 0)));
        assert_eq!(
            store.dose_notes(as_scheduled.id).await?.as_deref(),
            Some(NOTE_TAKEN_AS_SCHEDULED)
        );

        let second = store.fetch_dose_event(now_taken.id).await?.unwrap();
        assert_eq!(second.taken_at, Some(now));
        assert!(second.taken_at.unwrap() - second.scheduled_time > Duration::minutes(30));

        let third = store.fetch_dose_event(skipped.id).await?.unwrap();
        assert_eq!(third.raw_status, RawStatus::Skipped);
        assert_eq!(third.taken_at, None);

        assert_eq!(store.current_stock(med).await?, Some(3));
        Ok(())
    }
}
