//! Orquestração das atualizações
//!
//! `IntakeMonitor` busca as tomadas na fonte (único ponto de suspensão),
//! executa os cálculos puros e guarda o último snapshot de adesão para a
//! camada de apresentação. A última atualização a terminar prevalece.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::adherence;
use crate::catchup::{self, CatchUpDecision, CatchUpSummary};
use crate::error::{IntakeError, StoreError};
use crate::history::{self, HistoryDay, HistoryFilter};
use crate::missed::{default_lookback_start, MissedDoseDetector};
use crate::models::{AdherenceSnapshot, DoseUpdate, MissedReport};
use crate::store::DoseEventStore;
use crate::tolerance::ToleranceTable;

/// Estado do snapshot em cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SnapshotState {
    /// Nenhuma atualização concluída ainda
    NotLoaded,
    Fresh {
        snapshot: AdherenceSnapshot,
        computed_at: DateTime<Utc>,
    },
    /// A última atualização falhou; `last` é o valor anterior, se houver,
    /// e deve ser exibido como desatualizado.
    Stale {
        last: Option<AdherenceSnapshot>,
        reason: String,
    },
}

impl SnapshotState {
    fn last_snapshot(&self) -> Option<AdherenceSnapshot> {
        match self {
            SnapshotState::NotLoaded => None,
            SnapshotState::Fresh { snapshot, .. } => Some(*snapshot),
            SnapshotState::Stale { last, .. } => *last,
        }
    }
}

pub struct IntakeMonitor<S> {
    store: S,
    detector: MissedDoseDetector,
    cache: RwLock<SnapshotState>,
}

impl<S: DoseEventStore> IntakeMonitor<S> {
    pub fn new(store: S) -> Self {
        Self::with_rules(store, ToleranceTable::default())
    }

    pub fn with_rules(store: S, rules: ToleranceTable) -> Self {
        Self {
            store,
            detector: MissedDoseDetector::new(rules),
            cache: RwLock::new(SnapshotState::NotLoaded),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn rules(&self) -> &ToleranceTable {
        self.detector.rules()
    }

    /// Tomadas perdidas desde o início de ontem até `now`.
    ///
    /// Falha de leitura é devolvida como `SourceUnavailable`, nunca como
    /// relatório vazio.
    pub async fn missed_doses<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Result<MissedReport, IntakeError> {
        let lookback_start = default_lookback_start(now);
        let events = self
            .store
            .fetch_pending_dose_events(lookback_start, now.with_timezone(&Utc))
            .await
            .map_err(|e| {
                error!("Erro ao buscar tomadas pendentes: {}", e);
                IntakeError::SourceUnavailable(e)
            })?;

        let doses = self.detector.detect(&events, lookback_start, now);
        Ok(MissedReport::new(doses))
    }

    /// Recalcula o snapshot de adesão e atualiza o cache
    pub async fn refresh_adherence<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
    ) -> Result<AdherenceSnapshot, IntakeError> {
        match self.store.fetch_resolved_dose_events().await {
            Ok(events) => {
                let snapshot = adherence::compute_snapshot(&events, now);
                self.store_state(SnapshotState::Fresh {
                    snapshot,
                    computed_at: now.with_timezone(&Utc),
                });
                debug!("Snapshot de adesão atualizado");
                Ok(snapshot)
            }
            Err(e) => {
                error!("Erro ao carregar estatísticas de adesão: {}", e);
                let last = self.snapshot_state().last_snapshot();
                self.store_state(SnapshotState::Stale {
                    last,
                    reason: e.to_string(),
                });
                Err(IntakeError::SourceUnavailable(e))
            }
        }
    }

    pub fn snapshot_state(&self) -> SnapshotState {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Histórico filtrado (resolvidas + pendentes desde ontem), agrupado por dia
    pub async fn history<Tz: TimeZone>(
        &self,
        filter: HistoryFilter,
        now: &DateTime<Tz>,
    ) -> Result<Vec<HistoryDay>, IntakeError> {
        let lookback_start = default_lookback_start(now);
        let unavailable = |e: StoreError| {
            error!("Erro ao carregar histórico de tomadas: {}", e);
            IntakeError::SourceUnavailable(e)
        };

        let mut events = self
            .store
            .fetch_resolved_dose_events()
            .await
            .map_err(unavailable)?;
        let pending = self
            .store
            .fetch_pending_dose_events(lookback_start, now.with_timezone(&Utc))
            .await
            .map_err(unavailable)?;
        events.extend(pending);

        Ok(history::build_history(&events, filter, self.rules(), now))
    }

    /// Registra a tomada agora, com baixa de estoque na mesma transação
    pub async fn take_dose(
        &self,
        event_id: Uuid,
        medication_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), IntakeError> {
        self.store
            .record_taken_dose(event_id, medication_id, &DoseUpdate::taken(now, None))
            .await
            .map_err(|e| {
                error!("Erro ao registrar tomada {}: {}", event_id, e);
                IntakeError::Write(e)
            })?;
        info!("Tomada {} registrada", event_id);
        Ok(())
    }

    /// Pula a tomada; o estoque não muda
    pub async fn skip_dose(&self, event_id: Uuid) -> Result<(), IntakeError> {
        self.store
            .mark_dose_event(event_id, &DoseUpdate::skipped())
            .await
            .map_err(|e| {
                error!("Erro ao pular tomada {}: {}", event_id, e);
                IntakeError::Write(e)
            })?;
        info!("Tomada {} pulada", event_id);
        Ok(())
    }

    pub async fn catch_up(
        &self,
        decisions: &[CatchUpDecision],
        now: DateTime<Utc>,
    ) -> Result<CatchUpSummary, IntakeError> {
        catchup::apply_catch_up(&self.store, decisions, now).await
    }

    fn store_state(&self, state: SnapshotState) {
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DisplayStatus, DoseEvent, RawStatus};
    use crate::store::tests::{dose, open_store, seed_medication};
    use crate::store::MockDoseEventStore;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 2, 10, 0, 0).unwrap()
    }

    fn resolved(raw_status: RawStatus) -> DoseEvent {
        let scheduled_time = now() - Duration::days(1);
        DoseEvent {
            id: Uuid::new_v4(),
            medication_id: Uuid::new_v4(),
            scheduled_time,
            taken_at: (raw_status == RawStatus::Taken).then_some(scheduled_time),
            raw_status,
        }
    }

    #[tokio::test]
    async fn test_missed_doses_surfaces_unavailable_source() {
        let mut store = MockDoseEventStore::new();
        store
            .expect_fetch_pending_dose_events()
            .returning(|_, _| Err(StoreError::ConnectionError("timeout".to_string())));

        let monitor = IntakeMonitor::new(store);
        let result = monitor.missed_doses(&now()).await;
        assert!(matches!(result, Err(ref e) if e.is_source_unavailable()));
    }

    #[tokio::test]
    async fn test_missed_doses_queries_default_window() {
        let mut store = MockDoseEventStore::new();
        let overdue = DoseEvent {
            id: Uuid::new_v4(),
            medication_id: Uuid::new_v4(),
            scheduled_time: now() - Duration::hours(2),
            taken_at: None,
            raw_status: RawStatus::Pending,
        };
        let returned = overdue.clone();
        store
            .expect_fetch_pending_dose_events()
            .withf(|after, before| {
                *after == Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap() && *before == now()
            })
            .times(1)
            .returning(move |_, _| Ok(vec![returned.clone()]));

        let monitor = IntakeMonitor::new(store);
        let report = monitor.missed_doses(&now()).await.unwrap();
        assert_eq!(report.total_missed, 1);
        assert_eq!(report.doses[0].event_id, overdue.id);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_snapshot_as_stale() {
        let mut store = MockDoseEventStore::new();
        let mut calls = 0;
        store
            .expect_fetch_resolved_dose_events()
            .times(2)
            .returning(move || {
                calls += 1;
                if calls == 1 {
                    Ok(vec![resolved(RawStatus::Taken), resolved(RawStatus::Skipped)])
                } else {
                    Err(StoreError::ConnectionError("offline".to_string()))
                }
            });

        let monitor = IntakeMonitor::new(store);
        assert_eq!(monitor.snapshot_state(), SnapshotState::NotLoaded);

        let snapshot = monitor.refresh_adherence(&now()).await.unwrap();
        assert_eq!(snapshot.adherence_7_days, 50);
        assert!(matches!(monitor.snapshot_state(), SnapshotState::Fresh { .. }));

        let failed = monitor.refresh_adherence(&now()).await;
        assert!(matches!(failed, Err(IntakeError::SourceUnavailable(_))));
        match monitor.snapshot_state() {
            SnapshotState::Stale { last, reason } => {
                assert_eq!(last, Some(snapshot));
                assert!(reason.contains("offline"));
            }
            other => panic!("estado inesperado: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_first_refresh_failure_has_no_snapshot() {
        let mut store = MockDoseEventStore::new();
        store
            .expect_fetch_resolved_dose_events()
            .returning(|| Err(StoreError::ConnectionError("offline".to_string())));

        let monitor = IntakeMonitor::new(store);
        assert!(monitor.refresh_adherence(&now()).await.is_err());
        assert_eq!(
            monitor.snapshot_state(),
            SnapshotState::Stale {
                last: None,
                reason: StoreError::ConnectionError("offline".to_string()).to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_history_surfaces_unavailable_pending_source() {
        let mut store = MockDoseEventStore::new();
        store
            .expect_fetch_resolved_dose_events()
            .returning(|| Ok(vec![resolved(RawStatus::Taken)]));
        store
            .expect_fetch_pending_dose_events()
            .returning(|_, _| Err(StoreError::ConnectionError("timeout".to_string())));

        let monitor = IntakeMonitor::new(store);
        let result = monitor.history(HistoryFilter::All, &now()).await;
        assert!(matches!(result, Err(ref e) if e.is_source_unavailable()));
    }

    #[tokio::test]
    async fn test_history_surfaces_unavailable_resolved_source() {
        let mut store = MockDoseEventStore::new();
        store
            .expect_fetch_resolved_dose_events()
            .returning(|| Err(StoreError::ConnectionError("timeout".to_string())));
        store.expect_fetch_pending_dose_events().never();

        let monitor = IntakeMonitor::new(store);
        let result = monitor.history(HistoryFilter::All, &now()).await;
        assert!(matches!(result, Err(IntakeError::SourceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_history_merges_overdue_pending_as_missed() {
        let mut store = MockDoseEventStore::new();
        let taken = resolved(RawStatus::Taken);
        let overdue = DoseEvent {
            id: Uuid::new_v4(),
            medication_id: Uuid::new_v4(),
            scheduled_time: now() - Duration::hours(2),
            taken_at: None,
            raw_status: RawStatus::Pending,
        };
        let still_due = DoseEvent {
            id: Uuid::new_v4(),
            scheduled_time: now() - Duration::minutes(20),
            ..overdue.clone()
        };

        let resolved_events = vec![taken.clone()];
        let pending_events = vec![overdue.clone(), still_due.clone()];
        store
            .expect_fetch_resolved_dose_events()
            .times(2)
            .returning(move || Ok(resolved_events.clone()));
        store
            .expect_fetch_pending_dose_events()
            .withf(|after, before| {
                *after == Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap() && *before == now()
            })
            .times(2)
            .returning(move |_, _| Ok(pending_events.clone()));

        let monitor = IntakeMonitor::new(store);

        let missed = monitor.history(HistoryFilter::Missed, &now()).await.unwrap();
        assert_eq!(missed.len(), 1);
        assert_eq!(missed[0].entries.len(), 1);
        assert_eq!(missed[0].entries[0].event.id, overdue.id);
        assert_eq!(missed[0].entries[0].status, DisplayStatus::Missed);

        let all = monitor.history(HistoryFilter::All, &now()).await.unwrap();
        let ids: Vec<Uuid> = all
            .iter()
            .flat_map(|day| day.entries.iter().map(|entry| entry.event.id))
            .collect();
        assert_eq!(ids, vec![still_due.id, overdue.id, taken.id]);
    }

    #[tokio::test]
    async fn test_take_and_skip_dose_against_sqlite() -> anyhow::Result<()> {
        let (_dir, store) = open_store().await?;
        let (_, med) = seed_medication(&store, true, Some(10)).await?;
        let morning = dose(med, now() - Duration::hours(2), RawStatus::Pending, None);
        let noon = dose(med, now() + Duration::hours(2), RawStatus::Pending, None);
        for event in [&morning, &noon] {
            store.insert_dose_event(event).await?;
        }

        let monitor = IntakeMonitor::new(store);
        monitor.take_dose(morning.id, med, now()).await?;
        monitor.skip_dose(noon.id).await?;

        let taken = monitor.store().fetch_dose_event(morning.id).await?.unwrap();
        assert_eq!(taken.raw_status, RawStatus::Taken);
        assert_eq!(taken.taken_at, Some(now()));
        assert_eq!(taken.display_status(), DisplayStatus::Late);

        let skipped = monitor.store().fetch_dose_event(noon.id).await?.unwrap();
        assert_eq!(skipped.raw_status, RawStatus::Skipped);
        assert_eq!(skipped.taken_at, None);

        // Só a tomada registrada baixa o estoque
        assert_eq!(monitor.store().current_stock(med).await?, Some(9));

        let again = monitor.take_dose(morning.id, med, now()).await;
        assert!(matches!(again, Err(IntakeError::Write(StoreError::AlreadyResolved(_)))));
        assert_eq!(monitor.store().current_stock(med).await?, Some(9));
        Ok(())
    }
}
