//! Agregador de adesão
//!
//! - Os contadores (no horário, atrasadas, puladas) cobrem TODO o histórico
//! - A adesão (%) é calculada sobre as janelas de 7 e 30 dias

use chrono::{DateTime, Days, Duration, TimeZone, Utc};
use tracing::{debug, warn};

use crate::models::{AdherenceSnapshot, DoseEvent, RawStatus};
use crate::status;

pub const SHORT_WINDOW_DAYS: u64 = 7;
pub const LONG_WINDOW_DAYS: u64 = 30;

/// Porcentagem arredondada para o inteiro mais próximo (meio para cima).
/// Janela vazia vale 0.
pub fn adherence_percentage(taken: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let (taken, total) = (u64::from(taken), u64::from(total));
    ((200 * taken + total) / (2 * total)) as u32
}

/// Mesmo horário local `days` dias de calendário antes de `now`
pub fn window_start<Tz: TimeZone>(now: &DateTime<Tz>, days: u64) -> DateTime<Utc> {
    now.clone()
        .checked_sub_days(Days::new(days))
        .map(|start| start.with_timezone(&Utc))
        .unwrap_or_else(|| now.with_timezone(&Utc) - Duration::days(days as i64))
}

#[derive(Debug, Default, Clone, Copy)]
struct WindowTally {
    taken: u32,
    total: u32,
}

impl WindowTally {
    fn record(&mut self, raw_status: RawStatus) {
        self.total += 1;
        if raw_status == RawStatus::Taken {
            self.taken += 1;
        }
    }

    fn percentage(&self) -> u32 {
        adherence_percentage(self.taken, self.total)
    }
}

/// Calcula o snapshot a partir das tomadas de tratamentos ativos.
///
/// Só entram tomadas resolvidas (`taken`/`skipped`) com horário previsto
/// até `now`. Tomadas `taken` sem `taken_at` são descartadas.
pub fn compute_snapshot<Tz: TimeZone>(events: &[DoseEvent], now: &DateTime<Tz>) -> AdherenceSnapshot {
    let now_utc = now.with_timezone(&Utc);
    let short_start = window_start(now, SHORT_WINDOW_DAYS);
    let long_start = window_start(now, LONG_WINDOW_DAYS);

    let mut snapshot = AdherenceSnapshot::default();
    let mut short = WindowTally::default();
    let mut long = WindowTally::default();
    let mut discarded = 0usize;

    for event in events {
        if !event.raw_status.is_resolved() || event.scheduled_time > now_utc {
            continue;
        }

        match (event.raw_status, event.taken_at) {
            (RawStatus::Taken, Some(taken_at)) => {
                if status::is_late(event.scheduled_time, taken_at) {
                    snapshot.late_intakes += 1;
                } else {
                    snapshot.taken_on_time += 1;
                }
            }
            (RawStatus::Taken, None) => {
                warn!("Tomada {} marcada como tomada sem taken_at, ignorada", event.id);
                discarded += 1;
                continue;
            }
            _ => snapshot.skipped += 1,
        }

        if event.scheduled_time >= short_start {
            short.record(event.raw_status);
        }
        if event.scheduled_time >= long_start {
            long.record(event.raw_status);
        }
    }

    snapshot.adherence_7_days = short.percentage();
    snapshot.total_7_days = short.total;
    snapshot.adherence_30_days = long.percentage();
    snapshot.total_30_days = long.total;

    debug!(
        "Adesão calculada: {} tomadas, {} descartadas, 7d={}% ({}), 30d={}% ({})",
        events.len(),
        discarded,
        snapshot.adherence_7_days,
        snapshot.total_7_days,
        snapshot.adherence_30_days,
        snapshot.total_30_days
    );
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 30, 12, 0, 0).unwrap()
    }

    fn event(scheduled_time: DateTime<Utc>, raw_status: RawStatus, delay_minutes: Option<i64>) -> DoseEvent {
        DoseEvent {
            id: Uuid::new_v4(),
            medication_id: Uuid::new_v4(),
            scheduled_time,
            taken_at: delay_minutes.map(|m| scheduled_time + Duration::minutes(m)),
            raw_status,
        }
    }

    #[test]
    fn test_percentage_rounds_half_up_and_guards_zero() {
        assert_eq!(adherence_percentage(0, 0), 0);
        assert_eq!(adherence_percentage(1, 2), 50);
        assert_eq!(adherence_percentage(1, 8), 13); // 12.5
        assert_eq!(adherence_percentage(2, 3), 67);
        assert_eq!(adherence_percentage(1, 3), 33);
        assert_eq!(adherence_percentage(5, 5), 100);
    }

    #[test]
    fn test_lifetime_counters_are_independent_of_windows() {
        let old = now() - Duration::days(90);
        let mut events: Vec<DoseEvent> = Vec::new();
        for i in 0..98 {
            let scheduled = old + Duration::hours(i);
            events.push(if i < 80 {
                event(scheduled, RawStatus::Taken, Some(5))
            } else if i < 90 {
                event(scheduled, RawStatus::Taken, Some(45))
            } else {
                event(scheduled, RawStatus::Skipped, None)
            });
        }
        events.push(event(now() - Duration::days(2), RawStatus::Taken, Some(90)));
        events.push(event(now() - Duration::days(3), RawStatus::Skipped, None));

        let snapshot = compute_snapshot(&events, &now());
        assert_eq!(snapshot.taken_on_time, 80);
        assert_eq!(snapshot.late_intakes, 11);
        assert_eq!(snapshot.skipped, 9);
        assert_eq!(snapshot.adherence_7_days, 50);
        assert_eq!(snapshot.total_7_days, 2);
        assert_eq!(snapshot.adherence_30_days, 50);
        assert_eq!(snapshot.total_30_days, 2);
    }

    #[test]
    fn test_empty_windows_report_zero() {
        let events = vec![
            event(now() - Duration::days(45), RawStatus::Taken, Some(0)),
            event(now() - Duration::days(60), RawStatus::Skipped, None),
        ];
        let snapshot = compute_snapshot(&events, &now());
        assert_eq!(snapshot.adherence_30_days, 0);
        assert_eq!(snapshot.total_30_days, 0);
        assert_eq!(snapshot.adherence_7_days, 0);
        assert_eq!(snapshot.total_7_days, 0);
        assert_eq!(snapshot.taken_on_time, 1);
        assert_eq!(snapshot.skipped, 1);
    }

    #[test]
    fn test_pending_missed_future_and_malformed_are_excluded() {
        let events = vec![
            event(now() - Duration::days(1), RawStatus::Taken, Some(10)),
            event(now() - Duration::days(1), RawStatus::Pending, None),
            event(now() - Duration::days(1), RawStatus::Missed, None),
            event(now() - Duration::days(1), RawStatus::Taken, None),
            event(now() + Duration::hours(2), RawStatus::Skipped, None),
        ];
        let snapshot = compute_snapshot(&events, &now());
        assert_eq!(snapshot.taken_on_time, 1);
        assert_eq!(snapshot.late_intakes, 0);
        assert_eq!(snapshot.skipped, 0);
        assert_eq!(snapshot.total_7_days, 1);
        assert_eq!(snapshot.adherence_7_days, 100);
    }

    #[test]
    fn test_window_start_is_inclusive() {
        let boundary = window_start(&now(), SHORT_WINDOW_DAYS);
        let events = vec![
            event(boundary, RawStatus::Taken, Some(0)),
            event(boundary - Duration::seconds(1), RawStatus::Skipped, None),
        ];
        let snapshot = compute_snapshot(&events, &now());
        assert_eq!(snapshot.total_7_days, 1);
        assert_eq!(snapshot.total_30_days, 2);
        assert_eq!(snapshot.adherence_30_days, 50);
    }

    #[test]
    fn test_recomputation_is_stable() {
        let events = vec![
            event(now() - Duration::days(1), RawStatus::Taken, Some(31)),
            event(now() - Duration::days(8), RawStatus::Skipped, None),
        ];
        assert_eq!(compute_snapshot(&events, &now()), compute_snapshot(&events, &now()));
    }
}
