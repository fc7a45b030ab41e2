//! Histórico de tomadas agrupado por dia

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{DisplayStatus, DoseEvent, RawStatus};
use crate::tolerance::ToleranceTable;

/// Filtro da tela de histórico
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryFilter {
    #[default]
    All,
    Missed,
    OnTime,
    Late,
    Skipped,
}

impl HistoryFilter {
    pub fn accepts(&self, status: DisplayStatus) -> bool {
        match self {
            HistoryFilter::All => true,
            HistoryFilter::Missed => status == DisplayStatus::Missed,
            HistoryFilter::OnTime => status == DisplayStatus::OnTime,
            HistoryFilter::Late => status == DisplayStatus::Late,
            HistoryFilter::Skipped => status == DisplayStatus::Skipped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub event: DoseEvent,
    pub status: DisplayStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryDay {
    pub date: NaiveDate,
    pub entries: Vec<HistoryEntry>,
}

/// Status efetivo em `now`: pendente fora da tolerância aparece como perdida
pub fn effective_status<Tz: TimeZone>(
    event: &DoseEvent,
    rules: &ToleranceTable,
    now: &DateTime<Tz>,
) -> DisplayStatus {
    if event.raw_status == RawStatus::Pending
        && event.scheduled_time <= now.with_timezone(&Utc)
        && rules.is_overdue(event.scheduled_time, now)
    {
        return DisplayStatus::Missed;
    }
    event.display_status()
}

/// Agrupa por data local, dia mais recente primeiro; dias vazios após o
/// filtro são omitidos.
pub fn build_history<Tz: TimeZone>(
    events: &[DoseEvent],
    filter: HistoryFilter,
    rules: &ToleranceTable,
    now: &DateTime<Tz>,
) -> Vec<HistoryDay> {
    let tz = now.timezone();

    let mut entries: Vec<HistoryEntry> = events
        .iter()
        .map(|event| HistoryEntry {
            status: effective_status(event, rules, now),
            event: event.clone(),
        })
        .filter(|entry| filter.accepts(entry.status))
        .collect();

    entries.sort_by(|a, b| b.event.scheduled_time.cmp(&a.event.scheduled_time));

    let mut days: Vec<HistoryDay> = Vec::new();
    for entry in entries {
        let date = entry.event.scheduled_time.with_timezone(&tz).date_naive();
        match days.last_mut() {
            Some(day) if day.date == date => day.entries.push(entry),
            _ => days.push(HistoryDay {
                date,
                entries: vec![entry],
            }),
        }
    }
    days
}
