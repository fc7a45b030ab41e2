//! Detector de tomadas perdidas
//!
//! Analisa tomadas pendentes numa janela retroativa (por padrão desde o
//! início de ontem, no calendário local) e aponta as que já passaram da
//! tolerância da sua faixa horária. A análise é só de leitura: o status
//! `missed` é derivado a cada execução e nunca gravado de volta.

use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::debug;

use crate::models::{DoseEvent, MissedDayLabel, MissedDose, MissedReport, RawStatus};
use crate::tolerance::ToleranceTable;

/// Início do dia de ontem no fuso de `now`, em UTC.
///
/// Se a meia-noite local não existir (transição de horário de verão),
/// recua 48 horas.
pub fn default_lookback_start<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Utc> {
    let fallback = now.with_timezone(&Utc) - Duration::hours(48);

    now.date_naive()
        .pred_opt()
        .and_then(|yesterday| yesterday.and_hms_opt(0, 0, 0))
        .and_then(|midnight| now.timezone().from_local_datetime(&midnight).earliest())
        .map(|start| start.with_timezone(&Utc))
        .unwrap_or(fallback)
}

/// Detector configurado com uma tabela de tolerâncias
#[derive(Debug, Clone, Default)]
pub struct MissedDoseDetector {
    rules: ToleranceTable,
}

impl MissedDoseDetector {
    pub fn new(rules: ToleranceTable) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ToleranceTable {
        &self.rules
    }

    /// Rótulo do dia comparando datas do calendário local, não 24h corridas
    pub fn day_label<Tz: TimeZone>(
        &self,
        scheduled_time: DateTime<Utc>,
        now: &DateTime<Tz>,
    ) -> MissedDayLabel {
        let scheduled_date = scheduled_time.with_timezone(&now.timezone()).date_naive();
        match now.date_naive().pred_opt() {
            Some(yesterday) if yesterday == scheduled_date => MissedDayLabel::MissedYesterday,
            _ => MissedDayLabel::MissedToday,
        }
    }

    /// Subconjunto das tomadas pendentes em `[lookback_start, now]` que
    /// devem ser tratadas como perdidas, mais recentes primeiro.
    ///
    /// Status e janela são refiltrados aqui; o filtro de tratamento ativo
    /// fica a cargo da fonte.
    pub fn detect<Tz: TimeZone>(
        &self,
        events: &[DoseEvent],
        lookback_start: DateTime<Utc>,
        now: &DateTime<Tz>,
    ) -> Vec<MissedDose> {
        let now_utc = now.with_timezone(&Utc);
        let tz = now.timezone();

        let mut missed: Vec<MissedDose> = events
            .iter()
            .filter(|event| event.raw_status == RawStatus::Pending)
            .filter(|event| event.scheduled_time >= lookback_start && event.scheduled_time <= now_utc)
            .filter(|event| self.rules.is_overdue(event.scheduled_time, now))
            .map(|event| MissedDose {
                event_id: event.id,
                medication_id: event.medication_id,
                scheduled_time: event.scheduled_time,
                slot: self.rules.rule_for(event.scheduled_time, &tz).slot,
                label: self.day_label(event.scheduled_time, now),
            })
            .collect();

        // id como desempate para saída determinística
        missed.sort_by(|a, b| {
            b.scheduled_time
                .cmp(&a.scheduled_time)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });

        debug!(
            "{} tomadas pendentes analisadas, {} perdidas",
            events.len(),
            missed.len()
        );
        missed
    }

    /// `detect` com a janela padrão, embalado num relatório
    pub fn report<Tz: TimeZone>(&self, events: &[DoseEvent], now: &DateTime<Tz>) -> MissedReport {
        MissedReport::new(self.detect(events, default_lookback_start(now), now))
    }
}
