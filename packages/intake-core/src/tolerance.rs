//! Regras de tolerância por faixa do dia
//!
//! Cada hora do dia pertence a exatamente uma faixa (manhã, tarde, noite),
//! e cada faixa define por quanto tempo uma tomada pendente ainda não é
//! considerada perdida. Hoje as três faixas usam 1 hora, mas a tabela é
//! mantida por faixa para permitir valores distintos.

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IntakeError;
use crate::models::TimeSlot;

const HOURS_PER_DAY: u32 = 24;

/// Tolerância máxima aceita por faixa: um dia inteiro
pub const MAX_TOLERANCE_MINUTES: i64 = 24 * 60;

/// Faixa horária `[start_hour, end_hour_exclusive)` com sua tolerância.
/// Se `end_hour_exclusive <= start_hour`, a faixa atravessa a meia-noite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToleranceRule {
    pub slot: TimeSlot,
    pub start_hour: u32,
    pub end_hour_exclusive: u32,
    pub tolerance_minutes: i64,
}

impl ToleranceRule {
    pub const fn new(
        slot: TimeSlot,
        start_hour: u32,
        end_hour_exclusive: u32,
        tolerance_minutes: i64,
    ) -> Self {
        Self {
            slot,
            start_hour,
            end_hour_exclusive,
            tolerance_minutes,
        }
    }

    pub fn covers(&self, hour: u32) -> bool {
        if self.start_hour < self.end_hour_exclusive {
            hour >= self.start_hour && hour < self.end_hour_exclusive
        } else {
            hour >= self.start_hour || hour < self.end_hour_exclusive
        }
    }

    /// Limitada a `[0, MAX_TOLERANCE_MINUTES]` mesmo para regras não validadas
    pub fn tolerance(&self) -> Duration {
        Duration::minutes(self.tolerance_minutes.clamp(0, MAX_TOLERANCE_MINUTES))
    }
}

/// Regras padrão: 1 hora de tolerância em todas as faixas
pub const DEFAULT_RULES: [ToleranceRule; 3] = [
    ToleranceRule::new(TimeSlot::Morning, 6, 12, 60),
    ToleranceRule::new(TimeSlot::Afternoon, 12, 18, 60),
    ToleranceRule::new(TimeSlot::Evening, 18, 6, 60),
];

/// Tabela validada de regras de tolerância
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToleranceTable {
    rules: Vec<ToleranceRule>,
    // índice da regra para cada hora do dia
    by_hour: [usize; HOURS_PER_DAY as usize],
}

impl ToleranceTable {
    /// Valida que cada faixa aparece uma vez e que cada hora do dia
    /// pertence a exatamente uma regra.
    pub fn new(rules: Vec<ToleranceRule>) -> Result<Self, IntakeError> {
        for slot in [TimeSlot::Morning, TimeSlot::Afternoon, TimeSlot::Evening] {
            let count = rules.iter().filter(|r| r.slot == slot).count();
            if count != 1 {
                return Err(IntakeError::InvalidToleranceRules(format!(
                    "faixa {:?} definida {} vezes",
                    slot, count
                )));
            }
        }

        for rule in &rules {
            if rule.start_hour >= HOURS_PER_DAY || rule.end_hour_exclusive > HOURS_PER_DAY {
                return Err(IntakeError::InvalidToleranceRules(format!(
                    "faixa {:?} fora do intervalo 0-24: {}-{}",
                    rule.slot, rule.start_hour, rule.end_hour_exclusive
                )));
            }
            if rule.tolerance_minutes < 0 {
                return Err(IntakeError::InvalidToleranceRules(format!(
                    "tolerância negativa na faixa {:?}",
                    rule.slot
                )));
            }
            if rule.tolerance_minutes > MAX_TOLERANCE_MINUTES {
                return Err(IntakeError::InvalidToleranceRules(format!(
                    "tolerância de {} minutos na faixa {:?} excede {} minutos",
                    rule.tolerance_minutes, rule.slot, MAX_TOLERANCE_MINUTES
                )));
            }
        }

        let mut by_hour = [0usize; HOURS_PER_DAY as usize];
        for hour in 0..HOURS_PER_DAY {
            let mut matching = rules
                .iter()
                .enumerate()
                .filter(|(_, rule)| rule.covers(hour));

            match (matching.next(), matching.next()) {
                (Some((index, _)), None) => by_hour[hour as usize] = index,
                (None, _) => {
                    return Err(IntakeError::InvalidToleranceRules(format!(
                        "hora {} sem regra",
                        hour
                    )))
                }
                (Some(_), Some(_)) => {
                    return Err(IntakeError::InvalidToleranceRules(format!(
                        "hora {} coberta por mais de uma regra",
                        hour
                    )))
                }
            }
        }

        Ok(Self { rules, by_hour })
    }

    pub fn rules(&self) -> &[ToleranceRule] {
        &self.rules
    }

    pub fn rule_for_hour(&self, hour: u32) -> &ToleranceRule {
        &self.rules[self.by_hour[(hour % HOURS_PER_DAY) as usize]]
    }

    /// Regra aplicável ao horário previsto, pela hora local de `tz`
    pub fn rule_for<Tz: TimeZone>(&self, scheduled_time: DateTime<Utc>, tz: &Tz) -> &ToleranceRule {
        self.rule_for_hour(scheduled_time.with_timezone(tz).hour())
    }

    /// `true` quando `now - scheduled_time` excede estritamente a tolerância
    pub fn is_overdue<Tz: TimeZone>(&self, scheduled_time: DateTime<Utc>, now: &DateTime<Tz>) -> bool {
        let rule = self.rule_for(scheduled_time, &now.timezone());
        now.with_timezone(&Utc) - scheduled_time > rule.tolerance()
    }
}

impl Default for ToleranceTable {
    fn default() -> Self {
        let rules = DEFAULT_RULES.to_vec();
        let mut by_hour = [0usize; HOURS_PER_DAY as usize];
        for (hour, slot) in by_hour.iter_mut().enumerate() {
            *slot = match hour {
                6..=11 => 0,
                12..=17 => 1,
                _ => 2,
            };
        }
        Self { rules, by_hour }
    }
}
