//! Modelos de dados do motor de tomadas
//!
//! Este módulo define as estruturas compartilhadas entre o classificador,
//! o detector de tomadas perdidas e o agregador de adesão.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::error::IntakeError;
use crate::status;

/// Status persistido de uma tomada (verdade de origem)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawStatus {
    /// Agendada, ainda sem ação do usuário
    Pending,
    /// Marcada como tomada
    Taken,
    /// Pulada voluntariamente
    Skipped,
    /// Variante terminal de `Pending`, quando gravada por outro sistema
    Missed,
}

impl RawStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RawStatus::Pending => "pending",
            RawStatus::Taken => "taken",
            RawStatus::Skipped => "skipped",
            RawStatus::Missed => "missed",
        }
    }

    /// `taken` ou `skipped`
    pub fn is_resolved(&self) -> bool {
        matches!(self, RawStatus::Taken | RawStatus::Skipped)
    }
}

impl std::fmt::Display for RawStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Valor de status desconhecido vindo da fonte
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Valor de status inválido: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for RawStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RawStatus::Pending),
            "taken" => Ok(RawStatus::Taken),
            "skipped" => Ok(RawStatus::Skipped),
            "missed" => Ok(RawStatus::Missed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Status de exibição, sempre derivado e nunca persistido
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayStatus {
    Pending,
    OnTime,
    Late,
    Skipped,
    Missed,
}

impl std::fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisplayStatus::Pending => write!(f, "pending"),
            DisplayStatus::OnTime => write!(f, "on-time"),
            DisplayStatus::Late => write!(f, "late"),
            DisplayStatus::Skipped => write!(f, "skipped"),
            DisplayStatus::Missed => write!(f, "missed"),
        }
    }
}

/// Uma administração agendada de um medicamento
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoseEvent {
    /// Identificador único da tomada
    pub id: Uuid,
    /// Medicamento ao qual a tomada pertence
    pub medication_id: Uuid,
    /// Horário previsto (imutável após a criação)
    pub scheduled_time: DateTime<Utc>,
    /// Horário em que foi marcada como tomada
    pub taken_at: Option<DateTime<Utc>>,
    /// Status persistido
    pub raw_status: RawStatus,
}

impl DoseEvent {
    /// Status de exibição calculado a partir do status persistido e dos horários
    pub fn display_status(&self) -> DisplayStatus {
        status::classify(self.raw_status, self.scheduled_time, self.taken_at)
    }

    /// `taken` sem `taken_at`: dado legado que não entra em agregações
    pub fn is_malformed(&self) -> bool {
        self.raw_status == RawStatus::Taken && self.taken_at.is_none()
    }
}

/// Mudança de status solicitada pelo usuário (tomada ou pulada)
///
/// Só pode ser construída respeitando o invariante `taken_at` presente
/// se e somente se o status for `taken`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoseUpdate {
    status: RawStatus,
    taken_at: Option<DateTime<Utc>>,
    notes: Option<String>,
}

impl DoseUpdate {
    pub fn taken(taken_at: DateTime<Utc>, notes: Option<String>) -> Self {
        Self {
            status: RawStatus::Taken,
            taken_at: Some(taken_at),
            notes,
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: RawStatus::Skipped,
            taken_at: None,
            notes: None,
        }
    }

    /// Valida uma combinação arbitrária vinda da camada de apresentação
    pub fn new(
        status: RawStatus,
        taken_at: Option<DateTime<Utc>>,
        notes: Option<String>,
    ) -> Result<Self, IntakeError> {
        match (status, taken_at) {
            (RawStatus::Taken, Some(at)) => Ok(Self::taken(at, notes)),
            (RawStatus::Taken, None) => Err(IntakeError::InvalidUpdate(
                "status taken exige taken_at".to_string(),
            )),
            (RawStatus::Skipped, None) => Ok(Self {
                notes,
                ..Self::skipped()
            }),
            (RawStatus::Skipped, Some(_)) => Err(IntakeError::InvalidUpdate(
                "status skipped não aceita taken_at".to_string(),
            )),
            (other, _) => Err(IntakeError::InvalidUpdate(format!(
                "status de destino não permitido: {}",
                other
            ))),
        }
    }

    pub fn status(&self) -> RawStatus {
        self.status
    }

    pub fn taken_at(&self) -> Option<DateTime<Utc>> {
        self.taken_at
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }
}

/// Faixa do dia usada para escolher a tolerância
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSlot {
    /// 06:00-12:00
    Morning,
    /// 12:00-18:00
    Afternoon,
    /// 18:00-06:00
    Evening,
}

/// Rótulo do dia de uma tomada perdida
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedDayLabel {
    MissedYesterday,
    MissedToday,
}

/// Tomada pendente cuja tolerância já expirou
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissedDose {
    pub event_id: Uuid,
    pub medication_id: Uuid,
    pub scheduled_time: DateTime<Utc>,
    pub slot: TimeSlot,
    pub label: MissedDayLabel,
}

/// Resultado de uma detecção, mais recente primeiro
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissedReport {
    pub doses: Vec<MissedDose>,
    pub total_missed: usize,
}

impl MissedReport {
    pub fn new(doses: Vec<MissedDose>) -> Self {
        let total_missed = doses.len();
        Self { doses, total_missed }
    }
}

/// Estatísticas de adesão recalculadas sob demanda
///
/// Os contadores cobrem todo o histórico; as porcentagens são por janela.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdherenceSnapshot {
    pub taken_on_time: u32,
    pub skipped: u32,
    pub late_intakes: u32,
    pub adherence_7_days: u32,
    pub adherence_30_days: u32,
    pub total_7_days: u32,
    pub total_30_days: u32,
}
