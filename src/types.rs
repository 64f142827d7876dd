use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokio_postgres::Row;

use crate::error::MonitorError;

/// Identificador de loja, como aparece nos dados de origem.
pub type SiteId = String;

/// Enum para o estado operacional observado de uma loja (PostgreSQL)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSql, FromSql)]
#[postgres(name = "site_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Active,
    Inactive,
}

impl SiteStatus {
    pub fn is_active(self) -> bool {
        matches!(self, SiteStatus::Active)
    }
}

impl FromStr for SiteStatus {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(SiteStatus::Active),
            "inactive" => Ok(SiteStatus::Inactive),
            other => Err(MonitorError::Parse(format!("status desconhecido: {other:?}"))),
        }
    }
}

/// Enum para o estado de geração de um relatório (PostgreSQL)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSql, FromSql)]
#[postgres(name = "report_status")]
pub enum ReportStatus {
    Running,
    Complete,
    Failed,
}

/// Observação pontual do estado de uma loja
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusObservation {
    pub site_id: SiteId,
    pub instant: DateTime<Utc>,
    pub status: SiteStatus,
}

impl TryFrom<Row> for StatusObservation {
    type Error = tokio_postgres::Error;

    fn try_from(row: Row) -> Result<Self, Self::Error> {
        Ok(Self {
            site_id: row.try_get("store_id")?,
            instant: row.try_get("timestamp_utc")?,
            status: row.try_get("status")?,
        })
    }
}

/// Regra semanal de funcionamento, em horário local da loja.
///
/// `weekday` segue a convenção 0 = segunda-feira. Quando `local_end` é
/// anterior a `local_start` a janela atravessa a meia-noite; se forem iguais
/// a janela é vazia. `closes_at_day_end` representa o fim `24:00:00`: a janela
/// vai até a meia-noite seguinte e `local_end` é ignorado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingHoursRule {
    pub site_id: SiteId,
    pub weekday: u8,
    pub local_start: NaiveTime,
    pub local_end: NaiveTime,
    #[serde(default)]
    pub closes_at_day_end: bool,
}

impl OperatingHoursRule {
    pub fn spans_midnight(&self) -> bool {
        self.closes_at_day_end || self.local_end < self.local_start
    }

    /// Início e fim da janela da regra quando aplicada à data local `date`.
    pub fn window_on(&self, date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
        let open = date.and_time(self.local_start);
        let close = if self.closes_at_day_end {
            date.and_time(NaiveTime::MIN) + TimeDelta::days(1)
        } else if self.spans_midnight() {
            date.and_time(self.local_end) + TimeDelta::days(1)
        } else {
            date.and_time(self.local_end)
        };
        (open, close)
    }
}

/// Converte o dia da semana de origem (0 = segunda) validando a faixa `0..=6`.
pub fn weekday_from_index(value: i64) -> Result<u8, MonitorError> {
    u8::try_from(value)
        .ok()
        .filter(|day| *day <= 6)
        .ok_or_else(|| MonitorError::InvalidRule(format!("dia da semana fora de 0..=6: {value}")))
}

impl TryFrom<Row> for OperatingHoursRule {
    type Error = MonitorError;

    fn try_from(row: Row) -> Result<Self, Self::Error> {
        let weekday: i16 = row.try_get("day_of_week")?;
        Ok(Self {
            site_id: row.try_get("store_id")?,
            weekday: weekday_from_index(i64::from(weekday))?,
            local_start: row.try_get("start_time_local")?,
            local_end: row.try_get("end_time_local")?,
            closes_at_day_end: row.try_get("closes_at_day_end")?,
        })
    }
}

/// Fuso horário IANA associado a uma loja
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimezoneAssignment {
    pub site_id: SiteId,
    pub zone_id: String,
}

/// Linha do relatório final: uma por loja.
///
/// A janela da última hora é expressa em minutos; dia e semana em horas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    #[serde(rename = "store_id")]
    pub site_id: SiteId,
    #[serde(rename = "uptime_last_hour(in minutes)")]
    pub uptime_last_hour: f64,
    #[serde(rename = "uptime_last_day(in hours)")]
    pub uptime_last_day: f64,
    #[serde(rename = "uptime_last_week(in hours)")]
    pub uptime_last_week: f64,
    #[serde(rename = "downtime_last_hour(in minutes)")]
    pub downtime_last_hour: f64,
    #[serde(rename = "downtime_last_day(in hours)")]
    pub downtime_last_day: f64,
    #[serde(rename = "downtime_last_week(in hours)")]
    pub downtime_last_week: f64,
}

impl ReportRow {
    pub const HEADER: [&'static str; 7] = [
        "store_id",
        "uptime_last_hour(in minutes)",
        "uptime_last_day(in hours)",
        "uptime_last_week(in hours)",
        "downtime_last_hour(in minutes)",
        "downtime_last_day(in hours)",
        "downtime_last_week(in hours)",
    ];

    /// Linha emitida quando o cálculo da loja falha.
    pub fn zeroed(site_id: impl Into<SiteId>) -> Self {
        Self {
            site_id: site_id.into(),
            uptime_last_hour: 0.0,
            uptime_last_day: 0.0,
            uptime_last_week: 0.0,
            downtime_last_hour: 0.0,
            downtime_last_day: 0.0,
            downtime_last_week: 0.0,
        }
    }
}

/// Metadados de um relatório solicitado
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub id: String,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub file_path: Option<String>,
}

impl ReportRecord {
    pub fn running(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ReportStatus::Running,
            created_at: Utc::now(),
            completed_at: None,
            file_path: None,
        }
    }
}

impl TryFrom<Row> for ReportRecord {
    type Error = tokio_postgres::Error;

    fn try_from(row: Row) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
            file_path: row.try_get("file_path")?,
        })
    }
}
