//! ingest.rs — Carga dos arquivos CSV de origem
//!
//! Lê `store_status.csv`, `menu_hours.csv` e `timezones.csv`, converte cada
//! linha em registro tipado e grava no PostgreSQL em lotes, ou monta um
//! `MemoryStore`. Linhas malformadas são descartadas e contadas. Uma carga só
//! é considerada feita depois de gravar as três tabelas e o marcador de
//! conclusão; uma carga interrompida é refeita do zero na próxima partida.

use crate::config::IngestConfig;
use crate::error::MonitorError;
use crate::repository::MemoryStore;
use crate::types::{OperatingHoursRule, StatusObservation, TimezoneAssignment, weekday_from_index};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

/// Registros lidos de um arquivo e quantas linhas foram descartadas.
#[derive(Debug)]
pub struct Parsed<T> {
    pub records: Vec<T>,
    pub skipped: usize,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    store_id: String,
    status: String,
    timestamp_utc: String,
}

#[derive(Debug, Deserialize)]
struct RawHours {
    store_id: String,
    #[serde(rename = "dayOfWeek")]
    day_of_week: i64,
    start_time_local: String,
    end_time_local: String,
}

#[derive(Debug, Deserialize)]
struct RawTimezone {
    store_id: String,
    timezone_str: String,
}

/// Aceita `2023-01-22 12:09:39.388884 UTC`, a mesma forma sem sufixo e RFC 3339.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, MonitorError> {
    let trimmed = value.trim();
    let naive_part = trimmed.strip_suffix("UTC").unwrap_or(trimmed).trim_end();
    if let Ok(naive) = NaiveDateTime::parse_from_str(naive_part, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| MonitorError::Parse(format!("timestamp inválido: {value:?}")))
}

/// Hora local `HH:MM:SS` (ou `HH:MM`).
pub fn parse_local_time(value: &str) -> Result<NaiveTime, MonitorError> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .map_err(|_| MonitorError::Parse(format!("hora inválida: {value:?}")))
}

fn to_observation(raw: RawStatus) -> Result<StatusObservation, MonitorError> {
    Ok(StatusObservation {
        instant: parse_timestamp(&raw.timestamp_utc)?,
        status: raw.status.parse()?,
        site_id: raw.store_id.trim().to_string(),
    })
}

/// Hora de fechamento; `24:00:00` marca o fim do dia.
pub fn parse_closing_time(value: &str) -> Result<(NaiveTime, bool), MonitorError> {
    if matches!(value.trim(), "24:00" | "24:00:00") {
        return Ok((NaiveTime::MIN, true));
    }
    Ok((parse_local_time(value)?, false))
}

fn to_rule(raw: RawHours) -> Result<OperatingHoursRule, MonitorError> {
    let (local_end, closes_at_day_end) = parse_closing_time(&raw.end_time_local)?;
    Ok(OperatingHoursRule {
        site_id: raw.store_id.trim().to_string(),
        weekday: weekday_from_index(raw.day_of_week)?,
        local_start: parse_local_time(&raw.start_time_local)?,
        local_end,
        closes_at_day_end,
    })
}

fn to_zone(raw: RawTimezone) -> Result<TimezoneAssignment, MonitorError> {
    let zone_id = raw.timezone_str.trim();
    if zone_id.is_empty() {
        return Err(MonitorError::InvalidTimezone(format!("loja {} sem fuso", raw.store_id)));
    }
    Ok(TimezoneAssignment {
        site_id: raw.store_id.trim().to_string(),
        zone_id: zone_id.to_string(),
    })
}

fn parse_records<R, Raw, T>(
    reader: R,
    source: &str,
    convert: impl Fn(Raw) -> Result<T, MonitorError>,
) -> Result<Parsed<T>, MonitorError>
where
    R: Read,
    Raw: DeserializeOwned,
{
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut records = Vec::new();
    let mut skipped = 0;
    for (index, result) in csv_reader.deserialize::<Raw>().enumerate() {
        match result.map_err(MonitorError::from).and_then(&convert) {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped += 1;
                // linha 1 é o cabeçalho
                warn!("[CARGA {}] Linha {} descartada: {}", source, index + 2, e);
            }
        }
    }
    Ok(Parsed { records, skipped })
}

pub fn parse_observations<R: Read>(reader: R) -> Result<Parsed<StatusObservation>, MonitorError> {
    parse_records(reader, "status", to_observation)
}

pub fn parse_rules<R: Read>(reader: R) -> Result<Parsed<OperatingHoursRule>, MonitorError> {
    parse_records(reader, "horários", to_rule)
}

pub fn parse_zones<R: Read>(reader: R) -> Result<Parsed<TimezoneAssignment>, MonitorError> {
    parse_records(reader, "fusos", to_zone)
}

fn open(path: &Path) -> Result<File, MonitorError> {
    File::open(path).map_err(|e| {
        MonitorError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })
}

/// Os três arquivos de origem já convertidos.
#[derive(Debug)]
pub struct Dataset {
    pub observations: Parsed<StatusObservation>,
    pub rules: Parsed<OperatingHoursRule>,
    pub zones: Parsed<TimezoneAssignment>,
}

impl Dataset {
    pub fn read(files: &IngestConfig) -> Result<Self, MonitorError> {
        let dataset = Self {
            observations: parse_observations(open(&files.status_csv)?)?,
            rules: parse_rules(open(&files.hours_csv)?)?,
            zones: parse_zones(open(&files.timezones_csv)?)?,
        };
        info!(
            "[CARGA] Lidos {} status ({} descartados), {} horários ({} descartados), {} fusos ({} descartados).",
            dataset.observations.records.len(),
            dataset.observations.skipped,
            dataset.rules.records.len(),
            dataset.rules.skipped,
            dataset.zones.records.len(),
            dataset.zones.skipped
        );
        Ok(dataset)
    }

    pub fn into_memory_store(self) -> MemoryStore {
        MemoryStore::new(
            self.observations.records,
            self.rules.records,
            self.zones.records,
        )
    }
}

/// Destino persistente da carga.
#[async_trait]
pub trait IngestTarget: Send + Sync {
    /// Indica se uma carga anterior terminou por completo.
    async fn ingestion_completed(&self) -> Result<bool, MonitorError>;
    /// Apaga status, horários e fusos deixados por uma carga interrompida.
    async fn clear_source_data(&self) -> Result<(), MonitorError>;
    async fn insert_observations(&self, batch: &[StatusObservation]) -> Result<u64, MonitorError>;
    async fn insert_rules(&self, batch: &[OperatingHoursRule]) -> Result<u64, MonitorError>;
    async fn insert_zones(&self, batch: &[TimezoneAssignment]) -> Result<u64, MonitorError>;
    async fn mark_ingestion_completed(&self) -> Result<(), MonitorError>;
}

/// Carrega os CSVs no destino, a menos que uma carga anterior tenha terminado.
pub async fn ingest_into<T>(target: &T, files: &IngestConfig) -> Result<(), MonitorError>
where
    T: IngestTarget + ?Sized,
{
    if target.ingestion_completed().await? {
        info!("[CARGA] Dados já carregados no banco; carga ignorada.");
        return Ok(());
    }

    info!("[CARGA] Carregando dados dos arquivos CSV...");
    let dataset = Dataset::read(files)?;
    load_dataset(target, &dataset, files.batch_size).await
}

async fn load_dataset<T>(target: &T, dataset: &Dataset, batch_size: usize) -> Result<(), MonitorError>
where
    T: IngestTarget + ?Sized,
{
    let batch_size = batch_size.max(1);
    target.clear_source_data().await?;

    let total_batches = dataset.observations.records.len().div_ceil(batch_size);
    for (index, batch) in dataset.observations.records.chunks(batch_size).enumerate() {
        target.insert_observations(batch).await?;
        info!("[CARGA] Lote de status {}/{} gravado.", index + 1, total_batches);
    }
    for batch in dataset.rules.records.chunks(batch_size) {
        target.insert_rules(batch).await?;
    }
    info!("[CARGA] Horários de funcionamento gravados.");
    for batch in dataset.zones.records.chunks(batch_size) {
        target.insert_zones(batch).await?;
    }
    info!("[CARGA] Fusos horários gravados.");

    target.mark_ingestion_completed().await?;
    info!("[CARGA] Carga concluída!");
    Ok(())
}
