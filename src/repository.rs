//! repository.rs — Interfaces de leitura dos dados das lojas e do registro de relatórios
//!
//! `storage::Storage` implementa tudo sobre PostgreSQL; `MemoryStore` mantém os
//! mesmos dados em memória (backend `memory` e testes).

use crate::error::MonitorError;
use crate::types::{
    OperatingHoursRule, ReportRecord, ReportStatus, SiteId, StatusObservation, TimezoneAssignment,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

/// Observações de status das lojas.
#[async_trait]
pub trait ObservationRepository: Send + Sync {
    /// Observações de `site_id` com `start <= instante <= end`, em ordem crescente.
    async fn query(
        &self,
        site_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StatusObservation>, MonitorError>;

    /// Conjunto distinto de lojas com pelo menos uma observação.
    async fn site_ids(&self) -> Result<Vec<SiteId>, MonitorError>;

    /// Maior instante observado em todo o conjunto de dados.
    async fn max_instant(&self) -> Result<Option<DateTime<Utc>>, MonitorError>;
}

/// Regras de horário de funcionamento. Lista vazia significa loja 24x7.
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn rules_for(&self, site_id: &str) -> Result<Vec<OperatingHoursRule>, MonitorError>;
}

/// Fuso horário de cada loja. `None` significa usar o fuso padrão.
#[async_trait]
pub trait TimezoneRepository: Send + Sync {
    async fn zone_for(&self, site_id: &str) -> Result<Option<String>, MonitorError>;
}

/// Metadados e estado dos relatórios solicitados.
#[async_trait]
pub trait ReportLedger: Send + Sync {
    async fn create_report(&self, id: &str) -> Result<ReportRecord, MonitorError>;
    async fn complete_report(&self, id: &str, file_path: &str) -> Result<(), MonitorError>;
    async fn fail_report(&self, id: &str) -> Result<(), MonitorError>;
    async fn find_report(&self, id: &str) -> Result<Option<ReportRecord>, MonitorError>;
}

/// Tudo o que o serviço de relatórios precisa de um backend.
pub trait ReportStore:
    ObservationRepository + ScheduleRepository + TimezoneRepository + ReportLedger
{
}

impl<T> ReportStore for T where
    T: ObservationRepository + ScheduleRepository + TimezoneRepository + ReportLedger
{
}

/// Backend em memória, carregado uma vez e somente leitura para os dados das lojas.
#[derive(Debug, Default)]
pub struct MemoryStore {
    observations: HashMap<SiteId, Vec<StatusObservation>>,
    rules: HashMap<SiteId, Vec<OperatingHoursRule>>,
    zones: HashMap<SiteId, String>,
    reports: RwLock<HashMap<String, ReportRecord>>,
}

impl MemoryStore {
    pub fn new(
        observations: Vec<StatusObservation>,
        rules: Vec<OperatingHoursRule>,
        zones: Vec<TimezoneAssignment>,
    ) -> Self {
        let mut by_site: HashMap<SiteId, Vec<StatusObservation>> = HashMap::new();
        for observation in observations {
            by_site
                .entry(observation.site_id.clone())
                .or_default()
                .push(observation);
        }
        for list in by_site.values_mut() {
            // ordenação estável: empates mantêm a ordem de carga
            list.sort_by_key(|o| o.instant);
        }

        let mut rules_by_site: HashMap<SiteId, Vec<OperatingHoursRule>> = HashMap::new();
        for rule in rules {
            rules_by_site.entry(rule.site_id.clone()).or_default().push(rule);
        }

        let zones = zones
            .into_iter()
            .map(|assignment| (assignment.site_id, assignment.zone_id))
            .collect();

        Self {
            observations: by_site,
            rules: rules_by_site,
            zones,
            reports: RwLock::new(HashMap::new()),
        }
    }

    pub fn observation_count(&self) -> usize {
        self.observations.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl ObservationRepository for MemoryStore {
    async fn query(
        &self,
        site_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StatusObservation>, MonitorError> {
        Ok(self
            .observations
            .get(site_id)
            .map(|list| {
                list.iter()
                    .filter(|o| o.instant >= start && o.instant <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn site_ids(&self) -> Result<Vec<SiteId>, MonitorError> {
        let ids: BTreeSet<&SiteId> = self.observations.keys().collect();
        Ok(ids.into_iter().cloned().collect())
    }

    async fn max_instant(&self) -> Result<Option<DateTime<Utc>>, MonitorError> {
        Ok(self
            .observations
            .values()
            .filter_map(|list| list.last().map(|o| o.instant))
            .max())
    }
}

#[async_trait]
impl ScheduleRepository for MemoryStore {
    async fn rules_for(&self, site_id: &str) -> Result<Vec<OperatingHoursRule>, MonitorError> {
        Ok(self.rules.get(site_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl TimezoneRepository for MemoryStore {
    async fn zone_for(&self, site_id: &str) -> Result<Option<String>, MonitorError> {
        Ok(self.zones.get(site_id).cloned())
    }
}

#[async_trait]
impl ReportLedger for MemoryStore {
    async fn create_report(&self, id: &str) -> Result<ReportRecord, MonitorError> {
        let record = ReportRecord::running(id);
        self.reports
            .write()
            .await
            .insert(id.to_string(), record.clone());
        Ok(record)
    }

    async fn complete_report(&self, id: &str, file_path: &str) -> Result<(), MonitorError> {
        let mut reports = self.reports.write().await;
        let record = reports
            .get_mut(id)
            .ok_or_else(|| MonitorError::NotFound(id.to_string()))?;
        record.status = ReportStatus::Complete;
        record.completed_at = Some(Utc::now());
        record.file_path = Some(file_path.to_string());
        Ok(())
    }

    async fn fail_report(&self, id: &str) -> Result<(), MonitorError> {
        let mut reports = self.reports.write().await;
        let record = reports
            .get_mut(id)
            .ok_or_else(|| MonitorError::NotFound(id.to_string()))?;
        record.status = ReportStatus::Failed;
        record.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn find_report(&self, id: &str) -> Result<Option<ReportRecord>, MonitorError> {
        Ok(self.reports.read().await.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SiteStatus;
    use chrono::{TimeDelta, TimeZone};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 25, 12, 0, 0)
            .single()
            .expect("instante válido")
    }

    fn obs(site: &str, minutes: i64, status: SiteStatus) -> StatusObservation {
        StatusObservation {
            site_id: site.into(),
            instant: base() + TimeDelta::minutes(minutes),
            status,
        }
    }

    fn store() -> MemoryStore {
        MemoryStore::new(
            vec![
                obs("b", 30, SiteStatus::Active),
                obs("a", 10, SiteStatus::Inactive),
                obs("a", -10, SiteStatus::Active),
                obs("a", 60, SiteStatus::Active),
            ],
            Vec::new(),
            vec![TimezoneAssignment {
                site_id: "a".into(),
                zone_id: "Asia/Kolkata".into(),
            }],
        )
    }

    #[tokio::test]
    async fn query_is_sorted_and_inclusive() -> Result<(), MonitorError> {
        let store = store();
        let found = store
            .query("a", base() - TimeDelta::minutes(10), base() + TimeDelta::minutes(10))
            .await?;

        let offsets: Vec<i64> = found
            .iter()
            .map(|o| (o.instant - base()).num_minutes())
            .collect();
        assert_eq!(offsets, vec![-10, 10]);
        Ok(())
    }

    #[tokio::test]
    async fn site_ids_and_max_instant_cover_whole_dataset() -> Result<(), MonitorError> {
        let store = store();
        assert_eq!(store.site_ids().await?, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.max_instant().await?, Some(base() + TimeDelta::minutes(60)));
        assert_eq!(store.observation_count(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn missing_rules_and_zone_are_empty() -> Result<(), MonitorError> {
        let store = store();
        assert!(store.rules_for("a").await?.is_empty());
        assert_eq!(store.zone_for("a").await?, Some("Asia/Kolkata".to_string()));
        assert_eq!(store.zone_for("b").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn report_lifecycle() -> Result<(), MonitorError> {
        let store = MemoryStore::default();
        let created = store.create_report("r1").await?;
        assert_eq!(created.status, ReportStatus::Running);

        store.complete_report("r1", "/tmp/report_r1.csv").await?;
        let found = store.find_report("r1").await?;
        assert_eq!(found.as_ref().map(|r| r.status), Some(ReportStatus::Complete));
        assert_eq!(
            found.and_then(|r| r.file_path),
            Some("/tmp/report_r1.csv".to_string())
        );

        assert!(matches!(
            store.fail_report("desconhecido").await,
            Err(MonitorError::NotFound(_))
        ));
        Ok(())
    }
}
