//! jobs.rs — Ciclo de vida dos relatórios solicitados
//!
//! `trigger` registra o relatório como `Running` e dispara a geração em
//! segundo plano; ao terminar o registro vira `Complete` (com o caminho do CSV)
//! ou `Failed`.

use crate::aggregator::EngineSettings;
use crate::error::MonitorError;
use crate::report::{self, DriverOptions, RunSummary};
use crate::repository::ReportStore;
use crate::sink::{ChannelSink, row_channel, write_csv};
use crate::types::ReportRecord;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Dispara e consulta relatórios. Barato de clonar.
#[derive(Clone)]
pub struct ReportJobs {
    store: Arc<dyn ReportStore>,
    settings: EngineSettings,
    options: DriverOptions,
    reports_dir: PathBuf,
}

impl ReportJobs {
    pub fn new(
        store: Arc<dyn ReportStore>,
        settings: EngineSettings,
        options: DriverOptions,
        reports_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            settings,
            options,
            reports_dir,
        }
    }

    /// Registra um novo relatório e retorna seu id sem esperar a geração.
    pub async fn trigger(&self) -> Result<String, MonitorError> {
        let id = Uuid::new_v4().to_string();
        self.store.create_report(&id).await?;
        info!("[RELATORIO {}] Solicitado.", id);

        let jobs: ReportJobs = self.clone();
        let task_id: String = id.clone();
        tokio::spawn(async move { jobs.run_to_completion(&task_id).await });
        Ok(id)
    }

    pub async fn find(&self, id: &str) -> Result<Option<ReportRecord>, MonitorError> {
        self.store.find_report(id).await
    }

    async fn run_to_completion(&self, id: &str) {
        let outcome = match self.generate(id).await {
            Ok((path, summary)) => {
                info!(
                    "[RELATORIO {}] Concluído: {} lojas ({} com falha) em {}.",
                    id, summary.processed, summary.failed, path
                );
                self.store.complete_report(id, &path).await
            }
            Err(e) => {
                error!("[RELATORIO {}] Falhou: {}", id, e);
                self.store.fail_report(id).await
            }
        };
        if let Err(e) = outcome {
            error!("[RELATORIO {}] Não foi possível atualizar o estado: {}", id, e);
        }
    }

    /// Gera `report_<id>.csv` e retorna o caminho absoluto do arquivo.
    ///
    /// O cálculo roda no runtime; a escrita do CSV roda em `spawn_blocking`
    /// e recebe as linhas por canal.
    async fn generate(&self, id: &str) -> Result<(String, RunSummary), MonitorError> {
        tokio::fs::create_dir_all(&self.reports_dir).await?;
        let path = self.reports_dir.join(format!("report_{id}.csv"));

        let (mut sink, rows) = row_channel();
        let writer_path: PathBuf = path.clone();
        let writer: JoinHandle<Result<usize, MonitorError>> =
            tokio::task::spawn_blocking(move || write_csv(&writer_path, rows));

        let outcome = self.run_driver(id, &mut sink).await;
        drop(sink);

        // Erro do escritor tem precedência: é a causa de um envio recusado.
        let written = writer
            .await
            .map_err(|e| MonitorError::Task(e.to_string()))??;
        let summary = outcome?;
        debug!("[RELATORIO {}] {} linhas gravadas.", id, written);

        let absolute = tokio::fs::canonicalize(&path).await?;
        Ok((absolute.to_string_lossy().into_owned(), summary))
    }

    async fn run_driver(&self, id: &str, sink: &mut ChannelSink) -> Result<RunSummary, MonitorError> {
        match self.store.max_instant().await? {
            Some(reference) => {
                let site_ids = self.store.site_ids().await?;
                report::run(
                    Arc::clone(&self.store),
                    self.settings,
                    reference,
                    site_ids,
                    sink,
                    self.options,
                )
                .await
            }
            None => {
                info!("[RELATORIO {}] Sem observações; relatório só com cabeçalho.", id);
                Ok(RunSummary::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;
    use crate::schedule::OverlapPolicy;
    use crate::types::{ReportStatus, SiteStatus, StatusObservation};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn settings() -> EngineSettings {
        EngineSettings {
            default_timezone: chrono_tz::America::Chicago,
            overlap_policy: OverlapPolicy::Additive,
        }
    }

    fn options() -> DriverOptions {
        DriverOptions {
            max_concurrent_sites: 4,
            progress_every: 10,
        }
    }

    fn jobs(store: MemoryStore, dir: &std::path::Path) -> ReportJobs {
        ReportJobs::new(Arc::new(store), settings(), options(), dir.join("reports"))
    }

    fn store_with_two_sites() -> MemoryStore {
        let at = |h: u32, m: u32| {
            Utc.with_ymd_and_hms(2023, 1, 25, h, m, 0)
                .single()
                .expect("instante válido")
        };
        MemoryStore::new(
            vec![
                StatusObservation {
                    site_id: "a".into(),
                    instant: at(11, 30),
                    status: SiteStatus::Active,
                },
                StatusObservation {
                    site_id: "b".into(),
                    instant: at(12, 0),
                    status: SiteStatus::Inactive,
                },
            ],
            Vec::new(),
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn completed_report_points_to_csv() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let jobs = jobs(store_with_two_sites(), dir.path());
        jobs.store.create_report("r1").await?;

        jobs.run_to_completion("r1").await;

        let record = jobs.find("r1").await?.ok_or("relatório não registrado")?;
        assert_eq!(record.status, ReportStatus::Complete);
        assert!(record.completed_at.is_some());
        let path = record.file_path.ok_or("sem caminho")?;
        assert!(path.ends_with("report_r1.csv"));

        let contents = std::fs::read_to_string(&path)?;
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().any(|l| l.starts_with("b,0.0,")));
        Ok(())
    }

    #[tokio::test]
    async fn empty_dataset_gives_header_only_report() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let jobs = jobs(MemoryStore::default(), dir.path());
        jobs.store.create_report("vazio").await?;

        jobs.run_to_completion("vazio").await;

        let record = jobs.find("vazio").await?.ok_or("relatório não registrado")?;
        assert_eq!(record.status, ReportStatus::Complete);
        let contents = std::fs::read_to_string(record.file_path.ok_or("sem caminho")?)?;
        assert_eq!(contents.lines().count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn unwritable_directory_marks_report_failed() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        // um arquivo no lugar do diretório de relatórios
        let blocker = dir.path().join("bloqueio");
        std::fs::write(&blocker, b"x")?;
        let jobs = ReportJobs::new(
            Arc::new(store_with_two_sites()),
            settings(),
            options(),
            blocker.join("reports"),
        );
        jobs.store.create_report("r2").await?;

        jobs.run_to_completion("r2").await;

        let record = jobs.find("r2").await?.ok_or("relatório não registrado")?;
        assert_eq!(record.status, ReportStatus::Failed);
        assert_eq!(record.file_path, None);
        Ok(())
    }

    #[tokio::test]
    async fn report_file_that_cannot_be_created_fails_the_job() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let jobs = jobs(store_with_two_sites(), dir.path());
        // diretório ocupando o nome do arquivo do relatório
        std::fs::create_dir_all(dir.path().join("reports").join("report_r3.csv"))?;
        jobs.store.create_report("r3").await?;

        jobs.run_to_completion("r3").await;

        let record = jobs.find("r3").await?.ok_or("relatório não registrado")?;
        assert_eq!(record.status, ReportStatus::Failed);
        Ok(())
    }

    #[tokio::test]
    async fn trigger_returns_before_generation_finishes() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let jobs = jobs(store_with_two_sites(), dir.path());

        let id = jobs.trigger().await?;
        assert!(Uuid::parse_str(&id).is_ok());

        let mut status = ReportStatus::Running;
        for _ in 0..100 {
            status = jobs.find(&id).await?.ok_or("relatório não registrado")?.status;
            if status != ReportStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(status, ReportStatus::Complete);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_report_is_none() -> Result<(), MonitorError> {
        let dir = tempfile::tempdir()?;
        let jobs = jobs(MemoryStore::default(), dir.path());
        assert!(jobs.find("nao-existe").await?.is_none());
        Ok(())
    }
}
