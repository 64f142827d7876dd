// src/report.rs

use crate::aggregator::{EngineSettings, compute_site_row};
use crate::error::MonitorError;
use crate::repository::{ObservationRepository, ScheduleRepository, TimezoneRepository};
use crate::sink::RowSink;
use crate::types::{ReportRow, SiteId};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Parâmetros operacionais do driver.
#[derive(Debug, Clone, Copy)]
pub struct DriverOptions {
    /// Quantidade máxima de lojas calculadas ao mesmo tempo.
    pub max_concurrent_sites: usize,
    /// A cada quantas lojas registrar progresso.
    pub progress_every: usize,
}

/// Falha isolada no cálculo de uma loja.
#[derive(Debug)]
pub struct SiteFailure {
    pub site_id: SiteId,
    pub cause: MonitorError,
}

/// Resultado do cálculo de uma loja.
pub type SiteOutcome = Result<ReportRow, SiteFailure>;

/// Contagem final de uma execução.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub failed: usize,
}

/// Calcula a linha de cada loja e entrega ao `sink`.
///
/// As lojas são calculadas em tarefas concorrentes (limitadas por
/// `max_concurrent_sites`) e as linhas são emitidas por esta tarefa, uma de
/// cada vez. Uma loja que falha vira linha zerada e a execução continua; só
/// erros de escrita no `sink` interrompem a execução.
pub async fn run<S, K>(
    store: Arc<S>,
    settings: EngineSettings,
    reference: DateTime<Utc>,
    site_ids: Vec<SiteId>,
    sink: &mut K,
    options: DriverOptions,
) -> Result<RunSummary, MonitorError>
where
    S: ObservationRepository + ScheduleRepository + TimezoneRepository + ?Sized + 'static,
    K: RowSink + ?Sized,
{
    let total = site_ids.len();
    info!(
        "[EXECUÇÃO] Processando {} lojas com instante de referência {}.",
        total, reference
    );

    let semaphore = Arc::new(Semaphore::new(options.max_concurrent_sites.max(1)));
    let mut handles: Vec<(SiteId, JoinHandle<SiteOutcome>)> = Vec::with_capacity(total);

    for site_id in site_ids {
        let store: Arc<S> = Arc::clone(&store);
        let semaphore: Arc<Semaphore> = Arc::clone(&semaphore);
        let task_site: SiteId = site_id.clone();

        let handle: JoinHandle<SiteOutcome> = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let outcome = compute_site_row(store.as_ref(), &task_site, reference, &settings).await;
            outcome.map_err(|cause| SiteFailure {
                site_id: task_site,
                cause,
            })
        });
        handles.push((site_id, handle));
    }

    let mut summary = RunSummary::default();
    let mut pending = handles.into_iter();
    while let Some((site_id, handle)) = pending.next() {
        if options.progress_every > 0 && summary.processed % options.progress_every == 0 {
            info!(
                "[EXECUÇÃO] Processando loja {}/{}",
                summary.processed + 1,
                total
            );
        }

        let outcome: SiteOutcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(SiteFailure {
                site_id,
                cause: MonitorError::Task(e.to_string()),
            }),
        };

        let row = match outcome {
            Ok(row) => {
                debug!("[LOJA {}] Linha calculada: {:?}", row.site_id, row);
                row
            }
            Err(failure) => {
                warn!(
                    "[LOJA {}] Falha no cálculo, emitindo linha zerada: {}",
                    failure.site_id, failure.cause
                );
                summary.failed += 1;
                ReportRow::zeroed(failure.site_id)
            }
        };

        if let Err(e) = sink.emit(&row) {
            for (_, rest) in pending.by_ref() {
                rest.abort();
            }
            return Err(e);
        }
        summary.processed += 1;
    }

    sink.finish()?;
    info!(
        "[EXECUÇÃO] Fim. {} lojas processadas, {} com falha.",
        summary.processed, summary.failed
    );
    Ok(summary)
}
