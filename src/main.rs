mod aggregator;
mod api;
mod config;
mod error;
mod ingest;
mod interpolation;
mod jobs;
mod report;
mod repository;
mod schedule;
mod sink;
mod storage;
mod types;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Carrega e valida a configuração antes de qualquer outra coisa
    let config: config::Config = config::Config::load()?;

    // Inicializa o sistema de logging (tracing) no nível configurado
    tracing_subscriber::fmt()
        .with_max_level(config.log_level())
        .init();
    info!("Configuração carregada: backend {:?}", config.backend);

    // Monta o backend de dados das lojas e do registro de relatórios
    let store: Arc<dyn repository::ReportStore> = match config.backend {
        config::Backend::Postgres => {
            let url: &str = config
                .database_url()
                .context("database_url é obrigatório no backend postgres")?;
            let storage: storage::Storage =
                storage::Storage::connect(url, config.database_pool_size).await?;
            storage.ensure_schema().await?;
            info!("Banco de dados conectado");

            if config.ingest.on_startup {
                ingest::ingest_into(&storage, &config.ingest).await?;
            }
            Arc::new(storage)
        }
        config::Backend::Memory => {
            let dataset: ingest::Dataset = ingest::Dataset::read(&config.ingest)?;
            let store: repository::MemoryStore = dataset.into_memory_store();
            info!("Dados carregados em memória: {} observações", store.observation_count());
            Arc::new(store)
        }
    };

    let jobs: jobs::ReportJobs = jobs::ReportJobs::new(
        store,
        config.engine_settings()?,
        config.driver_options(),
        config.reports_dir.clone(),
    );

    let listener: tokio::net::TcpListener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("não foi possível escutar em {}", config.bind_address))?;
    info!("API escutando em {}", config.bind_address);
    axum::serve(listener, api::router(jobs)).await?;

    Ok(())
}
