use crate::aggregator::EngineSettings;
use crate::error::MonitorError;
use crate::report::DriverOptions;
use crate::schedule::OverlapPolicy;
use chrono_tz::Tz;
use config as config_crate;
use config_crate::builder::DefaultState;
use config_crate::{ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

/// Fuso usado por lojas sem fuso cadastrado.
pub const DEFAULT_TIMEZONE: &str = "America/Chicago";

/// Onde ficam os dados das lojas e o registro de relatórios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Postgres,
    Memory,
}

/// Arquivos de origem e parâmetros da carga.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    pub status_csv: PathBuf,
    pub hours_csv: PathBuf,
    pub timezones_csv: PathBuf,
    /// Carrega os CSVs na inicialização se o banco estiver vazio.
    pub on_startup: bool,
    /// Linhas por transação de inserção.
    pub batch_size: usize,
}

/// Configuração operacional do sistema.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Backend de dados: `postgres` ou `memory`.
    pub backend: Backend,
    /// URL de conexão com o banco PostgreSQL (obrigatória no backend `postgres`).
    pub database_url: Option<String>,
    /// Tamanho máximo do pool de conexões.
    pub database_pool_size: usize,
    /// Fuso IANA para lojas sem fuso cadastrado.
    pub default_timezone: String,
    /// Diretório dos relatórios CSV gerados.
    pub reports_dir: PathBuf,
    /// Endereço de escuta da API HTTP.
    pub bind_address: String,
    /// Lojas calculadas em paralelo.
    pub max_concurrent_sites: usize,
    /// A cada quantas lojas registrar progresso.
    pub progress_every: usize,
    /// Soma aditiva ou união de regras sobrepostas.
    pub overlap_policy: OverlapPolicy,
    /// Nível máximo de log (trace, debug, info, warn, error).
    pub log_level: String,
    pub ingest: IngestConfig,
}

fn with_defaults() -> Result<ConfigBuilder<DefaultState>, config_crate::ConfigError> {
    config_crate::Config::builder()
        .set_default("backend", "postgres")?
        .set_default("database_pool_size", 16_i64)?
        .set_default("default_timezone", DEFAULT_TIMEZONE)?
        .set_default("reports_dir", "reports")?
        .set_default("bind_address", "0.0.0.0:8000")?
        .set_default("max_concurrent_sites", 8_i64)?
        .set_default("progress_every", 100_i64)?
        .set_default("overlap_policy", "additive")?
        .set_default("log_level", "info")?
        .set_default("ingest.status_csv", "store_status.csv")?
        .set_default("ingest.hours_csv", "menu_hours.csv")?
        .set_default("ingest.timezones_csv", "timezones.csv")?
        .set_default("ingest.on_startup", true)?
        .set_default("ingest.batch_size", 10_000_i64)
}

impl Config {
    /// Lê `config.toml` (opcional) e variáveis `MONITOR_*`, depois valida.
    pub fn load() -> Result<Self, MonitorError> {
        let settings = with_defaults()?
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("MONITOR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validação feita antes de qualquer loja ser processada.
    pub fn validate(&self) -> Result<(), MonitorError> {
        self.default_zone()?;
        if self.max_concurrent_sites == 0 {
            return Err(MonitorError::Config(
                "max_concurrent_sites deve ser maior que zero".into(),
            ));
        }
        if self.database_pool_size == 0 {
            return Err(MonitorError::Config(
                "database_pool_size deve ser maior que zero".into(),
            ));
        }
        if self.ingest.batch_size == 0 {
            return Err(MonitorError::Config(
                "ingest.batch_size deve ser maior que zero".into(),
            ));
        }
        if self.backend == Backend::Postgres && self.database_url().is_none() {
            return Err(MonitorError::Config(
                "database_url é obrigatório no backend postgres".into(),
            ));
        }
        self.log_level
            .parse::<tracing::Level>()
            .map_err(|_| MonitorError::Config(format!("log_level inválido: {:?}", self.log_level)))?;
        Ok(())
    }

    pub fn default_zone(&self) -> Result<Tz, MonitorError> {
        let zone = self.default_timezone.trim();
        if zone.is_empty() {
            return Err(MonitorError::Config("default_timezone não configurado".into()));
        }
        zone.parse::<Tz>()
            .map_err(|_| MonitorError::InvalidTimezone(zone.to_string()))
    }

    pub fn database_url(&self) -> Option<&str> {
        self.database_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn engine_settings(&self) -> Result<EngineSettings, MonitorError> {
        Ok(EngineSettings {
            default_timezone: self.default_zone()?,
            overlap_policy: self.overlap_policy,
        })
    }

    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            max_concurrent_sites: self.max_concurrent_sites,
            progress_every: self.progress_every,
        }
    }

    pub fn log_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_crate::FileFormat;

    fn from_toml(contents: &str) -> Result<Config, MonitorError> {
        let settings = with_defaults()?
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn defaults_fill_missing_keys() -> Result<(), MonitorError> {
        let config = from_toml(r#"database_url = "postgres://localhost/lojas""#)?;

        assert_eq!(config.backend, Backend::Postgres);
        assert_eq!(config.default_zone()?, chrono_tz::America::Chicago);
        assert_eq!(config.max_concurrent_sites, 8);
        assert_eq!(config.overlap_policy, OverlapPolicy::Additive);
        assert_eq!(config.ingest.batch_size, 10_000);
        assert_eq!(config.log_level(), tracing::Level::INFO);
        Ok(())
    }

    #[test]
    fn memory_backend_does_not_need_database() -> Result<(), MonitorError> {
        let config = from_toml(
            r#"
backend = "memory"
overlap_policy = "merge"

[ingest]
status_csv = "dados/status.csv"
"#,
        )?;

        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.overlap_policy, OverlapPolicy::Merge);
        assert_eq!(config.ingest.status_csv, PathBuf::from("dados/status.csv"));
        assert_eq!(config.ingest.hours_csv, PathBuf::from("menu_hours.csv"));
        Ok(())
    }

    #[test]
    fn postgres_backend_requires_database_url() {
        let result = from_toml(r#"database_url = "  ""#);
        assert!(matches!(result, Err(MonitorError::Config(_))));
    }

    #[test]
    fn invalid_default_timezone_is_fatal() {
        let result = from_toml(
            r#"
backend = "memory"
default_timezone = "America/Atlantida"
"#,
        );
        assert!(matches!(result, Err(MonitorError::InvalidTimezone(_))));
    }

    #[test]
    fn empty_default_timezone_is_fatal() {
        let result = from_toml(
            r#"
backend = "memory"
default_timezone = ""
"#,
        );
        assert!(matches!(result, Err(MonitorError::Config(_))));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let result = from_toml(
            r#"
backend = "memory"
max_concurrent_sites = 0
"#,
        );
        assert!(matches!(result, Err(MonitorError::Config(_))));
    }
}
