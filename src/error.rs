use thiserror::Error;

/// Erros de domínio e de acesso a dados do serviço de relatórios.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("erro de banco de dados: {0}")]
    Database(#[from] tokio_postgres::Error),
    #[error("erro ao obter conexão do pool: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    #[error("falha ao criar pool de conexões: {0}")]
    PoolSetup(#[from] deadpool_postgres::CreatePoolError),
    #[error("fuso horário inválido: {0}")]
    InvalidTimezone(String),
    #[error("regra de horário inválida: {0}")]
    InvalidRule(String),
    #[error("valor inválido: {0}")]
    Parse(String),
    #[error("erro de CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("erro de E/S: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuração inválida: {0}")]
    Config(String),
    #[error("erro ao carregar configuração: {0}")]
    Settings(#[from] config::ConfigError),
    #[error("tarefa interrompida: {0}")]
    Task(String),
    #[error("relatório não encontrado: {0}")]
    NotFound(String),
}
