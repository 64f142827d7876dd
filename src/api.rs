//! api.rs — API HTTP de relatórios
//!
//! `GET /trigger_report` dispara a geração e devolve o id; `GET /get_report`
//! devolve o estado ou o CSV pronto.

use crate::jobs::ReportJobs;
use crate::types::{ReportRecord, ReportStatus};
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

const INTERNAL_ERROR_MESSAGE: &str = "Erro interno do servidor";

pub fn router(jobs: ReportJobs) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/trigger_report", get(trigger_report))
        .route("/get_report", get(get_report))
        .with_state(jobs)
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub report_id: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    #[serde(default)]
    pub report_id: String,
}

pub enum ReportResponse {
    Running,
    Csv(Vec<u8>),
    Error { status: StatusCode, body: ErrorBody },
}

impl IntoResponse for ReportResponse {
    fn into_response(self) -> Response {
        match self {
            ReportResponse::Running => {
                (StatusCode::OK, Json(json!({ "status": "Running" }))).into_response()
            }
            ReportResponse::Csv(bytes) => (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/csv"),
                    (header::CONTENT_DISPOSITION, "attachment; filename=report.csv"),
                ],
                bytes,
            )
                .into_response(),
            ReportResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub enum TriggerResult {
    Accepted(TriggerResponse),
    Error { status: StatusCode, body: ErrorBody },
}

impl IntoResponse for TriggerResult {
    fn into_response(self) -> Response {
        match self {
            TriggerResult::Accepted(body) => (StatusCode::OK, Json(body)).into_response(),
            TriggerResult::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

async fn welcome() -> impl IntoResponse {
    Json(json!({ "message": "Monitoramento de lojas: use /trigger_report e /get_report" }))
}

pub async fn trigger_report(State(jobs): State<ReportJobs>) -> impl IntoResponse {
    match jobs.trigger().await {
        Ok(report_id) => TriggerResult::Accepted(TriggerResponse { report_id }),
        Err(e) => {
            error!("[API] Falha ao disparar relatório: {}", e);
            TriggerResult::Error {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: ErrorBody {
                    detail: INTERNAL_ERROR_MESSAGE.to_string(),
                },
            }
        }
    }
}

pub async fn get_report(
    State(jobs): State<ReportJobs>,
    Query(query): Query<ReportQuery>,
) -> impl IntoResponse {
    let report_id = query.report_id.trim();
    if report_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "report_id é obrigatório");
    }
    match jobs.find(report_id).await {
        Ok(record) => build_report_response(record).await,
        Err(e) => {
            error!("[API] Falha ao consultar relatório {}: {}", report_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
        }
    }
}

/// Resposta para o registro encontrado (ou não) de um relatório.
pub async fn build_report_response(record: Option<ReportRecord>) -> ReportResponse {
    let Some(record) = record else {
        return error_response(StatusCode::NOT_FOUND, "Relatório não encontrado");
    };
    match record.status {
        ReportStatus::Running => ReportResponse::Running,
        ReportStatus::Failed => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Falha na geração do relatório")
        }
        ReportStatus::Complete => {
            let Some(path) = record.file_path else {
                error!("[RELATORIO {}] Concluído sem caminho de arquivo.", record.id);
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Arquivo do relatório ausente");
            };
            match tokio::fs::read(&path).await {
                Ok(bytes) => ReportResponse::Csv(bytes),
                Err(e) => {
                    error!("[RELATORIO {}] Arquivo {} ilegível: {}", record.id, path, e);
                    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Arquivo do relatório ausente")
                }
            }
        }
    }
}

fn error_response(status: StatusCode, detail: &str) -> ReportResponse {
    ReportResponse::Error {
        status,
        body: ErrorBody {
            detail: detail.to_string(),
        },
    }
}
