// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print endpoints.
//
//   POST /print               multipart upload (`file`, optional `printer`)
//   GET  /print/status?job_id one job
//   GET  /print/queue         counts per status

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use weighbridge_core::error::WeighbridgeError;
use weighbridge_core::types::{JobId, JobStatus, PrintJob, QueueSnapshot};

use crate::http::{Request, Response};
use crate::multipart;
use crate::services::app_services::AppServices;

/// Name given to uploads whose part carries no file name.
const UNNAMED_UPLOAD: &str = "document.pdf";

#[derive(Debug, Serialize)]
struct SubmitResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<String>,
}

impl SubmitResponse {
    fn failed(status: u16, message: impl Into<String>) -> Response {
        Response::json(
            status,
            &Self {
                success: false,
                message: message.into(),
                job_id: None,
            },
        )
    }
}

/// Job record as exposed over HTTP.
#[derive(Debug, Serialize)]
struct JobView<'a> {
    job_id: String,
    status: JobStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    duration_ms: Option<u64>,
    printer: &'a str,
    file: &'a str,
    size: u64,
    sha256: &'a str,
    error: Option<&'a str>,
}

impl<'a> From<&'a PrintJob> for JobView<'a> {
    fn from(job: &'a PrintJob) -> Self {
        Self {
            job_id: job.id.to_string(),
            status: job.status,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            duration_ms: job.duration_ms,
            printer: &job.printer_name,
            file: &job.document_name,
            size: job.size_bytes,
            sha256: &job.sha256,
            error: job.error.as_deref(),
        }
    }
}

/// Dispatch a plain (non-upgrade) HTTP request.
pub fn route(request: &Request, services: &AppServices) -> Response {
    debug!(method = %request.method, path = %request.path, "http request");
    match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/print") => submit(request, services),
        ("GET", "/print/status") => job_status(request, services),
        ("GET", "/print/queue") => queue_status(services),
        ("GET", "/ws") => Response::text(400, "websocket upgrade required"),
        _ => Response::text(404, "not found"),
    }
}

fn submit(request: &Request, services: &AppServices) -> Response {
    let Some(boundary) = request.header("content-type").and_then(multipart::boundary) else {
        return SubmitResponse::failed(400, "expected multipart/form-data");
    };
    let parts = match multipart::parse(&request.body, &boundary) {
        Ok(parts) => parts,
        Err(e) => return SubmitResponse::failed(400, e.to_string()),
    };
    let Some(file) = parts.iter().find(|part| part.name == "file") else {
        return SubmitResponse::failed(400, "missing file part");
    };

    let requested = parts
        .iter()
        .find(|part| part.name == "printer")
        .map(multipart::Part::text)
        .unwrap_or_default();
    let printer = if requested.is_empty() {
        services.config().printer_name.clone()
    } else {
        requested
    };
    let document_name = file
        .filename
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(UNNAMED_UPLOAD);

    match services.queue().submit(file.data.clone(), document_name, &printer) {
        Ok(id) => Response::json(
            200,
            &SubmitResponse {
                success: true,
                message: format!("print job queued: {document_name}"),
                job_id: Some(id.to_string()),
            },
        ),
        Err(e @ WeighbridgeError::EmptyDocument) => SubmitResponse::failed(400, e.to_string()),
        Err(e) => {
            warn!(error = %e, "print submission failed");
            SubmitResponse::failed(500, e.to_string())
        }
    }
}

fn job_status(request: &Request, services: &AppServices) -> Response {
    let Some(raw) = request.query_param("job_id").filter(|id| !id.is_empty()) else {
        return Response::text(400, "missing job_id parameter");
    };
    let Some(id) = JobId::parse(&raw) else {
        return Response::text(400, "invalid job_id");
    };
    match services.queue().status(id) {
        Some(job) => Response::json(200, &JobView::from(&job)),
        None => Response::text(404, "job not found"),
    }
}

fn queue_status(services: &AppServices) -> Response {
    let snapshot: QueueSnapshot = services.queue().snapshot();
    Response::json(200, &snapshot)
}
