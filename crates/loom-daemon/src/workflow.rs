// SPDX-License-Identifier: MIT OR Apache-2.0
//! Workflow endpoints: submit, status poll, status stream, result fetch,
//! cancellation, and ingestion status.

use crate::api::{ApiError, ResultBody, StatusBody, SubmitBody, SubmitResponse};
use crate::state::AppState;
use axum::extract::{Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::sse::{Event as SseEvent, KeepAlive, KeepAliveStream, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Json, RequestExt, extract::Request};
use loom_core::{Ingestion, InitialState, JobResult, JobStatus, SubmitPayload, UploadRef};
use loom_error::ErrorCode;
use loom_jobstore::JobPatch;
use loom_transport::{OpContext, collections};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;
use uuid::Uuid;

/// Heartbeat interval for the status stream.
const STREAM_HEARTBEAT: Duration = Duration::from_secs(15);

/// `POST /workflow/submit`, accepting JSON or multipart.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, ApiError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    if is_multipart {
        let multipart = request
            .extract::<Multipart, _>()
            .await
            .map_err(|e| ApiError::new(ErrorCode::ValidationFailed, e.to_string()))?;
        submit_multipart(state, multipart).await
    } else {
        let Json(body) = request
            .extract::<Json<SubmitBody>, _>()
            .await
            .map_err(|e| ApiError::new(ErrorCode::ValidationFailed, e.to_string()))?;
        submit_json(state, body).await
    }
}

async fn submit_json(state: Arc<AppState>, body: SubmitBody) -> Result<Response, ApiError> {
    do_submit(
        state,
        body.project_id,
        SubmitPayload {
            text: body.text,
            pdf_path: body.pdf_path,
            rigor_level: body.rigor_level,
            deadline_secs: body.deadline_secs,
            ..SubmitPayload::default()
        },
        None,
    )
    .await
}

async fn submit_multipart(state: Arc<AppState>, mut multipart: Multipart) -> Result<Response, ApiError> {
    let mut project_id: Option<String> = None;
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut rigor_level = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(ErrorCode::ValidationFailed, e.to_string()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("project_id") => {
                project_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::new(ErrorCode::ValidationFailed, e.to_string()))?,
                );
            }
            Some("rigor_level") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| ApiError::new(ErrorCode::ValidationFailed, e.to_string()))?;
                rigor_level = serde_json::from_value(json!(raw)).ok();
            }
            Some("file") => {
                let filename = field
                    .file_name()
                    .unwrap_or("upload.pdf")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::new(ErrorCode::ValidationFailed, e.to_string()))?;
                file = Some((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }

    do_submit(
        state,
        project_id,
        SubmitPayload {
            rigor_level,
            ..SubmitPayload::default()
        },
        file,
    )
    .await
}

async fn do_submit(
    state: Arc<AppState>,
    project_id: Option<String>,
    mut payload: SubmitPayload,
    upload: Option<(String, Vec<u8>)>,
) -> Result<Response, ApiError> {
    let raw_id = project_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(ApiError::missing_project)?;
    let project_id =
        Uuid::parse_str(raw_id.trim()).map_err(|_| ApiError::project_not_found(&raw_id))?;

    // Resolve the project first so an unknown id records nothing.
    let mut project = state.registry.get(project_id).await?;

    let mut ingestion_id = None;
    if let Some((filename, bytes)) = upload {
        let digest = Sha256::digest(&bytes);
        let content_hash: String = digest.iter().map(|b| format!("{b:02x}")).collect();

        let stored_path = state.upload_root.join(format!("{content_hash}.pdf"));
        tokio::fs::create_dir_all(&state.upload_root)
            .await
            .map_err(|e| ApiError::new(ErrorCode::Internal, format!("stage upload: {e}")))?;
        tokio::fs::write(&stored_path, &bytes)
            .await
            .map_err(|e| ApiError::new(ErrorCode::Internal, format!("stage upload: {e}")))?;

        // Seed-file registration precedes job creation so the snapshot
        // captures the new entry.
        project = state
            .registry
            .add_seed_file(project_id, &filename, &content_hash)
            .await?;

        let ingestion = Ingestion::queued(project_id, &filename, &content_hash);
        let cx = OpContext::with_timeout(Duration::from_secs(10));
        state
            .services
            .graph
            .put_doc(
                &cx,
                collections::INGESTIONS,
                &ingestion.id.to_string(),
                serde_json::to_value(&ingestion)
                    .map_err(|e| ApiError::new(ErrorCode::Internal, e.to_string()))?,
            )
            .await
            .map_err(|e| ApiError::new(ErrorCode::ServiceUnavailable, e.to_string()))?;

        ingestion_id = Some(ingestion.id);
        payload.upload = Some(UploadRef {
            filename,
            content_hash,
            stored_path: stored_path.to_string_lossy().into_owned(),
        });
        payload.ingestion_id = ingestion_id;
    }

    let initial = InitialState {
        request: payload,
        project_context: project,
    };
    let initial_state = serde_json::to_value(&initial)
        .map_err(|e| ApiError::new(ErrorCode::Internal, e.to_string()))?;

    // Reserve the queue slot before creating the job: an overflow must
    // reject the submission without recording one.
    let permit = state.pool.try_reserve()?;
    let job_id = state
        .jobs
        .create_job(project_id, ingestion_id, initial_state)
        .await?;
    state
        .jobs
        .transition(job_id, JobStatus::Pending, JobStatus::Queued, JobPatch::default())
        .await?;
    permit.send(job_id);

    if let Some(ingestion_id) = ingestion_id {
        link_ingestion_job(&state, ingestion_id, job_id).await;
    }

    info!(target: "loom.daemon", job_id = %job_id, project_id = %project_id, "job accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id,
            ingestion_id,
        }),
    )
        .into_response())
}

async fn link_ingestion_job(state: &AppState, ingestion_id: Uuid, job_id: Uuid) {
    let cx = OpContext::with_timeout(Duration::from_secs(5));
    let Ok(Some(doc)) = state
        .services
        .graph
        .get_doc(&cx, collections::INGESTIONS, &ingestion_id.to_string())
        .await
    else {
        return;
    };
    let Ok(mut ingestion) = serde_json::from_value::<Ingestion>(doc) else {
        return;
    };
    ingestion.job_id = Some(job_id);
    if let Ok(doc) = serde_json::to_value(&ingestion) {
        let _ = state
            .services
            .graph
            .put_doc(&cx, collections::INGESTIONS, &ingestion_id.to_string(), doc)
            .await;
    }
}

/// `GET /workflow/status/{job_id}`.
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<StatusBody>, ApiError> {
    let record = state
        .jobs
        .read(job_id)
        .await
        .ok_or_else(|| ApiError::job_not_found(job_id))?;
    Ok(Json(StatusBody::from(&record)))
}

/// `GET /workflow/result/{job_id}`: the terminal contract.
pub async fn job_result(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let record = state
        .jobs
        .read(job_id)
        .await
        .ok_or_else(|| ApiError::job_not_found(job_id))?;

    match record.status {
        JobStatus::Pending | JobStatus::Queued | JobStatus::Running => Ok((
            StatusCode::ACCEPTED,
            Json(StatusBody::from(&record)),
        )
            .into_response()),
        JobStatus::Failed | JobStatus::Cancelled => {
            let message = record.error.unwrap_or_else(|| "job failed".to_string());
            Err(ApiError::new(ErrorCode::StageFailed, message)
                .with_status(StatusCode::INTERNAL_SERVER_ERROR))
        }
        JobStatus::Succeeded => {
            // Normalization guarantees triples presence even on an empty run.
            let result = record.result.unwrap_or_else(|| JobResult::normalized(Vec::new(), None));
            Ok((
                StatusCode::OK,
                Json(ResultBody {
                    status: JobStatus::Succeeded,
                    result,
                }),
            )
                .into_response())
        }
    }
}

/// `GET /workflow/status/{job_id}/stream`: SSE, one frame per snapshot
/// change, closed after the terminal frame.
pub async fn job_status_stream(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Sse<KeepAliveStream<ReceiverStream<Result<SseEvent, Infallible>>>>, ApiError> {
    let (snapshot, mut rx) = state
        .jobs
        .subscribe(job_id)
        .await
        .ok_or_else(|| ApiError::job_not_found(job_id))?;

    let (tx, out) = mpsc::channel::<Result<SseEvent, Infallible>>(16);
    tokio::spawn(async move {
        let terminal = snapshot.status.is_terminal();
        if tx.send(Ok(status_event(&snapshot))).await.is_err() || terminal {
            return;
        }
        loop {
            match rx.recv().await {
                Ok(update) => {
                    let terminal = update.status.is_terminal();
                    if tx.send(Ok(status_event(&update))).await.is_err() || terminal {
                        return;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    });

    Ok(Sse::new(ReceiverStream::new(out)).keep_alive(KeepAlive::new().interval(STREAM_HEARTBEAT)))
}

fn status_event(record: &loom_core::JobRecord) -> SseEvent {
    let body = StatusBody::from(record);
    SseEvent::default()
        .json_data(&body)
        .unwrap_or_else(|_| SseEvent::default().data("{}"))
}

/// `POST /workflow/cancel/{job_id}`: write the cancellation intent.
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let record = state.jobs.request_cancel(job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(StatusBody::from(&record))).into_response())
}

/// `GET /api/projects/{project_id}/ingest/{ingestion_id}/status`.
pub async fn ingestion_status(
    State(state): State<Arc<AppState>>,
    Path((project_id, ingestion_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Ingestion>, ApiError> {
    let cx = OpContext::with_timeout(Duration::from_secs(10));
    let doc = state
        .services
        .graph
        .get_doc(&cx, collections::INGESTIONS, &ingestion_id.to_string())
        .await
        .map_err(|e| ApiError::new(ErrorCode::ServiceUnavailable, e.to_string()))?
        .ok_or_else(|| {
            ApiError::new(
                ErrorCode::IngestionNotFound,
                format!("ingestion {ingestion_id} not found"),
            )
        })?;
    let ingestion: Ingestion = serde_json::from_value(doc)
        .map_err(|e| ApiError::new(ErrorCode::Internal, e.to_string()))?;
    if ingestion.project_id != project_id {
        return Err(ApiError::new(
            ErrorCode::IngestionNotFound,
            format!("ingestion {ingestion_id} not found"),
        ));
    }
    Ok(Json(ingestion))
}
