//! Agent job control and live progress streaming
//!
//! `run_once` queues a cycle and returns immediately; `stream` serves
//! the cycle's event FIFO over SSE, polling the job row with short-lived
//! store access for terminal status. A `status` frame with completed or
//! failed closes the stream.

use crate::agent::events;
use crate::api::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::Json,
};
use chrono::Utc;
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tracing::error;

/// 10 minutes of 500 ms polls before the stream gives up.
const STREAM_MAX_POLLS: u32 = 1200;
const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub async fn run_once(State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    let job_id = state
        .scheduler
        .spawn_job()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(json!({
        "job_id": job_id,
        "status": "queued",
        "message": "Agent cycle started in background",
    })))
}

pub async fn get_job(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let job = state
        .jobs
        .get(&job_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(json!({
        "id": job.id,
        "status": job.status,
        "created_at": job.created_at,
        "started_at": job.started_at,
        "completed_at": job.completed_at,
        "result": job.result,
        "error": job.error,
        "summary": job.summary,
    })))
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    pub limit: Option<usize>,
}

pub async fn list_jobs(
    Query(params): Query<JobsQuery>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let jobs = state
        .jobs
        .list_recent(params.limit.unwrap_or(50))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let recent: Vec<serde_json::Value> = jobs
        .iter()
        .map(|j| {
            json!({
                "id": j.id,
                "status": j.status,
                "created_at": j.created_at,
                "completed_at": j.completed_at,
            })
        })
        .collect();

    Ok(Json(json!({ "total": recent.len(), "recent_jobs": recent })))
}

/// GET /agent/stream/{id} - server-sent events for a running job.
pub async fn stream_job(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Event>(64);

    tokio::spawn(async move {
        let connected = json!({
            "type": "connection",
            "job_id": job_id,
            "message": "📡 Connected to agent stream...",
            "timestamp": Utc::now(),
        });
        if tx.send(Event::default().data(connected.to_string())).await.is_err() {
            return;
        }

        let mut cursor = 0u64;
        let mut last_status: Option<String> = None;

        for _ in 0..STREAM_MAX_POLLS {
            // Short-lived status check against the job row; never hold
            // store access across poll iterations. The status is read
            // BEFORE the event drain: every bus event precedes the
            // terminal job write, so a terminal status here guarantees
            // the drain below sees the complete stream.
            let status_frame = match state.jobs.get(&job_id) {
                Ok(Some(job)) => {
                    if last_status.as_deref() != Some(job.status.as_str()) {
                        let mut frame = json!({
                            "type": "status",
                            "status": job.status,
                            "timestamp": Utc::now(),
                        });
                        if job.status == "completed" {
                            frame["message"] = json!("🎉 Agent cycle completed!");
                            if let Some(result) = &job.result {
                                frame["result"] = result.clone();
                            }
                        } else if job.status == "failed" {
                            frame["message"] =
                                json!(format!("⚠️ Failed: {}", job.error.as_deref().unwrap_or("unknown")));
                            frame["error"] = json!(job.error);
                        }
                        last_status = Some(job.status.clone());
                        Some((frame, job.status == "completed" || job.status == "failed"))
                    } else {
                        None
                    }
                }
                Ok(None) => {
                    let frame = json!({ "type": "error", "message": "Job not found" });
                    let _ = tx.send(Event::default().data(frame.to_string())).await;
                    break;
                }
                Err(e) => {
                    error!("Stream status check error: {e:#}");
                    None
                }
            };

            // Drain new bus events in emission order
            let (batch, next_cursor) = events::events_since(&job_id, cursor);
            cursor = next_cursor;
            for event in batch {
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!("Stream serialization error: {e}");
                        continue;
                    }
                };
                if tx.send(Event::default().data(payload)).await.is_err() {
                    return; // consumer went away
                }
            }

            // A terminal status frame closes the stream
            if let Some((frame, terminal)) = status_frame {
                if tx.send(Event::default().data(frame.to_string())).await.is_err() {
                    return;
                }
                if terminal {
                    break;
                }
            }

            tokio::time::sleep(STREAM_POLL_INTERVAL).await;
        }

        let close = json!({ "type": "close", "message": "Stream closed" });
        let _ = tx.send(Event::default().data(close.to_string())).await;
    });

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok(event), rx))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// GET /agent/finance-summary - aggregate finance posture over recent
/// completed cycles.
pub async fn finance_summary(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let jobs = state
        .jobs
        .list_completed(10)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut total_spent = 0.0;
    let mut approved_count = 0usize;
    let mut negotiated_count = 0usize;
    let mut roi_sum = 0.0;
    let mut roi_samples = 0usize;

    for job in &jobs {
        let Some(result) = &job.result else { continue };
        let decisions = result
            .get("decisions")
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default();
        for decision in &decisions {
            approved_count += 1;
            if decision.get("negotiated").and_then(|v| v.as_bool()) == Some(true) {
                negotiated_count += 1;
            }
            if let Some(metrics) = decision.get("finance_metrics") {
                if let Some(cost) = metrics.get("total_cost").and_then(|v| v.as_f64()) {
                    total_spent += cost;
                }
                if let Some(roi) = metrics.get("roi").and_then(|v| v.as_f64()) {
                    roi_sum += roi;
                    roi_samples += 1;
                }
            }
        }
    }

    let avg_roi = if roi_samples > 0 {
        roi_sum / roi_samples as f64
    } else {
        0.0
    };

    Ok(Json(json!({
        "cycles_analyzed": jobs.len(),
        "approved_count": approved_count,
        "negotiated_count": negotiated_count,
        "total_spent": total_spent,
        "avg_roi": (avg_roi * 100.0).round() / 100.0,
    })))
}
