//! Long-term memory endpoints: checkpoints, episodes, facts, recovery

use crate::api::AppState;
use crate::models::SemanticFact;
use crate::store::memory_db::new_event_id;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct CheckpointQuery {
    pub limit: Option<usize>,
}

pub async fn get_checkpoints(
    Query(params): Query<CheckpointQuery>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let checkpoints = state
        .memory
        .list_checkpoints(params.limit.unwrap_or(20))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(json!({
        "total_checkpoints": checkpoints.len(),
        "checkpoints": checkpoints,
    })))
}

#[derive(Debug, Deserialize)]
pub struct EpisodeQuery {
    pub sku: Option<String>,
    pub limit: Option<usize>,
}

pub async fn get_episodes(
    Query(params): Query<EpisodeQuery>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let episodes = state
        .memory
        .list_episodes(params.sku.as_deref(), params.limit.unwrap_or(50))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(json!({ "total": episodes.len(), "episodes": episodes })))
}

#[derive(Debug, Deserialize)]
pub struct FactQuery {
    pub category: Option<String>,
    pub sku: Option<String>,
    pub min_confidence: Option<f64>,
}

pub async fn get_facts(
    Query(params): Query<FactQuery>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let facts = if let Some(sku) = &params.sku {
        state.memory.facts_for_sku(sku)
    } else if let Some(category) = &params.category {
        state
            .memory
            .facts_by_category(category, params.min_confidence.unwrap_or(0.0))
    } else {
        return Err(StatusCode::BAD_REQUEST);
    }
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(json!({ "total": facts.len(), "facts": facts })))
}

#[derive(Debug, Deserialize)]
pub struct FactCreate {
    pub category: String,
    pub key: String,
    pub value: serde_json::Value,
    pub confidence: Option<f64>,
    pub source: Option<String>,
}

pub async fn post_facts(
    State(state): State<AppState>,
    Json(body): Json<FactCreate>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let confidence = body.confidence.unwrap_or(1.0);
    if !(0.0..=1.0).contains(&confidence) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let fact = SemanticFact {
        fact_id: new_event_id("fact"),
        timestamp: Utc::now(),
        category: body.category,
        key: body.key,
        value: body.value,
        confidence,
        source: body.source,
    };
    state
        .memory
        .store_fact(&fact)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(json!({ "message": "Fact stored", "data": { "fact_id": fact.fact_id } })))
}

/// POST /persistence/recovery/initiate - report the checkpoint the agent
/// would resume from. Only stable checkpoints qualify; stage state is
/// never resumable mid-cycle.
pub async fn initiate_recovery(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let checkpoint = state
        .memory
        .latest_stable_checkpoint()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    match checkpoint {
        Some(checkpoint) => Ok(Json(json!({
            "status": "ready_for_recovery",
            "checkpoint_id": checkpoint.checkpoint_id,
            "cycle_number": checkpoint.cycle_number,
            "goal": checkpoint.goal,
            "next_cycle": checkpoint.cycle_number + 1,
        }))),
        None => Ok(Json(json!({
            "status": "no_recovery",
            "message": "No stable checkpoint found. Agent will start fresh.",
        }))),
    }
}
