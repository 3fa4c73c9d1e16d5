//! Credential-substituting reverse proxy in front of the LLM gateway.
//!
//! The agent host calls these routes with a shared secret and an agent
//! reference; the proxy swaps the secret for the owning user's gateway
//! credential before forwarding. The shared secret never reaches the
//! gateway, and the user credential never reaches the agent host.

use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::convert::Infallible;
use tracing::{debug, instrument};

use crate::directory::UserProfile;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Check the shared proxy secret before anything else touches the request.
fn require_shared_secret(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let header_value = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing proxy authorization"))?;

    let token = header_value
        .strip_prefix("Bearer ")
        .or_else(|| header_value.strip_prefix("bearer "))
        .ok_or_else(|| ApiError::unauthorized("Invalid proxy authorization"))?;

    if token != state.proxy.shared_secret {
        return Err(ApiError::unauthorized("Invalid proxy secret"));
    }

    Ok(())
}

/// Resolve an agent reference to its owning profile, or 404.
async fn resolve_agent(state: &AppState, agent_ref: &str) -> Result<UserProfile, ApiError> {
    state
        .directory
        .resolve_by_agent_ref(agent_ref)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No user for agent: {agent_ref}")))
}

/// Proxy a chat completion, streaming or buffered per the request body.
///
/// POST /llm-proxy/{agent_ref}/chat/completions
#[instrument(skip(state, headers, body))]
pub async fn proxy_chat_completions(
    State(state): State<AppState>,
    Path(agent_ref): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<Response> {
    require_shared_secret(&state, &headers)?;

    let profile = resolve_agent(&state, &agent_ref).await?;
    let credential = profile
        .gateway_key
        .ok_or_else(|| ApiError::not_found(format!("No credential for agent: {agent_ref}")))?;

    let streaming = body
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if streaming {
        debug!("Streaming completion for agent {}", agent_ref);
        let upstream = state.gateway.completion_stream(&body, &credential).await?;

        let response = Response::builder()
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header("x-accel-buffering", "no")
            .body(Body::from_stream(upstream.map(Ok::<_, Infallible>)))
            .map_err(|e| ApiError::internal(e.to_string()))?;
        Ok(response)
    } else {
        let value = state.gateway.completion(&body, &credential).await?;
        Ok(Json(value).into_response())
    }
}

/// Proxy an embeddings call. Always buffered.
///
/// POST /llm-proxy/{agent_ref}/embeddings
#[instrument(skip(state, headers, body))]
pub async fn proxy_embeddings(
    State(state): State<AppState>,
    Path(agent_ref): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    require_shared_secret(&state, &headers)?;

    let profile = resolve_agent(&state, &agent_ref).await?;
    let credential = profile
        .gateway_key
        .ok_or_else(|| ApiError::not_found(format!("No credential for agent: {agent_ref}")))?;

    let value = state.gateway.embeddings(&body, &credential).await?;
    Ok(Json(value))
}

/// Diagnostic response for one agent mapping.
#[derive(Debug, Serialize)]
pub struct ProxyTestResponse {
    pub agent_ref: String,
    pub user_id: String,
    pub name: String,
    pub has_credential: bool,
    /// First characters of the credential only; never the full key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_preview: Option<String>,
    /// Whether the agent host currently knows this agent.
    pub agent_online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_model: Option<String>,
}

/// Check that an agent reference resolves, without touching the gateway.
///
/// GET /llm-proxy/{agent_ref}/test
#[instrument(skip(state, headers))]
pub async fn proxy_test(
    State(state): State<AppState>,
    Path(agent_ref): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<ProxyTestResponse>> {
    require_shared_secret(&state, &headers)?;

    let profile = resolve_agent(&state, &agent_ref).await?;

    // Best-effort host lookup; the mapping is still reported if the host
    // is down.
    let status = state.agent.agent_status(&agent_ref).await.ok();

    Ok(Json(ProxyTestResponse {
        agent_ref,
        user_id: profile.id.clone(),
        name: profile.name.clone(),
        has_credential: profile.gateway_key.is_some(),
        credential_preview: profile.key_preview(),
        agent_online: status.is_some(),
        agent_model: status.and_then(|s| s.model),
    }))
}
