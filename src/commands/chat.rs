use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::doc_processor::load_document;
use crate::error::ApiError;
use crate::pipeline::{Exchange, Outcome};
use crate::server::AppState;
use crate::session::models::{SessionId, Turn};

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: Option<String>,
    pub session_id: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
    pub session_id: String,
}

/// Answer one question about one stored document.
pub async fn send(
    State(state): State<AppState>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(body) = body?;
    let question = body
        .message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Message is required".into()))?
        .to_string();
    let key = body
        .key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Document key is required".into()))?
        .to_string();
    let session_id = match body.session_id.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => SessionId::parse(raw)?,
        _ => SessionId::generate(),
    };

    let _permit = state
        .limiter
        .acquire()
        .await
        .map_err(|e| ApiError::Internal(format!("exchange limiter closed: {e}")))?;

    let outcome = tokio::time::timeout(
        state.exchange_timeout,
        run_exchange(&state, &session_id, &key, &question),
    )
    .await
    .map_err(|_| {
        tracing::warn!(session_id = %session_id, key = %key, "exchange timed out");
        ApiError::Timeout
    })??;

    let response = match outcome {
        Outcome::Answered(answer) => {
            state
                .sessions
                .append_exchange(&session_id, &question, &answer.text)
                .await?;
            answer.text
        }
        Outcome::Refused(refusal) => {
            let text = refusal.message().to_string();
            if state.settings.record_refusals {
                state
                    .sessions
                    .append_exchange(&session_id, &question, &text)
                    .await?;
            }
            text
        }
    };

    Ok(Json(ChatReply {
        response,
        session_id: session_id.to_string(),
    }))
}

async fn run_exchange(
    state: &AppState,
    session_id: &SessionId,
    key: &str,
    question: &str,
) -> Result<Outcome, ApiError> {
    let document = load_document(state.store.as_ref(), state.extractor.as_ref(), key).await?;
    let transcript = state.sessions.load(session_id).await?;
    let history = recent(&transcript, state.settings.history_turns);

    tracing::info!(
        session_id = %session_id,
        key = %document.key,
        history = history.len(),
        "running exchange"
    );
    let outcome = state
        .pipeline
        .run(&Exchange {
            question,
            document: &document.text,
            history,
        })
        .await?;
    Ok(outcome)
}

/// The last `limit` turns of a transcript.
fn recent(transcript: &[Turn], limit: usize) -> &[Turn] {
    &transcript[transcript.len().saturating_sub(limit)..]
}
