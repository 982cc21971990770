//! JSON API over the accounting engine.
//!
//! Handlers translate request bodies into engine commands. Grants are only
//! queued here; crediting happens on the engine's consumer.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use runtime::work_queue::MANUAL_REASON;
use runtime::{ConfigPatch, Contribution, Engine, EngineSnapshot};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub type ApiError = (StatusCode, Json<Value>);
pub type ApiResult = Result<Json<Value>, ApiError>;

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Unwraps a request body; bodies that are not valid JSON for `T` get a 400
/// with an error message.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => Err(api_error(StatusCode::BAD_REQUEST, rejection.body_text())),
    }
}

/// Reads a grant amount leniently: anything that is not a number counts as
/// zero seconds, fractions are truncated.
pub fn coerce_whole(value: &Value) -> i64 {
    if let Some(v) = value.as_i64() {
        return v;
    }
    match value.as_f64() {
        Some(v) if v.is_finite() => v.trunc() as i64,
        _ => 0,
    }
}

/// Distinguishes a field set to `null` from a missing one.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

pub async fn count_requests(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    state.engine.stats().record_request();
    next.run(request).await
}

pub async fn healthz() -> Response {
    (StatusCode::OK, "ok").into_response()
}

pub async fn get_timer(State(state): State<AppState>) -> Json<EngineSnapshot> {
    Json(state.engine.snapshot())
}

fn state_reply(engine: &Engine) -> Json<Value> {
    Json(json!({ "success": true, "data": engine.snapshot().state }))
}

fn ok_reply() -> Json<Value> {
    Json(json!({ "success": true }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimerUpdate {
    pub config: Option<ConfigPatch>,
    #[serde(deserialize_with = "present")]
    pub goal_timestamp: Option<Option<i64>>,
    #[serde(deserialize_with = "present")]
    pub start_timestamp: Option<Option<i64>>,
}

pub async fn update_timer(
    State(state): State<AppState>,
    payload: Result<Json<TimerUpdate>, JsonRejection>,
) -> ApiResult {
    let update = json_body(payload)?;
    let engine = &state.engine;
    if let Some(patch) = update.config {
        engine.set_config(patch).await;
    }
    if let Some(goal) = update.goal_timestamp {
        engine.set_goal_deadline(goal).await;
    }
    if let Some(start) = update.start_timestamp {
        engine.set_start_marker(start).await;
    }
    Ok(state_reply(engine))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AddTimeRequest {
    pub seconds: Value,
    pub reason: Option<String>,
    pub sub_info: Option<Contribution>,
}

pub async fn add_time(
    State(state): State<AppState>,
    payload: Result<Json<AddTimeRequest>, JsonRejection>,
) -> ApiResult {
    let req = json_body(payload)?;
    let reason = req.reason.as_deref().unwrap_or(MANUAL_REASON);
    let depth = state
        .engine
        .enqueue(coerce_whole(&req.seconds), reason, req.sub_info);
    Ok(Json(json!({ "success": true, "queued": true, "queueSize": depth })))
}

pub async fn add_event(
    State(state): State<AppState>,
    payload: Result<Json<Contribution>, JsonRejection>,
) -> ApiResult {
    let contribution = json_body(payload)?;
    let (seconds, depth) = state.engine.enqueue_contribution(contribution);
    Ok(Json(json!({ "success": true, "queued": true, "seconds": seconds, "queueSize": depth })))
}

pub async fn start(State(state): State<AppState>) -> Json<Value> {
    let running = state.engine.start().await;
    Json(json!({ "success": true, "isRunning": running }))
}

pub async fn pause(State(state): State<AppState>) -> Json<Value> {
    state.engine.pause().await;
    ok_reply()
}

pub async fn reset(State(state): State<AppState>) -> Json<Value> {
    state.engine.reset_counters().await;
    ok_reply()
}

pub async fn full_reset(State(state): State<AppState>) -> Json<Value> {
    state.engine.full_reset().await;
    ok_reply()
}

pub async fn reset_list(State(state): State<AppState>) -> Json<Value> {
    state.engine.clear_contribution_log().await;
    ok_reply()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SetTimeRequest {
    pub seconds: Value,
}

pub async fn set_time(
    State(state): State<AppState>,
    payload: Result<Json<SetTimeRequest>, JsonRejection>,
) -> ApiResult {
    let req = json_body(payload)?;
    state
        .engine
        .set_absolute_remaining(coerce_whole(&req.seconds))
        .await;
    Ok(state_reply(&state.engine))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SetGoalRequest {
    pub timestamp: Option<i64>,
}

pub async fn set_goal(
    State(state): State<AppState>,
    payload: Result<Json<SetGoalRequest>, JsonRejection>,
) -> ApiResult {
    let req = json_body(payload)?;
    state.engine.set_goal_deadline(req.timestamp).await;
    Ok(state_reply(&state.engine))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AddBitsRequest {
    pub bits: Value,
}

pub async fn add_bits(
    State(state): State<AppState>,
    payload: Result<Json<AddBitsRequest>, JsonRejection>,
) -> ApiResult {
    let req = json_body(payload)?;
    let bits = coerce_whole(&req.bits);
    if bits < 0 {
        return Err(api_error(StatusCode::BAD_REQUEST, "bits must not be negative"));
    }
    let total = state.engine.add_bits(bits as u64).await;
    Ok(Json(json!({ "success": true, "totalBits": total })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use foundation::time::ManualClock;
    use pretty_assertions::assert_eq;
    use runtime::persistence::SnapshotStore;
    use runtime::{BudgetState, EngineConfig};
    use tempfile::TempDir;

    const T: i64 = 1_700_000_000_000;

    fn app_state(dir: &TempDir) -> AppState {
        let engine = Engine::new(
            EngineConfig::default(),
            BudgetState::default(),
            SnapshotStore::new(dir.path().join("timer-data.json")),
            Arc::new(ManualClock::new(T)),
        );
        AppState {
            engine: Arc::new(engine),
        }
    }

    fn body<T: serde::de::DeserializeOwned>(v: Value) -> Result<Json<T>, JsonRejection> {
        Ok(Json(serde_json::from_value(v).unwrap()))
    }

    async fn raw_body<T>(content_type: &str, text: &'static str) -> Result<Json<T>, JsonRejection>
    where
        T: serde::de::DeserializeOwned,
    {
        use axum::extract::FromRequest;
        let request = axum::http::Request::builder()
            .method("POST")
            .header(axum::http::header::CONTENT_TYPE, content_type)
            .body(axum::body::Body::from(text))
            .unwrap();
        Json::<T>::from_request(request, &()).await
    }

    #[test]
    fn malformed_amounts_become_zero() {
        assert_eq!(coerce_whole(&json!(90)), 90);
        assert_eq!(coerce_whole(&json!(12.9)), 12);
        assert_eq!(coerce_whole(&json!(-4)), -4);
        assert_eq!(coerce_whole(&json!("sixty")), 0);
        assert_eq!(coerce_whole(&Value::Null), 0);
    }

    #[test]
    fn null_goal_is_distinct_from_missing() {
        let cleared: TimerUpdate =
            serde_json::from_value(json!({ "goalTimestamp": null })).unwrap();
        assert_eq!(cleared.goal_timestamp, Some(None));
        let untouched: TimerUpdate = serde_json::from_value(json!({})).unwrap();
        assert_eq!(untouched.goal_timestamp, None);
    }

    #[tokio::test]
    async fn add_time_only_queues() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);
        let reply = add_time(
            State(state.clone()),
            body(json!({
                "seconds": 120,
                "reason": "sub",
                "subInfo": { "username": "ada", "tier": 2 }
            })),
        )
        .await
        .unwrap();
        assert_eq!(reply.0["queueSize"], 1);
        assert_eq!(state.engine.snapshot().state.remaining_seconds, 0);

        let processed = state.engine.process_next().unwrap();
        assert!(processed.item.is_subscription());
        let snap = state.engine.snapshot();
        assert_eq!(snap.state.remaining_seconds, 120);
        assert_eq!(snap.state.total_contributors, 1);
    }

    #[tokio::test]
    async fn non_numeric_grant_is_credited_as_zero() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);
        add_time(State(state.clone()), body(json!({ "seconds": "lots" })))
            .await
            .unwrap();
        let processed = state.engine.process_next().unwrap();
        assert_eq!(processed.item.reason, "manual");
        assert_eq!(processed.result.credited, 0);
    }

    #[tokio::test]
    async fn events_are_priced_and_queued() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);
        let reply = add_event(
            State(state.clone()),
            body(json!({ "type": "bits", "username": "cheerer", "bits": 1000 })),
        )
        .await
        .unwrap();
        assert_eq!(reply.0["seconds"], 120);
        state.engine.process_next();
        let snap = state.engine.snapshot();
        assert_eq!(snap.state.remaining_seconds, 120);
        assert_eq!(snap.state.total_contributors, 0);
    }

    #[tokio::test]
    async fn timer_update_sets_and_clears_fields() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);
        update_timer(
            State(state.clone()),
            body(json!({
                "config": { "channel": "streamer", "timePerSub": 90 },
                "goalTimestamp": T + 60_000,
                "startTimestamp": T
            })),
        )
        .await
        .unwrap();
        let snap = state.engine.snapshot();
        assert_eq!(snap.state.config.channel, "streamer");
        assert_eq!(snap.state.config.seconds_per_tier1_sub, 90);
        assert_eq!(snap.state.config.seconds_per_tier2_sub, 120);
        assert_eq!(snap.state.goal_deadline_ms, Some(T + 60_000));
        assert_eq!(snap.max_addable, 60);

        update_timer(State(state.clone()), body(json!({ "goalTimestamp": null })))
            .await
            .unwrap();
        let snap = state.engine.snapshot();
        assert_eq!(snap.state.goal_deadline_ms, None);
        assert_eq!(snap.state.start_marker_ms, Some(T));
    }

    #[tokio::test]
    async fn set_time_is_clamped_by_goal() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);
        set_goal(State(state.clone()), body(json!({ "timestamp": T + 300_000 })))
            .await
            .unwrap();
        let reply = set_time(State(state.clone()), body(json!({ "seconds": 3600 })))
            .await
            .unwrap();
        assert_eq!(reply.0["data"]["totalSeconds"], 300);
        assert_eq!(reply.0["data"]["goalReached"], true);
    }

    #[tokio::test]
    async fn bits_only_touch_the_bits_total() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);
        let reply = add_bits(State(state.clone()), body(json!({ "bits": 250 })))
            .await
            .unwrap();
        assert_eq!(reply.0["totalBits"], 250);
        assert_eq!(state.engine.snapshot().state.remaining_seconds, 0);

        let err = add_bits(State(state.clone()), body(json!({ "bits": -5 })))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn commands_toggle_and_reset() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);
        set_time(State(state.clone()), body(json!({ "seconds": 50 })))
            .await
            .unwrap();
        start(State(state.clone())).await;
        assert!(state.engine.snapshot().state.is_running);
        pause(State(state.clone())).await;
        assert!(!state.engine.snapshot().state.is_running);

        add_time(
            State(state.clone()),
            body(json!({ "seconds": 60, "reason": "sub", "subInfo": {} })),
        )
        .await
        .unwrap();
        state.engine.process_next();
        reset_list(State(state.clone())).await;
        let snap = state.engine.snapshot();
        assert!(snap.state.contributions.is_empty());
        assert_eq!(snap.state.remaining_seconds, 110);

        reset(State(state.clone())).await;
        assert_eq!(state.engine.snapshot().state.remaining_seconds, 0);

        full_reset(State(state.clone())).await;
        let snap = state.engine.snapshot();
        assert_eq!(snap.state.config, runtime::TimerConfig::default());
        assert_eq!(snap.stats.queued_additions, 0);
    }

    #[tokio::test]
    async fn malformed_sub_info_still_queues() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);
        let reply = add_time(
            State(state.clone()),
            body(json!({
                "seconds": 60,
                "reason": "sub",
                "subInfo": { "username": "ada", "tier": "1000", "giftCount": -1 }
            })),
        )
        .await
        .unwrap();
        assert_eq!(reply.0["queueSize"], 1);

        let processed = state.engine.process_next().unwrap();
        let info = processed.item.contribution.unwrap();
        assert_eq!(info.username, "ada");
        assert_eq!(info.tier, 1);
        assert_eq!(info.gift_count, 0);
        assert_eq!(state.engine.snapshot().state.total_contributors, 1);
    }

    #[tokio::test]
    async fn malformed_bodies_get_json_errors() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);

        let (status, Json(err)) = add_time(
            State(state.clone()),
            raw_body("application/json", "{ not json").await,
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(err["error"].is_string());

        let (status, Json(err)) = set_goal(
            State(state.clone()),
            raw_body("text/plain", r#"{"timestamp": 1}"#).await,
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(err["error"].is_string());

        let (status, _) = set_goal(
            State(state.clone()),
            raw_body("application/json", r#"{"timestamp": "soon"}"#).await,
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.engine.queue_len(), 0);
    }
}
