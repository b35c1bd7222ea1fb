//! REST API endpoints for the airwatch-service.
//!
//! # Concurrency and Lock Acquisition
//!
//! - **`state.store`** (Mutex): held only for the database calls of a handler,
//!   never across alert delivery.
//! - **`state.config`** (RwLock): read lock only.
//!
//! When both are needed, `config` is acquired before `store`.
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]. Validation
//! failures return 400, unknown cities and subscriptions 404, and store
//! failures 500.
//!
//! # Example
//!
//! ```ignore
//! use airwatch_service::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use airwatch_core::{
    Category, Classification, DispatchReport, Reading, SentAlert, Subscription,
    WindowSummary, aggregate_trailing, aqi_from_pm25,
};
use airwatch_store::{CityRanking, ReadingQuery, StoredCity, StoredReading};
use airwatch_types::AqiRange;

use crate::alerts::dispatch_reading;
use crate::state::{AppState, DispatchStatsSnapshot};

/// Default and maximum trailing window for reading and stats queries.
const DEFAULT_WINDOW_HOURS: i64 = 24;
const MAX_WINDOW_HOURS: i64 = 24 * 365;
/// Default and maximum result sizes for list endpoints.
const DEFAULT_TOP_CITIES: u32 = 10;
const DEFAULT_ALERT_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 500;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // Health and status
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        // Classification
        .route("/api/aqi/classify", get(classify_aqi))
        .route("/api/aqi/categories", get(list_categories))
        // Cities and readings
        .route("/api/cities", get(list_cities))
        .route("/api/cities/top", get(top_cities))
        .route("/api/cities/{city}", put(update_city))
        .route(
            "/api/cities/{city}/readings",
            post(ingest_reading).get(get_readings),
        )
        .route("/api/cities/{city}/current", get(get_current))
        .route("/api/cities/{city}/stats", get(get_stats))
        .route("/api/cities/{city}/alerts", get(get_alerts))
        // Subscriptions
        .route(
            "/api/subscriptions",
            post(subscribe).get(list_subscriptions),
        )
        .route("/api/subscriptions/unsubscribe", post(unsubscribe))
        .route("/api/subscriptions/{id}", put(update_subscription))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Service status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub scheduler: SchedulerStatus,
    /// Name of the active notifier.
    pub notifier: String,
    pub dispatch: DispatchStatsSnapshot,
    pub cities: usize,
    pub active_subscriptions: u64,
}

/// Scheduler status.
#[derive(Debug, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_secs: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_run_at: Option<OffsetDateTime>,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, AppError> {
    let interval_secs = state.config.read().await.alerts.check_interval_secs;
    let (cities, active_subscriptions) = {
        let store = state.store.lock().await;
        (store.list_cities()?.len(), store.count_active_subscriptions()?)
    };

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
        scheduler: SchedulerStatus {
            running: state.scheduler.is_running(),
            interval_secs,
            started_at: state.scheduler.started_at(),
            last_run_at: state.scheduler.last_run_at(),
        },
        notifier: state.notifier.name().to_string(),
        dispatch: state.stats.snapshot(),
        cities,
        active_subscriptions,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ClassifyQuery {
    pub aqi: f64,
}

async fn classify_aqi(
    Query(params): Query<ClassifyQuery>,
) -> Result<Json<Classification>, AppError> {
    Ok(Json(Classification::of(params.aqi)?))
}

/// One row of the category table.
#[derive(Debug, Serialize)]
pub struct CategoryInfo {
    pub category: Category,
    pub label: &'static str,
    pub severity_rank: u8,
    pub color_token: &'static str,
    pub advisory: &'static str,
    pub range: AqiRange,
}

async fn list_categories() -> Json<Vec<CategoryInfo>> {
    let categories = Category::ALL
        .iter()
        .map(|&category| CategoryInfo {
            category,
            label: category.label(),
            severity_rank: category.severity_rank(),
            color_token: category.color_token(),
            advisory: category.advisory(),
            range: category.range(),
        })
        .collect();
    Json(categories)
}

async fn list_cities(State(state): State<Arc<AppState>>) -> Result<Json<Vec<StoredCity>>, AppError> {
    let store = state.store.lock().await;
    Ok(Json(store.list_cities()?))
}

#[derive(Debug, Deserialize, Default)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

impl LimitQuery {
    fn resolve(&self, default: u32) -> Result<u32, AppError> {
        match self.limit {
            None => Ok(default),
            Some(limit) if (1..=MAX_LIST_LIMIT).contains(&limit) => Ok(limit),
            Some(limit) => Err(AppError::BadRequest(format!(
                "limit {} must be between 1 and {}",
                limit, MAX_LIST_LIMIT
            ))),
        }
    }
}

async fn top_cities(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<CityRanking>>, AppError> {
    let limit = params.resolve(DEFAULT_TOP_CITIES)?;
    let store = state.store.lock().await;
    Ok(Json(store.top_cities(limit)?))
}

/// Body of `PUT /api/cities/{city}`.
#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateCityRequest {
    pub active: bool,
}

/// Show or hide a city in the rankings.
async fn update_city(
    State(state): State<Arc<AppState>>,
    Path(city): Path<String>,
    Json(request): Json<UpdateCityRequest>,
) -> Result<Json<StoredCity>, AppError> {
    let store = state.store.lock().await;
    store.set_city_active(&city, request.active)?;
    let updated = store
        .get_city(&city)?
        .ok_or_else(|| AppError::NotFound(format!("City {} not found", city)))?;
    Ok(Json(updated))
}

/// Body of `POST /api/cities/{city}/readings`.
///
/// `aqi` is derived from `pm25` when omitted; one of the two is required.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestReadingRequest {
    pub aqi: Option<f64>,
    pub pm25: Option<f64>,
    pub pm10: f64,
    pub co: f64,
    pub no2: f64,
    pub o3: f64,
    pub so2: f64,
    pub nh3: f64,
    /// Observation time; defaults to now.
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

impl IngestReadingRequest {
    fn into_reading(self) -> Result<Reading, AppError> {
        let aqi = match (self.aqi, self.pm25) {
            (Some(aqi), _) => aqi,
            (None, Some(pm25)) => aqi_from_pm25(pm25)?,
            (None, None) => {
                return Err(AppError::BadRequest(
                    "either aqi or pm25 is required".to_string(),
                ));
            }
        };
        // Stored at second precision; evaluate what will be stored.
        let observed = self.timestamp.unwrap_or_else(OffsetDateTime::now_utc);
        let timestamp = OffsetDateTime::from_unix_timestamp(observed.unix_timestamp())
            .map_err(|e| AppError::BadRequest(format!("invalid timestamp: {}", e)))?;

        Ok(Reading::builder()
            .aqi(aqi)
            .pm25(self.pm25.unwrap_or(0.0))
            .pm10(self.pm10)
            .co(self.co)
            .no2(self.no2)
            .o3(self.o3)
            .so2(self.so2)
            .nh3(self.nh3)
            .timestamp(timestamp)
            .try_build()?)
    }
}

/// Response of `POST /api/cities/{city}/readings`.
///
/// The reading is stored before dispatch, so a dispatch that could not run
/// is reported in `dispatch_error` rather than as a failed request.
#[derive(Debug, Serialize)]
pub struct IngestReadingResponse {
    pub reading: StoredReading,
    pub classification: Classification,
    pub dispatch: Option<DispatchReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_error: Option<String>,
}

impl IngestReadingResponse {
    fn new(
        reading: StoredReading,
        classification: Classification,
        dispatch: airwatch_core::Result<DispatchReport>,
    ) -> Self {
        let (dispatch, dispatch_error) = match dispatch {
            Ok(report) => (Some(report), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            reading,
            classification,
            dispatch,
            dispatch_error,
        }
    }
}

/// Store a reading and dispatch alerts for it.
async fn ingest_reading(
    State(state): State<Arc<AppState>>,
    Path(city): Path<String>,
    Json(request): Json<IngestReadingRequest>,
) -> Result<(StatusCode, Json<IngestReadingResponse>), AppError> {
    let reading = request.into_reading()?;
    let classification = Classification::of(reading.aqi)?;

    let stored = {
        let store = state.store.lock().await;
        let id = store.insert_reading(&city, &reading)?;
        let name = store
            .get_city(&city)?
            .map(|c| c.name)
            .ok_or_else(|| AppError::NotFound(format!("City {} not found", city)))?;
        StoredReading {
            id,
            city: name,
            captured_at: reading.timestamp,
            aqi: reading.aqi,
            pm25: reading.pm25,
            pm10: reading.pm10,
            co: reading.co,
            no2: reading.no2,
            o3: reading.o3,
            so2: reading.so2,
            nh3: reading.nh3,
        }
    };

    let dispatch = dispatch_reading(&state, &stored.city, &reading).await;

    Ok((
        StatusCode::CREATED,
        Json(IngestReadingResponse::new(stored, classification, dispatch)),
    ))
}

/// Latest reading with its classification.
#[derive(Debug, Serialize)]
pub struct CurrentResponse {
    pub reading: StoredReading,
    pub classification: Classification,
}

async fn get_current(
    State(state): State<Arc<AppState>>,
    Path(city): Path<String>,
) -> Result<Json<CurrentResponse>, AppError> {
    let reading = {
        let store = state.store.lock().await;
        store.latest_reading(&city)?
    }
    .ok_or_else(|| AppError::NotFound(format!("No readings for city {}", city)))?;

    let classification = Classification::of(reading.aqi)?;
    Ok(Json(CurrentResponse {
        reading,
        classification,
    }))
}

/// Trailing window in hours.
#[derive(Debug, Deserialize, Default)]
pub struct WindowQuery {
    pub hours: Option<i64>,
}

impl WindowQuery {
    fn span(&self) -> Result<Duration, AppError> {
        let hours = self.hours.unwrap_or(DEFAULT_WINDOW_HOURS);
        if !(1..=MAX_WINDOW_HOURS).contains(&hours) {
            return Err(AppError::BadRequest(format!(
                "hours {} must be between 1 and {}",
                hours, MAX_WINDOW_HOURS
            )));
        }
        Ok(Duration::hours(hours))
    }
}

/// End of a trailing window, at the second precision readings are stored at.
fn window_end(now: OffsetDateTime) -> OffsetDateTime {
    now.replace_nanosecond(0).unwrap_or(now)
}

/// Readings of a known city in the window of `span` ending at `now`,
/// oldest first, along with the window end actually used.
async fn window_readings(
    state: &AppState,
    city: &str,
    now: OffsetDateTime,
    span: Duration,
) -> Result<(OffsetDateTime, Vec<StoredReading>), AppError> {
    let end = window_end(now);
    let store = state.store.lock().await;
    if store.get_city(city)?.is_none() {
        return Err(AppError::NotFound(format!("City {} not found", city)));
    }
    let query = ReadingQuery::new()
        .city(city)
        .since(end - span)
        .until(end)
        .oldest_first();
    Ok((end, store.query_readings(&query)?))
}

async fn window_stats(
    state: &AppState,
    city: &str,
    now: OffsetDateTime,
    span: Duration,
) -> Result<WindowSummary, AppError> {
    let (end, stored) = window_readings(state, city, now, span).await?;
    let readings: Vec<Reading> = stored.iter().map(StoredReading::to_reading).collect();
    Ok(aggregate_trailing(&readings, end, span)?)
}

async fn get_readings(
    State(state): State<Arc<AppState>>,
    Path(city): Path<String>,
    Query(params): Query<WindowQuery>,
) -> Result<Json<Vec<StoredReading>>, AppError> {
    let span = params.span()?;
    let (_, readings) = window_readings(&state, &city, OffsetDateTime::now_utc(), span).await?;
    Ok(Json(readings))
}

/// Peak, trough and mean AQI over the trailing window.
///
/// An empty window is `{"status": "empty"}`, never an AQI of zero.
async fn get_stats(
    State(state): State<Arc<AppState>>,
    Path(city): Path<String>,
    Query(params): Query<WindowQuery>,
) -> Result<Json<WindowSummary>, AppError> {
    let span = params.span()?;
    Ok(Json(
        window_stats(&state, &city, OffsetDateTime::now_utc(), span).await?,
    ))
}

async fn get_alerts(
    State(state): State<Arc<AppState>>,
    Path(city): Path<String>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<SentAlert>>, AppError> {
    let limit = params.resolve(DEFAULT_ALERT_LIMIT)?;
    let store = state.store.lock().await;
    if store.get_city(&city)?.is_none() {
        return Err(AppError::NotFound(format!("City {} not found", city)));
    }
    Ok(Json(store.list_alerts(Some(&city), limit)?))
}

/// Body of `POST /api/subscriptions`.
#[derive(Debug, Deserialize, Serialize)]
pub struct SubscribeRequest {
    pub email: String,
    pub city: String,
    pub threshold: Option<f64>,
    pub min_interval_hours: Option<f64>,
}

/// Create a subscription, or reactivate and update an existing one.
///
/// Returns 201 when a new subscription was created and 200 otherwise.
async fn subscribe(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubscribeRequest>,
) -> Result<(StatusCode, Json<Subscription>), AppError> {
    let store = state.store.lock().await;
    let outcome = store.subscribe(
        &request.email,
        &request.city,
        request.threshold,
        request.min_interval_hours,
    )?;

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.subscription)))
}

/// Body of `POST /api/subscriptions/unsubscribe`.
#[derive(Debug, Deserialize, Serialize)]
pub struct UnsubscribeRequest {
    pub email: String,
    pub city: String,
}

#[derive(Debug, Serialize)]
pub struct UnsubscribeResponse {
    pub unsubscribed: bool,
}

async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UnsubscribeRequest>,
) -> Result<Json<UnsubscribeResponse>, AppError> {
    let store = state.store.lock().await;
    if !store.unsubscribe(&request.email, &request.city)? {
        return Err(AppError::NotFound(format!(
            "No active subscription for {} in {}",
            request.email, request.city
        )));
    }
    Ok(Json(UnsubscribeResponse { unsubscribed: true }))
}

#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    pub email: String,
}

async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EmailQuery>,
) -> Result<Json<Vec<Subscription>>, AppError> {
    let store = state.store.lock().await;
    Ok(Json(store.list_subscriptions_by_email(&params.email)?))
}

/// Body of `PUT /api/subscriptions/{id}`.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct UpdateSubscriptionRequest {
    pub threshold: Option<f64>,
    pub min_interval_hours: Option<f64>,
}

async fn update_subscription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateSubscriptionRequest>,
) -> Result<Json<Subscription>, AppError> {
    if request.threshold.is_none() && request.min_interval_hours.is_none() {
        return Err(AppError::BadRequest(
            "nothing to update: provide threshold and/or min_interval_hours".to_string(),
        ));
    }
    let store = state.store.lock().await;
    Ok(Json(store.update_subscription(
        id,
        request.threshold,
        request.min_interval_hours,
    )?))
}

/// API error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Store(airwatch_store::Error),
    Internal(String),
}

impl From<airwatch_store::Error> for AppError {
    fn from(e: airwatch_store::Error) -> Self {
        match e {
            airwatch_store::Error::Validation(_) | airwatch_store::Error::InvalidCity(_) => {
                AppError::BadRequest(e.to_string())
            }
            airwatch_store::Error::CityNotFound(_)
            | airwatch_store::Error::SubscriptionNotFound(_) => AppError::NotFound(e.to_string()),
            other => AppError::Store(other),
        }
    }
}

impl From<airwatch_core::ValidationError> for AppError {
    fn from(e: airwatch_core::ValidationError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl From<airwatch_core::Error> for AppError {
    fn from(e: airwatch_core::Error) -> Self {
        match e {
            airwatch_core::Error::Validation(v) => v.into(),
            airwatch_core::Error::SubscriptionNotFound(_) => AppError::NotFound(e.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airwatch_core::MockNotifier;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::config::Config;

    fn create_test_state() -> (Arc<AppState>, Arc<MockNotifier>) {
        let store = airwatch_store::Store::open_in_memory().unwrap();
        let mut config = Config::default();
        config.alerts.delivery_retries = 0;
        let notifier = Arc::new(MockNotifier::new());
        let state = AppState::new(store, config, notifier.clone());
        (state, notifier)
    }

    async fn response_json(response: axum::response::Response) -> serde_json::Value {
        let body = response.into_body();
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn get(state: &Arc<AppState>, uri: &str) -> axum::response::Response {
        router()
            .with_state(Arc::clone(state))
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn send_json(
        state: &Arc<AppState>,
        method: &str,
        uri: &str,
        body: serde_json::Value,
    ) -> axum::response::Response {
        router()
            .with_state(Arc::clone(state))
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_string(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn seed(state: &Arc<AppState>, city: &str, aqi: f64, age: Duration) {
        let store = state.store.lock().await;
        let reading = Reading::builder()
            .aqi(aqi)
            .pm25(aqi / 2.0)
            .timestamp(OffsetDateTime::now_utc() - age)
            .build();
        store.insert_reading(city, &reading).unwrap();
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (state, _) = create_test_state();
        let response = get(&state, "/api/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let (state, _) = create_test_state();
        let response = get(&state, "/api/status").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert_eq!(json["scheduler"]["running"], false);
        assert_eq!(json["scheduler"]["interval_secs"], 300);
        assert!(json["scheduler"]["started_at"].is_null());
        assert_eq!(json["notifier"], "mock");
        assert_eq!(json["dispatch"]["sent"], 0);
        assert_eq!(json["active_subscriptions"], 0);
    }

    #[tokio::test]
    async fn test_classify_endpoint() {
        let (state, _) = create_test_state();
        let response = get(&state, "/api/aqi/classify?aqi=150").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert_eq!(json["category"], "UnhealthyForSensitive");
        assert_eq!(json["label"], "Unhealthy for Sensitive Groups");
        assert_eq!(json["severity_rank"], 2);
        assert_eq!(json["color_token"], "orange");
        assert!(json["advisory"].as_str().unwrap().len() > 10);
    }

    #[tokio::test]
    async fn test_classify_rejects_negative_aqi() {
        let (state, _) = create_test_state();
        let response = get(&state, "/api/aqi/classify?aqi=-1").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = response_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("non-negative"));
    }

    #[tokio::test]
    async fn test_categories_endpoint() {
        let (state, _) = create_test_state();
        let response = get(&state, "/api/aqi/categories").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        let categories = json.as_array().unwrap();
        assert_eq!(categories.len(), 6);
        assert_eq!(categories[0]["category"], "Good");
        assert_eq!(categories[0]["range"]["upper"], 50.0);
        assert_eq!(categories[5]["category"], "Hazardous");
        assert!(categories[5]["range"]["upper"].is_null());
    }

    #[tokio::test]
    async fn test_list_cities_empty() {
        let (state, _) = create_test_state();
        let response = get(&state, "/api/cities").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response_json(response).await.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_top_cities() {
        let (state, _) = create_test_state();
        seed(&state, "Delhi", 280.0, Duration::minutes(10)).await;
        seed(&state, "Oslo", 22.0, Duration::minutes(10)).await;
        seed(&state, "Lahore", 310.0, Duration::minutes(10)).await;

        let response = get(&state, "/api/cities/top?limit=2").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        let ranking = json.as_array().unwrap();
        assert_eq!(ranking.len(), 2);
        assert_eq!(ranking[0]["city"], "Lahore");
        assert_eq!(ranking[1]["city"], "Delhi");
    }

    #[tokio::test]
    async fn test_top_cities_rejects_zero_limit() {
        let (state, _) = create_test_state();
        let response = get(&state, "/api/cities/top?limit=0").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ingest_reading_dispatches_alert() {
        let (state, notifier) = create_test_state();
        let response = send_json(
            &state,
            "POST",
            "/api/subscriptions",
            serde_json::json!({"email": "asha@example.com", "city": "Delhi"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = send_json(
            &state,
            "POST",
            "/api/cities/delhi/readings",
            serde_json::json!({"aqi": 212.0, "pm25": 160.0, "pm10": 240.0}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let json = response_json(response).await;
        assert_eq!(json["reading"]["city"], "Delhi");
        assert_eq!(json["classification"]["category"], "VeryUnhealthy");
        assert_eq!(json["dispatch"]["outcomes"][0]["outcome"], "sent");
        assert_eq!(notifier.sent_count(), 1);

        let response = get(&state, "/api/cities/Delhi/alerts").await;
        assert_eq!(response.status(), StatusCode::OK);
        let alerts = response_json(response).await;
        assert_eq!(alerts.as_array().unwrap().len(), 1);
        assert_eq!(alerts[0]["email"], "asha@example.com");
    }

    #[tokio::test]
    async fn test_ingest_reading_below_threshold_is_suppressed() {
        let (state, notifier) = create_test_state();
        send_json(
            &state,
            "POST",
            "/api/subscriptions",
            serde_json::json!({"email": "asha@example.com", "city": "Delhi", "threshold": 200.0}),
        )
        .await;

        let response = send_json(
            &state,
            "POST",
            "/api/cities/Delhi/readings",
            serde_json::json!({"aqi": 180.0}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let json = response_json(response).await;
        assert_eq!(json["dispatch"]["outcomes"][0]["outcome"], "suppressed");
        assert_eq!(json["dispatch"]["outcomes"][0]["reason"], "below_threshold");
        assert_eq!(notifier.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_ingest_reading_derives_aqi_from_pm25() {
        let (state, _) = create_test_state();
        let response = send_json(
            &state,
            "POST",
            "/api/cities/Oslo/readings",
            serde_json::json!({"pm25": 12.0}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let json = response_json(response).await;
        assert_eq!(json["reading"]["aqi"], 50.0);
        assert_eq!(json["classification"]["category"], "Good");
        assert!(json["dispatch"]["outcomes"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ingest_reading_validation() {
        let (state, _) = create_test_state();

        let response = send_json(
            &state,
            "POST",
            "/api/cities/Oslo/readings",
            serde_json::json!({"pm10": 20.0}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send_json(
            &state,
            "POST",
            "/api/cities/Oslo/readings",
            serde_json::json!({"aqi": -5.0}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send_json(
            &state,
            "POST",
            "/api/cities/Oslo/readings",
            serde_json::json!({"aqi": 40.0, "co": -1.0}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let store = state.store.lock().await;
        assert_eq!(store.count_readings(None).unwrap(), 0);
    }

    #[test]
    fn test_dispatch_error_keeps_stored_reading() {
        let reading = StoredReading {
            id: 3,
            city: "Delhi".into(),
            captured_at: OffsetDateTime::UNIX_EPOCH,
            aqi: 212.0,
            pm25: 160.0,
            pm10: 0.0,
            co: 0.0,
            no2: 0.0,
            o3: 0.0,
            so2: 0.0,
            nh3: 0.0,
        };
        let classification = Classification::of(212.0).unwrap();
        let failed = airwatch_core::Error::store(std::io::Error::other("database is locked"));

        let response = IngestReadingResponse::new(reading, classification, Err(failed));
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["reading"]["id"], 3);
        assert!(json["dispatch"].is_null());
        assert!(
            json["dispatch_error"]
                .as_str()
                .unwrap()
                .contains("database is locked")
        );
    }

    #[tokio::test]
    async fn test_update_city_hides_from_rankings() {
        let (state, _) = create_test_state();
        seed(&state, "Delhi", 240.0, Duration::minutes(5)).await;
        seed(&state, "Oslo", 20.0, Duration::minutes(5)).await;

        let response = send_json(
            &state,
            "PUT",
            "/api/cities/delhi",
            serde_json::json!({"active": false}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["name"], "Delhi");
        assert_eq!(json["active"], false);

        let response = get(&state, "/api/cities/top").await;
        let top = response_json(response).await;
        assert_eq!(top.as_array().unwrap().len(), 1);
        assert_eq!(top[0]["city"], "Oslo");

        let response = send_json(
            &state,
            "PUT",
            "/api/cities/Nowhere",
            serde_json::json!({"active": true}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_window_end_drops_subseconds() {
        let now = OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000)
            + Duration::milliseconds(640);
        let end = window_end(now);
        assert_eq!(end.unix_timestamp(), now.unix_timestamp());
        assert_eq!(end.nanosecond(), 0);
    }

    #[tokio::test]
    async fn test_readings_and_stats_share_window() {
        let (state, _) = create_test_state();
        let now = OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000)
            + Duration::milliseconds(640);
        let edge = window_end(now) - Duration::hours(1);
        {
            let store = state.store.lock().await;
            for (aqi, at) in [(80.0, edge), (120.0, edge + Duration::minutes(30))] {
                let reading = Reading::builder().aqi(aqi).timestamp(at).build();
                store.insert_reading("Delhi", &reading).unwrap();
            }
        }

        let (end, listed) = window_readings(&state, "Delhi", now, Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(end, window_end(now));
        assert_eq!(listed.len(), 2);

        match window_stats(&state, "Delhi", now, Duration::hours(1)).await.unwrap() {
            WindowSummary::Stats(stats) => {
                assert_eq!(stats.total_readings, 2);
                assert_eq!(stats.min.aqi, 80.0);
            }
            other => panic!("expected stats, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_current_reading() {
        let (state, _) = create_test_state();
        seed(&state, "Delhi", 120.0, Duration::hours(2)).await;
        seed(&state, "Delhi", 175.0, Duration::minutes(5)).await;

        let response = get(&state, "/api/cities/Delhi/current").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert_eq!(json["reading"]["aqi"], 175.0);
        assert_eq!(json["classification"]["category"], "Unhealthy");
    }

    #[tokio::test]
    async fn test_current_reading_not_found() {
        let (state, _) = create_test_state();
        let response = get(&state, "/api/cities/Nowhere/current").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let json = response_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("Nowhere"));
    }

    #[tokio::test]
    async fn test_readings_window() {
        let (state, _) = create_test_state();
        seed(&state, "Delhi", 90.0, Duration::hours(30)).await;
        seed(&state, "Delhi", 120.0, Duration::hours(5)).await;
        seed(&state, "Delhi", 175.0, Duration::hours(1)).await;

        let response = get(&state, "/api/cities/Delhi/readings").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        let readings = json.as_array().unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0]["aqi"], 120.0);
        assert_eq!(readings[1]["aqi"], 175.0);

        let response = get(&state, "/api/cities/Delhi/readings?hours=48").await;
        assert_eq!(response_json(response).await.as_array().unwrap().len(), 3);

        let response = get(&state, "/api/cities/Delhi/readings?hours=0").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = get(&state, "/api/cities/Nowhere/readings").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let (state, _) = create_test_state();
        seed(&state, "Delhi", 50.0, Duration::hours(3)).await;
        seed(&state, "Delhi", 300.0, Duration::hours(2)).await;
        seed(&state, "Delhi", 10.0, Duration::hours(1)).await;

        let response = get(&state, "/api/cities/Delhi/stats?hours=6").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["max"]["aqi"], 300.0);
        assert_eq!(json["min"]["aqi"], 10.0);
        assert_eq!(json["total_readings"], 3);
    }

    #[tokio::test]
    async fn test_stats_empty_window() {
        let (state, _) = create_test_state();
        seed(&state, "Delhi", 150.0, Duration::hours(30)).await;

        let response = get(&state, "/api/cities/Delhi/stats").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert_eq!(json["status"], "empty");
        assert!(json.get("max").is_none());
    }

    #[tokio::test]
    async fn test_subscribe_twice_reactivates() {
        let (state, _) = create_test_state();
        let body = serde_json::json!({"email": "asha@example.com", "city": "Delhi"});

        let response = send_json(&state, "POST", "/api/subscriptions", body.clone()).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = response_json(response).await;
        assert_eq!(created["threshold"], 150.0);
        assert_eq!(created["min_interval_hours"], 24.0);

        let response = send_json(&state, "POST", "/api/subscriptions", body).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await["id"], created["id"]);
    }

    #[tokio::test]
    async fn test_subscribe_rejects_invalid_email() {
        let (state, _) = create_test_state();
        let response = send_json(
            &state,
            "POST",
            "/api/subscriptions",
            serde_json::json!({"email": "not-an-email", "city": "Delhi"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send_json(
            &state,
            "POST",
            "/api/subscriptions",
            serde_json::json!({"email": "asha@example.com", "city": "Delhi", "threshold": -3.0}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_and_unsubscribe() {
        let (state, _) = create_test_state();
        for city in ["Delhi", "Lahore"] {
            send_json(
                &state,
                "POST",
                "/api/subscriptions",
                serde_json::json!({"email": "asha@example.com", "city": city}),
            )
            .await;
        }

        let response = get(&state, "/api/subscriptions?email=asha@example.com").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await.as_array().unwrap().len(), 2);

        let response = send_json(
            &state,
            "POST",
            "/api/subscriptions/unsubscribe",
            serde_json::json!({"email": "asha@example.com", "city": "Delhi"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await["unsubscribed"], true);

        let response = get(&state, "/api/subscriptions?email=asha@example.com").await;
        let json = response_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["city"], "Lahore");

        let response = send_json(
            &state,
            "POST",
            "/api/subscriptions/unsubscribe",
            serde_json::json!({"email": "asha@example.com", "city": "Delhi"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_subscription() {
        let (state, _) = create_test_state();
        let response = send_json(
            &state,
            "POST",
            "/api/subscriptions",
            serde_json::json!({"email": "asha@example.com", "city": "Delhi"}),
        )
        .await;
        let id = response_json(response).await["id"].as_i64().unwrap();

        let response = send_json(
            &state,
            "PUT",
            &format!("/api/subscriptions/{}", id),
            serde_json::json!({"threshold": 100.0, "min_interval_hours": 6.0}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["threshold"], 100.0);
        assert_eq!(json["min_interval_hours"], 6.0);

        let response = send_json(
            &state,
            "PUT",
            &format!("/api/subscriptions/{}", id),
            serde_json::json!({}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send_json(
            &state,
            "PUT",
            "/api/subscriptions/9999",
            serde_json::json!({"threshold": 100.0}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_app_error_mapping() {
        let err: AppError = airwatch_store::Error::CityNotFound("Oslo".into()).into();
        assert!(matches!(err, AppError::NotFound(_)));

        let err: AppError = airwatch_store::Error::InvalidCity(" ".into()).into();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err: AppError = airwatch_core::Error::SubscriptionNotFound(4).into();
        assert!(matches!(err, AppError::NotFound(_)));

        let err: AppError = airwatch_core::Error::delivery("down").into();
        assert!(matches!(err, AppError::Internal(_)));
    }
}
