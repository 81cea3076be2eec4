//! JSON + WebSocket surface over the service layer.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::{
    availability::AvailableHouse,
    model::{HouseClaim, WalkSession},
    route::OptimizedRoute,
    service::{CurrentSession, NearbyCanvasser, WalkService},
    solver::TourStrategy,
    ws, Error, GeoPoint,
};

pub fn build_router(service: WalkService) -> Router {
    Router::new()
        .route("/sessions/start", post(start_session))
        .route("/sessions/end", post(end_session))
        .route("/sessions/current", get(current_session))
        .route("/houses/available", get(available_houses))
        .route("/routes/optimize", post(optimize_route))
        .route("/houses/claim", post(claim_houses))
        .route("/houses/:claim_id/arrive", post(arrive))
        .route("/houses/:claim_id/complete", post(complete))
        .route("/houses/:claim_id/release", post(release))
        .route("/canvassers/nearby", get(nearby_canvassers))
        .route("/ws", get(ws::upgrade))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::ClaimState(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("http: internal error err={}", self.0);
        }
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest {
    canvasser_id: String,
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CanvasserQuery {
    canvasser_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AvailableQuery {
    lat: f64,
    lng: f64,
    radius_km: Option<f64>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteRequest {
    start_lat: f64,
    start_lng: f64,
    addresses: Vec<String>,
    canvasser_id: Option<String>,
    strategy: Option<TourStrategy>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimHousesRequest {
    canvasser_id: String,
    addresses: Vec<String>,
    claim_duration_minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClaimHousesResponse {
    claims: Vec<HouseClaim>,
    skipped: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArriveRequest {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest {
    lat: f64,
    lng: f64,
    voters_contacted: u32,
    voters_home: u32,
    #[serde(default)]
    contact_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NearbyQuery {
    lat: f64,
    lng: f64,
    radius_km: Option<f64>,
}

const DEFAULT_RADIUS_KM: f64 = 2.0;
const DEFAULT_HOUSE_LIMIT: usize = 50;

async fn start_session(
    State(service): State<WalkService>,
    Json(request): Json<SessionRequest>,
) -> ApiResult<WalkSession> {
    let session = service
        .start_session(&request.canvasser_id, GeoPoint::new(request.lat, request.lng))
        .await?;
    Ok(Json(session))
}

async fn end_session(
    State(service): State<WalkService>,
    Json(request): Json<SessionRequest>,
) -> ApiResult<WalkSession> {
    let session = service
        .end_session(&request.canvasser_id, GeoPoint::new(request.lat, request.lng))
        .await?;
    Ok(Json(session))
}

async fn current_session(
    State(service): State<WalkService>,
    Query(query): Query<CanvasserQuery>,
) -> ApiResult<Option<CurrentSession>> {
    Ok(Json(service.current_session(&query.canvasser_id).await?))
}

async fn available_houses(
    State(service): State<WalkService>,
    Query(query): Query<AvailableQuery>,
) -> ApiResult<Vec<AvailableHouse>> {
    let houses = service
        .available_houses(
            GeoPoint::new(query.lat, query.lng),
            query.radius_km.unwrap_or(DEFAULT_RADIUS_KM),
            query.limit.unwrap_or(DEFAULT_HOUSE_LIMIT),
        )
        .await?;
    Ok(Json(houses))
}

async fn optimize_route(
    State(service): State<WalkService>,
    Json(request): Json<RouteRequest>,
) -> ApiResult<OptimizedRoute> {
    let route = service
        .build_route(
            request.canvasser_id.as_deref(),
            GeoPoint::new(request.start_lat, request.start_lng),
            &request.addresses,
            request.strategy.unwrap_or_default(),
        )
        .await?;
    Ok(Json(route))
}

async fn claim_houses(
    State(service): State<WalkService>,
    Json(request): Json<ClaimHousesRequest>,
) -> ApiResult<ClaimHousesResponse> {
    let batch = service
        .claim_houses(
            &request.canvasser_id,
            &request.addresses,
            request.claim_duration_minutes,
        )
        .await?;
    Ok(Json(ClaimHousesResponse {
        claims: batch.granted,
        skipped: batch.skipped,
    }))
}

async fn arrive(
    State(service): State<WalkService>,
    Path(claim_id): Path<String>,
    Json(request): Json<ArriveRequest>,
) -> ApiResult<HouseClaim> {
    let claim = service
        .arrive(&claim_id, GeoPoint::new(request.lat, request.lng))
        .await?;
    Ok(Json(claim))
}

async fn complete(
    State(service): State<WalkService>,
    Path(claim_id): Path<String>,
    Json(request): Json<CompleteRequest>,
) -> ApiResult<HouseClaim> {
    let claim = service
        .complete(
            &claim_id,
            GeoPoint::new(request.lat, request.lng),
            request.voters_contacted,
            request.voters_home,
            request.contact_ids,
        )
        .await?;
    Ok(Json(claim))
}

async fn release(
    State(service): State<WalkService>,
    Path(claim_id): Path<String>,
) -> ApiResult<HouseClaim> {
    Ok(Json(service.release(&claim_id).await?))
}

async fn nearby_canvassers(
    State(service): State<WalkService>,
    Query(query): Query<NearbyQuery>,
) -> ApiResult<Vec<NearbyCanvasser>> {
    let nearby = service
        .nearby_canvassers(
            GeoPoint::new(query.lat, query.lng),
            query.radius_km.unwrap_or(DEFAULT_RADIUS_KM),
        )
        .await?;
    Ok(Json(nearby))
}
