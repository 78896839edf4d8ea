use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::auth::Claims;
use crate::error::ApiError;
use crate::filter::{Filter, NearbyQuery, RouteFilter};
use crate::geocode::{self, GeocodeError, ReverseGeocoder};
use crate::images::{self, ImageHost};
use crate::models::{MergedRoute, NearbyWaypoint, NewRoute, NewWaypoint, Route, Waypoint};
use crate::store;
use crate::AppState;

const CREATED_TYPE: &str = "Success!";
const SPECIFY_ROW_MESSAGE: &str = "Please specify row";

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WayPointInput {
    pub location: LatLng,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripData {
    pub user_id: i64,
    #[serde(default)]
    pub route_title: Option<String>,
    pub way_points: Vec<WayPointInput>,
    pub distance: String,
    #[serde(default, rename = "route_preview")]
    pub route_preview: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripStats {
    #[serde(default)]
    pub avg_speed: Option<Value>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub speed_counter: Option<Value>,
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub route_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRouteRequest {
    pub trip_data: TripData,
    pub trip_stats: TripStats,
}

#[derive(Debug, Serialize)]
pub struct CreateRouteResponse {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub result: Vec<Waypoint>,
    #[serde(rename = "routeId")]
    pub route_id: i64,
    pub route: Route,
}

/// Reads the leading number of a human-readable distance ("5.2 km" -> 5.2).
/// The unit, if any, is ignored.
pub fn parse_distance(text: &str) -> Option<f64> {
    text.split_whitespace()
        .next()?
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
}

fn has_waypoints(body: &Value) -> bool {
    body.get("tripData")
        .and_then(|trip| trip.get("wayPoints"))
        .and_then(Value::as_array)
        .is_some_and(|points| !points.is_empty())
}

/// Numbers waypoints by position and attaches the resolved streets to the
/// first and last of them. Interior waypoints never carry a street.
pub fn build_waypoints(
    inputs: &[WayPointInput],
    first_street: Option<String>,
    last_street: Option<String>,
) -> Vec<NewWaypoint> {
    let last_index = inputs.len().saturating_sub(1);
    inputs
        .iter()
        .enumerate()
        .map(|(index, input)| {
            let street = if index == 0 {
                first_street.clone()
            } else if index == last_index {
                last_street.clone()
            } else {
                None
            };
            NewWaypoint {
                lat: input.location.lat,
                lng: input.location.lng,
                count: i64::try_from(index).unwrap_or(i64::MAX),
                street,
            }
        })
        .collect()
}

fn geocode_error(err: GeocodeError) -> ApiError {
    match err {
        GeocodeError::NoStreet(latlng) => {
            warn!("No street component for {}", latlng);
            ApiError::unprocessable(
                format!("No street found for waypoint at {latlng}"),
                "NO_STREET_FOUND",
            )
        }
        other => {
            error!("Reverse geocoding failed: {}", other);
            ApiError::bad_gateway("Reverse geocoding failed", "GEOCODING_FAILED")
        }
    }
}

async fn resolve_end_streets(
    geocoder: &dyn ReverseGeocoder,
    way_points: &[WayPointInput],
) -> Result<(String, String), ApiError> {
    let (Some(first), Some(last)) = (way_points.first(), way_points.last()) else {
        return Err(ApiError::forbidden("Route must include waypoints"));
    };

    let first_street = geocode::street_at(geocoder, first.location.lat, first.location.lng)
        .await
        .map_err(geocode_error)?;

    let last_street = if way_points.len() == 1 {
        first_street.clone()
    } else {
        geocode::street_at(geocoder, last.location.lat, last.location.lng)
            .await
            .map_err(geocode_error)?
    };

    Ok((first_street, last_street))
}

/// Uploads the route photo if one was sent. Failures are logged and yield
/// no photo rather than failing the request.
async fn upload_route_image(images: &dyn ImageHost, image_base64: Option<&str>) -> Option<String> {
    let payload = image_base64.filter(|s| !s.trim().is_empty())?;

    let uploaded = match images::to_data_uri(payload) {
        Ok(data_uri) => images.upload(&data_uri).await,
        Err(err) => Err(err),
    };

    match uploaded {
        Ok(url) => Some(url),
        Err(err) => {
            warn!("Route image upload failed, continuing without photo: {}", err);
            None
        }
    }
}

pub async fn create_route(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    body: Bytes,
) -> Result<Json<CreateRouteResponse>, ApiError> {
    let raw: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::invalid_body(format!("Request body is not valid JSON: {e}")))?;

    if !has_waypoints(&raw) {
        return Err(ApiError::with_code(
            StatusCode::FORBIDDEN,
            "Route must include waypoints",
            "MISSING_WAYPOINTS",
        ));
    }

    let request: CreateRouteRequest = serde_json::from_value(raw)
        .map_err(|e| ApiError::invalid_body(format!("Invalid route submission: {e}")))?;
    let CreateRouteRequest {
        trip_data,
        trip_stats,
    } = request;

    let distance = parse_distance(&trip_data.distance).ok_or_else(|| {
        ApiError::with_code(
            StatusCode::BAD_REQUEST,
            format!("Invalid distance: {}", trip_data.distance),
            "INVALID_DISTANCE",
        )
    })?;

    debug!(
        "Trip stats for user {}: avg_speed={:?} speed_counter={:?}",
        trip_data.user_id, trip_stats.avg_speed, trip_stats.speed_counter
    );

    let (first_street, last_street) =
        resolve_end_streets(state.geocoder.as_ref(), &trip_data.way_points).await?;

    let photo_url =
        upload_route_image(state.images.as_ref(), trip_stats.image_base64.as_deref()).await;

    let new_route = NewRoute {
        display_name: trip_stats.route_name,
        route_name: trip_data.route_title,
        id_user_account: trip_data.user_id,
        route_type: None,
        favorite_count: 0,
        current_rating: trip_stats.rating,
        photo_url,
        route_preview: trip_data.route_preview,
        distance,
    };
    let waypoints = build_waypoints(
        &trip_data.way_points,
        Some(first_street),
        Some(last_street),
    );

    let created = store::insert_route(&state.pools, &new_route, &waypoints)
        .await
        .map_err(|e| e.into_persistence_error("inserting route", "Failed to save route"))?;

    info!(
        "Created route {} for user {} with {} waypoints (requested by {})",
        created.route_id(),
        created.route.id_user_account,
        created.waypoints.len(),
        claims.subject()
    );

    let route_id = created.route_id();
    Ok(Json(CreateRouteResponse {
        kind: CREATED_TYPE,
        result: created.waypoints,
        route_id,
        route: created.route,
    }))
}

pub async fn list_routes(
    State(state): State<AppState>,
    Filter(filter): Filter<RouteFilter>,
) -> Result<Json<Vec<Route>>, ApiError> {
    let routes = store::list_routes(&state.pools, &filter)
        .await
        .map_err(|e| e.into_api_error("listing routes", "Database error"))?;
    Ok(Json(routes))
}

pub async fn get_merged_route(
    State(state): State<AppState>,
    Filter(filter): Filter<RouteFilter>,
) -> Result<Json<MergedRoute>, ApiError> {
    store::fetch_merged_route(&state.pools, &filter)
        .await
        .map_err(|e| e.into_api_error("loading route geometry", "Database error"))?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("No route matches the filter"))
}

pub async fn nearby_waypoints(
    State(state): State<AppState>,
    Filter(query): Filter<NearbyQuery>,
) -> Result<Json<Vec<NearbyWaypoint>>, ApiError> {
    let waypoints = store::find_nearby(&state.pools, &query)
        .await
        .map_err(|e| {
            e.into_persistence_error("searching nearby waypoints", "Failed to search waypoints")
        })?;
    Ok(Json(waypoints))
}

pub async fn update_route() -> ApiError {
    ApiError::with_code(
        StatusCode::BAD_REQUEST,
        "Updating routes is not supported",
        "UNSUPPORTED_OPERATION",
    )
}

/// Soft-deletes matching routes by handing them to the sentinel user.
/// An empty filter changes nothing and answers with a plain-text prompt.
pub async fn delete_route(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    body: Bytes,
) -> Result<Response, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok((StatusCode::OK, SPECIFY_ROW_MESSAGE).into_response());
    }

    let raw: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::invalid_body(format!("Request body is not valid JSON: {e}")))?;
    let filter = RouteFilter::from_value(&raw)?;
    if filter.is_empty() {
        return Ok((StatusCode::OK, SPECIFY_ROW_MESSAGE).into_response());
    }

    let routes = store::disown_routes(&state.pools, &filter)
        .await
        .map_err(|e| e.into_persistence_error("disowning routes", "Failed to delete routes"))?;

    info!("Disowned {} routes (requested by {})", routes.len(), claims.subject());
    Ok(Json(routes).into_response())
}
