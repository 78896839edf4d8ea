use serde::Serialize;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;

/// A recorded trip as stored in the `route` table.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Route {
    pub id: i64,
    pub display_name: Option<String>,
    pub route_name: Option<String>,
    pub id_user_account: i64,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub route_type: Option<String>,
    pub favorite_count: i64,
    pub current_rating: Option<f64>,
    pub photo_url: Option<String>,
    pub route_preview: Option<Json<Value>>,
    pub distance: Option<f64>,
    pub disowned_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Waypoint {
    pub id: i64,
    pub id_route: i64,
    pub lat: f64,
    pub lng: f64,
    pub count: i64,
    pub street: Option<String>,
}

/// Route fields supplied by the creation handler; the store assigns `id`.
#[derive(Debug, Clone)]
pub struct NewRoute {
    pub display_name: Option<String>,
    pub route_name: Option<String>,
    pub id_user_account: i64,
    pub route_type: Option<String>,
    pub favorite_count: i64,
    pub current_rating: Option<f64>,
    pub photo_url: Option<String>,
    pub route_preview: Option<Value>,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewWaypoint {
    pub lat: f64,
    pub lng: f64,
    pub count: i64,
    pub street: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedRoute {
    pub route: Route,
    pub waypoints: Vec<Waypoint>,
}

impl CreatedRoute {
    pub fn route_id(&self) -> i64 {
        self.route.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WaypointPosition {
    pub lat: f64,
    pub lng: f64,
    pub count: i64,
}

/// A route summary with its ordered waypoint positions embedded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedRoute {
    pub id: i64,
    pub route_name: Option<String>,
    #[serde(rename = "type")]
    pub route_type: Option<String>,
    pub current_rating: Option<f64>,
    pub favorite_count: i64,
    pub waypoints: Vec<WaypointPosition>,
}

/// One row of the route/waypoint join, before reshaping.
#[derive(Debug, Clone, FromRow)]
pub struct MergedRow {
    pub id: i64,
    pub route_name: Option<String>,
    #[sqlx(rename = "type")]
    pub route_type: Option<String>,
    pub current_rating: Option<f64>,
    pub favorite_count: i64,
    pub lat: f64,
    pub lng: f64,
    pub count: i64,
}

/// A waypoint returned by the nearby search, carrying its route's columns.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct NearbyWaypoint {
    pub id: i64,
    pub id_route: i64,
    pub lat: f64,
    pub lng: f64,
    pub count: i64,
    pub street: Option<String>,
    pub display_name: Option<String>,
    pub route_name: Option<String>,
    pub id_user_account: i64,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub route_type: Option<String>,
    pub favorite_count: i64,
    pub current_rating: Option<f64>,
    pub photo_url: Option<String>,
    pub route_preview: Option<Json<Value>>,
    pub distance: Option<f64>,
}
