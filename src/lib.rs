pub mod api_constants;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod geocode;
pub mod images;
pub mod models;
pub mod routes;
pub mod store;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::auth::AccessGate;
use crate::db::DbPools;
use crate::geocode::ReverseGeocoder;
use crate::images::ImageHost;

pub const BUILD_VERSION: &str = env!("BUILD_VERSION");
pub const BUILD_DATE: &str = env!("BUILD_DATE");
pub const RUSTC_VERSION: &str = env!("RUSTC_VERSION");

/// Binds `filter::FilterValue` parameters, in order, onto a sqlx query.
#[macro_export]
macro_rules! bind_filter_params {
    ($query:expr, $params:expr) => {{
        let mut query = $query;
        for param in $params {
            query = match param {
                $crate::filter::FilterValue::Integer(v) => query.bind(*v),
                $crate::filter::FilterValue::Real(v) => query.bind(*v),
                $crate::filter::FilterValue::Text(v) => query.bind(v.clone()),
                // Rendered as IS NULL, nothing to bind
                $crate::filter::FilterValue::Null => query,
            };
        }
        query
    }};
}

#[derive(Clone)]
pub struct AppState {
    pub pools: DbPools,
    pub geocoder: Arc<dyn ReverseGeocoder>,
    pub images: Arc<dyn ImageHost>,
}

impl AppState {
    pub fn new(
        pools: DbPools,
        geocoder: Arc<dyn ReverseGeocoder>,
        images: Arc<dyn ImageHost>,
    ) -> Self {
        Self {
            pools,
            geocoder,
            images,
        }
    }
}

#[derive(Serialize)]
pub struct VersionInfo {
    pub git_hash: &'static str,
    pub build_date: &'static str,
    pub rustc_version: &'static str,
}

async fn health_check() -> &'static str {
    "OK"
}

async fn version_info() -> Json<VersionInfo> {
    Json(VersionInfo {
        git_hash: BUILD_VERSION,
        build_date: BUILD_DATE,
        rustc_version: RUSTC_VERSION,
    })
}

/// Builds the application router without transport-level middleware
/// (tracing, CORS, timeouts), which the binary adds on top.
pub fn build_router(state: AppState, gate: AccessGate) -> Router {
    let route_api = Router::new()
        .route(
            api_constants::ROUTE_ROUTE,
            get(routes::list_routes)
                .post(routes::create_route)
                .put(routes::update_route)
                .delete(routes::delete_route),
        )
        .route(
            api_constants::ROUTE_LOCATION_ROUTE,
            get(routes::get_merged_route),
        )
        .route(
            api_constants::ROUTE_NEARBY_ROUTE,
            get(routes::nearby_waypoints),
        )
        .route_layer(from_fn_with_state(gate, auth::require_access))
        .layer(DefaultBodyLimit::max(api_constants::MAX_BODY_BYTES));

    Router::new()
        .route(api_constants::HEALTH_ROUTE, get(health_check))
        .route(api_constants::VERSION_ROUTE, get(version_info))
        .merge(route_api)
        .with_state(state)
}
