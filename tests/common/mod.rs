#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use futures::future::BoxFuture;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use tracklog::auth::{AccessGate, Claims};
use tracklog::config::AuthConfig;
use tracklog::db::{self, DbPools};
use tracklog::geocode::{AddressComponent, GeocodeError, GeocodeResult, ReverseGeocoder};
use tracklog::images::{ImageHost, ImageUploadError};
use tracklog::{build_router, AppState};

pub const JWT_SECRET: &str = "integration-secret";
pub const UPLOADED_URL: &str = "https://images.test/route.jpg";

/// Answers every lookup with a street named after the coordinate, except
/// for coordinates listed in `streetless`. With `unavailable` set every
/// lookup fails with no results.
#[derive(Default)]
pub struct FakeGeocoder {
    pub streetless: Vec<String>,
    pub unavailable: bool,
    pub calls: AtomicUsize,
}

impl FakeGeocoder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ReverseGeocoder for FakeGeocoder {
    fn reverse_geocode<'a>(
        &'a self,
        latlng: &'a str,
    ) -> BoxFuture<'a, Result<GeocodeResult, GeocodeError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            let latlng = latlng.to_string();
            return Box::pin(async move { Err(GeocodeError::NoResults(latlng)) });
        }

        let mut components = vec![AddressComponent {
            long_name: "New Orleans".to_string(),
            short_name: "New Orleans".to_string(),
            types: vec!["locality".to_string(), "political".to_string()],
        }];
        if !self.streetless.iter().any(|s| s == latlng) {
            components.push(AddressComponent {
                long_name: format!("Street at {latlng}"),
                short_name: format!("St {latlng}"),
                types: vec!["route".to_string()],
            });
        }
        Box::pin(async move {
            Ok(GeocodeResult {
                address_components: components,
                formatted_address: None,
            })
        })
    }
}

pub struct FakeImageHost {
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl FakeImageHost {
    pub fn new(fail: bool) -> Self {
        Self {
            fail,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageHost for FakeImageHost {
    fn upload<'a>(&'a self, data_uri: &'a str) -> BoxFuture<'a, Result<String, ImageUploadError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = if self.fail {
            Err(ImageUploadError::Rejected("quota exceeded".to_string()))
        } else {
            assert!(data_uri.starts_with("data:image/"));
            Ok(UPLOADED_URL.to_string())
        };
        Box::pin(async move { outcome })
    }
}

pub struct TestApp {
    pub router: Router,
    pub pools: DbPools,
    pub geocoder: Arc<FakeGeocoder>,
    pub images: Arc<FakeImageHost>,
    _dir: TempDir,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("response body is JSON")
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.body.clone()).expect("response body is UTF-8")
    }
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_fakes(FakeGeocoder::default(), FakeImageHost::new(false)).await
    }

    pub async fn with_fakes(geocoder: FakeGeocoder, images: FakeImageHost) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = dir.path().join("test.db");
        let database_url = format!("sqlite:{}", db_path.display());

        let pools = db::init_pool(&database_url)
            .await
            .expect("Failed to initialize pool");
        db::run_migrations(&pools)
            .await
            .expect("Failed to run migrations");

        let geocoder = Arc::new(geocoder);
        let images = Arc::new(images);
        let state = AppState::new(pools.clone(), geocoder.clone(), images.clone());
        let gate = AccessGate::new(&AuthConfig {
            jwt_secret: JWT_SECRET.to_string(),
            audience: None,
            issuer: None,
        });

        Self {
            router: build_router(state, gate),
            pools,
            geocoder,
            images,
            _dir: dir,
        }
    }

    pub async fn send(&self, req: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(req)
            .await
            .expect("router is infallible");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body")
            .to_vec();
        TestResponse { status, body }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        filter: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token(Some("full_access"))));
        if let Some(filter) = filter {
            builder = builder.header("filter", filter);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).unwrap()).await
    }

    pub async fn route_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM route")
            .fetch_one(self.pools.read())
            .await
            .unwrap()
    }

    pub async fn waypoint_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM waypoint")
            .fetch_one(self.pools.read())
            .await
            .unwrap()
    }
}

pub fn token(scope: Option<&str>) -> String {
    let claims = Claims {
        sub: Some("rider|42".to_string()),
        exp: chrono::Utc::now().timestamp() + 3600,
        scope: scope.map(ToString::to_string),
        permissions: Vec::new(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

/// A route submission in the shape the mobile client sends.
pub fn trip(user_id: i64, points: &[(f64, f64)], distance: &str, image: &str) -> Value {
    let way_points: Vec<Value> = points
        .iter()
        .map(|(lat, lng)| serde_json::json!({ "location": { "lat": lat, "lng": lng } }))
        .collect();

    serde_json::json!({
        "tripData": {
            "userId": user_id,
            "routeTitle": "Levee loop",
            "wayPoints": way_points,
            "distance": distance,
            "route_preview": { "polyline": "_p~iF~ps|U_ulLnnqC" }
        },
        "tripStats": {
            "avgSpeed": 11.2,
            "rating": 4.5,
            "speedCounter": 3,
            "imageBase64": image,
            "routeName": "Morning ride"
        }
    })
}
