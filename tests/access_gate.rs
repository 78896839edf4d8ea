mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};

use common::{token, TestApp};

#[tokio::test]
async fn route_endpoints_require_a_token() {
    let app = TestApp::new().await;

    for uri in ["/route", "/route&location", "/route&nearby"] {
        let res = app
            .send(Request::get(uri).body(Body::empty()).unwrap())
            .await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(res.json()["code"], "UNAUTHORISED");
    }
}

#[tokio::test]
async fn token_without_full_access_is_forbidden() {
    let app = TestApp::new().await;

    let res = app
        .send(
            Request::get("/route")
                .header(header::AUTHORIZATION, format!("Bearer {}", token(Some("openid profile"))))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.json()["code"], "INSUFFICIENT_SCOPE");

    let res = app
        .send(
            Request::get("/route")
                .header(header::AUTHORIZATION, format!("Bearer {}", token(None)))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn rejected_create_has_no_side_effects() {
    let app = TestApp::new().await;

    let res = app
        .send(
            Request::post("/route")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, "Bearer not-a-jwt")
                .body(Body::from(
                    common::trip(1, &[(1.0, 1.0)], "1 km", "").to_string(),
                ))
                .unwrap(),
        )
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.geocoder.calls(), 0);
    assert_eq!(app.route_count().await, 0);
}

#[tokio::test]
async fn health_and_version_are_public() {
    let app = TestApp::new().await;

    let res = app
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.text(), "OK");

    let res = app
        .send(Request::get("/version").body(Body::empty()).unwrap())
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.json()["git_hash"].is_string());
}
