use axum::body::Body;
use axum::error_handling::HandleErrorLayer;
use axum::extract::{ConnectInfo, Extension};
use axum::http::{header, HeaderValue, Request};
use axum::middleware::{from_fn, Next};
use axum::response::Response;
use axum::BoxError;
use ipnet::IpNet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::timeout::error::Elapsed;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Span};
use tracing_subscriber::EnvFilter;

use tracklog::auth::AccessGate;
use tracklog::config::Config;
use tracklog::error::ApiError;
use tracklog::geocode::GoogleGeocoder;
use tracklog::images::CloudinaryClient;
use tracklog::{build_router, db, AppState, BUILD_VERSION};

/// Maximum time any request can take before being terminated.
/// Route creation makes two geocoding calls and an image upload, so this is
/// well above the per-query database timeout.
const GLOBAL_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for each outbound call to the geocoding and image hosts.
const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tracklog=debug".parse()?))
        .init();

    info!("Starting tracklog backend");

    let config = Config::from_env()?;

    let pools = db::init_pool(&config.database_url).await?;
    db::run_migrations(&pools).await?;

    let http_client = reqwest::Client::builder()
        .timeout(OUTBOUND_TIMEOUT)
        .build()?;

    let state = AppState::new(
        pools,
        Arc::new(GoogleGeocoder::new(http_client.clone(), &config.geocoding)),
        Arc::new(CloudinaryClient::new(http_client, config.images.clone())),
    );
    let gate = AccessGate::new(&config.auth);

    if config.trusted_proxies.is_empty() {
        warn!("No trusted proxy ranges configured; logging peer addresses only");
    } else {
        info!("Trusting {} proxy ranges", config.trusted_proxies.len());
    }
    let trusted_proxies = TrustedProxyList::new(config.trusted_proxies.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::HeaderName::from_static("x-build-version")]);

    let build_version_header = SetResponseHeaderLayer::if_not_present(
        header::HeaderName::from_static("x-build-version"),
        HeaderValue::from_static(BUILD_VERSION),
    );

    let app = build_router(state, gate)
        .layer(build_version_header)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(make_request_span)
                .on_request(on_request)
                .on_response(on_response),
        )
        .layer(from_fn(record_client_ip))
        .layer(Extension(trusted_proxies))
        .layer(CatchPanicLayer::new())
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_layer_error))
                .timeout(GLOBAL_REQUEST_TIMEOUT)
                .into_inner(),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn handle_layer_error(err: BoxError) -> ApiError {
    if err.is::<Elapsed>() {
        ApiError::service_unavailable("Request timed out")
    } else {
        ApiError::internal("Request failed")
    }
}

#[derive(Clone)]
struct TrustedProxyList {
    networks: Arc<Vec<IpNet>>,
}

impl TrustedProxyList {
    fn new(networks: Vec<IpNet>) -> Self {
        Self {
            networks: Arc::new(networks),
        }
    }

    fn contains(&self, addr: &SocketAddr) -> bool {
        let ip = addr.ip();
        self.networks.iter().any(|net| net.contains(&ip))
    }
}

#[derive(Clone)]
struct ClientIp(String);

/// Forwarding headers are only believed when the connection comes from a
/// trusted proxy; anyone else is logged by their socket address.
fn client_addr<B>(req: &Request<B>, peer_addr: SocketAddr, trusted: &TrustedProxyList) -> String {
    if trusted.contains(&peer_addr) {
        if let Some(ip) = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|xff| xff.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
        {
            return ip.to_string();
        }
    }

    peer_addr.ip().to_string()
}

async fn record_client_ip(
    Extension(trusted): Extension<TrustedProxyList>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let client_ip = client_addr(&req, peer_addr, &trusted);
    req.extensions_mut().insert(ClientIp(client_ip));
    next.run(req).await
}

fn client_ip_for_logging<B>(req: &Request<B>) -> String {
    req.extensions()
        .get::<ClientIp>()
        .map_or_else(|| "unknown".to_string(), |ip| ip.0.clone())
}

fn full_path<B>(req: &Request<B>) -> String {
    let path = req.uri().path();
    match req.uri().query() {
        Some(q) => format!("{path}?{q}"),
        None => path.to_string(),
    }
}

fn make_request_span<B>(req: &Request<B>) -> Span {
    tracing::info_span!(
        "http_request",
        method = %req.method(),
        path = %full_path(req),
        ip = %client_ip_for_logging(req)
    )
}

fn on_request<B>(req: &Request<B>, _span: &Span) {
    info!(
        "{} {} from {}",
        req.method(),
        full_path(req),
        client_ip_for_logging(req)
    );
}

fn on_response<B>(response: &Response<B>, latency: Duration, _span: &Span) {
    let status = response.status();
    let latency_ms = latency.as_millis();
    info!("Response {} in {}ms", status, latency_ms);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_from_proxy(forwarded_for: &str) -> Request<()> {
        Request::builder()
            .header("x-forwarded-for", forwarded_for)
            .body(())
            .unwrap()
    }

    #[test]
    fn forwarded_for_ignored_from_untrusted_peer() {
        let trusted = TrustedProxyList::new(vec!["10.0.0.0/8".parse().unwrap()]);
        let peer: SocketAddr = "203.0.113.9:51000".parse().unwrap();

        let ip = client_addr(&request_from_proxy("198.51.100.7"), peer, &trusted);
        assert_eq!(ip, "203.0.113.9");
    }

    #[test]
    fn forwarded_for_used_from_trusted_proxy() {
        let trusted = TrustedProxyList::new(vec!["10.0.0.0/8".parse().unwrap()]);
        let proxy: SocketAddr = "10.0.0.2:443".parse().unwrap();

        let ip = client_addr(&request_from_proxy("198.51.100.7, 10.0.0.2"), proxy, &trusted);
        assert_eq!(ip, "198.51.100.7");

        let bare = Request::builder().body(()).unwrap();
        assert_eq!(client_addr(&bare, proxy, &trusted), "10.0.0.2");
    }

    #[test]
    fn no_trusted_proxies_means_peer_only() {
        let trusted = TrustedProxyList::new(Vec::new());
        let peer: SocketAddr = "127.0.0.1:8080".parse().unwrap();

        let ip = client_addr(&request_from_proxy("198.51.100.7"), peer, &trusted);
        assert_eq!(ip, "127.0.0.1");
    }
}
