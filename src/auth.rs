use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api_constants::REQUIRED_SCOPE;
use crate::config::AuthConfig;
use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Option<String>,
    pub exp: i64,
    /// Space-separated OAuth scopes.
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl Claims {
    pub fn subject(&self) -> &str {
        self.sub.as_deref().unwrap_or("unknown subject")
    }

    pub fn has_scope(&self, required: &str) -> bool {
        self.scope
            .as_deref()
            .is_some_and(|s| s.split_whitespace().any(|scope| scope == required))
            || self.permissions.iter().any(|p| p == required)
    }
}

/// Validates bearer tokens and enforces the scope every route endpoint needs.
#[derive(Clone)]
pub struct AccessGate {
    inner: Arc<AccessGateInner>,
}

struct AccessGateInner {
    key: DecodingKey,
    validation: Validation,
    required_scope: &'static str,
}

impl AccessGate {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }

        Self {
            inner: Arc::new(AccessGateInner {
                key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
                validation,
                required_scope: REQUIRED_SCOPE,
            }),
        }
    }

    pub fn authorise(&self, headers: &HeaderMap) -> Result<Claims, ApiError> {
        let token = bearer_token(headers)
            .ok_or_else(|| ApiError::unauthorised("Missing bearer token"))?;

        let claims = decode::<Claims>(token, &self.inner.key, &self.inner.validation)
            .map_err(|e| {
                debug!("Rejected token: {}", e);
                ApiError::unauthorised("Invalid token")
            })?
            .claims;

        if !claims.has_scope(self.inner.required_scope) {
            warn!(
                "Token for {} lacks scope {}",
                claims.subject(),
                self.inner.required_scope
            );
            return Err(ApiError::with_code(
                axum::http::StatusCode::FORBIDDEN,
                "Insufficient scope",
                "INSUFFICIENT_SCOPE",
            ));
        }

        Ok(claims)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Middleware run in front of every route handler. Verified claims are
/// attached to the request extensions.
pub async fn require_access(
    State(gate): State<AccessGate>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = gate.authorise(req.headers())?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
