// Authentication middleware for the Transcription API
//
// When authorization is enabled every request must carry
// `Authorization: Bearer <API_TOKEN>`. OPTIONS requests (CORS pre-flight)
// and the health check are always let through.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::ErrorUnauthorized,
    http::{header, Method},
    Error,
};
use futures::future::{ok, LocalBoxFuture, Ready};
use log::{debug, info, warn};
use std::rc::Rc;

use crate::metrics::Metrics;

/// Paths reachable without a token
const PUBLIC_PATHS: &[&str] = &["/health"];

/// Middleware factory for authentication
pub struct Authentication {
    /// Expected token, `None` when authorization is disabled
    token: Option<Rc<str>>,
    metrics: Metrics,
}

impl Authentication {
    pub fn new(enabled: bool, token: Option<&str>, metrics: Metrics) -> Self {
        Self {
            token: if enabled { token.map(Rc::from) } else { None },
            metrics,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthenticationMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        if self.token.is_none() {
            info!("Authentication requirement is disabled via configuration");
        }
        ok(AuthenticationMiddleware {
            service: Rc::new(service),
            token: self.token.clone(),
            metrics: self.metrics.clone(),
        })
    }
}

/// Authentication middleware implementation
pub struct AuthenticationMiddleware<S> {
    service: Rc<S>,
    token: Option<Rc<str>>,
    metrics: Metrics,
}

impl<S, B> Service<ServiceRequest> for AuthenticationMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let Some(expected) = self.token.clone() else {
            return Box::pin(self.service.call(req));
        };
        if req.method() == Method::OPTIONS || PUBLIC_PATHS.contains(&req.path()) {
            debug!("{} {} - bypassing authentication check", req.method(), req.path());
            return Box::pin(self.service.call(req));
        }

        let service = Rc::clone(&self.service);
        let metrics = self.metrics.clone();
        Box::pin(async move {
            match authenticate(&req, &expected) {
                Ok(()) => {
                    metrics.record_auth_attempt("success").await;
                    service.call(req).await
                }
                Err(e) => {
                    metrics.record_auth_attempt("failure").await;
                    Err(e)
                }
            }
        })
    }
}

/// Check the bearer token of a request against `expected`
fn authenticate(req: &ServiceRequest, expected: &str) -> Result<(), Error> {
    let Some(auth_header) = req.headers().get(header::AUTHORIZATION) else {
        warn!("Missing Authorization header");
        return Err(ErrorUnauthorized("Authorization header is required"));
    };
    let Ok(auth_str) = auth_header.to_str() else {
        warn!("Authorization header contains invalid characters");
        return Err(ErrorUnauthorized("Invalid Authorization header"));
    };
    let Some(token) = auth_str.strip_prefix("Bearer ") else {
        warn!("Invalid Authorization header format, missing 'Bearer' prefix");
        return Err(ErrorUnauthorized(
            "Invalid Authorization header format. Must be 'Bearer <token>'",
        ));
    };

    if token_matches(token.trim(), expected) {
        Ok(())
    } else {
        warn!("Rejected request with an invalid token");
        Err(ErrorUnauthorized("Invalid token"))
    }
}

/// Compare without exiting at the first differing byte
fn token_matches(given: &str, expected: &str) -> bool {
    given.len() == expected.len()
        && given
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
