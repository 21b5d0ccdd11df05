//! HTTP Basic Authentication gate for the scrape endpoint

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{authorization::Basic, Authorization, HeaderMapExt};
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

pub const REALM_CHALLENGE: &str = "Basic realm=\"Authorization Required\"";

/// Username -> password
#[derive(Debug, Clone, Default)]
pub struct BasicAuthAccounts {
    accounts: HashMap<String, String>,
}

impl BasicAuthAccounts {
    pub fn new<I, U, P>(accounts: I) -> Result<Self>
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<String>,
    {
        let mut map = HashMap::new();
        for (user, password) in accounts {
            let user = user.into();
            if user.is_empty() {
                return Err(Error::EmptyUsername);
            }
            map.insert(user, password.into());
        }
        Ok(Self { accounts: map })
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Returns the matching username.
    ///
    /// Usernames and passwords are compared in constant time.
    pub fn verify(&self, credentials: &Basic) -> Option<&str> {
        let user = credentials.username().as_bytes();
        let password = credentials.password().as_bytes();
        self.accounts
            .iter()
            .find(|(u, p)| bool::from(u.as_bytes().ct_eq(user) & p.as_bytes().ct_eq(password)))
            .map(|(u, _)| u.as_str())
    }
}

/// Reject requests without valid Basic credentials
pub async fn basic_auth_middleware(
    State(accounts): State<Arc<BasicAuthAccounts>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let credentials = request.headers().typed_get::<Authorization<Basic>>();

    match credentials.as_ref().and_then(|c| accounts.verify(&c.0)) {
        Some(user) => {
            tracing::debug!(user, path = %request.uri().path(), "Basic auth accepted");
            next.run(request).await
        }
        None => {
            tracing::warn!(path = %request.uri().path(), "Basic auth rejected");
            unauthorized()
        }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, REALM_CHALLENGE)],
    )
        .into_response()
}
