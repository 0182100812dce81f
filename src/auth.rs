use std::{sync::Arc, time::Duration};

use axum::{
    Json,
    extract::{Request, State},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{self, AUTHORIZATION, COOKIE},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use subtle::{Choice, ConstantTimeEq};
use thiserror::Error;

use crate::models::ErrorBody;

/// Name of the cookie carrying the session token.
pub const TOKEN_COOKIE: &str = "token";

/// Principal
///
/// The resolved identity of an authorized request. The `require_auth` middleware
/// stores it in the request extensions for handlers that need it (token refresh).
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub username: String,
}

/// AuthError
///
/// Why a request was rejected. The response never says whether the username or the
/// password was wrong.
#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials { realm: String },
    #[error("invalid credentials")]
    InvalidCredentials { realm: String },
    #[error("missing session token")]
    MissingToken,
    #[error("malformed session token")]
    MalformedToken,
    #[error("expired session token")]
    ExpiredToken,
    #[error("invalid session token")]
    InvalidToken,
    #[error("token signing failed")]
    Signing,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MalformedToken => StatusCode::BAD_REQUEST,
            AuthError::Signing => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match status {
            StatusCode::BAD_REQUEST => "Invalid token",
            StatusCode::INTERNAL_SERVER_ERROR => "Token signing failed",
            _ => "Unauthorized",
        };
        let mut response = (
            status,
            Json(ErrorBody {
                error: message.to_string(),
            }),
        )
            .into_response();

        // Basic auth failures carry a challenge so browsers prompt for credentials.
        if let AuthError::MissingCredentials { realm } | AuthError::InvalidCredentials { realm } =
            &self
        {
            if let Ok(value) = HeaderValue::from_str(&format!("Basic realm=\"{realm}\"")) {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}

// --- Authenticator Contract ---

/// Authenticator
///
/// A route-decoration capability implemented by both schemes. Route wiring picks an
/// implementation per API version; handlers stay scheme-agnostic.
pub trait Authenticator: Send + Sync {
    /// Short scheme name used in logs and span fields.
    fn scheme(&self) -> &'static str;

    fn authorize(&self, headers: &HeaderMap) -> Result<Principal, AuthError>;
}

/// AuthenticatorState
///
/// The concrete type handed to `require_auth` through `from_fn_with_state`.
pub type AuthenticatorState = Arc<dyn Authenticator>;

/// require_auth
///
/// Middleware that short-circuits with the authenticator's rejection, without
/// invoking the wrapped handler, when authorization fails. On success the
/// `Principal` is attached to the request.
pub async fn require_auth(
    State(authenticator): State<AuthenticatorState>,
    mut request: Request,
    next: Next,
) -> Response {
    let span = tracing::info_span!("authorize", scheme = authenticator.scheme());
    let client = client_address(request.headers());

    let outcome = span.in_scope(|| authenticator.authorize(request.headers()));
    match outcome {
        Ok(principal) => {
            tracing::info!(
                parent: &span,
                user = %principal.username,
                client = %client,
                "request authorized"
            );
            request.extensions_mut().insert(principal);
            // Store and proxy spans hang off the route span, not this one.
            drop(span);
            next.run(request).await
        }
        Err(e) => {
            tracing::warn!(
                parent: &span,
                reason = %e,
                client = %client,
                path = %request.uri().path(),
                "authentication failed"
            );
            e.into_response()
        }
    }
}

/// client_address
///
/// Best-effort client address for log correlation, preferring proxy headers.
pub fn client_address(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

// --- Credential Store ---

/// CredentialStore
///
/// The configured username/password pairs. Verification compares the supplied pair
/// against every entry in constant time, so neither the position of a match nor
/// which field differed leaks through timing.
#[derive(Clone, Default)]
pub struct CredentialStore {
    users: Arc<Vec<(String, String)>>,
}

impl CredentialStore {
    pub fn new(users: Vec<(String, String)>) -> Self {
        Self {
            users: Arc::new(users),
        }
    }

    pub fn verify(&self, username: &str, password: &str) -> bool {
        let mut matched = Choice::from(0u8);
        for (user, pass) in self.users.iter() {
            let user_ok = user.as_bytes().ct_eq(username.as_bytes());
            let pass_ok = pass.as_bytes().ct_eq(password.as_bytes());
            matched |= user_ok & pass_ok;
        }
        matched.into()
    }
}

// --- Scheme A: Basic credentials ---

/// BasicAuthenticator
///
/// Stateless scheme: every request carries `Authorization: Basic ...`.
#[derive(Clone)]
pub struct BasicAuthenticator {
    credentials: CredentialStore,
    realm: String,
}

impl BasicAuthenticator {
    pub fn new(credentials: CredentialStore, realm: impl Into<String>) -> Self {
        Self {
            credentials,
            realm: realm.into(),
        }
    }
}

impl Authenticator for BasicAuthenticator {
    fn scheme(&self) -> &'static str {
        "basic"
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let missing = || AuthError::MissingCredentials {
            realm: self.realm.clone(),
        };

        let (username, password) = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_basic)
            .ok_or_else(missing)?;

        if !self.credentials.verify(&username, &password) {
            return Err(AuthError::InvalidCredentials {
                realm: self.realm.clone(),
            });
        }
        Ok(Principal { username })
    }
}

/// parse_basic
///
/// Decodes an `Authorization: Basic <base64(user:pass)>` header value.
pub fn parse_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

// --- Scheme B: Signed session tokens ---

/// SessionClaims
///
/// Payload of a session token. Validity depends only on the HS256 signature and
/// `exp`; there is no server-side revocation, so a copy of an unexpired token stays
/// valid after the holder logs out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionClaims {
    pub username: String,
    /// Expiration as seconds since the Unix epoch.
    pub exp: i64,
}

/// IssuedToken
///
/// A freshly signed token and the instant it stops being accepted.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl IssuedToken {
    /// The `Set-Cookie` value delivering this token to the client.
    pub fn cookie(&self) -> String {
        format!(
            "{TOKEN_COOKIE}={}; Path=/; Expires={}; HttpOnly",
            self.token,
            http_date(self.expires_at)
        )
    }
}

/// The `Set-Cookie` value that makes the client discard its session token.
pub fn clear_token_cookie() -> String {
    format!("{TOKEN_COOKIE}=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly")
}

fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// SessionTokens
///
/// Issues, renews and verifies session tokens, and doubles as the Scheme B
/// `Authenticator` reading the `token` cookie.
///
/// State machine: login issues a token (unauthenticated -> authenticated), refresh
/// re-issues it with a new expiry, logout clears the cookie client-side.
#[derive(Clone)]
pub struct SessionTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl SessionTokens {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl,
        }
    }

    /// issue
    ///
    /// Signs a token for `username` expiring `ttl` from now.
    pub fn issue(&self, username: &str) -> Result<IssuedToken, AuthError> {
        let ttl = chrono::Duration::from_std(self.ttl).map_err(|_| AuthError::Signing)?;
        let expires_at = Utc::now() + ttl;
        self.sign(username, expires_at)
    }

    /// sign
    ///
    /// Signs a token with an explicit expiry.
    pub fn sign(&self, username: &str, expires_at: DateTime<Utc>) -> Result<IssuedToken, AuthError> {
        let claims = SessionClaims {
            username: username.to_string(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|e| {
            tracing::error!(error = %e, "failed to sign session token");
            AuthError::Signing
        })?;
        Ok(IssuedToken { token, expires_at })
    }

    /// verify
    ///
    /// Malformed tokens and bad signatures map to `MalformedToken` (400); expired or
    /// otherwise unacceptable tokens map to `ExpiredToken`/`InvalidToken` (401).
    pub fn verify(&self, token: &str) -> Result<SessionClaims, AuthError> {
        decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidToken
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_) => AuthError::MalformedToken,
                _ => AuthError::InvalidToken,
            })
    }
}

impl Authenticator for SessionTokens {
    fn scheme(&self) -> &'static str {
        "session"
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let token = cookie_value(headers, TOKEN_COOKIE).ok_or(AuthError::MissingToken)?;
        let claims = self.verify(&token)?;
        Ok(Principal {
            username: claims.username,
        })
    }
}

/// cookie_value
///
/// Finds a cookie by name across every `Cookie` header on the request.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
}
