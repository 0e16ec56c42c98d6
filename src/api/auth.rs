use axum::{
    Extension, Json,
    extract::{ConnectInfo, FromRequestParts, Path, Request, State},
    http::{HeaderMap, StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_sessions::cookie::{Cookie, SameSite};

use super::types::{
    ChangePasswordBody, CreateApiKeyBody, CreatedApiKeyDto, FieldError, LoginBody, LoginResponse,
    ProfileDto, RegisterRequest, SessionDto, TotpCodeBody, TotpRequired,
};
use super::validation::{parse_permissions, validate_id, validate_required};
use super::{ApiError, ApiJson, ApiResponse, AppState};
use crate::domain::{AuthContext, Permission};
use crate::models::auth::ApiKey;
use crate::models::user::User;
use crate::services::{LoginOutcome, LoginRequest, TotpSetup};

pub const SESSION_COOKIE: &str = "session_token";

/// Bearer tokens at least this long are treated as API keys.
pub const API_KEY_MIN_LEN: usize = 64;

// ============================================================================
// Credential extraction
// ============================================================================

/// Session token from the `session_token` cookie, else from a short Bearer token.
pub fn session_token_from(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = cookie_value(headers, SESSION_COOKIE) {
        return Some(token);
    }

    bearer_token(headers).filter(|token| token.len() < API_KEY_MIN_LEN)
}

/// API key from `X-API-Key`, else from a long Bearer token.
pub fn api_key_from(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("X-API-Key")
        && let Ok(key) = value.to_str()
        && !key.trim().is_empty()
    {
        return Some(key.trim().to_string());
    }

    bearer_token(headers).filter(|token| token.len() >= API_KEY_MIN_LEN)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION)
        && let Ok(auth_str) = auth_header.to_str()
        && let Some(token) = auth_str.strip_prefix("Bearer ")
        && !token.trim().is_empty()
    {
        return Some(token.trim().to_string());
    }
    None
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name && !cookie.value().is_empty())
        .map(|cookie| cookie.value().to_string())
}

fn session_cookie(token: String, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(time::Duration::seconds(max_age_secs))
        .build()
}

/// Client address and user agent recorded with new sessions and login attempts.
#[derive(Debug, Clone)]
pub struct ClientMeta {
    pub ip_address: String,
    pub user_agent: String,
}

impl FromRequestParts<Arc<AppState>> for ClientMeta {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let ip_address = client_ip(&parts.headers, peer, &state.settings.trusted_proxies);

        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            ip_address,
            user_agent,
        })
    }
}

/// The socket peer, unless it is a trusted proxy. Then the right-most
/// `X-Forwarded-For` hop that is not itself a trusted proxy.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trusted: &[IpAddr]) -> String {
    let Some(peer) = peer else {
        return "unknown".to_string();
    };
    if !trusted.contains(&peer) {
        return peer.to_string();
    }

    let forwarded: Vec<IpAddr> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|ip| ip.trim().parse().ok())
        .collect();

    forwarded
        .into_iter()
        .rev()
        .find(|ip| !trusted.contains(ip))
        .unwrap_or(peer)
        .to_string()
}

// ============================================================================
// Middleware
// ============================================================================

/// Authenticates the request and stores the [`AuthContext`] in its extensions.
///
/// Session validation is attempted first, API key validation second.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = request.headers();
    let session_token = session_token_from(headers);
    let api_key = api_key_from(headers);

    let mut failure = ApiError::Unauthorized("Authentication required".to_string());

    let mut context = None;
    if let Some(token) = session_token {
        match state.auth.validate_session(&token).await {
            Ok(ctx) => context = Some(ctx),
            Err(e) => failure = e.into(),
        }
    }
    if context.is_none()
        && let Some(key) = api_key
    {
        match state.auth.validate_api_key(&key).await {
            Ok(ctx) => context = Some(ctx),
            Err(e) => failure = e.into(),
        }
    }

    let Some(context) = context else {
        return Err(failure);
    };

    tracing::Span::current().record("user_id", context.user.id);
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

/// Fails with 403 unless the context grants `required` (or `admin:all`).
pub fn require_permission(ctx: &AuthContext, required: Permission) -> Result<(), ApiError> {
    if ctx.has_permission(required) {
        return Ok(());
    }
    tracing::warn!(
        user_id = ctx.user.id,
        required = %required,
        "Permission denied"
    );
    Err(ApiError::Forbidden {
        required,
        granted: ctx.permission_names(),
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<User>>), ApiError> {
    let mut details = Vec::new();
    if payload.username.trim().is_empty() {
        details.push(FieldError::new("username", "is required"));
    }
    if payload.email.trim().is_empty() {
        details.push(FieldError::new("email", "is required"));
    } else if !payload.email.contains('@') {
        details.push(FieldError::new("email", "must be an email address"));
    }
    if payload.password.is_empty() {
        details.push(FieldError::new("password", "is required"));
    }
    if !details.is_empty() {
        return Err(ApiError::invalid_fields(details));
    }

    let user = state
        .auth
        .register_user(&payload.username, &payload.email, &payload.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(user).with_message("User registered")),
    ))
}

/// POST /auth/login
/// Sets the session cookie, or answers `requires_totp` when a code is still needed.
pub async fn login(
    State(state): State<Arc<AppState>>,
    client: ClientMeta,
    ApiJson(payload): ApiJson<LoginBody>,
) -> Result<Response, ApiError> {
    validate_required("username", &payload.username)?;
    if payload.password.is_empty() {
        return Err(ApiError::validation("password", "is required"));
    }

    let outcome = state
        .auth
        .login(LoginRequest {
            username: payload.username,
            password: payload.password,
            totp_code: payload.totp_code.filter(|c| !c.trim().is_empty()),
            user_agent: client.user_agent,
            ip_address: client.ip_address,
        })
        .await?;

    match outcome {
        LoginOutcome::RequiresTotp => Ok(Json(
            ApiResponse::success(TotpRequired {
                requires_totp: true,
            })
            .with_message("TOTP code required"),
        )
        .into_response()),
        LoginOutcome::Authenticated { user, session } => {
            let max_age = (session.expires_at - chrono::Utc::now()).num_seconds().max(0);
            let cookie = session_cookie(session.token.clone(), max_age, state.settings.secure_cookies);
            let body = ApiResponse::success(LoginResponse {
                user,
                session_token: session.token,
                expires_at: session.expires_at,
            })
            .with_message("Login successful");

            Ok(([(header::SET_COOKIE, cookie.to_string())], Json(body)).into_response())
        }
    }
}

/// POST /auth/logout
pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token_from(&headers)
        && let Err(e) = state.auth.logout(&token).await
    {
        tracing::debug!(error = %e, "Logout for unknown session");
    }

    let cleared = session_cookie(String::new(), 0, state.settings.secure_cookies);
    (
        [(header::SET_COOKIE, cleared.to_string())],
        Json(ApiResponse::message("Logged out")),
    )
        .into_response()
}

/// GET /auth/profile
pub async fn profile(Extension(ctx): Extension<AuthContext>) -> Json<ApiResponse<ProfileDto>> {
    Json(ApiResponse::success(ProfileDto {
        permissions: ctx.permissions.iter().copied().collect(),
        auth_method: ctx.method,
        user: ctx.user,
    }))
}

/// POST /auth/totp/setup
pub async fn totp_setup(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<ApiResponse<TotpSetup>>, ApiError> {
    let setup = state.auth.setup_totp(ctx.user.id).await?;
    Ok(Json(
        ApiResponse::success(setup).with_message("Confirm with a code to enable TOTP"),
    ))
}

/// POST /auth/totp/enable
pub async fn totp_enable(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    ApiJson(payload): ApiJson<TotpCodeBody>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let code = validate_required("code", &payload.code)?;
    state.auth.enable_totp(ctx.user.id, code).await?;
    Ok(Json(ApiResponse::message("TOTP enabled")))
}

/// POST|DELETE /auth/totp/disable
pub async fn totp_disable(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state.auth.disable_totp(ctx.user.id).await?;
    Ok(Json(ApiResponse::message("TOTP disabled")))
}

/// POST /auth/api-keys
/// The plaintext key is only ever returned here.
pub async fn create_api_key(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    ApiJson(payload): ApiJson<CreateApiKeyBody>,
) -> Result<(StatusCode, Json<ApiResponse<CreatedApiKeyDto>>), ApiError> {
    let name = validate_required("name", &payload.name)?;

    let permissions = match payload.permissions {
        Some(requested) => parse_permissions(&requested)?,
        None => ctx.permissions.iter().copied().collect(),
    };
    if permissions.is_empty() {
        return Err(ApiError::validation(
            "permissions",
            "at least one permission is required",
        ));
    }
    // A key can never exceed its creator.
    for permission in &permissions {
        require_permission(&ctx, *permission)?;
    }

    if let Some(expires_at) = payload.expires_at
        && expires_at <= chrono::Utc::now()
    {
        return Err(ApiError::validation("expires_at", "must be in the future"));
    }

    let created = state
        .auth
        .create_api_key(ctx.user.id, name, permissions, payload.expires_at)
        .await?;

    tracing::info!(
        user_id = ctx.user.id,
        api_key_id = created.key.id,
        "API key created"
    );

    Ok((
        StatusCode::CREATED,
        Json(
            ApiResponse::success(CreatedApiKeyDto {
                key: created.key,
                api_key: created.plaintext,
            })
            .with_message("Store this key now, it will not be shown again"),
        ),
    ))
}

/// GET /auth/api-keys
pub async fn list_api_keys(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<ApiResponse<Vec<ApiKey>>>, ApiError> {
    let keys = state.auth.list_api_keys(ctx.user.id).await?;
    Ok(Json(ApiResponse::success(keys)))
}

/// DELETE /auth/api-keys/{id}
pub async fn revoke_api_key(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let id = validate_id("id", id)?;
    state.auth.revoke_api_key(ctx.user.id, id).await?;
    Ok(Json(ApiResponse::message("API key revoked")))
}

/// GET /auth/sessions
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<ApiResponse<Vec<SessionDto>>>, ApiError> {
    let sessions = state
        .auth
        .list_sessions(ctx.user.id)
        .await?
        .into_iter()
        .map(|session| SessionDto {
            current: ctx.session_id == Some(session.id),
            session,
        })
        .collect();
    Ok(Json(ApiResponse::success(sessions)))
}

/// DELETE /auth/sessions/all
pub async fn logout_all(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<ApiResponse<u64>>, ApiError> {
    let removed = state.auth.logout_all(ctx.user.id).await?;
    Ok(Json(
        ApiResponse::success(removed).with_message("All sessions invalidated"),
    ))
}

/// PUT /auth/password
/// Every session of the user, including the current one, is invalidated.
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    ApiJson(payload): ApiJson<ChangePasswordBody>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let mut details = Vec::new();
    if payload.current_password.is_empty() {
        details.push(FieldError::new("current_password", "is required"));
    }
    if payload.new_password.is_empty() {
        details.push(FieldError::new("new_password", "is required"));
    }
    if !details.is_empty() {
        return Err(ApiError::invalid_fields(details));
    }

    state
        .auth
        .change_password(ctx.user.id, &payload.current_password, &payload.new_password)
        .await?;

    Ok(Json(ApiResponse::message(
        "Password changed, please log in again",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_str(value).expect("header value"));
        }
        map
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn forwarded_for_is_ignored_from_untrusted_peers() {
        let h = headers(&[("x-forwarded-for", "1.2.3.4")]);
        assert_eq!(client_ip(&h, Some(ip("203.0.113.9")), &[]), "203.0.113.9");
        assert_eq!(
            client_ip(&h, Some(ip("203.0.113.9")), &[ip("10.0.0.1")]),
            "203.0.113.9"
        );
        assert_eq!(client_ip(&h, None, &[]), "unknown");
    }

    #[test]
    fn trusted_proxy_forwards_rightmost_untrusted_hop() {
        let trusted = [ip("10.0.0.1"), ip("10.0.0.2")];
        let h = headers(&[("x-forwarded-for", "6.6.6.6, 198.51.100.7, 10.0.0.2")]);
        assert_eq!(client_ip(&h, Some(ip("10.0.0.1")), &trusted), "198.51.100.7");

        let h = headers(&[("x-forwarded-for", "10.0.0.2")]);
        assert_eq!(client_ip(&h, Some(ip("10.0.0.1")), &trusted), "10.0.0.1");

        let h = HeaderMap::new();
        assert_eq!(client_ip(&h, Some(ip("10.0.0.1")), &trusted), "10.0.0.1");
    }

    #[test]
    fn cookie_wins_over_bearer_for_sessions() {
        let h = headers(&[
            ("cookie", "theme=dark; session_token=from-cookie"),
            ("authorization", "Bearer short-token"),
        ]);
        assert_eq!(session_token_from(&h).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn bearer_length_decides_credential_kind() {
        let short = "s".repeat(43);
        let long = "a".repeat(64);

        let h = headers(&[("authorization", &format!("Bearer {short}"))]);
        assert_eq!(session_token_from(&h), Some(short.clone()));
        assert_eq!(api_key_from(&h), None);

        let h = headers(&[("authorization", &format!("Bearer {long}"))]);
        assert_eq!(session_token_from(&h), None);
        assert_eq!(api_key_from(&h), Some(long));
    }

    #[test]
    fn api_key_header_wins_over_bearer() {
        let long = "b".repeat(64);
        let h = headers(&[
            ("x-api-key", "explicit-key"),
            ("authorization", &format!("Bearer {long}")),
        ]);
        assert_eq!(api_key_from(&h).as_deref(), Some("explicit-key"));
    }

    #[test]
    fn missing_credentials_yield_nothing() {
        let h = headers(&[("authorization", "Basic dXNlcjpwYXNz")]);
        assert_eq!(session_token_from(&h), None);
        assert_eq!(api_key_from(&h), None);
    }

    #[test]
    fn session_cookie_attributes() {
        let cookie = session_cookie("tok".to_string(), 3600, true).to_string();
        assert!(cookie.starts_with("session_token=tok"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Max-Age=3600"));
    }
}
