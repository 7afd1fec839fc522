use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{models::auth::AuthSession, state::AppState};

use redis::AsyncCommands;

/// Extracts the session token from the request cookies.
fn extract_session_token(cookies: &Cookies) -> Option<Uuid> {
    cookies
        .get("session_id")
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
}

/// A middleware that requires a valid auth session to be present.
///
/// The credential cookie resolves to an `AuthSession` record in Redis
/// (written by the login flow, which is outside this subsystem). On success
/// the record is attached as a request extension so the WebSocket upgrade
/// handler knows which `user_id` owns the connection; unauthenticated
/// upgrade attempts are refused before the upgrade happens.
pub async fn require_auth(
    State(mut state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    tracing::debug!("🔐 Checking authentication...");

    let session_id = extract_session_token(&cookies).ok_or_else(|| {
        tracing::warn!("❌ No session_id cookie found");
        StatusCode::FORBIDDEN
    })?;

    let session_json: String = state
        .redis
        .get(format!("session:{}", session_id))
        .await
        .map_err(|e| {
            tracing::warn!("❌ Redis error or auth session not found: {}", e);
            StatusCode::FORBIDDEN
        })?;

    let session: AuthSession = sonic_rs::from_str(&session_json).map_err(|e| {
        tracing::warn!("❌ Invalid auth session JSON: {}", e);
        StatusCode::FORBIDDEN
    })?;

    if session.is_expired(chrono::Utc::now()) {
        tracing::warn!("❌ Auth session expired for user: {}", session.user_id);

        let _: () = state
            .redis
            .del(format!("session:{}", session_id))
            .await
            .unwrap_or(());

        return Err(StatusCode::FORBIDDEN);
    }

    tracing::debug!("✅ User authenticated: {}", session.user_id);

    request.extensions_mut().insert(session);

    Ok(next.run(request).await)
}
