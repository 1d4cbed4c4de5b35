//! HTTP surface: one JSON view per screen.

pub mod forgot_password;
pub mod login;
pub mod profile;
pub mod signup;
pub mod status;

use std::sync::Arc;

use axum::extract::{FromRequest, Path, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Extension, Json};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::client::{COOKIE_NAME, Client};
use crate::guard::{self, Access, Route};
use crate::{AppState, ServerError};

/// JSON body whose rejection is rendered as a [`ServerError`].
///
/// Field rules are not checked here: screens report them inline.
pub struct Payload<T>(pub T);

impl<T, S> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Payload(value))
    }
}

/// Render a screen, or send `303 See Other` when it navigated away.
///
/// The body is sent either way so clients not following redirects still see
/// the final state.
pub fn view<T: Serialize>(redirect: Option<Route>, body: T) -> Response {
    match redirect {
        Some(route) => (
            StatusCode::SEE_OTHER,
            [(header::LOCATION, route.path())],
            Json(body),
        )
            .into_response(),
        None => Json(body).into_response(),
    }
}

fn cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == COOKIE_NAME)
        .map(|(_, value)| value.to_owned())
}

/// Attach the browser context to the request, creating it if needed.
pub async fn attach_client(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let (client, _) = state
        .clients
        .get_or_create(cookie(req.headers()).as_deref());
    let id = client.id().to_owned();
    req.extensions_mut().insert(client);

    let mut response = next.run(req).await;

    // Re-issued on every response so the cookie expires with the idle context.
    let secure = if state.config.url.starts_with("https://") {
        "; Secure"
    } else {
        ""
    };
    let value = format!(
        "{COOKIE_NAME}={id}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{secure}",
        state.config.session.idle_timeout_secs
    );
    match HeaderValue::from_str(&value) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        },
        Err(err) => tracing::error!(%err, "invalid session cookie"),
    }

    response
}

/// Only let authenticated browsers through. Waits for the session to settle.
pub async fn require_auth(
    Extension(client): Extension<Arc<Client>>,
    req: Request,
    next: Next,
) -> Response {
    match guard::resolve(Route::Profile, client.session()).await {
        Access::Render => next.run(req).await,
        Access::Redirect(route) => Redirect::to(route.path()).into_response(),
        Access::Pending => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

/// `POST /logout`.
pub async fn logout(Extension(client): Extension<Arc<Client>>) -> Redirect {
    client.leave();
    client.session().sign_out();
    Redirect::to(Route::Login.path())
}

/// `GET /files/{*path}`: objects kept by the in-memory backend.
pub async fn file(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    match state.files.as_ref().and_then(|files| files.file(&path)) {
        Some(file) => ([(header::CONTENT_TYPE, file.content_type)], file.bytes).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `GET /metrics` in Prometheus text format.
pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}

#[cfg(test)]
pub(crate) mod tests {
    use axum::http::{Method, StatusCode};

    use super::*;
    use crate::router::login::tests::login;
    use crate::*;

    /// Cookie pair from a `Set-Cookie` response header.
    pub fn session_cookie(response: &Response) -> String {
        let value = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        value.split(';').next().unwrap().to_owned()
    }

    #[test]
    fn test_cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; portal_sid=abc123; lang=fr"),
        );
        assert_eq!(cookie(&headers).as_deref(), Some("abc123"));
        assert_eq!(cookie(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_anonymous_is_redirected() {
        let (state, _) = state();
        let app = app(state);

        for path in ["/", "/profile"] {
            let response =
                make_request(app.clone(), Method::GET, path, None, String::default()).await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
            assert_eq!(response.headers()[header::LOCATION], "/login");
            let cookie = session_cookie(&response);
            assert!(cookie.starts_with("portal_sid="));
        }
    }

    #[tokio::test]
    async fn test_cookie_is_refreshed() {
        let (state, _) = state();
        let app = app(state.clone());

        let response =
            make_request(app.clone(), Method::GET, "/login", None, String::default()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("SameSite=Lax"));
        let cookie = session_cookie(&response);

        let response = make_request(
            app,
            Method::GET,
            "/signup",
            Some(&cookie),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(set_cookie.contains("Max-Age=1800"));
        assert_eq!(session_cookie(&response), cookie);
        assert_eq!(state.clients.len(), 1);
    }

    #[tokio::test]
    async fn test_logout() {
        let (state, _) = state();
        let app = app(state);
        let cookie = login(&app).await;

        let response = make_request(
            app.clone(),
            Method::POST,
            "/logout",
            Some(&cookie),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login");

        let response =
            make_request(app, Method::GET, "/profile", Some(&cookie), String::default())
                .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn test_unknown_file() {
        let (state, _) = state();
        let app = app(state);

        let response = make_request(
            app,
            Method::GET,
            "/files/profileImages/uid/missing.png",
            None,
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics() {
        let (state, _) = state();
        let app = app(state);

        let response =
            make_request(app, Method::GET, "/metrics", None, String::default()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
