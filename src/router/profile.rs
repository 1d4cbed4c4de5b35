//! Profile edition, guarded.

use std::sync::Arc;

use axum::extract::{Json, Multipart, State};
use axum::response::Response;
use axum::Extension;

use crate::client::Client;
use crate::form::ProfileForm;
use crate::profile::MAX_PHOTO_BYTES;
use crate::router::{Payload, view};
use crate::screen::{ProfileScreen, ProfileView};
use crate::{AppState, ServerError};

/// Request body limit on `POST /profile/photo`. Larger than the photo limit
/// so oversized files still get the inline message.
pub const PHOTO_BODY_LIMIT: usize = 2 * MAX_PHOTO_BYTES;

/// Current profile screen, waiting for its first fetch if just mounted.
async fn screen(client: &Client, state: &AppState) -> Result<Arc<ProfileScreen>, ServerError> {
    let (screen, load) = client.profile(&state.profiles);
    if let Some(load) = load {
        load.await?;
    }
    Ok(screen)
}

/// `GET /profile` and `GET /`.
pub async fn show(
    State(state): State<AppState>,
    Extension(client): Extension<Arc<Client>>,
) -> Result<Response, ServerError> {
    let view_state = screen(&client, &state).await?.render();
    Ok(view(view_state.state.redirect, view_state))
}

/// `POST /profile`: upload the selected photo, then save.
pub async fn handler(
    State(state): State<AppState>,
    Extension(client): Extension<Arc<Client>>,
    Payload(form): Payload<ProfileForm>,
) -> Result<Response, ServerError> {
    let screen = screen(&client, &state).await?;
    screen.submit(form)?.settled().await?;

    let view_state = screen.render();
    Ok(view(view_state.state.redirect, view_state))
}

/// `POST /profile/photo`: select a photo from a multipart `photo` field.
///
/// The file is only checked and previewed here.
pub async fn photo(
    State(state): State<AppState>,
    Extension(client): Extension<Arc<Client>>,
    mut multipart: Multipart,
) -> Result<Json<ProfileView>, ServerError> {
    let screen = screen(&client, &state).await?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("photo") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_owned();
        let content_type = field.content_type().unwrap_or_default().to_owned();
        let bytes = field.bytes().await?;
        tracing::debug!(%filename, %content_type, size = bytes.len(), "photo selected");

        screen.select_photo(&filename, &content_type, bytes)?;
        return Ok(Json(screen.render()));
    }

    Err(ServerError::MissingPhoto)
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::util::ServiceExt;

    use crate::router::login::tests::login;
    use crate::*;

    const BOUNDARY: &str = "portal-boundary";

    async fn upload(
        app: Router,
        cookie: &str,
        field: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> axum::http::Response<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; \
             filename=\"avatar.png\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        app.oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/profile/photo")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .header(header::COOKIE, cookie)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
    }

    async fn json(response: axum::http::Response<Body>) -> Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_profile_handler() {
        let (state, _) = state();
        let app = app(state);
        let cookie = login(&app).await;

        let response = make_request(
            app.clone(),
            Method::GET,
            "/profile",
            Some(&cookie),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["phase"], "idle");
        assert_eq!(body["form"]["username"], "Jane");

        let response = make_request(
            app.clone(),
            Method::POST,
            "/profile",
            Some(&cookie),
            json!({ "address": "1 Main St" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["phase"], "succeeded");
        assert_eq!(body["success"], "Profile updated successfully.");
        assert_eq!(body["form"]["username"], "Jane");
        assert_eq!(body["form"]["address"], "1 Main St");
    }

    #[tokio::test]
    async fn test_profile_with_invalid_username() {
        let (state, _) = state();
        let app = app(state);
        let cookie = login(&app).await;

        let response = make_request(
            app,
            Method::POST,
            "/profile",
            Some(&cookie),
            json!({ "username": "J" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert!(body["field_errors"]["username"].is_string());
        assert_eq!(body["form"]["username"], "Jane");
    }

    #[tokio::test]
    async fn test_photo_is_previewed_then_uploaded() {
        let (state, _) = state();
        let app = app(state.clone());
        let cookie = login(&app).await;

        let png = vec![0x89; 2 * 1024 * 1024];
        let response = upload(app.clone(), &cookie, "photo", "image/png", &png).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert!(
            body["preview"]
                .as_str()
                .unwrap()
                .starts_with("data:image/png;base64,")
        );

        let response = make_request(
            app,
            Method::POST,
            "/profile",
            Some(&cookie),
            json!({}).to_string(),
        )
        .await;
        let body = json(response).await;
        assert_eq!(body["phase"], "succeeded");
        let url = body["preview"].as_str().unwrap();
        assert!(url.starts_with(&format!("{}files/profileImages/", state.config.url)));
        assert!(url.ends_with("-avatar.png"));
    }

    #[tokio::test]
    async fn test_oversized_photo_is_refused() {
        let (state, _) = state();
        let app = app(state);
        let cookie = login(&app).await;

        let large = vec![0; 6 * 1024 * 1024];
        let response = upload(app.clone(), &cookie, "photo", "image/png", &large).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json(response).await;
        assert_eq!(body["errors"][0]["field"], "photo");
        assert_eq!(body["errors"][0]["message"], "File size must be less than 5MB.");

        let response = make_request(
            app,
            Method::GET,
            "/profile",
            Some(&cookie),
            String::default(),
        )
        .await;
        let body = json(response).await;
        assert_eq!(
            body["field_errors"]["photo"],
            "File size must be less than 5MB."
        );
        assert!(body.get("preview").is_none());
    }

    #[tokio::test]
    async fn test_missing_photo_field() {
        let (state, _) = state();
        let app = app(state);
        let cookie = login(&app).await;

        let response = upload(app, &cookie, "avatar", "image/png", b"png").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
