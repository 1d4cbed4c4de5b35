use std::sync::Arc;

use axum::Extension;
use axum::response::Response;

use crate::client::Client;
use crate::form::SignUpForm;
use crate::router::{Payload, view};
use crate::ServerError;

pub async fn show(Extension(client): Extension<Arc<Client>>) -> Response {
    let state = client.signup().render();
    view(state.redirect, state)
}

/// `POST /signup`: create the account and sign in.
pub async fn handler(
    Extension(client): Extension<Arc<Client>>,
    Payload(form): Payload<SignUpForm>,
) -> Result<Response, ServerError> {
    let screen = client.signup();
    screen.submit(form)?.settled().await?;

    let state = screen.render();
    Ok(view(state.redirect, state))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};

    use crate::router::tests::session_cookie;
    use crate::*;

    #[tokio::test]
    async fn test_signup_handler() {
        let (state, _) = state();
        let app = app(state);

        let response = make_request(
            app.clone(),
            Method::POST,
            "/signup",
            None,
            json!({
                "email": "john@example.com",
                "password": "hunter22",
                "confirmPassword": "hunter22",
                "age": "30",
            })
            .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/profile");
        let cookie = session_cookie(&response);

        let response =
            make_request(app, Method::GET, "/", Some(&cookie), String::default()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_signup_with_invalid_fields() {
        let (state, auth) = state();
        let app = app(state);

        let response = make_request(
            app,
            Method::POST,
            "/signup",
            None,
            json!({
                "email": "john@example.com",
                "password": "hunter22",
                "confirmPassword": "hunter23",
                "age": "17",
            })
            .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(auth.calls(), 0);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert!(body["field_errors"]["confirm_password"].is_string());
        assert!(body["field_errors"]["age"].is_string());
        assert!(body["error"].as_str().unwrap().is_empty());
    }
}
