use std::sync::Arc;

use axum::Extension;
use axum::response::Response;

use crate::client::Client;
use crate::form::SignInForm;
use crate::identity::ExternalCredential;
use crate::router::{Payload, view};
use crate::ServerError;

/// `GET /login`.
pub async fn show(Extension(client): Extension<Arc<Client>>) -> Response {
    let state = client.login().render();
    view(state.redirect, state)
}

/// `POST /login`.
pub async fn handler(
    Extension(client): Extension<Arc<Client>>,
    Payload(form): Payload<SignInForm>,
) -> Result<Response, ServerError> {
    let screen = client.login();
    screen.submit(form)?.settled().await?;

    let state = screen.render();
    Ok(view(state.redirect, state))
}

/// `POST /login/provider`: credential obtained from an identity provider
/// popup.
pub async fn provider(
    Extension(client): Extension<Arc<Client>>,
    Payload(credential): Payload<ExternalCredential>,
) -> Result<Response, ServerError> {
    let screen = client.login();
    screen.submit_external(credential)?.settled().await?;

    let state = screen.render();
    Ok(view(state.redirect, state))
}
