use std::sync::Arc;

use axum::extract::Json;
use axum::Extension;

use crate::client::Client;
use crate::form::ForgotPasswordForm;
use crate::router::Payload;
use crate::screen::ScreenState;
use crate::ServerError;

pub async fn show(Extension(client): Extension<Arc<Client>>) -> Json<ScreenState> {
    Json(client.forgot_password().render())
}

/// `POST /forgot-password`. The screen stays in place on success.
pub async fn handler(
    Extension(client): Extension<Arc<Client>>,
    Payload(form): Payload<ForgotPasswordForm>,
) -> Result<Json<ScreenState>, ServerError> {
    let screen = client.forgot_password();
    screen.submit(form)?.settled().await?;

    Ok(Json(screen.render()))
}
