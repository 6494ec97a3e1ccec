use std::collections::BTreeMap;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;

use crate::{
    AppState,
    error::{AppError, StoreError},
    mailer::welcome_email,
    models::{
        NewUser, Token,
        token::{SCOPE_ACTIVATION, activation_ttl, validate_token_plaintext},
        user::validate_user,
    },
    storage::apply,
    utils::{success_to_api_response, validator::Validator},
};

use super::model::{ActivateUserRequest, RegisterUserRequest, UserResponse};

fn field_error(key: &str, message: &str) -> AppError {
    AppError::FailedValidation(BTreeMap::from([(key.to_string(), message.to_string())]))
}

pub async fn register_user(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<RegisterUserRequest>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let mut v = Validator::new();
    validate_user(&mut v, &req.name, &req.email, &req.password);
    v.into_result()?;

    let new_user = NewUser::new(req.name, req.email, &req.password).map_err(AppError::internal)?;

    let user = match state.users.insert(new_user).await {
        Ok(user) => user,
        Err(StoreError::DuplicateEmail) => {
            return Err(field_error(
                "email",
                "a user with this email address already exists",
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let token = Token::generate(user.id, activation_ttl(), SCOPE_ACTIVATION);
    state.tokens.insert(&token).await?;

    let mailer = state.mailer.clone();
    let email = welcome_email(&state.config.smtp_sender, &user.email, user.id, &token.plaintext);
    let user_id = user.id;
    state.background.launch("welcome_email", async move {
        if let Err(e) = mailer.send(email).await {
            tracing::error!(user_id, error = %e, "failed to send welcome email");
        }
    });

    Ok((StatusCode::ACCEPTED, success_to_api_response(UserResponse { user })))
}

pub async fn activate_user(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<ActivateUserRequest>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let mut v = Validator::new();
    validate_token_plaintext(&mut v, &req.token);
    v.into_result()?;

    let mut user = match state.users.get_for_token(SCOPE_ACTIVATION, &req.token).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => {
            return Err(field_error("token", "invalid or expired activation token"));
        }
        Err(e) => return Err(e.into()),
    };

    user.activated = true;
    apply(state.users.as_ref(), &mut user).await?;

    state
        .tokens
        .delete_all_for_user(SCOPE_ACTIVATION, user.id)
        .await?;

    Ok((StatusCode::OK, success_to_api_response(UserResponse { user })))
}
