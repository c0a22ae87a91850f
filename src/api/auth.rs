use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, SqlErr, TransactionTrait,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use crate::api::validation::{field_errors, password_problems, push_error, JsonBody};
use crate::config::Config;
use crate::entities::user::{self, hash_password, Entity as UserEntity, Role};
use crate::mailer::{ActivationMail, Mailer};
use crate::middleware::{
    auth::{
        check_activation_token, decode_uid, encode_uid, generate_activation_token,
        generate_token, validate_token, TokenType,
    },
    logging::{to_response, ApiError, FieldErrors},
};

const USERNAME_TAKEN: &str = "A user with that username already exists.";

pub fn auth_router() -> Router {
    Router::new()
        .route("/register", post(register_user))
        .route("/activate/:uid/:token/", get(activate_user))
        .route("/login", post(login))
        .route("/token/refresh", post(refresh_token))
}

// ROUTES
async fn register_user(
    Extension(db): Extension<Arc<DatabaseConnection>>,
    Extension(config): Extension<Arc<Config>>,
    Extension(mailer): Extension<Arc<dyn Mailer>>,
    JsonBody(payload): JsonBody<CreateUser>,
) -> Result<Response, ApiError> {
    let mut errors = payload
        .validate()
        .err()
        .map(|errors| field_errors(&errors))
        .unwrap_or_default();
    for problem in password_problems(&payload.password, &payload.username, &payload.email) {
        push_error(&mut errors, "password", problem);
    }
    let role = parse_role(payload.role, &mut errors);

    let txn = db.begin().await?;

    let taken = UserEntity::find()
        .filter(user::Column::Username.eq(&*payload.username))
        .one(&txn)
        .await?
        .is_some();
    if taken {
        push_error(&mut errors, "username", USERNAME_TAKEN);
    }

    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let password = hash_password(&payload.password)
        .map_err(|err| ApiError::PasswordHashFailed(err.to_string()))?;

    let new_user = insert_user(
        &txn,
        user::ActiveModel {
            username: Set(payload.username),
            email: Set(payload.email),
            password: Set(password),
            role: Set(role),
            is_active: Set(false),
            date_joined: Set(Utc::now()),
            ..Default::default()
        },
    )
    .await?;
    txn.commit().await?;

    let token = generate_activation_token(&config, &new_user)?;
    let link = format!(
        "{}/api/activate/{}/{}/",
        config.public_base_url.trim_end_matches('/'),
        encode_uid(new_user.id),
        token
    );
    mailer.send_activation(ActivationMail {
        to: new_user.email.clone(),
        username: new_user.username.clone(),
        link,
    });
    info!(user_id = new_user.id, role = %new_user.role, "Registered inactive user");

    Ok(to_response(
        (
            StatusCode::OK,
            Json(json!({
                "message": "Registration successful. Please check your email to activate your account."
            })),
        ),
        Ok(()),
    ))
}

async fn activate_user(
    Path((uid, token)): Path<(String, String)>,
    Extension(db): Extension<Arc<DatabaseConnection>>,
    Extension(config): Extension<Arc<Config>>,
) -> Result<Response, ApiError> {
    let invalid_link = || ApiError::BadRequest("Invalid activation link".to_string());

    let user_id = decode_uid(&uid).ok_or_else(invalid_link)?;

    let txn = db.begin().await?;
    let user = UserEntity::find_by_id(user_id)
        .one(&txn)
        .await?
        .ok_or_else(invalid_link)?;

    if !check_activation_token(&config, &user, &token) {
        return Err(ApiError::BadRequest(
            "Activation link expired or invalid".to_string(),
        ));
    }

    // Reusing a link on an active account changes nothing.
    if !user.is_active {
        let mut user: user::ActiveModel = user.into();
        user.is_active = Set(true);
        let user = user.update(&txn).await?;
        txn.commit().await?;
        info!(user_id = user.id, "Activated user");
    }

    Ok(to_response(
        (
            StatusCode::OK,
            Json(json!({
                "message": "Account activated successfully!"
            })),
        ),
        Ok(()),
    ))
}

async fn login(
    Extension(db): Extension<Arc<DatabaseConnection>>,
    Extension(config): Extension<Arc<Config>>,
    JsonBody(payload): JsonBody<UserLogin>,
) -> Result<Response, ApiError> {
    let invalid = || ApiError::Unauthorized("Invalid credentials".to_string());

    let txn = db.begin().await?;
    let model = UserEntity::find()
        .filter(user::Column::Username.eq(&*payload.username))
        .one(&txn)
        .await?
        .ok_or_else(invalid)?;

    if model.check_hash(&payload.password).is_err() || !model.is_active {
        return Err(invalid());
    }

    let refresh = generate_token(&config, model.id, model.role, TokenType::Refresh)?;
    let access = generate_token(&config, model.id, model.role, TokenType::Access)?;
    info!(user_id = model.id, "User logged in");

    Ok(to_response(
        (
            StatusCode::OK,
            Json(json!({
                "refresh": refresh,
                "access": access,
                "role": model.role,
            })),
        ),
        Ok(()),
    ))
}

async fn refresh_token(
    Extension(db): Extension<Arc<DatabaseConnection>>,
    Extension(config): Extension<Arc<Config>>,
    JsonBody(payload): JsonBody<RefreshPayload>,
) -> Result<Response, ApiError> {
    let claims = validate_token(&config, &payload.refresh, TokenType::Refresh)?;

    let txn = db.begin().await?;
    let model = UserEntity::find_by_id(claims.user_id)
        .one(&txn)
        .await?
        .filter(|model| model.is_active)
        .ok_or_else(|| ApiError::Unauthorized("User not found or inactive".to_string()))?;

    let access = generate_token(&config, model.id, model.role, TokenType::Access)?;

    Ok(to_response(
        (StatusCode::OK, Json(json!({ "access": access }))),
        Ok(()),
    ))
}

/// A concurrent sign-up can pass the lookup and still lose the race on the unique index.
async fn insert_user<C: ConnectionTrait>(
    db: &C,
    model: user::ActiveModel,
) -> Result<user::Model, ApiError> {
    model.insert(db).await.map_err(|err| match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => ApiError::field("username", USERNAME_TAKEN),
        _ => err.into(),
    })
}

/// Missing or null means agent; anything else must name a role.
fn parse_role(value: Option<Value>, errors: &mut FieldErrors) -> Role {
    let raw = match value {
        None | Some(Value::Null) => return Role::default(),
        Some(Value::String(raw)) => raw,
        Some(other) => other.to_string(),
    };
    raw.parse().unwrap_or_else(|_| {
        push_error(errors, "role", format!("\"{raw}\" is not a valid choice."));
        Role::default()
    })
}

//structs
static USERNAME_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w.@+-]+$").unwrap());

#[derive(Deserialize, Validate)]
struct CreateUser {
    #[serde(default)]
    #[validate(
        length(min = 1, max = 150, message = "Ensure this field has between 1 and 150 characters."),
        regex(
            path = *USERNAME_REGEX,
            message = "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters."
        )
    )]
    username: String,
    #[serde(default)]
    #[validate(email(message = "Enter a valid email address."))]
    email: String,
    #[serde(default)]
    password: String,
    role: Option<Value>,
}

#[derive(Deserialize)]
struct UserLogin {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
struct RefreshPayload {
    #[serde(default)]
    refresh: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{connect, setup_schema};

    fn new_user(username: &str) -> user::ActiveModel {
        user::ActiveModel {
            username: Set(username.to_string()),
            email: Set(format!("{username}@example.com")),
            password: Set("hash".to_string()),
            role: Set(Role::Agent),
            is_active: Set(false),
            date_joined: Set(Utc::now()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn duplicate_insert_is_a_username_error() {
        let db = connect("sqlite::memory:").await.unwrap();
        setup_schema(&db).await.unwrap();
        insert_user(&db, new_user("dup")).await.unwrap();

        match insert_user(&db, new_user("dup")).await {
            Err(ApiError::Validation(errors)) => {
                assert_eq!(errors["username"], vec![USERNAME_TAKEN]);
            }
            other => panic!("expected a username error, got {other:?}"),
        }
    }

    #[test]
    fn role_defaults_to_agent_and_rejects_unknown_choices() {
        let mut errors = FieldErrors::new();
        assert_eq!(parse_role(None, &mut errors), Role::Agent);
        assert_eq!(parse_role(Some(Value::Null), &mut errors), Role::Agent);
        assert_eq!(parse_role(Some(json!("staff")), &mut errors), Role::Staff);
        assert!(errors.is_empty());

        parse_role(Some(json!("superuser")), &mut errors);
        parse_role(Some(json!(5)), &mut errors);
        assert_eq!(
            errors["role"],
            vec![
                "\"superuser\" is not a valid choice.",
                "\"5\" is not a valid choice."
            ]
        );
    }
}
