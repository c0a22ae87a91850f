use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationErrors};

use crate::middleware::logging::{ApiError, FieldErrors};

pub const REQUIRED: &str = "This field is required.";
pub const BLANK: &str = "This field may not be blank.";

pub const MIN_PASSWORD_LENGTH: usize = 8;

const COMMON_PASSWORDS: &[&str] = &[
    "123456", "12345678", "123456789", "1234567890", "password", "password1", "password123",
    "qwerty", "qwerty123", "qwertyuiop", "abc123", "111111", "11111111", "000000", "00000000",
    "iloveyou", "admin123", "administrator", "welcome", "welcome1", "letmein", "monkey",
    "dragon", "football", "baseball", "sunshine", "princess", "trustno1", "passw0rd",
    "starwars", "whatever", "superman", "1q2w3e4r", "zaq12wsx", "changeme",
];

/// JSON body whose rejection is reported through `ApiError`.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        Ok(JsonBody(value))
    }
}

/// JSON body that is deserialized and then checked with its `Validate` rules.
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

        value
            .validate()
            .map_err(|errors| ApiError::Validation(field_errors(&errors)))?;

        Ok(ValidJson(value))
    }
}

pub fn field_errors(errors: &ValidationErrors) -> FieldErrors {
    let mut result = FieldErrors::new();
    for (field, errors) in errors.field_errors() {
        let messages = errors
            .iter()
            .map(|err| match &err.message {
                Some(message) => message.to_string(),
                None => format!("Invalid value ({}).", err.code),
            })
            .collect();
        result.insert(field.to_string(), messages);
    }
    result
}

/// Adds `message` under `field`, keeping earlier messages for the same field.
pub fn push_error(errors: &mut FieldErrors, field: &str, message: impl Into<String>) {
    errors
        .entry(field.to_string())
        .or_default()
        .push(message.into());
}

/// Strength checks for new passwords; an empty list means the password is acceptable.
pub fn password_problems(password: &str, username: &str, email: &str) -> Vec<String> {
    let mut problems = Vec::new();

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        problems.push(format!(
            "This password is too short. It must contain at least {MIN_PASSWORD_LENGTH} characters."
        ));
    }

    if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
        problems.push("This password is entirely numeric.".to_string());
    }

    let lowered = password.to_lowercase();
    if COMMON_PASSWORDS.contains(&lowered.as_str()) {
        problems.push("This password is too common.".to_string());
    }

    if too_similar(&lowered, &username.to_lowercase()) {
        problems.push("The password is too similar to the username.".to_string());
    } else {
        let local_part = email.split('@').next().unwrap_or_default().to_lowercase();
        if too_similar(&lowered, &local_part) {
            problems.push("The password is too similar to the email address.".to_string());
        }
    }

    problems
}

fn too_similar(password: &str, attribute: &str) -> bool {
    if attribute.chars().count() < 3 || password.is_empty() {
        return false;
    }
    password.contains(attribute) || attribute.contains(password)
}
