use crate::config::Config;
use crate::entities::user::{self, Entity as UserEntity, Role};
use crate::middleware::logging::ApiError;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

const ACTIVATION_PURPOSE: &str = "activation";

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = authenticate(&state, req.headers()).await?;
    debug!(user_id = principal.user_id, role = %principal.role, "Authenticated request");

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

/// The authenticated caller, handed explicitly to every protected handler.
#[derive(Clone, Debug, PartialEq)]
pub struct Principal {
    pub user_id: i32,
    pub username: String,
    pub role: Role,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i32,
    pub role: Role,
    pub token_type: TokenType,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ActivationClaims {
    user_id: i32,
    purpose: String,
    fingerprint: String,
    exp: usize,
}

#[derive(Clone, Debug)]
pub struct AuthState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<Config>,
}

#[derive(Error, Debug, PartialEq)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,
    #[error("Token is invalid")]
    Invalid,
    #[error("Wrong token type")]
    WrongType,
    #[error("Failed to generate token: {0}")]
    GenerationFail(String),
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::GenerationFail(value) => ApiError::TokenGenerationFailed(value),
            TokenError::Expired => ApiError::Unauthorized("Token expired".to_string()),
            TokenError::Invalid | TokenError::WrongType => {
                ApiError::Unauthorized("Token is invalid".to_string())
            }
        }
    }
}

pub fn generate_token(
    config: &Config,
    user_id: i32,
    role: Role,
    token_type: TokenType,
) -> Result<String, TokenError> {
    let ttl = match token_type {
        TokenType::Access => config.access_token_ttl_secs,
        TokenType::Refresh => config.refresh_token_ttl_secs,
    };
    let now = Utc::now();
    let exp = now
        .checked_add_signed(Duration::seconds(ttl))
        .ok_or_else(|| TokenError::GenerationFail("Expiry out of range".to_string()))?;

    let claims = Claims {
        user_id,
        role,
        token_type,
        iat: now.timestamp() as usize,
        exp: exp.timestamp() as usize,
    };

    sign(config, &claims)
}

/// Decodes a token and insists on its type, so refresh tokens never pass as access tokens.
pub fn validate_token(
    config: &Config,
    token: &str,
    expected: TokenType,
) -> Result<Claims, TokenError> {
    let claims: Claims = verify(config, token)?;
    if claims.token_type != expected {
        return Err(TokenError::WrongType);
    }
    Ok(claims)
}

pub fn generate_activation_token(
    config: &Config,
    user: &user::Model,
) -> Result<String, TokenError> {
    let exp = Utc::now()
        .checked_add_signed(Duration::seconds(config.activation_token_ttl_secs))
        .ok_or_else(|| TokenError::GenerationFail("Expiry out of range".to_string()))?;

    let claims = ActivationClaims {
        user_id: user.id,
        purpose: ACTIVATION_PURPOSE.to_string(),
        fingerprint: password_fingerprint(&user.password),
        exp: exp.timestamp() as usize,
    };

    sign(config, &claims)
}

/// True when `token` was issued for this user and the password has not changed since.
pub fn check_activation_token(config: &Config, user: &user::Model, token: &str) -> bool {
    match verify::<ActivationClaims>(config, token) {
        Ok(claims) => {
            claims.purpose == ACTIVATION_PURPOSE
                && claims.user_id == user.id
                && claims.fingerprint == password_fingerprint(&user.password)
        }
        Err(_) => false,
    }
}

pub fn encode_uid(user_id: i32) -> String {
    URL_SAFE_NO_PAD.encode(user_id.to_string())
}

pub fn decode_uid(uid: &str) -> Option<i32> {
    let bytes = URL_SAFE_NO_PAD.decode(uid).ok()?;
    String::from_utf8(bytes).ok()?.parse::<i32>().ok()
}

async fn authenticate(state: &AuthState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| {
            ApiError::Unauthorized("Authentication credentials were not provided.".to_string())
        })?;

    let claims = validate_token(&state.config, token.trim(), TokenType::Access)?;

    match UserEntity::find_by_id(claims.user_id)
        .one(state.db.as_ref())
        .await?
    {
        Some(model) if model.is_active => Ok(Principal {
            user_id: model.id,
            username: model.username,
            role: model.role,
        }),
        _ => Err(ApiError::Unauthorized(
            "User not found or inactive".to_string(),
        )),
    }
}

fn password_fingerprint(password_hash: &str) -> String {
    format!("{:x}", Sha256::digest(password_hash.as_bytes()))
}

fn sign<T: Serialize>(config: &Config, claims: &T) -> Result<String, TokenError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
    .map_err(|err| TokenError::GenerationFail(err.to_string()))
}

fn verify<T: DeserializeOwned>(config: &Config, token: &str) -> Result<T, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;

    decode::<T>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|err| match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Invalid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config() -> Config {
        Config::for_tests(PathBuf::from("./uploads"))
    }

    fn user(password: &str) -> user::Model {
        user::Model {
            id: 7,
            username: "JohnDoe".to_string(),
            email: "john@example.com".to_string(),
            password: password.to_string(),
            role: Role::Agent,
            is_active: false,
            date_joined: Utc::now(),
        }
    }

    #[test]
    fn access_token_round_trips_and_keeps_role() {
        let config = config();
        let token = generate_token(&config, 7, Role::Staff, TokenType::Access).unwrap();

        let claims = validate_token(&config, &token, TokenType::Access).unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.role, Role::Staff);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let config = config();
        let token = generate_token(&config, 7, Role::Agent, TokenType::Refresh).unwrap();

        assert_eq!(
            validate_token(&config, &token, TokenType::Access).unwrap_err(),
            TokenError::WrongType
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        let mut config = config();
        config.access_token_ttl_secs = -120;
        let token = generate_token(&config, 7, Role::Agent, TokenType::Access).unwrap();

        assert_eq!(
            validate_token(&config, &token, TokenType::Access).unwrap_err(),
            TokenError::Expired
        );
    }

    #[test]
    fn token_signed_with_another_secret_is_rejected() {
        let config = config();
        let mut other = config.clone();
        other.secret = "another-secret".to_string();
        let token = generate_token(&other, 7, Role::Admin, TokenType::Access).unwrap();

        assert_eq!(
            validate_token(&config, &token, TokenType::Access).unwrap_err(),
            TokenError::Invalid
        );
    }

    #[test]
    fn activation_token_is_bound_to_user_and_password() {
        let config = config();
        let owner = user("$argon2id$first");
        let token = generate_activation_token(&config, &owner).unwrap();

        assert!(check_activation_token(&config, &owner, &token));

        let mut someone_else = owner.clone();
        someone_else.id = 8;
        assert!(!check_activation_token(&config, &someone_else, &token));

        let changed_password = user("$argon2id$second");
        assert!(!check_activation_token(&config, &changed_password, &token));

        let mut tampered = token.clone();
        tampered.push('x');
        assert!(!check_activation_token(&config, &owner, &tampered));
    }

    #[test]
    fn access_token_is_not_an_activation_token() {
        let config = config();
        let token = generate_token(&config, 7, Role::Agent, TokenType::Access).unwrap();

        assert!(!check_activation_token(&config, &user("$argon2id$first"), &token));
    }

    #[test]
    fn uid_encoding_round_trips() {
        assert_eq!(decode_uid(&encode_uid(42)), Some(42));
        assert_eq!(decode_uid("not base64!"), None);
        assert_eq!(decode_uid(&URL_SAFE_NO_PAD.encode("abc")), None);
    }
}
