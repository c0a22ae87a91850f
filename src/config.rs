use std::{path::PathBuf, str::FromStr};

use dotenvy::dotenv;
use thiserror::Error;

pub const DEFAULT_VIDEO_SIZE_LIMIT: usize = 20 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("Failed to parse {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub secret: String,
    /// Prefix of the activation links handed to the mailer.
    pub public_base_url: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub activation_token_ttl_secs: i64,
    pub upload_dir: PathBuf,
    pub video_size_limit: usize,
    pub job_queue_capacity: usize,
    /// How long a finished job stays pollable.
    pub job_retention_secs: i64,
    pub generate_max_count: u32,
    pub admin: Option<AdminSeed>,
}

#[derive(Clone, Debug)]
pub struct AdminSeed {
    pub username: String,
    pub password: String,
    pub email: String,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        dotenv().ok();

        let admin = match (optional("ADMIN_USERNAME"), optional("ADMIN_PASSWORD")) {
            (Some(username), Some(password)) => Some(AdminSeed {
                email: optional("ADMIN_EMAIL").unwrap_or_else(|| format!("{username}@localhost")),
                username,
                password,
            }),
            _ => None,
        };

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            bind_addr: optional("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            secret: required("SECRET")?,
            public_base_url: optional("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            access_token_ttl_secs: parsed("ACCESS_TOKEN_TTL_SECS", 300)?,
            refresh_token_ttl_secs: parsed("REFRESH_TOKEN_TTL_SECS", 86_400)?,
            activation_token_ttl_secs: parsed("ACTIVATION_TOKEN_TTL_SECS", 259_200)?,
            upload_dir: optional("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./uploads")),
            video_size_limit: parsed("VIDEO_SIZE_LIMIT", DEFAULT_VIDEO_SIZE_LIMIT)?,
            job_queue_capacity: parsed("JOB_QUEUE_CAPACITY", 16)?,
            job_retention_secs: parsed("JOB_RETENTION_SECS", 3_600)?,
            generate_max_count: parsed("GENERATE_MAX_COUNT", 100_000)?,
            admin,
        })
    }

    /// Settings for an in-process server, used by the integration tests.
    pub fn for_tests(upload_dir: PathBuf) -> Config {
        Config {
            database_url: "sqlite::memory:".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            secret: "test-secret-that-is-long-enough".to_string(),
            public_base_url: "http://localhost:3000".to_string(),
            access_token_ttl_secs: 300,
            refresh_token_ttl_secs: 86_400,
            activation_token_ttl_secs: 259_200,
            upload_dir,
            video_size_limit: DEFAULT_VIDEO_SIZE_LIMIT,
            job_queue_capacity: 16,
            job_retention_secs: 3_600,
            generate_max_count: 100_000,
            admin: None,
        }
    }
}

fn optional(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        Some(value) => value
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}
