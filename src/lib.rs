pub mod api;
pub mod config;
pub mod entities;
pub mod jobs;
pub mod mailer;
pub mod middleware;
