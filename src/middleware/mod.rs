pub mod auth;
pub mod logging;
pub mod policy;
