//! Request admission and dispatch: authentication, rate limiting, model
//! resolution, the upstream client contract, usage accounting, and the
//! engine that ties them to the translators.

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod images;
pub mod models;
pub mod rate_limit;
pub mod upstream;
pub mod usage;
