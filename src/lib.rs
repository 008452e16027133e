//! Watches an auction catalog and announces new lots on Telegram.
pub mod api;
pub mod compose;
pub mod config;
pub mod delivery;
pub mod error;
pub mod github;
pub mod model;
pub mod normalize;
pub mod photo;
pub mod pipeline;
pub mod retry;
pub mod seen;
