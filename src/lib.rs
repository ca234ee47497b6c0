//! Letter Desk: letter requests with a review workflow and multi-channel
//! notifications.

pub mod accounts;
pub mod api;
pub mod auth;
pub mod channels;
pub mod config;
pub mod error;
pub mod letters;
pub mod notifications;
pub mod store;
