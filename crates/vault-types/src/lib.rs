//! Wire types shared between the auth and files handlers.

pub mod api;
pub mod models;
