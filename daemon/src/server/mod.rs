//! HTTPS API: auth gateway, routes and the TLS listener

pub mod error;
pub mod gateway;
pub mod handlers;
pub mod serve;
pub mod state;
pub mod users;
pub mod webhook;
