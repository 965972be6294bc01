//! Wire models shared between the deployd daemon and its clients

pub mod models;
