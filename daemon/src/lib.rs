//! deployd library
//!
//! Auth gateway, deployment state machine and bootstrap sequence of the
//! deployment daemon. The binary in `main.rs` wires them together.

pub mod app;
pub mod authn;
pub mod bootstrap;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
