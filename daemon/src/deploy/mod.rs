//! Deployment lifecycle

pub mod deployer;
pub mod deployment;
pub mod docker;
pub mod engine;
pub mod fake;
pub mod fsm;
pub mod git;
pub mod record;
pub mod remote;
pub mod sink;
