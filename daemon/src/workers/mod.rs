//! Background workers

pub mod redeploy;
