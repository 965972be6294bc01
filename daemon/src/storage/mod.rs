//! On-disk configuration and layout

pub mod layout;
pub mod settings;
