pub mod config;
pub mod melody;
pub mod notes;
