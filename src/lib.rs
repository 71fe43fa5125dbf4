mod engine;
mod error;
mod generator;
mod midi_exporter;
mod model;
mod provider;
mod server;

pub use engine::*;
pub use error::*;
pub use generator::*;
pub use midi_exporter::*;
pub use model::config::*;
pub use model::melody::*;
pub use model::notes::*;
pub use provider::*;
pub use server::*;
