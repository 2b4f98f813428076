mod types;

pub mod echo;
#[cfg(feature = "google")]
pub mod google;

pub use types::{GenerationError, ModelVariant, ResponseClient};
