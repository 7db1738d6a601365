mod session_extractor;
mod tracing_layer;

pub use session_extractor::*;
pub use tracing_layer::*;
