pub mod sync;
pub mod types;

pub use sync::UpdateOrchestrator;
pub use types::*;
