// Conversation sync core: reconciles paginated history, live pushes and
// optimistic sends into consistent per-conversation timelines.
pub mod models;
pub mod sync;
pub mod utils;

// Re-export main types for convenience
pub use models::*;
pub use sync::{ChatClient, SyncConfig};
