// Core models
pub mod change;
pub mod onchain_vote;
pub mod proposal;
pub mod snapshot;
pub mod vote;

// Re-export commonly used types
pub use change::*;
pub use onchain_vote::*;
pub use proposal::*;
pub use snapshot::*;
pub use vote::*;
