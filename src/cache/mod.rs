pub mod context_hash;
pub mod exact_match;

pub use context_hash::context_hash;
pub use exact_match::{CacheLookup, ExactMatchCache, UpdateOutcome};
