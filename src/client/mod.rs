//! Client half of the board: a keyed query cache kept consistent with the
//! server through optimistic writes.

pub mod api;
pub mod cache;
pub mod coordinator;
pub mod invalidation;

pub use api::{ClientError, ForumApi, HttpApi};
pub use cache::{CachedValue, QueryCache, QueryKey};
pub use coordinator::{Coordinator, MutationState, PendingComment, PendingVote};
