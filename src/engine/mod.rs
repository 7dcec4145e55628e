//! Server-side core: paged tree reads, counter aggregation and the vote
//! ledger. Everything here talks to the store through transactions only.

pub mod counters;
pub mod ledger;
pub mod tree;
