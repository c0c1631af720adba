//! Implementation blocks behind the `Store` facade.
//!
//! Every function takes an already-locked `Connection`; locking stays in
//! `store.rs`.

pub(crate) mod claim;
pub(crate) mod credentials;
pub(crate) mod runs;
pub(crate) mod scores;
pub(crate) mod seed;
