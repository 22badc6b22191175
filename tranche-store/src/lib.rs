//! SQLite persistence for the Tranche register.
//!
//! The load-bearing piece of this crate is the identifier allocation path:
//! record identifiers such as `CL001` and `FV0001` are derived from durable
//! per-kind counters, and every allocation runs inside an exclusive write
//! transaction so that concurrent writers can never issue duplicate or
//! out-of-order identifiers. See [`FacilityStore::allocate_and_insert`].

mod error;
mod sequence;
mod sqlite;
mod writer;

pub use error::{StoreError, StoreResult};
pub use sequence::{format_id, SequenceDef, CREDIT_LINES_SEQ, FIXED_ADVANCES_SEQ, SEQUENCES};
pub use sqlite::FacilityStore;
