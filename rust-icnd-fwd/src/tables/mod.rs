//! The three forwarding tables.
//!
//! CS and PIT match on exact name equality; the FIB matches on the
//! longest prefix. Each table is a plain in-memory structure; stages
//! share them through `Arc<Mutex<_>>` handles and mutations performed
//! while servicing one packet are atomic with respect to other stages'
//! reads.

pub mod cs;
pub mod fib;
pub mod pit;

pub use cs::{ContentStore, CsEntry, SharedContentStore};
pub use fib::{Fib, FibEntry, SharedFib};
pub use pit::{Pit, PitEntry, SharedPit};
