//! Object store abstraction.
//!
//! The store persists declared objects and notifies subscribers of changes.
//! [`MemoryStore`] is the in-process implementation used by the API server
//! and by tests.

mod error;
mod event;
mod memory;
mod traits;

pub use error::{Result, StoreError};
pub use event::Event;
pub use memory::MemoryStore;
pub use traits::ObjectStore;
