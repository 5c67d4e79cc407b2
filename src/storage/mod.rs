pub mod adapter;
pub mod engine;
pub mod operation;

pub use adapter::{MemoryAdapter, StorageAdapter};
pub use engine::{DEFAULT_PERSIST_DEBOUNCE, Status, StorageEngine};
pub use operation::Operation;
