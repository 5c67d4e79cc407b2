//! Ripple is a reactive embedded document store.
//!
//! Documents live in memory, organized into named collections with
//! MongoDB style criteria matching and update operators. Every committed
//! mutation fans out as a change event: to local subscribers, to live query
//! observers, and through a broadcast hub to sibling contexts sharing the
//! same collections. Persistence is pluggable and debounced behind a
//! [`StorageAdapter`].
//!
//! ```no_run
//! use ripple_db::{Criteria, PartialDocument, Ripple};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> ripple_db::Result<()> {
//!     let db = Ripple::in_memory();
//!     let users = db.collection("users");
//!
//!     users
//!         .insert_one(PartialDocument::new().with("name", "Alice").with("age", 32))
//!         .await?;
//!
//!     let adults = Criteria::parse(json!({"age": {"$gte": 18}}))?;
//!     let _observer = users.observe(adults, Default::default(), |documents| {
//!         println!("{} adults", documents.len());
//!     });
//!     Ok(())
//! }
//! ```

pub mod collection;
pub mod db;
pub mod error;
pub mod events;
pub mod observe;
pub mod query;
pub mod storage;
pub mod sync;
pub mod types;
pub mod update;

pub use collection::{Collection, InsertManyResult, InsertOneResult, RemoveResult, UpdateResult};
pub use db::Ripple;
pub use error::{Result, RippleError};
pub use events::{Change, ChangeEvent};
pub use observe::Observer;
pub use query::Criteria;
pub use storage::{MemoryAdapter, Status, StorageAdapter, StorageEngine};
pub use sync::BroadcastHub;
pub use types::{Document, FindOptions, PartialDocument, SortOrder, Value};
pub use update::{UpdateOperators, UpdateOutcome};
