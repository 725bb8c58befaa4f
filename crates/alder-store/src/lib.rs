//! Shared-store access for the alder consistency core.
//!
//! Two families of rows keep the fleet's caches honest:
//!
//! - **pending acknowledgements** (`write_acks_deployment{N}`): one row
//!   per peer that must confirm cache eviction before a write commits
//! - **invalidations** (`invalidations_deployment{N}`): one row per
//!   modified inode, whose arrival at a peer triggers the eviction
//!
//! The crate defines the row types, the per-deployment table and event
//! naming scheme, the [`ConsistencyStore`] data-access trait, and the
//! [`ChangeEventSource`] trait through which row-level change events are
//! streamed back out of the store. [`MemoryStore`] implements both
//! deterministically for tests and single-process hosts; SQL-backed
//! implementations are a host concern.

mod error;
mod events;
mod memory;
mod rows;
mod tables;
mod traits;

pub use error::StoreError;
pub use events::ChangeKind;
pub use events::ColumnValue;
pub use events::EventStream;
pub use events::RowChangeEvent;
pub use events::RowImage;
pub use memory::MemoryStore;
pub use rows::Invalidation;
pub use rows::WriteAck;
pub use tables::ACK_TABLE_COLUMNS;
pub use tables::ack_columns;
pub use tables::ack_event_name;
pub use tables::invalidation_columns;
pub use tables::invalidations_table;
pub use tables::write_acks_table;
pub use traits::ChangeEventSource;
pub use traits::ConsistencyStore;
