pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod selector;
pub mod store;
pub mod supabase;

// Re-exports
pub use error::{BackendKind, Error, Result};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use selector::{
    BackendConnector, BackendState, MemoryConnector, PostgresConnector, ProbeResult, ProbeStatus,
    StorageConfig, StorageHealth, StorageSelector, StorageStatus, SupabaseConnector,
};
pub use store::TaskStore;
pub use supabase::SupabaseStore;
