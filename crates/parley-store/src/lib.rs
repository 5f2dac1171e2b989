pub mod backend;
pub mod blocking;
pub mod codec;
pub mod connect;
pub mod error;
pub mod events;
pub mod memory;
pub mod row_helpers;
pub mod schema;
pub mod sessions;
pub mod state;
pub mod store;

pub use backend::StorageBackend;
pub use blocking::BlockingSessionStore;
pub use connect::{ConnectionDescriptor, ConnectionResolver, Credentials};
pub use error::StoreError;
pub use events::AppendOptions;
pub use memory::MemoryBackend;
pub use schema::TableNames;
pub use sessions::SessionFilter;
pub use store::SessionStore;
