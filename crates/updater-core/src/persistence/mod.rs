// # Persistence Implementations
//
// Implementations of the Persistence trait for record event history.

pub mod json;
pub mod memory;

pub use json::JsonPersistence;
pub use memory::MemoryPersistence;
