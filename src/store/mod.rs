pub mod memory;
pub mod postgres;
pub mod staging;
pub mod traits;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use staging::StagingStore;
pub use traits::*;
