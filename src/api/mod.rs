pub mod context_extractor;
pub mod handlers;
pub mod routes;
pub mod staging_handlers;

pub use handlers::*;
pub use routes::*;
pub use staging_handlers::*;
