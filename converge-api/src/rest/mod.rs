mod handlers;
mod routes;

pub use handlers::{ApiError, Payload, VersionInfo};
pub use routes::create_router;
