pub mod rest;
pub mod state;

pub use rest::{ApiError, create_router};
pub use state::{AppState, Controllers, KindState, build};
