pub mod app;
pub mod auth;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod state;

pub use app::build_app;
pub use error::ApiError;
pub use state::{build_state, AppState};
