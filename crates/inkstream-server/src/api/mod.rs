pub mod chat;
pub mod health;
pub mod response;
pub mod state;

pub use response::{ApiError, ApiResponse};
pub use state::{AppState, ServerState};
