pub mod app_state;
pub mod config;
pub mod cookies;
pub mod errors;

pub use app_state::AppState;
pub use config::Config;
pub use errors::{AppError, AppResult};
