pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod handlers;

pub use config::Config;
pub use error::{AppError, Result};
pub use services::*;
pub use handlers::*;
