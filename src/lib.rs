pub mod capture;
pub mod config;
pub mod error;
pub mod logger;
pub mod panel;
pub mod store;
pub mod view;

// Re-export commonly used types
pub use error::{CubescopeError, Result};
pub use panel::Panel;
