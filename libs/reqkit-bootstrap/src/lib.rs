pub mod config;
pub mod home_dir;
pub mod logging;

pub use config::*;
pub use logging::*;
