pub mod data;
pub mod defaults;
pub mod io;
pub mod printing;

pub use data::{Config, ModelsConfig, SearchConfig};
pub use io::ConfigError;
