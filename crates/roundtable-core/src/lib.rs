pub mod config;
pub mod events;
pub mod logging;
pub mod validate;

pub use config::{Config, ConfigError, NotifyMode};
pub use events::{Event, EventKind};
pub use validate::ValidationError;
