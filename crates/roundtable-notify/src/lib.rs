pub mod backend;
pub mod stream;

pub use backend::{NoopBackend, NotificationBackend, QueueBackend, DEFAULT_QUEUE_CAPACITY};
pub use stream::EventStream;
