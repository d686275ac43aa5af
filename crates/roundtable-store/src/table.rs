use std::sync::Arc;

use chrono::Utc;

use roundtable_core::{Config, NotifyMode};
use roundtable_notify::{NoopBackend, NotificationBackend, QueueBackend};

use crate::database::Database;
use crate::error::StoreError;
use crate::rate_limit::RateLimiter;

/// The access layer: the sole gateway to the persisted store.
///
/// Every exposed operation validates its inputs, runs as one committed
/// transaction with its audit entry inside, and fans out best-effort
/// notifications after commit. The rate limiter and notification backend
/// are injected at construction; both are process-local.
pub struct Roundtable {
    pub(crate) db: Database,
    pub(crate) limiter: RateLimiter,
    pub(crate) notify: Arc<dyn NotificationBackend>,
}

impl Roundtable {
    pub fn new(
        db: Database,
        limiter: RateLimiter,
        notify: Arc<dyn NotificationBackend>,
    ) -> Self {
        Self {
            db,
            limiter,
            notify,
        }
    }

    /// Open the store described by `config` with the backend it selects.
    pub fn open(config: &Config) -> Result<Self, StoreError> {
        let db = Database::open(config)?;
        let notify: Arc<dyn NotificationBackend> = match config.notify {
            NotifyMode::Queue => Arc::new(QueueBackend::default()),
            NotifyMode::Noop => Arc::new(NoopBackend),
        };
        Ok(Self::new(db, RateLimiter::default(), notify))
    }

    /// In-memory store with a no-op backend (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(
            Database::in_memory()?,
            RateLimiter::default(),
            Arc::new(NoopBackend),
        ))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn notifier(&self) -> &Arc<dyn NotificationBackend> {
        &self.notify
    }

    /// Clear all rate-limit buckets (for tests).
    pub fn reset_rate_limits(&self) {
        self.limiter.reset();
    }
}

/// One authoritative clock for every persisted timestamp.
pub(crate) fn now_utc() -> String {
    Utc::now().to_rfc3339()
}
