//! Polling-based change synchronisation.
//!
//! [`poller`] fetches change events per subscription, [`reconcile`] folds
//! them into the entity store and the notification log.

pub mod cursor;
pub mod event;
pub mod poller;
pub mod reconcile;

pub use cursor::Cursor;
pub use event::{ChangeEvent, DedupKey, EventMetadata, UpdateType};
pub use poller::{ChangeBatch, ChangePoller, PollOutcome, PollScope, SubscriptionHandle};
pub use reconcile::{IngestReport, Notification, NotificationReconciler, NotificationType};
