//! Built-in maintenance tasks and job handlers.

pub mod notification;
pub mod sweep;

pub use notification::{NOTIFICATION_DELIVERY_KIND, NotificationDeliveryHandler};
pub use sweep::{JobHistorySweep, RetentionSweep, SweepReport};
