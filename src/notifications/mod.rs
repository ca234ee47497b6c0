//! Notification routing and delivery.

pub mod dispatcher;
pub mod preference;
pub mod router;

pub use dispatcher::{DispatchUnit, Dispatcher};
pub use preference::{NewPreference, NotificationPreference, PreferenceUpdate};
pub use router::{LetterEvent, NotificationRouter};
