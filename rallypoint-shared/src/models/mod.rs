/// Database models for Rallypoint
///
/// # Models
///
/// - `contact`: People, keyed by email
/// - `event`: Organized actions with a start time
/// - `attendee`: A contact's attendance of an event, with commitment and
///   notification timestamps
/// - `circle`: Working groups used as notification targets
///
/// Each model carries its own Postgres queries; the notifier reaches them
/// through [`crate::store::AttendanceStore`] rather than directly.

pub mod attendee;
pub mod circle;
pub mod contact;
pub mod event;

pub use attendee::{Attendance, Attendee, Signup};
pub use circle::Circle;
pub use contact::{Contact, NewContact};
pub use event::{CreateEvent, Event};
