//! Attendance domain logic on top of the rollcall graph.
//!
//! An admin publishes a roster and opens sessions inside their identity
//! namespace; students holding a check-in link write one attendance record
//! each to a public, per-session path; anyone holding the admin's public key
//! can rebuild the roster-versus-attendance report.
//!
//! Layout (`<app>` is [`schema::APP_NAMESPACE`]):
//!
//! ```text
//! ~<admin>/<app>/class_list/<studentId>     { studentId, name }
//! ~<admin>/<app>/active_session             { sessionId, createdAt, active }
//! ~<admin>/<app>/session_log/<sessionId>    { sessionId, createdAt, stoppedAt }
//! <app>/sessions/<sessionId>/attendance/<studentId>
//!                                           { studentId, name, timestamp,
//!                                             latitude, longitude }
//! ```

pub mod admin;
pub mod checkin;
pub mod class;
pub mod error;
pub mod import;
pub mod link;
pub mod live;
pub mod model;
pub mod report;
pub mod schema;

pub use admin::Admin;
pub use checkin::CheckIn;
pub use class::{ClassView, SessionState};
pub use error::{Error, Result};
pub use link::CheckInLink;
pub use live::{LiveAttendance, LiveEvent, Subscription, Tally};
pub use model::{AttendanceRecord, Location, SessionDescriptor, SessionRecord, Student};
pub use report::{Report, ReportRow, Status};

#[cfg(test)]
mod tests;
