//! Per-event trip registrations and their history.

mod model;
mod diff;
mod ledger;

pub use model::{HistoryEntry, Registration, RegistrationFields, RegistrationRequest, RegistrationWithOwner};
pub use diff::{render_history, FieldsView, HistoryItem};
pub use ledger::RegistrationLedger;
