pub mod consent;
pub mod data;
pub mod event;
pub mod outcome;
pub mod types;

pub use consent::{ConsentCategory, ConsentPolicy, ConsentPreferences, ConsentStatus};
pub use data::{DataItem, Expiry};
pub use event::{EventBatch, TrackEvent};
pub use outcome::{DeliveryResult, DispatchOutcome, QueueReason};
pub use types::EventId;
