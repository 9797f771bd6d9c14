pub mod credential;
pub mod events;
pub mod ids;
pub mod wire;

pub use credential::Credential;
pub use events::{EventEnvelope, EventType, ItemEventPayload, PayloadError, Record};
pub use ids::{ClientId, HouseholdId, ItemId, ListId, UserId};
pub use wire::{Audience, ClientFrame, Delivery, ServerFrame};
