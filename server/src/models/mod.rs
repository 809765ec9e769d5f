pub mod event;
pub mod intent;
pub mod ticket;

pub use event::Event;
pub use intent::{IntentStatus, PaymentIntentRecord};
pub use ticket::Ticket;
