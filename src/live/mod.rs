pub mod channel;
pub mod presence;
pub mod relay;
pub mod ws;

pub use channel::{Connection, LiveChannel, LiveEvent};
pub use presence::PresenceTracker;
