pub mod controller;
pub mod dispatcher;
pub mod model;
pub mod preference;
pub mod store;

pub use dispatcher::{DispatchEvent, DispatchOptions, NotificationDispatcher};
pub use preference::PreferenceGate;
pub use store::NotificationStore;
