pub mod controller;
pub mod model;

pub use model::{NotificationPreferences, UserDirectory, UserProfile};
