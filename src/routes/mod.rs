pub mod admin;
pub mod health;
pub mod live;
pub mod notifications;
pub mod push;
