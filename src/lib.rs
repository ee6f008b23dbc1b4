//! Notification fan-out and delivery: stored per-user notifications, live
//! badge signals over WebSocket, and Web Push to offline devices.

pub mod api_doc;
pub mod app;
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod live;
pub mod mention;
pub mod notification;
pub mod push;
pub mod routes;
pub mod schema_ext;
pub mod users;
