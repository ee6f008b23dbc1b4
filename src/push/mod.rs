pub mod controller;
pub mod keystore;
pub mod model;
pub mod subscription;
pub mod transport;
pub mod web_push;

pub use keystore::PushKeyStore;
pub use subscription::SubscriptionRegistry;
pub use transport::PushTransport;
pub use web_push::WebPushClient;
