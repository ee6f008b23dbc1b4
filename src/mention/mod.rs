pub mod model;
pub mod scanner;

pub use model::{AttachmentOwner, ContentKind, MentionOwner, MentionTarget};
pub use scanner::MentionScanner;
