pub mod error;
pub mod message;
pub mod types;

pub use error::{Error, Result, RunFailureCause};
pub use message::{Message, Role};
pub use types::{ConversationKey, ThreadHandle};
