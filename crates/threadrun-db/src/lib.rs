pub mod thread_store;

pub use thread_store::{SqliteThreadStore, ThreadStore};
