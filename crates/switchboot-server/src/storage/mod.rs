pub mod sqlite;
pub mod traits;

pub use sqlite::SqliteRepository;
pub use traits::{Repository, RunDeviceUpdate};
