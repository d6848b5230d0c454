//! backupd core library.
//!
//! - [`types`]: [`Configuration`] and backup item probing
//! - [`store`]: [`ConfigStore`], locked read / mutate / atomic write
//! - [`safety`]: destination checks shared by the store and the sync engine
//! - [`lock`]: `flock(2)` guards on dedicated lock files
//! - [`paths`]: the `<home>/.backupd/` layout

pub mod error;
pub mod lock;
pub mod paths;
pub mod safety;
pub mod store;
pub mod types;

pub use error::{ConfigError, LockError};
pub use lock::FileLock;
pub use safety::UnsafeReason;
pub use store::ConfigStore;
pub use types::{BackupItem, Configuration, ItemKind};
