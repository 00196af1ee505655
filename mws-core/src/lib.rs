pub mod error;
pub mod file_system;
pub mod output_macros;
pub mod secrets;

pub use error::{MwsError, Result};
pub use file_system::{FileSystem, OsFileSystem};
pub use secrets::Redactor;

#[cfg(feature = "test-helpers")]
pub use file_system::MemoryFileSystem;
