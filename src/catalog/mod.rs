//! On-disk user and environment catalog consumed by the job kinds.

pub mod env;
pub mod files;
pub mod users;

pub use env::SimEnvironments;
pub use files::{FileEntry, FileManager};
pub use users::{FileMeta, FileType, User, UserManager, ADMIN};
