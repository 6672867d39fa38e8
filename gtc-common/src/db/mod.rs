//! SQLite storage: schema, item repository and settings

pub mod init;
pub mod items;
pub mod settings;

pub use init::*;
pub use items::SqliteRepository;
pub use settings::*;
