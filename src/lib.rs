pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod net;
pub mod services;
pub mod state;

pub use db::repo::{Abort, MemoryRegistryStore, PgRegistryStore, RegistryStore, RegistryTx};
pub use error::{AppResult, RenameError};
pub use services::{CooldownPolicy, RenameOutcome, RenameService};
pub use state::registry::Registry;
