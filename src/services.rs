pub mod cooldown;
mod rename;

pub use cooldown::{CooldownPolicy, Eligibility};
pub use rename::{Profile, RenameOutcome, RenameService};
