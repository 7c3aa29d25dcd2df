pub mod name;
pub mod records;
pub mod types;

pub use name::ValidatedName;
pub use records::{ClaimRecord, ClaimWrite, CommitTimestamp, OwnerRecord, OwnerWrite};
pub use types::{NormalizedKey, OwnerId};
