use serde::{Deserialize, Serialize};
use std::fmt;

#[macro_export]
macro_rules! define_key {
    ($name:ident) => {
        #[derive(
            Clone,
            Debug,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            postgres_types::ToSql,
            postgres_types::FromSql,
            Serialize,
            Deserialize,
        )]
        #[postgres(transparent)]
        #[serde(transparent)] // JSON = plain string
        pub struct $name(String);

        impl $name {
            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_key!(OwnerId);
define_key!(NormalizedKey);

impl OwnerId {
    /// Wraps an identity that the auth layer has already verified. Returns `None` for an empty or
    /// whitespace-only id, which is treated as no identity at all.
    pub fn verified(uid: &str) -> Option<Self> {
        let uid = uid.trim();
        if uid.is_empty() {
            return None;
        }
        Some(Self(uid.to_string()))
    }
}

impl NormalizedKey {
    /// Lowercases a literal that already passed format validation.
    pub(crate) fn from_literal(literal: &str) -> Self {
        Self(literal.to_ascii_lowercase())
    }
}
