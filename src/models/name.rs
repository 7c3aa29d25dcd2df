use crate::error::{AppResult, RenameError};
use crate::models::types::NormalizedKey;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static USERNAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]{3,15}$").expect("valid username regex"));

/// A username that passed format validation.
///
/// `literal` keeps the caller's spelling (trimmed, case preserved); `lower` is the normalized key
/// used for uniqueness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedName {
    literal: String,
    lower: NormalizedKey,
}

impl ValidatedName {
    /// `None` stands for a missing or non-string input.
    pub fn parse(raw: Option<&str>) -> AppResult<Self> {
        let literal = raw.map(str::trim).unwrap_or_default();
        if !USERNAME_RE.is_match(literal) {
            return Err(RenameError::InvalidFormat);
        }

        Ok(Self {
            literal: literal.to_string(),
            lower: NormalizedKey::from_literal(literal),
        })
    }

    pub fn literal(&self) -> &str {
        &self.literal
    }

    pub fn lower(&self) -> &NormalizedKey {
        &self.lower
    }
}

impl fmt::Display for ValidatedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.literal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(s: &str) -> bool {
        matches!(ValidatedName::parse(Some(s)), Err(RenameError::InvalidFormat))
    }

    #[test]
    fn keeps_literal_and_lowercases_key() {
        let n = ValidatedName::parse(Some("  Alice_01 ")).unwrap();
        assert_eq!(n.literal(), "Alice_01");
        assert_eq!(n.lower().as_str(), "alice_01");
    }

    #[test]
    fn length_bounds() {
        assert!(rejected("ab"));
        assert!(rejected(&"a".repeat(16)));
        assert!(ValidatedName::parse(Some("abc")).is_ok());
        assert!(ValidatedName::parse(Some(&"a".repeat(15))).is_ok());
    }

    #[test]
    fn charset() {
        assert!(rejected("bad name"));
        assert!(rejected("bad-name"));
        assert!(rejected("bad.name"));
        assert!(rejected("émile"));
        assert!(ValidatedName::parse(Some("___")).is_ok());
        assert!(ValidatedName::parse(Some("Zz9")).is_ok());
    }

    #[test]
    fn missing_or_blank() {
        assert!(matches!(ValidatedName::parse(None), Err(RenameError::InvalidFormat)));
        assert!(rejected(""));
        assert!(rejected("    "));
    }

    #[test]
    fn length_is_checked_after_trim() {
        // 15 chars plus padding is fine, the padding is not part of the name
        let n = ValidatedName::parse(Some("\tabcdefghijklmno\n")).unwrap();
        assert_eq!(n.literal(), "abcdefghijklmno");
        assert!(rejected(" a b "));
    }
}
