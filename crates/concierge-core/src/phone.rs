//! Conversation keys: canonical phone form of a sender.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized sender identity. Every per-conversation map is keyed by this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    /// Normalize a raw sender ID (phone, `+56 9 …`, or transport JID).
    pub fn normalize(raw: &str, default_country_code: &str, local_length: usize) -> Self {
        Self(normalize_phone(raw, default_country_code, local_length))
    }

    /// Wrap an already-canonical key (e.g. a path parameter or DB row).
    pub fn from_canonical(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConversationKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Reduce a phone number or JID to its canonical digit string.
///
/// Drops the JID server (`@c.us`, `@s.whatsapp.net`) and device suffix
/// (`:12`), strips every non-digit and an international `00` prefix, and
/// prefixes `default_country_code` onto bare local numbers of exactly
/// `local_length` digits. An empty country code disables the prefixing.
pub fn normalize_phone(raw: &str, default_country_code: &str, local_length: usize) -> String {
    let user = raw.split('@').next().unwrap_or_default();
    let user = user.split(':').next().unwrap_or_default();

    let mut digits: String = user.chars().filter(|c| c.is_ascii_digit()).collect();
    if let Some(rest) = digits.strip_prefix("00") {
        digits = rest.to_string();
    }

    if !default_country_code.is_empty()
        && local_length > 0
        && digits.len() == local_length
        && !digits.starts_with(default_country_code)
    {
        digits = format!("{default_country_code}{digits}");
    }

    digits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_formatting() {
        assert_eq!(normalize_phone("+56 9 1111 2222", "56", 9), "56911112222");
        assert_eq!(normalize_phone("(56) 9-1111-2222", "56", 9), "56911112222");
    }

    #[test]
    fn test_normalize_strips_jid_and_device() {
        assert_eq!(
            normalize_phone("56911112222@s.whatsapp.net", "56", 9),
            "56911112222"
        );
        assert_eq!(normalize_phone("56911112222:7@c.us", "56", 9), "56911112222");
    }

    #[test]
    fn test_normalize_prefixes_local_number() {
        assert_eq!(normalize_phone("911112222", "56", 9), "56911112222");
    }

    #[test]
    fn test_normalize_international_prefix() {
        assert_eq!(normalize_phone("0056911112222", "56", 9), "56911112222");
    }

    #[test]
    fn test_normalize_without_country_code() {
        assert_eq!(normalize_phone("911112222", "", 9), "911112222");
    }

    #[test]
    fn test_key_is_stable_across_forms() {
        let a = ConversationKey::normalize("+56 9 1111 2222", "56", 9);
        let b = ConversationKey::normalize("56911112222@c.us", "56", 9);
        let c = ConversationKey::normalize("911112222", "56", 9);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.to_string(), "56911112222");
    }
}
