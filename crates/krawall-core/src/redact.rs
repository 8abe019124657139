//! Secrets are never logged verbatim (spec.md §3 Ownership invariant) — only
//! a name and a length-limited prefix.

use std::fmt;

/// Wraps a secret string so `Debug`/`Display` never print it in full.
#[derive(Clone)]
pub struct Redacted {
    name: String,
    value: String,
}

impl Redacted {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn expose(&self) -> &str {
        &self.value
    }

    fn prefix(&self) -> &str {
        let end = self.value.char_indices().nth(3).map(|(i, _)| i).unwrap_or(self.value.len());
        &self.value[..end]
    }
}

impl fmt::Debug for Redacted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Redacted {{ name: {:?}, len: {}, prefix: {:?}*** }}",
            self.name,
            self.value.len(),
            self.prefix()
        )
    }
}

impl fmt::Display for Redacted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(len={}, {}***)", self.name, self.value.len(), self.prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_never_includes_full_secret() {
        let secret = Redacted::new("token", "sk-abcdef1234567890");
        let shown = secret.to_string();
        assert!(!shown.contains("abcdef1234567890"));
        assert!(shown.contains("token"));
    }

    #[test]
    fn expose_returns_the_real_value() {
        let secret = Redacted::new("token", "sk-abcdef");
        assert_eq!(secret.expose(), "sk-abcdef");
    }
}
