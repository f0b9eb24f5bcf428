//! Storage key generation.

/// Separates the limiter name from the identifier in default keys.
pub const KEY_SEPARATOR: char = ':';

/// Check that `name` can prefix storage keys without colliding.
///
/// Names must be non-empty and free of [`KEY_SEPARATOR`]; otherwise limiter
/// `a` with identifier `b:c` and limiter `a:b` with identifier `c` would
/// share the key `a:b:c`.
pub fn validate_limiter_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("limiter name must not be empty".to_string());
    }
    if name.contains(KEY_SEPARATOR) {
        return Err(format!(
            "limiter name '{}' must not contain '{}'",
            name, KEY_SEPARATOR
        ));
    }
    Ok(())
}

/// Maps a caller identifier to the key a store counts against.
pub trait KeyGenerator: Send + Sync {
    /// Build the storage key for `identifier` under limiter `limiter`.
    fn storage_key(&self, limiter: &str, identifier: &str) -> String;
}

/// The default scheme: `"<limiter>:<identifier>"`.
///
/// Including the limiter name keeps named limiters from sharing counters
/// even when they see the same identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrefixedKey;

impl KeyGenerator for PrefixedKey {
    fn storage_key(&self, limiter: &str, identifier: &str) -> String {
        format!("{}{}{}", limiter, KEY_SEPARATOR, identifier)
    }
}

impl<F> KeyGenerator for F
where
    F: Fn(&str, &str) -> String + Send + Sync,
{
    fn storage_key(&self, limiter: &str, identifier: &str) -> String {
        self(limiter, identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_key() {
        assert_eq!(
            PrefixedKey.storage_key("billing-portal", "user-1"),
            "billing-portal:user-1"
        );
    }

    #[test]
    fn test_validate_limiter_name() {
        assert!(validate_limiter_name("translation-free").is_ok());
        assert!(validate_limiter_name("").is_err());
        assert!(validate_limiter_name("a:b").is_err());
    }

    #[test]
    fn test_closure_key_generator() {
        let generator = |limiter: &str, identifier: &str| {
            format!("{}/{}", limiter, identifier.to_lowercase())
        };
        assert_eq!(generator.storage_key("summary", "IP:1.2.3.4"), "summary/ip:1.2.3.4");
    }
}
