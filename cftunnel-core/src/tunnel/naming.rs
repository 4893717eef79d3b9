//! Tunnel id sanitizing and generation

use uuid::Uuid;

/// Prefix for names generated when the requested one sanitizes to nothing
const GENERATED_PREFIX: &str = "app_";

/// Keep only letters, digits, `-` and `_`
pub fn sanitize_name(candidate: &str) -> String {
    candidate
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// Whether `id` is safe to use as a file stem
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && sanitize_name(id) == id
}

/// A fresh name like `app_3f9c2a1b`
pub fn generated_name() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}{}", GENERATED_PREFIX, &uuid[..8])
}

/// `base`, then `base_1`, `base_2`, … until `taken` says no
pub fn disambiguate(base: &str, mut taken: impl FnMut(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (1u32..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_disallowed_characters() {
        assert_eq!(sanitize_name("my app!"), "myapp");
        assert_eq!(sanitize_name("../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_name("web-api_2"), "web-api_2");
    }

    #[test]
    fn sanitize_drops_non_ascii_letters() {
        assert_eq!(sanitize_name("café"), "caf");
    }

    #[test]
    fn valid_id_rejects_empty_and_dirty() {
        assert!(is_valid_id("app_1"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("a/b"));
    }

    #[test]
    fn generated_name_is_prefixed_and_sanitized() {
        let name = generated_name();
        assert!(name.starts_with("app_"));
        assert_eq!(name.len(), 12);
        assert!(is_valid_id(&name));
    }

    #[test]
    fn disambiguate_appends_counter() {
        let taken = ["app", "app_1"];
        let id = disambiguate("app", |c| taken.contains(&c));
        assert_eq!(id, "app_2");
    }

    #[test]
    fn disambiguate_keeps_free_name() {
        assert_eq!(disambiguate("app", |_| false), "app");
    }
}
