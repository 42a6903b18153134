/// Strip `<...>` delimiters and surrounding whitespace from an envelope address.
///
/// No further validation is done: `<a@b>` becomes `a@b`, a bare `a@b` is
/// returned as-is, and `<>` (the null sender) becomes the empty string.
pub fn strip_address(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('<').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('>').unwrap_or(trimmed);
    trimmed.to_string()
}

/// Domain part of an address (everything after the last `@`)
pub fn domain_of(address: &str) -> Option<&str> {
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_address() {
        assert_eq!(strip_address("<user@example.com>"), "user@example.com");
        assert_eq!(strip_address("  <user@example.com>  "), "user@example.com");
        assert_eq!(strip_address("user@example.com"), "user@example.com");
        assert_eq!(strip_address("<>"), "");
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("c@d"), Some("d"));
        assert_eq!(domain_of("\"a@b\"@example.org"), Some("example.org"));
        assert_eq!(domain_of("nodomain"), None);
        assert_eq!(domain_of("trailing@"), None);
    }
}
