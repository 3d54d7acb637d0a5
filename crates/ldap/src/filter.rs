//! LDAP filter templating and escaping.

use groupsync_core::config::PLACEHOLDER;
use groupsync_core::models::GroupPattern;

/// Substitute every `%s` in `template` with `value`. The value must already
/// be escaped.
pub fn render(template: &str, value: &str) -> String {
    template.replace(PLACEHOLDER, value)
}

/// Escape an assertion value per RFC 4515.
pub fn escape_value(value: &str) -> String {
    ldap3::ldap_escape(value).into_owned()
}

/// Escape a wildcard pattern, keeping `*` as the substring operator.
pub fn escape_pattern(pattern: &GroupPattern) -> String {
    pattern
        .as_str()
        .split('*')
        .map(escape_value)
        .collect::<Vec<_>>()
        .join("*")
}

/// Conjunction of filter components, skipping blank ones. Components may
/// themselves be sequences like `(a=1)(b=2)`.
pub fn and(components: &[&str]) -> String {
    let body: String = components
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();
    format!("(&{body})")
}

/// Filter matching entries of the given object class.
pub fn object_class(class: &str) -> String {
    format!("(objectClass={})", escape_value(class))
}
