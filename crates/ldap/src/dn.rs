//! Member reference parsing for generic LDAP group object types.

use groupsync_core::config::GroupObjectType;

/// Extract the uid carried by one member value of a group.
///
/// - `groupOfNames` members are DNs whose first RDN value is the uid
///   (`uid=alice,ou=people,...`).
/// - `groupOfUniqueNames` members are DNs with an optional `#'0101'B`
///   unique identifier suffix, which is dropped.
/// - `posixGroup` members (`memberUid`) are bare uids.
pub fn member_uid(reference: &str, object_type: GroupObjectType) -> Option<String> {
    match object_type {
        GroupObjectType::GroupOfNames => first_rdn_value(reference),
        GroupObjectType::GroupOfUniqueNames => first_rdn_value(strip_unique_id(reference)),
        GroupObjectType::PosixGroup => {
            let uid = reference.trim();
            (!uid.is_empty()).then(|| uid.to_string())
        }
    }
}

fn strip_unique_id(reference: &str) -> &str {
    match reference.rfind("#'") {
        Some(idx) if reference.ends_with("'B") => &reference[..idx],
        _ => reference,
    }
}

/// Value of the first RDN of `dn`, unescaped. Multi-valued RDNs
/// (`cn=a+sn=b`) yield the first value.
pub fn first_rdn_value(dn: &str) -> Option<String> {
    let rdn = split_first_rdn(dn)?;
    let (_, value) = rdn.split_once('=')?;
    let value = unescape(value.split('+').next().unwrap_or(value).trim());
    (!value.is_empty()).then_some(value)
}

/// The first RDN, up to the first unescaped comma.
fn split_first_rdn(dn: &str) -> Option<&str> {
    let dn = dn.trim();
    if dn.is_empty() {
        return None;
    }
    let mut escaped = false;
    for (idx, ch) in dn.char_indices() {
        match ch {
            '\\' if !escaped => escaped = true,
            ',' if !escaped => return Some(&dn[..idx]),
            _ => escaped = false,
        }
    }
    Some(dn)
}

/// Undo RFC 4514 escaping: `\,` style and `\2c` hex pairs.
fn unescape(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|pair| std::str::from_utf8(pair).ok())
                .and_then(|pair| u8::from_str_radix(pair, 16).ok());
            match hex {
                Some(byte) => {
                    out.push(byte);
                    i += 3;
                }
                None => {
                    out.push(bytes[i + 1]);
                    i += 2;
                }
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
