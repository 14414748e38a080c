//! LDAP filter construction helpers.

/// Escape special characters in LDAP filter values (RFC 4515).
///
/// Characters that must be escaped: * ( ) \ NUL
pub fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}

/// Filter selecting the user objects that are direct members of `group_dn`.
pub fn user_members_of(group_dn: &str) -> String {
    format!(
        "(&(objectClass=user)(memberOf={}))",
        escape_filter_value(group_dn)
    )
}
