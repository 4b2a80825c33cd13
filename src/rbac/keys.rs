//! `subjectName` encodings.
//!
//! | Row | subjectName |
//! |-----|-------------|
//! | resource marker | `#resource` |
//! | scope definition | `scope#<scopeName>` |
//! | role definition | `role#<roleName>` |
//! | scope assignment | `scope#<scopeName>#<principalId>` |
//! | role assignment | `role#<roleName>#<principalId>` |
//!
//! Scope and role names cannot contain `#` and neither can principal ids,
//! so splitting on `#` is unambiguous.

/// Subject of the single marker row a resource materializes as.
pub const RESOURCE_SUBJECT: &str = "#resource";

/// Prefix shared by scope definitions and scope assignments.
pub const SCOPE_PREFIX: &str = "scope#";

/// Prefix shared by role definitions and role assignments.
pub const ROLE_PREFIX: &str = "role#";

/// Subject of a scope definition row.
#[must_use]
pub fn scope_subject(scope_name: &str) -> String {
    format!("{SCOPE_PREFIX}{scope_name}")
}

/// Subject of a role definition row.
#[must_use]
pub fn role_subject(role_name: &str) -> String {
    format!("{ROLE_PREFIX}{role_name}")
}

/// Subject of a scope assignment row.
#[must_use]
pub fn scope_assignment_subject(scope_name: &str, principal_id: &str) -> String {
    format!("{SCOPE_PREFIX}{scope_name}#{principal_id}")
}

/// Subject of a role assignment row.
#[must_use]
pub fn role_assignment_subject(role_name: &str, principal_id: &str) -> String {
    format!("{ROLE_PREFIX}{role_name}#{principal_id}")
}

/// Prefix matching every assignment of one scope, used by scope cascades.
#[must_use]
pub fn scope_assignment_prefix(scope_name: &str) -> String {
    format!("{SCOPE_PREFIX}{scope_name}#")
}

/// Prefix matching every assignment of one role, used by role cascades.
#[must_use]
pub fn role_assignment_prefix(role_name: &str) -> String {
    format!("{ROLE_PREFIX}{role_name}#")
}

/// Parse a scope assignment subject into `(scopeName, principalId)`.
///
/// Returns `None` for scope definition rows and anything else.
#[must_use]
pub fn parse_scope_assignment(subject_name: &str) -> Option<(&str, &str)> {
    parse_assignment(subject_name, SCOPE_PREFIX)
}

/// Parse a role assignment subject into `(roleName, principalId)`.
#[must_use]
pub fn parse_role_assignment(subject_name: &str) -> Option<(&str, &str)> {
    parse_assignment(subject_name, ROLE_PREFIX)
}

/// The principal of any assignment row, scope or role.
#[must_use]
pub fn assignment_principal(subject_name: &str) -> Option<&str> {
    parse_scope_assignment(subject_name)
        .or_else(|| parse_role_assignment(subject_name))
        .map(|(_, principal)| principal)
}

fn parse_assignment<'a>(subject_name: &'a str, prefix: &str) -> Option<(&'a str, &'a str)> {
    let rest = subject_name.strip_prefix(prefix)?;
    let (name, principal) = rest.split_once('#')?;
    if name.is_empty() || principal.is_empty() || principal.contains('#') {
        return None;
    }
    Some((name, principal))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subjects_round_trip_through_parsing() {
        let subject = scope_assignment_subject("read", "p1");
        assert_eq!(subject, "scope#read#p1");
        assert_eq!(parse_scope_assignment(&subject), Some(("read", "p1")));

        let subject = role_assignment_subject("admin", "p1");
        assert_eq!(subject, "role#admin#p1");
        assert_eq!(parse_role_assignment(&subject), Some(("admin", "p1")));
    }

    #[test]
    fn definitions_are_not_assignments() {
        // Scope/role definition rows have no principal segment
        assert_eq!(parse_scope_assignment("scope#read"), None);
        assert_eq!(parse_role_assignment("role#admin"), None);
        assert_eq!(assignment_principal(RESOURCE_SUBJECT), None);
    }

    #[test]
    fn assignment_principal_spans_both_kinds() {
        assert_eq!(assignment_principal("scope#read#p1"), Some("p1"));
        assert_eq!(assignment_principal("role#admin#p2"), Some("p2"));
    }

    #[test]
    fn dotted_scope_names_parse_cleanly() {
        // Dots are legal in names; only '#' separates segments
        let subject = scope_assignment_subject("orders.read", "svc-api");
        assert_eq!(
            parse_scope_assignment(&subject),
            Some(("orders.read", "svc-api"))
        );
    }

    #[test]
    fn cascade_prefix_excludes_the_definition_row() {
        // "scope#read#" matches assignments of "read" but not the
        // definition row "scope#read" nor "scope#readonly" rows
        let prefix = scope_assignment_prefix("read");
        assert!(scope_assignment_subject("read", "p1").starts_with(&prefix));
        assert!(!scope_subject("read").starts_with(&prefix));
        assert!(!scope_subject("readonly").starts_with(&prefix));
        assert!(!scope_assignment_subject("readonly", "p1").starts_with(&prefix));
    }
}
