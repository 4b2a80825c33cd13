//! Name validators for resources, scopes, roles and principals.
//!
//! All validators are pure and are re-applied at the entry of every
//! repository operation. Null/empty inputs always fail with `InvalidName`,
//! never with a not-found error, so a caller can distinguish "you sent
//! garbage" from "the thing does not exist".

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::{Error, Result};

/// Reserved request-scope literal meaning "all scopes the principal holds".
///
/// `.default` is exclusively a query-time sentinel: it is never a valid
/// scope name on the write path (it fails the scope-name charset anyway,
/// since names must start with an alphanumeric).
pub const DEFAULT_SCOPE: &str = ".default";

/// Maximum resource name length after trailing-slash stripping.
pub const MAX_RESOURCE_NAME_LEN: usize = 512;

/// Maximum scope/role name length.
pub const MAX_NAME_LEN: usize = 128;

/// Maximum principal id length in bytes.
pub const MAX_PRINCIPAL_ID_LEN: usize = 256;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.\-]*$").expect("static regex"));

/// Validate and normalize a resource name.
///
/// The name must parse as an absolute URI with a non-empty authority or
/// path (URN-shaped names like `urn://inventory` qualify). Trailing slashes
/// are stripped before validation; the returned string is the normalized
/// form every row key uses.
pub fn validate_resource_name(input: &str) -> Result<String> {
    if input.is_empty() {
        return Err(Error::invalid_name("resourceName", "must not be empty"));
    }

    let normalized = input.trim_end_matches('/');
    if normalized.is_empty() {
        return Err(Error::invalid_name(
            "resourceName",
            "must contain more than slashes",
        ));
    }
    if normalized.len() > MAX_RESOURCE_NAME_LEN {
        return Err(Error::invalid_name(
            "resourceName",
            format!("must be at most {MAX_RESOURCE_NAME_LEN} characters"),
        ));
    }

    let url = Url::parse(normalized)
        .map_err(|e| Error::invalid_name("resourceName", format!("must be an absolute URI: {e}")))?;
    if url.host_str().is_none_or(str::is_empty) && url.path().is_empty() {
        return Err(Error::invalid_name(
            "resourceName",
            "must have a non-empty authority or path",
        ));
    }

    Ok(normalized.to_string())
}

/// Validate a scope name: `[A-Za-z0-9][A-Za-z0-9.\-]*`, length 1..=128.
pub fn validate_scope_name(input: &str) -> Result<()> {
    validate_component("scopeName", input)
}

/// Validate a role name. Same lexical rules as scope names.
pub fn validate_role_name(input: &str) -> Result<()> {
    validate_component("roleName", input)
}

/// Validate the scope parameter of an access-evaluation request.
///
/// Accepts everything [`validate_scope_name`] accepts, plus the reserved
/// [`DEFAULT_SCOPE`] literal.
pub fn validate_request_scope(input: &str) -> Result<()> {
    if input == DEFAULT_SCOPE {
        return Ok(());
    }
    validate_component("scopeName", input)
}

/// Validate a principal id: 1..=256 bytes of printable ASCII excluding `#`.
///
/// `#` is the subject-name separator, so permitting it would make
/// assignment rows ambiguous.
pub fn validate_principal_id(input: &str) -> Result<()> {
    if input.is_empty() {
        return Err(Error::invalid_name("principalId", "must not be empty"));
    }
    if input.len() > MAX_PRINCIPAL_ID_LEN {
        return Err(Error::invalid_name(
            "principalId",
            format!("must be at most {MAX_PRINCIPAL_ID_LEN} bytes"),
        ));
    }
    if let Some(bad) = input
        .bytes()
        .find(|b| !(0x20..=0x7e).contains(b) || *b == b'#')
    {
        return Err(Error::invalid_name(
            "principalId",
            format!("byte 0x{bad:02x} is not printable ASCII or is '#'"),
        ));
    }
    Ok(())
}

fn validate_component(field: &'static str, input: &str) -> Result<()> {
    if input.is_empty() {
        return Err(Error::invalid_name(field, "must not be empty"));
    }
    if input.len() > MAX_NAME_LEN {
        return Err(Error::invalid_name(
            field,
            format!("must be at most {MAX_NAME_LEN} characters"),
        ));
    }
    if !NAME_RE.is_match(input) {
        return Err(Error::invalid_name(
            field,
            "must match [A-Za-z0-9][A-Za-z0-9.-]*",
        ));
    }
    Ok(())
}
