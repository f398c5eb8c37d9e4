//! Upstream status line inspection.

use std::sync::LazyLock;

use regex::Regex;

/// `407 Proxy Authentication Required` from the upstream proxy.
static PROXY_AUTH_ERROR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^HTTP/[0-9].[0-9] 407 ").unwrap());

/// Whether a status line reports that the upstream proxy rejected our
/// credentials.
pub fn is_proxy_auth_error(status_line: &str) -> bool {
    PROXY_AUTH_ERROR_RE.is_match(status_line)
}
