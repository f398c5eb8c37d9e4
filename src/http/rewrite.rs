//! Header rewrite rules.
//!
//! Both transforms are pure: they take a sequence and return a rewritten
//! copy, preserving the order of every line they keep. Applying either one
//! again to its own output changes nothing.

use base64::Engine;

use crate::http::headers::HeaderSequence;

const PROXY_AUTHORIZATION: &str = "proxy-authorization:";
const CONNECTION: &str = "connection:";
const KEEP_ALIVE: &str = "keep-alive:";

/// Value of a `Proxy-Authorization` header for HTTP Basic authentication.
pub fn basic_credentials(username: &str, password: &str) -> String {
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password));
    format!("Basic {}", encoded)
}

/// Replace any client-supplied proxy credentials with ours.
pub fn inject_auth(headers: &HeaderSequence, username: &str, password: &str) -> HeaderSequence {
    let mut headers = headers.clone();
    headers.remove_if_prefix(PROXY_AUTHORIZATION);
    headers.push(format!(
        "Proxy-Authorization: {}",
        basic_credentials(username, password)
    ));
    headers
}

/// Drop keep-alive negotiation and ask for the connection to be closed.
pub fn force_close(headers: &HeaderSequence) -> HeaderSequence {
    let mut headers = headers.clone();
    headers.remove_if_prefix(CONNECTION);
    headers.remove_if_prefix(KEEP_ALIVE);
    headers.push("Connection: Close");
    headers
}
