use http::HeaderValue;
use mime::Mime;
use std::str::FromStr;

/// Compares a `Content-Type` header against `expected` by "essence"
/// (`type/subtype`, ignoring `+suffix` and `; param=value` trailers) so
/// `application/dns-message; charset=utf-8` still counts as a match.
pub(crate) fn content_type_equal(content_type: &HeaderValue, expected: &str) -> bool {
    let content_type = match content_type.to_str() {
        Ok(t) => t,
        Err(_) => return false,
    };
    let content_type = match Mime::from_str(content_type) {
        Ok(t) => t,
        Err(_) => return false,
    };

    content_type.essence_str() == expected
}
