//! RFC 7617 Basic and RFC 6750 Bearer credentials.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// `Authorization` value for Basic auth.
pub fn basic_auth(username: &str, password: &str) -> String {
    let encoded = BASE64.encode(format!("{}:{}", username, password));
    format!("Basic {}", encoded)
}

/// Parse a Basic `Authorization` value into (username, password).
pub fn parse_basic_auth(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?.trim();
    let decoded = String::from_utf8(BASE64.decode(encoded).ok()?).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// `Authorization` value for a bearer token.
pub fn bearer_auth(token: &str) -> String {
    format!("Bearer {}", token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_rfc7617_example() {
        assert_eq!(
            basic_auth("Aladdin", "open sesame"),
            "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="
        );
    }

    #[test]
    fn test_basic_roundtrip_with_colon_in_password() {
        let header = basic_auth("user", "pa:ss");
        assert_eq!(
            parse_basic_auth(&header),
            Some(("user".to_string(), "pa:ss".to_string()))
        );
        assert_eq!(parse_basic_auth("Bearer x"), None);
    }

    #[test]
    fn test_bearer() {
        assert_eq!(bearer_auth("t0k"), "Bearer t0k");
    }
}
