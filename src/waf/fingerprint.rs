use pingora::http::RequestHeader;
use sha2::{Digest, Sha256};

fn header<'a>(request: &'a RequestHeader, name: &str) -> &'a str {
    request
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Stable client fingerprint: hex SHA-256 of IP, User-Agent, Accept-Language and Accept-Encoding.
pub fn request_fingerprint(client_ip: &str, request: &RequestHeader) -> String {
    let material = format!(
        "{}|{}|{}|{}",
        client_ip,
        header(request, "user-agent"),
        header(request, "accept-language"),
        header(request, "accept-encoding"),
    );
    hex::encode(Sha256::digest(material.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn browser_request() -> RequestHeader {
        let mut req = RequestHeader::build("GET", b"/", None).unwrap();
        req.insert_header("User-Agent", "Mozilla/5.0").unwrap();
        req.insert_header("Accept-Language", "en-US").unwrap();
        req.insert_header("Accept-Encoding", "gzip").unwrap();
        req
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let req = browser_request();
        let first = request_fingerprint("192.0.2.1", &req);

        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(first, request_fingerprint("192.0.2.1", &req));
    }

    #[test]
    fn test_fingerprint_depends_on_ip_and_headers() {
        let req = browser_request();
        let base = request_fingerprint("192.0.2.1", &req);
        assert_ne!(base, request_fingerprint("192.0.2.2", &req));

        let mut other = browser_request();
        other.insert_header("Accept-Language", "de-DE").unwrap();
        assert_ne!(base, request_fingerprint("192.0.2.1", &other));
    }
}
