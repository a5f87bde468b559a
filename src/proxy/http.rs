//! HTTP request-line inspection and canned responses.
//!
//! This is deliberately not an HTTP parser. Only the first line of a chunk
//! carrying the HTTP marker is examined; headers and bodies pass through
//! untouched except for the single injected header line.

/// Byte sequence identifying an HTTP message inside a chunk.
const HTTP_MARKER: &[u8] = b"HTTP";

const BAD_GATEWAY_BODY: &str = "Upstream server is unreachable.\n";
const FORBIDDEN_BODY: &str = "Request blocked by proxy policy.\n";

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
    pub version: String,
}

/// Outcome of inspecting a request-direction chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestInspection {
    /// Chunk does not carry the HTTP marker; forward as-is.
    NotHttp,
    /// Marker present but the first line does not split into exactly
    /// method/target/version; forward as-is.
    Malformed,
    /// Successfully parsed request line.
    Request(RequestLine),
}

/// Inspect the start of a request-direction chunk.
///
/// Invalid byte sequences are replaced during decoding, never fatal.
pub fn inspect_request(chunk: &[u8]) -> RequestInspection {
    if !contains_marker(chunk) {
        return RequestInspection::NotHttp;
    }

    let text = String::from_utf8_lossy(chunk);
    let Some(first_line) = text.lines().next() else {
        return RequestInspection::Malformed;
    };

    let mut tokens = first_line.split_whitespace();
    match (tokens.next(), tokens.next(), tokens.next(), tokens.next()) {
        (Some(method), Some(target), Some(version), None) => {
            RequestInspection::Request(RequestLine {
                method: method.to_string(),
                target: target.to_string(),
                version: version.to_string(),
            })
        }
        _ => RequestInspection::Malformed,
    }
}

/// First line of a response-direction chunk carrying the HTTP marker.
pub fn response_status_line(chunk: &[u8]) -> Option<String> {
    if !contains_marker(chunk) {
        return None;
    }
    let text = String::from_utf8_lossy(chunk);
    text.lines().next().map(str::to_string)
}

fn contains_marker(chunk: &[u8]) -> bool {
    chunk
        .windows(HTTP_MARKER.len())
        .any(|window| window == HTTP_MARKER)
}

/// Insert `name: value` immediately after the request line.
///
/// Returns `None` when no header line follows the request line; malformed
/// messages are never fixed. The rebuilt chunk rejoins all lines with CRLF
/// and appends the blank-line terminator.
pub fn inject_header(chunk: &[u8], name: &str, value: &str) -> Option<Vec<u8>> {
    let text = String::from_utf8_lossy(chunk);
    let mut lines: Vec<&str> = text.lines().collect();
    if lines.len() < 2 || lines[1].is_empty() {
        return None;
    }

    let injected = format!("{}: {}", name, value);
    lines.insert(1, &injected);

    let mut rebuilt = lines.join("\r\n");
    rebuilt.push_str("\r\n");
    Some(rebuilt.into_bytes())
}

/// Minimal 502 response for upstream connect failures.
pub fn bad_gateway() -> Vec<u8> {
    simple_response("502 Bad Gateway", BAD_GATEWAY_BODY)
}

/// Minimal 403 response for blocked request targets.
pub fn forbidden() -> Vec<u8> {
    simple_response("403 Forbidden", FORBIDDEN_BODY)
}

fn simple_response(status: &str, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_request_parses_request_line() {
        let chunk = b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n";
        match inspect_request(chunk) {
            RequestInspection::Request(line) => {
                assert_eq!(line.method, "GET");
                assert_eq!(line.target, "/index.html");
                assert_eq!(line.version, "HTTP/1.1");
            }
            other => panic!("Expected Request, got {:?}", other),
        }
    }

    #[test]
    fn test_inspect_request_without_marker() {
        assert_eq!(inspect_request(b"hello world\r\n"), RequestInspection::NotHttp);
        assert_eq!(inspect_request(&[0x16, 0x03, 0x01]), RequestInspection::NotHttp);
    }

    #[test]
    fn test_inspect_request_too_few_tokens() {
        assert_eq!(inspect_request(b"HTTP\r\n"), RequestInspection::Malformed);
        assert_eq!(
            inspect_request(b"GET HTTP/1.1\r\nHost: x\r\n\r\n"),
            RequestInspection::Malformed
        );
    }

    #[test]
    fn test_inspect_request_too_many_tokens() {
        assert_eq!(
            inspect_request(b"GET /a /b HTTP/1.1\r\n\r\n"),
            RequestInspection::Malformed
        );
    }

    #[test]
    fn test_inspect_request_invalid_utf8_is_not_fatal() {
        let mut chunk = b"GET /index.html HTTP/1.1\r\nHost: ".to_vec();
        chunk.extend_from_slice(&[0xff, 0xfe]);
        chunk.extend_from_slice(b"\r\n\r\n");
        match inspect_request(&chunk) {
            RequestInspection::Request(line) => assert_eq!(line.target, "/index.html"),
            other => panic!("Expected Request, got {:?}", other),
        }
    }

    #[test]
    fn test_inject_header_after_request_line() {
        let chunk = b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n";
        let rebuilt = inject_header(chunk, "X-Proxy", "true").unwrap();
        assert_eq!(
            rebuilt,
            b"GET /index.html HTTP/1.1\r\nX-Proxy: true\r\nHost: x\r\n\r\n".to_vec()
        );
    }

    #[test]
    fn test_inject_header_skips_message_without_headers() {
        assert!(inject_header(b"GET / HTTP/1.1\r\n\r\n", "X-Proxy", "true").is_none());
        assert!(inject_header(b"GET / HTTP/1.1", "X-Proxy", "true").is_none());
    }

    #[test]
    fn test_response_status_line() {
        let chunk = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
        assert_eq!(
            response_status_line(chunk).as_deref(),
            Some("HTTP/1.1 200 OK")
        );
        assert!(response_status_line(b"raw bytes").is_none());
    }

    #[test]
    fn test_canned_responses_declare_body_length() {
        for (response, status) in [(bad_gateway(), "502"), (forbidden(), "403")] {
            let text = String::from_utf8(response).unwrap();
            assert!(text.starts_with(&format!("HTTP/1.1 {}", status)));

            let (head, body) = text.split_once("\r\n\r\n").unwrap();
            let declared = head
                .lines()
                .find_map(|l| l.strip_prefix("Content-Length: "))
                .unwrap();
            assert_eq!(declared.parse::<usize>().unwrap(), body.len());
            assert!(head.contains("Content-Type: text/plain"));
        }
    }
}
