//! Byte-level request parsing used by the connection state machine.
//!
//! Nothing here owns a buffer: the line scanner walks a cursor over the
//! bytes received so far, and the line parsers borrow from one complete
//! line.

/// Outcome of scanning for the next CRLF-terminated line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// A full line was found; the cursor now sits after its CRLF.
    Ok,
    /// The line is malformed (bare CR or bare LF).
    Bad,
    /// No terminator yet; more data is needed.
    Open,
}

/// Scans `buf` from `*checked` for a CRLF pair.
///
/// The cursor only advances over bytes that are known not to end the line,
/// so calling again after more data arrives resumes exactly where the last
/// call stopped, whatever the chunking.
pub fn scan_line(buf: &[u8], checked: &mut usize) -> LineStatus {
    while *checked < buf.len() {
        match buf[*checked] {
            b'\r' => {
                if *checked + 1 == buf.len() {
                    return LineStatus::Open;
                }
                if buf[*checked + 1] == b'\n' {
                    *checked += 2;
                    return LineStatus::Ok;
                }
                return LineStatus::Bad;
            }
            b'\n' => return LineStatus::Bad,
            _ => *checked += 1,
        }
    }
    LineStatus::Open
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Head,
}

impl Method {
    fn from_token(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("GET") {
            Some(Method::Get)
        } else if token.eq_ignore_ascii_case("POST") {
            Some(Method::Post)
        } else if token.eq_ignore_ascii_case("HEAD") {
            Some(Method::Head)
        } else {
            None
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct RequestLine<'a> {
    pub method: Method,
    /// Origin-form path with any scheme, authority, query and fragment removed.
    pub url: &'a str,
    pub version: &'a str,
}

/// Parses `METHOD SP TARGET SP VERSION`. `None` means a bad request.
pub fn parse_request_line(text: &[u8]) -> Option<RequestLine<'_>> {
    let text = std::str::from_utf8(text).ok()?;
    let mut parts = text.split([' ', '\t']).filter(|p| !p.is_empty());

    let method = Method::from_token(parts.next()?)?;
    let target = parts.next()?;
    let version = parts.next()?;
    if parts.next().is_some() || !version.eq_ignore_ascii_case("HTTP/1.1") {
        return None;
    }

    Some(RequestLine {
        method,
        url: normalize_target(target)?,
        version,
    })
}

fn normalize_target(target: &str) -> Option<&str> {
    let mut url = target;
    for scheme in ["http://", "https://"] {
        if url
            .get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
        {
            let rest = &url[scheme.len()..];
            url = &rest[rest.find('/')?..];
            break;
        }
    }

    let url = url.split(['?', '#']).next()?;
    if !url.starts_with('/') {
        return None;
    }
    Some(url)
}

/// Header fields the connection cares about.
#[derive(Debug, PartialEq, Eq)]
pub enum Header<'a> {
    Connection(&'a str),
    ContentLength(usize),
    Host(&'a str),
    Other(&'a str),
}

/// Parses one `Name: value` line. `None` means a bad request.
pub fn parse_header(text: &[u8]) -> Option<Header<'_>> {
    let text = std::str::from_utf8(text).ok()?;
    let (name, value) = text.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim_matches([' ', '\t']);

    let header = if name.eq_ignore_ascii_case("Connection") {
        Header::Connection(value)
    } else if name.eq_ignore_ascii_case("Content-Length") {
        Header::ContentLength(value.parse().ok()?)
    } else if name.eq_ignore_ascii_case("Host") {
        Header::Host(value)
    } else {
        Header::Other(name)
    };
    Some(header)
}

/// Credentials submitted by the login and registration forms.
#[derive(Debug, PartialEq, Eq)]
pub struct CredentialForm<'a> {
    pub user: &'a str,
    pub password: &'a str,
}

/// Reads `key=value&key=value` form bodies.
pub fn parse_credentials(body: &[u8]) -> Option<CredentialForm<'_>> {
    let body = std::str::from_utf8(body).ok()?;
    let mut user = None;
    let mut password = None;

    for pair in body.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        match key {
            "user" | "username" | "name" => user = Some(value),
            "password" | "passwd" | "pass" => password = Some(value),
            _ => {}
        }
    }

    Some(CredentialForm {
        user: user?,
        password: password?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &[u8] = b"GET / HTTP/1.1\r\n";

    #[test]
    fn test_scan_line_reassembles_across_any_split() {
        for split in 0..LINE.len() {
            let mut checked = 0;
            assert_eq!(scan_line(&LINE[..split], &mut checked), LineStatus::Open);
            assert!(checked <= split);

            assert_eq!(scan_line(LINE, &mut checked), LineStatus::Ok, "split at {split}");
            assert_eq!(checked, LINE.len());
            assert_eq!(&LINE[..checked - 2], b"GET / HTTP/1.1");
        }
    }

    #[test]
    fn test_scan_line_waits_on_trailing_cr() {
        let mut checked = 0;
        assert_eq!(scan_line(b"Host: a\r", &mut checked), LineStatus::Open);
        assert_eq!(checked, 7);
        assert_eq!(scan_line(b"Host: a\r\nrest", &mut checked), LineStatus::Ok);
        assert_eq!(checked, 9);
    }

    #[test]
    fn test_scan_line_rejects_bare_terminators() {
        let mut checked = 0;
        assert_eq!(scan_line(b"GET /\rX", &mut checked), LineStatus::Bad);
        let mut checked = 0;
        assert_eq!(scan_line(b"GET /\nX", &mut checked), LineStatus::Bad);
    }

    #[test]
    fn test_scan_line_consecutive_lines() {
        let buf = b"A\r\n\r\n";
        let mut checked = 0;
        assert_eq!(scan_line(buf, &mut checked), LineStatus::Ok);
        assert_eq!(checked, 3);
        assert_eq!(scan_line(buf, &mut checked), LineStatus::Ok);
        assert_eq!(checked, 5);
        assert_eq!(scan_line(buf, &mut checked), LineStatus::Open);
    }

    #[test]
    fn test_parse_request_line() {
        let line = parse_request_line(b"GET /index.html HTTP/1.1").unwrap();
        assert_eq!(line.method, Method::Get);
        assert_eq!(line.url, "/index.html");
        assert_eq!(line.version, "HTTP/1.1");

        let line = parse_request_line(b"post\t/login?x=1   http/1.1").unwrap();
        assert_eq!(line.method, Method::Post);
        assert_eq!(line.url, "/login");
    }

    #[test]
    fn test_parse_request_line_absolute_form() {
        let line = parse_request_line(b"GET http://example.com/a/b.css HTTP/1.1").unwrap();
        assert_eq!(line.url, "/a/b.css");
        assert!(parse_request_line(b"GET http://example.com HTTP/1.1").is_none());
    }

    #[test]
    fn test_parse_request_line_rejections() {
        assert!(parse_request_line(b"DELETE / HTTP/1.1").is_none());
        assert!(parse_request_line(b"GET / HTTP/1.0").is_none());
        assert!(parse_request_line(b"GET /").is_none());
        assert!(parse_request_line(b"GET index.html HTTP/1.1").is_none());
        assert!(parse_request_line(b"GET / HTTP/1.1 extra").is_none());
        assert!(parse_request_line(b"").is_none());
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header(b"connection:\t keep-alive"),
            Some(Header::Connection("keep-alive"))
        );
        assert_eq!(
            parse_header(b"Content-Length: 21"),
            Some(Header::ContentLength(21))
        );
        assert_eq!(parse_header(b"Host: localhost:8080"), Some(Header::Host("localhost:8080")));
        assert_eq!(parse_header(b"Accept: */*"), Some(Header::Other("Accept")));

        assert_eq!(parse_header(b"BrokenHeader"), None);
        assert_eq!(parse_header(b"Content-Length: ten"), None);
        assert_eq!(parse_header(b": value"), None);
    }

    #[test]
    fn test_parse_credentials() {
        let form = parse_credentials(b"user=alice&pass=wrong").unwrap();
        assert_eq!(form, CredentialForm { user: "alice", password: "wrong" });

        let form = parse_credentials(b"password=pw&extra&user=bob").unwrap();
        assert_eq!(form.user, "bob");
        assert_eq!(form.password, "pw");

        assert!(parse_credentials(b"user=alice").is_none());
    }
}
