#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpStatus {
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
    PayloadTooLarge,
    InternalServerError,
}

impl HttpStatus {
    pub fn code(&self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::PayloadTooLarge => 413,
            Self::InternalServerError => 500,
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::PayloadTooLarge => "Payload Too Large",
            Self::InternalServerError => "Internal Server Error",
        }
    }

    /// Inline body sent with an error status.
    pub fn error_body(&self) -> &'static str {
        match self {
            Self::BadRequest => "<html><body><h1>400 Bad Request</h1><p>Your request has bad syntax or is inherently impossible to satisfy.</p></body></html>",
            Self::Forbidden => "<html><body><h1>403 Forbidden</h1><p>You do not have permission to get this file from the server.</p></body></html>",
            Self::NotFound => "<html><body><h1>404 Not Found</h1><p>The requested file was not found on this server.</p></body></html>",
            Self::PayloadTooLarge => "<html><body><h1>413 Payload Too Large</h1><p>The request body does not fit in the request buffer.</p></body></html>",
            Self::InternalServerError => "<html><body><h1>500 Internal Server Error</h1><p>There was an unusual problem serving the request file.</p></body></html>",
            Self::Ok => "",
        }
    }
}

static MIME_TYPES: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("ico", "image/x-icon"),
    ("json", "application/json"),
    ("txt", "text/plain"),
    ("mp4", "video/mp4"),
];

pub fn content_type(path: &std::path::Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();

    MIME_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
        .unwrap_or("application/octet-stream")
}
