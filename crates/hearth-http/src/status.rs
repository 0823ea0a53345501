//! Status reason phrases.

/// The standard reason phrase for `code`, or `"Unknown"`.
#[must_use]
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        414 => "Request URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        426 => "Upgrade Required",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "Unknown",
    }
}

/// `"<code> <reason>"`, the form the response writer stores.
#[must_use]
pub fn status_line(code: u16) -> String {
    format!("{code} {}", reason_phrase(code))
}

/// 1xx, 204 and 304 responses never carry a body.
#[must_use]
pub fn forbids_body(code: u16) -> bool {
    (100..200).contains(&code) || code == 204 || code == 304
}

/// Redirect statuses that get a generated page when the responder wrote nothing.
#[must_use]
pub fn is_redirect(code: u16) -> bool {
    matches!(code, 301 | 302 | 303 | 307 | 308)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lines() {
        assert_eq!(status_line(200), "200 OK");
        assert_eq!(status_line(414), "414 Request URI Too Long");
        assert_eq!(status_line(599), "599 Unknown");
    }

    #[test]
    fn bodyless_statuses() {
        assert!(forbids_body(101));
        assert!(forbids_body(204));
        assert!(forbids_body(304));
        assert!(!forbids_body(200));
        assert!(!forbids_body(404));
    }
}
