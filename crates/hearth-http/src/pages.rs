//! Built-in HTML pages for errors and redirects.

const STYLE: &str = "<style>body{font-family:sans-serif;margin:2em}pre{font-size:11px}</style>\n";

/// Escape text for inclusion in HTML content or a quoted attribute.
#[must_use]
pub fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// The footer line naming the server and, when known, the host it answered for.
#[must_use]
pub fn signature(server_name: &str, host: Option<&str>) -> String {
    match host {
        Some(host) => format!("<em>{}</em> at {}", html_escape(server_name), html_escape(host)),
        None => format!("<em>{}</em>", html_escape(server_name)),
    }
}

/// A complete page titled with `status` (e.g. `"404 Not Found"`).
///
/// `body_html` is inserted as-is.
#[must_use]
pub fn page(status: &str, body_html: &str, signature: &str) -> String {
    let title = html_escape(status);
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<title>{title}</title>\n{STYLE}</head>\n<body>\n<h1>{title}</h1>\n{body_html}\n<hr>\n{signature}\n</body>\n</html>\n"
    )
}

/// Page for a status with a plain-text explanation.
#[must_use]
pub fn error_page(status: &str, message: &str, signature: &str) -> String {
    page(status, &format!("<p>{}</p>", html_escape(message)), signature)
}

/// 500 page carrying the failure details.
#[must_use]
pub fn internal_error_page(details: &str, signature: &str) -> String {
    page(
        "500 Internal Server Error",
        &format!(
            "<p>An error occurred while handling the request.</p>\n<pre>{}</pre>",
            html_escape(details)
        ),
        signature,
    )
}

/// 500 page for when no 404 response could be produced.
#[must_use]
pub fn missing_404_page(signature: &str) -> String {
    error_page(
        "500 Internal Server Error",
        "The server failed to produce a 404 response.",
        signature,
    )
}

/// Short page linking to the new location of a redirected resource.
#[must_use]
pub fn redirect_page(status: &str, location: &str, signature: &str) -> String {
    page(
        status,
        &format!(
            "<p>The resource you requested has moved. <a href=\"{}\">Continue to the new location.</a></p>",
            html_escape(location)
        ),
        signature,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            html_escape("<a href=\"x\">&'"),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;"
        );
    }

    #[test]
    fn redirect_page_escapes_location() {
        let html = redirect_page("302 Found", "/next?a=1&b=\"2\"", "sig");
        assert!(html.contains("<title>302 Found</title>"));
        assert!(html.contains("href=\"/next?a=1&amp;b=&quot;2&quot;\""));
        assert!(html.contains("sig"));
    }

    #[test]
    fn internal_error_page_includes_details() {
        let html = internal_error_page("boom <here>", &signature("hearth", Some("example.com")));
        assert!(html.contains("boom &lt;here&gt;"));
        assert!(html.contains("<em>hearth</em> at example.com"));
    }
}
