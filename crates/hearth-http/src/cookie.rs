//! `Cookie` request header decoding.

use crate::query::percent_decode;

/// Decode every `Cookie` header value into `(name, value)` pairs.
///
/// Pairs are split on `;` and trimmed; names and values are
/// percent-decoded with `+` as space. A bare token maps to an empty value.
///
/// ```
/// use hearth_http::parse_cookies;
///
/// let cookies = parse_cookies(["session=abc%3D; theme = dark", "flag"]);
/// assert_eq!(cookies[0], ("session".to_string(), "abc=".to_string()));
/// assert_eq!(cookies[1], ("theme".to_string(), "dark".to_string()));
/// assert_eq!(cookies[2], ("flag".to_string(), String::new()));
/// ```
pub fn parse_cookies<'a>(headers: impl IntoIterator<Item = &'a str>) -> Vec<(String, String)> {
    headers
        .into_iter()
        .flat_map(|header| header.split(';'))
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (name, value) = part.split_once('=').unwrap_or((part, ""));
            (
                percent_decode(name.trim()).into_owned(),
                percent_decode(value.trim()).into_owned(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_segments_are_skipped() {
        assert!(parse_cookies(["; ;"]).is_empty());
        assert_eq!(parse_cookies(["a=1;;b=2"]).len(), 2);
    }

    #[test]
    fn value_keeps_inner_equals() {
        let cookies = parse_cookies(["token=a=b=c"]);
        assert_eq!(cookies, vec![("token".to_string(), "a=b=c".to_string())]);
    }

    #[test]
    fn plus_decodes_to_space() {
        let cookies = parse_cookies(["greeting=hello+there"]);
        assert_eq!(cookies[0].1, "hello there");
    }
}
