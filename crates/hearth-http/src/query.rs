//! Query string and percent-decoding utilities.
//!
//! Query strings and URL-encoded form bodies share one grammar: `&`-separated
//! `key=value` pairs where `+` stands for a space. Request paths are decoded
//! without the `+` rule.
//!
//! # Example
//!
//! ```
//! use hearth_http::QueryString;
//!
//! let qs = QueryString::parse("a=1&b=two+words&a=3");
//! assert_eq!(qs.get("a"), Some("1"));
//! assert_eq!(qs.get_all("a").collect::<Vec<_>>(), vec!["1", "3"]);
//! assert_eq!(qs.get_decoded("b").as_deref(), Some("two words"));
//! ```

use std::borrow::Cow;

/// A query string view; pairs are split on each access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryString<'a> {
    raw: &'a str,
}

impl<'a> QueryString<'a> {
    /// Wrap a query string (without the leading `?`).
    #[must_use]
    pub fn parse(raw: &'a str) -> Self {
        Self { raw }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    #[must_use]
    pub fn raw(&self) -> &'a str {
        self.raw
    }

    /// The first raw value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.pairs().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Every raw value for `key`, in order.
    pub fn get_all(&self, key: &str) -> impl Iterator<Item = &'a str> {
        self.pairs().filter(move |(k, _)| *k == key).map(|(_, v)| v)
    }

    /// The first value for `key`, percent-decoded with `+` as space.
    #[must_use]
    pub fn get_decoded(&self, key: &str) -> Option<Cow<'a, str>> {
        self.get(key).map(percent_decode)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.pairs().any(|(k, _)| k == key)
    }

    /// Raw `(key, value)` pairs. A key without `=` has an empty value.
    pub fn pairs(&self) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.raw
            .split('&')
            .filter(|s| !s.is_empty())
            .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
    }

    /// Owned pairs with both keys and values decoded.
    #[must_use]
    pub fn decoded_pairs(&self) -> Vec<(String, String)> {
        self.pairs()
            .map(|(k, v)| (percent_decode(k).into_owned(), percent_decode(v).into_owned()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs().count()
    }
}

/// Percent-decode a query or form component, translating `+` to a space.
///
/// Borrows when nothing needs decoding. Invalid escapes are kept as-is and
/// invalid UTF-8 is replaced.
///
/// ```
/// use hearth_http::percent_decode;
///
/// assert_eq!(&*percent_decode("hello+world%21"), "hello world!");
/// assert_eq!(&*percent_decode("100%"), "100%");
/// ```
pub fn percent_decode(s: &str) -> Cow<'_, str> {
    decode(s, true)
}

/// Percent-decode a path or filename. `+` stays a plus sign.
pub fn percent_decode_path(s: &str) -> Cow<'_, str> {
    decode(s, false)
}

fn decode(s: &str, plus_as_space: bool) -> Cow<'_, str> {
    if !s.contains('%') && !(plus_as_space && s.contains('+')) {
        return Cow::Borrowed(s);
    }

    let bytes = s.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let (Some(hi), Some(lo)) = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                    result.push((hi << 4) | lo);
                    i += 3;
                } else {
                    result.push(b'%');
                    i += 1;
                }
            }
            b'+' if plus_as_space => {
                result.push(b' ');
                i += 1;
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    Cow::Owned(String::from_utf8_lossy(&result).into_owned())
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
