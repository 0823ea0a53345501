//! Ordered, case-insensitive, multi-valued header map.
//!
//! Names keep the spelling of their first insertion. Values are grouped per
//! name for lookup, while [`Headers::iter`] replays them in arrival order
//! across names. Lookups compare names ASCII case-insensitively.

/// HTTP header collection.
///
/// # Example
///
/// ```
/// use hearth_core::Headers;
///
/// let mut headers = Headers::new();
/// headers.append("Accept", "text/html");
/// headers.append("accept", "application/json");
/// assert_eq!(headers.get("ACCEPT"), Some("text/html"));
/// assert_eq!(headers.get_all("Accept").len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
    // Entry index of every value, in arrival order.
    order: Vec<usize>,
}

impl Headers {
    /// Create empty headers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    /// Get the first value for a header (case-insensitive).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    /// Get every value recorded for a header, in arrival order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[String] {
        match self.position(name) {
            Some(idx) => &self.entries[idx].1,
            None => &[],
        }
    }

    /// Returns true if at least one value exists for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Replace all values for `name` with a single value.
    ///
    /// An existing header keeps its position and original spelling.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => {
                self.entries[idx].1 = vec![value];
                let mut kept = false;
                self.order
                    .retain(|&i| i != idx || !std::mem::replace(&mut kept, true));
            }
            None => {
                self.order.push(self.entries.len());
                self.entries.push((name, vec![value]));
            }
        }
    }

    /// Append a value, keeping any earlier values for the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        let idx = match self.position(&name) {
            Some(idx) => {
                self.entries[idx].1.push(value);
                idx
            }
            None => {
                self.entries.push((name, vec![value]));
                self.entries.len() - 1
            }
        };
        self.order.push(idx);
    }

    /// Append `more` to the last value recorded for `name`.
    ///
    /// Used for folded continuation lines. Returns false when `name` has no value yet.
    pub fn extend_last(&mut self, name: &str, more: &str) -> bool {
        let Some(idx) = self.position(name) else {
            return false;
        };
        match self.entries[idx].1.last_mut() {
            Some(last) => {
                last.push_str(more);
                true
            }
            None => false,
        }
    }

    /// Remove every value for `name`, returning them.
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        let idx = self.position(name)?;
        self.order.retain(|&i| i != idx);
        for i in &mut self.order {
            if *i > idx {
                *i -= 1;
            }
        }
        Some(self.entries.remove(idx).1)
    }

    /// Iterate over `(name, value)` pairs, one per value, in arrival order.
    ///
    /// A replaced header sits where its first value arrived.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        let mut cursors = vec![0usize; self.entries.len()];
        self.order.iter().filter_map(move |&idx| {
            let (name, values) = self.entries.get(idx)?;
            let value = values.get(cursors[idx])?;
            cursors[idx] += 1;
            Some((name.as_str(), value.as_str()))
        })
    }

    /// Iterate over distinct header names with all their values.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Returns the number of distinct header names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every header.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}
