//! Header collections with case-insensitive names.

use crate::error::ConfigError;

/// An ordered list of header fields whose names compare case-insensitively.
///
/// Names keep the spelling they were inserted with. [`insert`](Self::insert)
/// replaces an existing field, [`append`](Self::append) keeps repeated fields
/// such as `set-cookie` side by side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    fields: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to `value`, dropping every other field with the same name.
    /// Returns the first value that was replaced.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let name = name.into();
        let value = value.into();
        let mut replaced = None;
        let mut index = 0;
        while index < self.fields.len() {
            if self.fields[index].0.eq_ignore_ascii_case(&name) {
                let (_, old) = self.fields.remove(index);
                replaced.get_or_insert(old);
            } else {
                index += 1;
            }
        }
        self.fields.push((name, value));
        replaced
    }

    /// Adds a field without touching existing fields of the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// The first value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Every value for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Removes every field named `name`, returning how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.fields.len();
        self.fields.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        before - self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Checks every field against [`validate_name`] and [`validate_value`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in self.iter() {
            validate_name(name)?;
            validate_value(name, value)?;
        }
        Ok(())
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, value) in iter {
            map.append(name, value);
        }
        map
    }
}

/// Whether `byte` may appear in an HTTP token (RFC 9110 section 5.6.2).
pub(crate) fn is_token_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&byte)
}

/// Header names must be non-empty tokens.
pub fn validate_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || !name.bytes().all(is_token_byte) {
        return Err(ConfigError::InvalidHeaderName(name.to_string()));
    }
    Ok(())
}

/// Header values may not contain line breaks or NUL, which would let a value
/// smuggle extra fields into the request head.
pub fn validate_value(name: &str, value: &str) -> Result<(), ConfigError> {
    if value.bytes().any(|b| matches!(b, b'\r' | b'\n' | 0)) {
        return Err(ConfigError::InvalidHeaderValue(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", "text/plain");
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
        assert!(headers.contains("content-TYPE"));
        assert_eq!(headers.get("accept"), None);
    }

    #[test]
    fn insert_replaces_all_spellings() {
        let mut headers = HeaderMap::new();
        headers.append("x-tag", "a");
        headers.append("X-Tag", "b");
        assert_eq!(headers.insert("X-TAG", "c"), Some("a".to_string()));
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.iter().next(), Some(("X-TAG", "c")));
    }

    #[test]
    fn append_keeps_repeats() {
        let headers: HeaderMap = [("set-cookie", "a=1"), ("Set-Cookie", "b=2")]
            .into_iter()
            .collect();
        let cookies: Vec<_> = headers.get_all("SET-COOKIE").collect();
        assert_eq!(cookies, ["a=1", "b=2"]);
    }

    #[test]
    fn remove_counts_fields() {
        let mut headers: HeaderMap = [("a", "1"), ("A", "2"), ("b", "3")].into_iter().collect();
        assert_eq!(headers.remove("a"), 2);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.remove("a"), 0);
    }

    #[test]
    fn validation() {
        assert!(validate_name("x-goog-meta_1").is_ok());
        assert_eq!(
            validate_name("bad name"),
            Err(ConfigError::InvalidHeaderName("bad name".into()))
        );
        assert!(validate_name("").is_err());
        assert!(validate_name("colon:").is_err());
        assert!(validate_value("x", "plain value\twith tab").is_ok());
        assert_eq!(
            validate_value("x", "evil\r\nhost: other"),
            Err(ConfigError::InvalidHeaderValue("x".into()))
        );
    }
}
