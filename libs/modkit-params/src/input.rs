//! Raw input normalization: URIs, query strings, pairs and maps all become
//! an ordered `key -> [token]` mapping.

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;
use url::form_urlencoded;

/// Normalized raw input. Keys keep their first-seen order; repeated keys
/// accumulate their tokens in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawParams {
    entries: IndexMap<String, Vec<String>>,
}

impl RawParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a form-urlencoded query string. A leading `?` is ignored.
    #[must_use]
    pub fn parse_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    /// Parse the query component of a URI or URI reference. Input without a
    /// `?` has no parameters.
    #[must_use]
    pub fn from_uri(uri: &str) -> Self {
        let Some((_, rest)) = uri.split_once('?') else {
            return Self::default();
        };
        let query = rest.split_once('#').map_or(rest, |(query, _)| query);
        Self::parse_query(query)
    }

    pub fn push(&mut self, key: impl Into<String>, token: impl Into<String>) {
        self.entries
            .entry(key.into())
            .or_default()
            .push(token.into());
    }

    pub fn extend_key<I, S>(&mut self, key: impl Into<String>, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries
            .entry(key.into())
            .or_default()
            .extend(tokens.into_iter().map(Into::into));
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for RawParams {
    type Item = (String, Vec<String>);
    type IntoIter = indexmap::map::IntoIter<String, Vec<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::default();
        for (key, value) in iter {
            params.push(key, value);
        }
        params
    }
}

/// A string containing `?` is treated as a URI, anything else as a bare
/// query string.
impl From<&str> for RawParams {
    fn from(input: &str) -> Self {
        if input.contains('?') {
            Self::from_uri(input)
        } else {
            Self::parse_query(input)
        }
    }
}

impl From<String> for RawParams {
    fn from(input: String) -> Self {
        Self::from(input.as_str())
    }
}

impl From<&String> for RawParams {
    fn from(input: &String) -> Self {
        Self::from(input.as_str())
    }
}

impl From<&url::Url> for RawParams {
    fn from(url: &url::Url) -> Self {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> From<Vec<(K, V)>> for RawParams {
    fn from(pairs: Vec<(K, V)>) -> Self {
        pairs.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for RawParams {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<String>> From<HashMap<K, Vec<V>>> for RawParams {
    fn from(map: HashMap<K, Vec<V>>) -> Self {
        let mut params = Self::default();
        for (key, tokens) in map {
            params.extend_key(key, tokens);
        }
        params
    }
}

impl<K: Into<String>, V: Into<String>> From<BTreeMap<K, Vec<V>>> for RawParams {
    fn from(map: BTreeMap<K, Vec<V>>) -> Self {
        let mut params = Self::default();
        for (key, tokens) in map {
            params.extend_key(key, tokens);
        }
        params
    }
}

/// Absent input normalizes to an empty mapping.
impl<T: Into<RawParams>> From<Option<T>> for RawParams {
    fn from(input: Option<T>) -> Self {
        input.map(Into::into).unwrap_or_default()
    }
}
