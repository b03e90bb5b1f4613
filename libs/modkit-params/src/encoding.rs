//! Query string escaping at the serialization boundary.

use url::form_urlencoded;

/// Escape one key or value for a `key=value` pair.
#[must_use]
pub fn escape(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Join pairs as `key=value&...`, one pair per token. Keys with an empty
/// token list contribute nothing.
pub fn encode_pairs<'a, I, T>(groups: I) -> String
where
    I: IntoIterator<Item = (&'a str, T)>,
    T: IntoIterator,
    T::Item: AsRef<str>,
{
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, tokens) in groups {
        for token in tokens {
            serializer.append_pair(key, token.as_ref());
        }
    }
    serializer.finish()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn reserved_characters_are_escaped() {
        assert_eq!(escape("a&b=c%d#e"), "a%26b%3Dc%25d%23e");
        assert_eq!(escape("\u{e9}"), "%C3%A9");
        assert_eq!(escape("a b"), "a+b");
    }

    #[test]
    fn repeated_keys() {
        let out = encode_pairs([("page", vec!["1", "10"]), ("q", vec!["x y"]), ("none", vec![])]);
        assert_eq!(out, "page=1&page=10&q=x+y");
    }
}
