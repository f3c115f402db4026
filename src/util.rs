use std::net::SocketAddr;

use crate::error::{Error, Result};

/// Splits on every occurrence of `delim` that is not escaped by a preceding backslash.
/// Escape sequences are preserved in the returned tokens; use [unescape] to strip them.
pub(crate) fn split_unescaped(s: &str, delim: char) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut escaped = false;

    for c in s.chars() {
        if escaped {
            cur.push(c);
            escaped = false;
        } else if c == '\\' {
            cur.push(c);
            escaped = true;
        } else if c == delim {
            out.push(std::mem::take(&mut cur));
        } else {
            cur.push(c);
        }
    }
    out.push(cur);
    out
}

/// Splits at the first unescaped occurrence of `delim`, or `None` if there is none.
pub(crate) fn split_unescaped_once(s: &str, delim: char) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (idx, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == delim {
            return Some((&s[..idx], &s[idx + c.len_utf8()..]));
        }
    }
    None
}

/// Removes one level of backslash escaping.
pub(crate) fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else {
            out.push(c);
        }
    }
    if escaped {
        // trailing lone backslash is kept literally
        out.push('\\');
    }
    out
}

/// Backslash-escapes every backslash and every character in `specials`.
pub(crate) fn escape(s: &str, specials: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\\' || specials.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Parses an `ip:port` target string.
pub(crate) fn parse_target(target: &str) -> Result<SocketAddr> {
    target.parse().map_err(|_| Error::bad_target(target))
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::plain("a|b|c", vec!["a", "b", "c"])]
    #[case::escaped_delimiter("a\\|b|c", vec!["a\\|b", "c"])]
    #[case::escaped_backslash("a\\\\|b", vec!["a\\\\", "b"])]
    #[case::empty_tokens("|a|", vec!["", "a", ""])]
    #[case::no_delimiter("abc", vec!["abc"])]
    #[case::empty("", vec![""])]
    fn test_split_unescaped(#[case] input: &str, #[case] expected: Vec<&str>) {
        assert_eq!(split_unescaped(input, '|'), expected);
    }

    #[rstest]
    #[case::simple("header@payload", Some(("header", "payload")))]
    #[case::payload_keeps_later_delimiters("h@pay@load", Some(("h", "pay@load")))]
    #[case::escaped_is_skipped("a\\@b@c", Some(("a\\@b", "c")))]
    #[case::missing("no separator", None)]
    fn test_split_unescaped_once(#[case] input: &str, #[case] expected: Option<(&str, &str)>) {
        assert_eq!(split_unescaped_once(input, '@'), expected);
    }

    #[rstest]
    #[case::delimiter("a\\|b", "a|b")]
    #[case::backslash("a\\\\b", "a\\b")]
    #[case::trailing("a\\", "a\\")]
    #[case::untouched("plain", "plain")]
    fn test_unescape(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(unescape(input), expected);
    }

    #[rstest]
    #[case::specials("a|b@c:d", "a\\|b\\@c\\:d")]
    #[case::backslash_always("a\\b", "a\\\\b")]
    #[case::clean("plain", "plain")]
    fn test_escape(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(escape(input, &['|', '@', ':']), expected);
    }

    #[rstest]
    #[case::escape_then_split("value|with\\pipe", '|')]
    #[case::escape_then_split_at("v@lue", '@')]
    fn test_escape_survives_split(#[case] raw: &str, #[case] delim: char) {
        let escaped = escape(raw, &[delim]);
        let tokens = split_unescaped(&escaped, delim);
        assert_eq!(tokens.len(), 1);
        assert_eq!(unescape(&tokens[0]), raw);
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(
            parse_target("127.0.0.1:8080").unwrap(),
            "127.0.0.1:8080".parse().unwrap()
        );
        assert!(parse_target("127.0.0.1").is_err());
        assert!(parse_target("localhost:nope").is_err());
    }
}
