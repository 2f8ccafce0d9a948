//! Keyword grammar tokenizer
//!
//! The key=value grammar shared by command text and reply lines:
//!
//! ```text
//! keys   := (key | key '=' value (',' value)*)*
//! value  := bareToken | quotedString
//! ```
//!
//! Keys are separated by whitespace in command text and by `;` in replies. A
//! bare token ends at whitespace, comma, or semicolon. A quoted string closes
//! on its opening quote character only when that quote is preceded by an even
//! number (including zero) of backslashes.
//!
//! Parsing never fails. Input that cannot be matched is carried along under a
//! conventional key instead: a wholly unparseable tail lands in
//! `UNPARSEDTEXT`, and a quoted string that hits end-of-input is silently
//! closed and flagged with `UnclosedQuote`. Callers surface degraded parses as
//! warn-flagged replies; nothing is ever dropped.

use crate::msg::{KeyValue, KeyValues, KEY_UNCLOSED_QUOTE, KEY_UNPARSED_TEXT};

/// Key separator style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delim {
    /// Keys separated by whitespace (command text)
    Whitespace,
    /// Keys separated by `;` (reply keyword lists)
    Semicolon,
}

/// Result of parsing a keyword list
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedKeys {
    /// Parsed keywords, including any conventional degradation keys
    pub keys: KeyValues,
    /// True if the input could not be parsed cleanly
    pub degraded: bool,
}

/// Parse a keyword list. Never fails; see the module docs for the
/// degradation policy.
pub fn parse_keys(text: &str, delim: Delim) -> ParsedKeys {
    let mut parser = Parser {
        chars: text.chars().collect(),
        pos: 0,
    };
    let mut keys = KeyValues::new();
    let mut degraded = false;
    let mut unclosed = false;

    loop {
        parser.skip_separators(delim);
        if parser.at_end() {
            break;
        }

        let name = parser.take_bare_token(true);
        if name.is_empty() {
            // No progress possible; keep the tail rather than dropping it.
            let rest: String = parser.chars[parser.pos..].iter().collect();
            keys.insert(KEY_UNPARSED_TEXT, KeyValue::Scalar(rest));
            degraded = true;
            break;
        }

        if parser.peek() == Some('=') {
            parser.pos += 1;
            let mut values = Vec::new();
            loop {
                let (value, closed) = parser.take_value();
                if !closed {
                    unclosed = true;
                }
                values.push(value);
                if parser.peek() == Some(',') {
                    parser.pos += 1;
                } else {
                    break;
                }
            }
            keys.insert(name, KeyValue::from_values(values));
        } else {
            keys.insert(name, KeyValue::Flag);
        }
    }

    if unclosed {
        keys.insert(KEY_UNCLOSED_QUOTE, KeyValue::Flag);
        degraded = true;
    }

    ParsedKeys { keys, degraded }
}

/// Encode a keyword list in the given separator style
pub fn encode_keys(keys: &KeyValues, delim: Delim) -> String {
    let sep = match delim {
        Delim::Whitespace => " ",
        Delim::Semicolon => "; ",
    };
    let mut out = String::new();
    for (name, value) in keys.iter() {
        if !out.is_empty() {
            out.push_str(sep);
        }
        out.push_str(name);
        match value {
            KeyValue::Flag => {}
            KeyValue::Scalar(v) => {
                out.push('=');
                out.push_str(&encode_value(v));
            }
            KeyValue::List(vs) => {
                out.push('=');
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&encode_value(v));
                }
            }
        }
    }
    out
}

/// Encode one value, quoting only when the bare form would be ambiguous
pub fn encode_value(value: &str) -> String {
    let needs_quoting = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | ',' | ';' | '=' | '\\'));
    if !needs_quoting {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_separators(&mut self, delim: Delim) {
        while let Some(c) = self.peek() {
            let skip = match delim {
                Delim::Whitespace => c.is_whitespace() || c == ';' || c == ',',
                Delim::Semicolon => c.is_whitespace() || c == ';',
            };
            if skip {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    /// Read a bare token; stops at whitespace, comma, semicolon, end, and
    /// (for key names) at `=`.
    fn take_bare_token(&mut self, stop_at_equals: bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == ',' || c == ';' || (stop_at_equals && c == '=') {
                break;
            }
            out.push(c);
            self.pos += 1;
        }
        out
    }

    /// Read one value: a quoted string or a bare token (possibly empty).
    /// Returns the value and whether a quoted string closed properly.
    fn take_value(&mut self) -> (String, bool) {
        match self.peek() {
            Some(q) if q == '"' || q == '\'' => {
                self.pos += 1;
                self.take_quoted(q)
            }
            _ => (self.take_bare_token(false), true),
        }
    }

    /// Scan a quoted string body. A backslash escapes the next character;
    /// the closing quote is therefore exactly a quote preceded by an even
    /// run of backslashes. Hitting end-of-input closes the string silently.
    fn take_quoted(&mut self, quote: char) -> (String, bool) {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            if c == '\\' {
                match self.peek() {
                    Some(next) => {
                        self.pos += 1;
                        if next == '\\' || next == quote {
                            out.push(next);
                        } else {
                            // Unknown escapes pass through untouched.
                            out.push('\\');
                            out.push(next);
                        }
                    }
                    None => {
                        out.push('\\');
                        return (out, false);
                    }
                }
            } else if c == quote {
                return (out, true);
            } else {
                out.push(c);
            }
        }
        (out, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(keys: &KeyValues, name: &str) -> String {
        keys.get(name)
            .and_then(|v| v.as_scalar())
            .unwrap_or_else(|| panic!("missing scalar {}", name))
            .to_string()
    }

    #[test]
    fn test_flag_and_scalar_keys() {
        let parsed = parse_keys("guide on; ExpTime=5", Delim::Semicolon);
        assert!(!parsed.degraded);
        assert!(parsed.keys.get("guide").unwrap().is_flag());
        assert!(parsed.keys.get("on").unwrap().is_flag());
        assert_eq!(scalar(&parsed.keys, "exptime"), "5");
    }

    #[test]
    fn test_list_values() {
        let parsed = parse_keys("window=10,20,300,400", Delim::Whitespace);
        let values = parsed.keys.get("window").unwrap().values().to_vec();
        assert_eq!(values, vec!["10", "20", "300", "400"]);
    }

    #[test]
    fn test_quoted_strings() {
        let parsed = parse_keys(r#"object="M 31"; note='say "hi"'"#, Delim::Semicolon);
        assert_eq!(scalar(&parsed.keys, "object"), "M 31");
        assert_eq!(scalar(&parsed.keys, "note"), r#"say "hi""#);
    }

    #[test]
    fn test_escaped_quote_does_not_close() {
        let parsed = parse_keys(r#"text="a \" b""#, Delim::Semicolon);
        assert_eq!(scalar(&parsed.keys, "text"), r#"a " b"#);
    }

    #[test]
    fn test_even_backslash_run_closes() {
        // Two backslashes then a quote: the quote closes the string.
        let parsed = parse_keys(r#"path="c:\\""#, Delim::Semicolon);
        assert_eq!(scalar(&parsed.keys, "path"), r"c:\");
        assert!(!parsed.degraded);
    }

    #[test]
    fn test_unterminated_string_recovers() {
        let parsed = parse_keys(r#"msg="never closed"#, Delim::Semicolon);
        assert_eq!(scalar(&parsed.keys, "msg"), "never closed");
        assert!(parsed.keys.contains(KEY_UNCLOSED_QUOTE));
        assert!(parsed.degraded);
    }

    #[test]
    fn test_unparseable_tail_is_kept() {
        let parsed = parse_keys("good=1; =broken rest", Delim::Semicolon);
        assert_eq!(scalar(&parsed.keys, "good"), "1");
        assert_eq!(scalar(&parsed.keys, KEY_UNPARSED_TEXT), "=broken rest");
        assert!(parsed.degraded);
    }

    #[test]
    fn test_empty_value() {
        let parsed = parse_keys("cleared=", Delim::Semicolon);
        assert_eq!(scalar(&parsed.keys, "cleared"), "");
    }

    #[test]
    fn test_round_trip() {
        let cases = vec![
            "simple=1",
            "flagOnly",
            "list=1,2,3",
            r#"quoted="two words""#,
            r#"tricky="a \" \\ b,c;d""#,
            r#"empty="""#,
        ];
        for case in cases {
            let parsed = parse_keys(case, Delim::Semicolon);
            assert!(!parsed.degraded, "degraded parse for {:?}", case);
            let encoded = encode_keys(&parsed.keys, Delim::Semicolon);
            let reparsed = parse_keys(&encoded, Delim::Semicolon);
            assert_eq!(parsed.keys, reparsed.keys, "round trip of {:?}", case);
        }
    }

    #[test]
    fn test_encode_value_quoting() {
        assert_eq!(encode_value("plain"), "plain");
        assert_eq!(encode_value("two words"), r#""two words""#);
        assert_eq!(encode_value(""), r#""""#);
        assert_eq!(encode_value(r"back\slash"), r#""back\\slash""#);
        assert_eq!(encode_value("a;b"), r#""a;b""#);
    }

    #[test]
    fn test_case_preserved_but_matched_insensitively() {
        let parsed = parse_keys("ExpTime=5", Delim::Semicolon);
        assert!(parsed.keys.contains("exptime"));
        let names: Vec<&str> = parsed.keys.names().collect();
        assert_eq!(names, vec!["ExpTime"]);
    }
}
