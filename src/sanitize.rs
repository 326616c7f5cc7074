//! Input sanitization by kind.
//!
//! The kind is an enum, not a string, so a new kind cannot be added
//! without every dispatch site being checked at compile time.

use std::sync::OnceLock;

use regex::Regex;

/// Maximum length retained for `Generic` input.
const GENERIC_MAX_LEN: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Html,
    Sql,
    Email,
    Generic,
}

/// Sanitize `input` for the given sink.
///
/// `Email` validates rather than escapes: a malformed address comes back
/// as the empty string.
pub fn sanitize_input(input: &str, kind: InputKind) -> String {
    match kind {
        InputKind::Html => sanitize_html(input),
        InputKind::Sql => sanitize_sql(input),
        InputKind::Email => sanitize_email(input),
        InputKind::Generic => sanitize_generic(input),
    }
}

fn sanitize_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            _ => out.push(c),
        }
    }
    out
}

fn sql_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(union|select|insert|update|delete|drop|exec|script)\b")
            .expect("static pattern compiles")
    })
}

fn sanitize_sql(input: &str) -> String {
    let stripped: String = input
        .chars()
        .filter(|c| !matches!(c, '\'' | '"' | ';' | '\\'))
        .collect();
    let stripped = stripped.replace("--", "").replace("/*", "").replace("*/", "");
    sql_keyword_re().replace_all(&stripped, "").into_owned()
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}$").expect("static pattern compiles")
    })
}

fn sanitize_email(input: &str) -> String {
    let normalized = input.trim().to_lowercase();
    if email_re().is_match(&normalized) {
        normalized
    } else {
        String::new()
    }
}

fn sanitize_generic(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|c| !c.is_control() && *c != '<' && *c != '>')
        .take(GENERIC_MAX_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_escapes_markup() {
        assert_eq!(
            sanitize_input("<b>\"hi\" & 'bye'</b>", InputKind::Html),
            "&lt;b&gt;&quot;hi&quot; &amp; &#x27;bye&#x27;&lt;&#x2F;b&gt;"
        );
    }

    #[test]
    fn html_leaves_plain_text_alone() {
        assert_eq!(sanitize_input("plain text", InputKind::Html), "plain text");
    }

    #[test]
    fn sql_strips_quotes_and_keywords() {
        let out = sanitize_input("'; DROP TABLE users; --", InputKind::Sql);
        assert!(!out.contains('\''));
        assert!(!out.contains(';'));
        assert!(!out.to_lowercase().contains("drop"));
    }

    #[test]
    fn sql_strips_union_select() {
        let out = sanitize_input("1 UNION SELECT password FROM users", InputKind::Sql);
        assert!(!out.to_lowercase().contains("union"));
        assert!(!out.to_lowercase().contains("select"));
        assert!(out.contains("password"));
    }

    #[test]
    fn email_normalizes_valid_addresses() {
        assert_eq!(
            sanitize_input("  User.Name+tag@Example.COM ", InputKind::Email),
            "user.name+tag@example.com"
        );
    }

    #[test]
    fn email_rejects_invalid_addresses() {
        assert_eq!(sanitize_input("not-an-email", InputKind::Email), "");
        assert_eq!(sanitize_input("a@b", InputKind::Email), "");
        assert_eq!(sanitize_input("", InputKind::Email), "");
    }

    #[test]
    fn generic_strips_controls_and_angles() {
        assert_eq!(
            sanitize_input("  hello\u{0000} <world>\t ", InputKind::Generic),
            "hello world"
        );
    }

    #[test]
    fn generic_bounds_length() {
        let long = "a".repeat(5_000);
        assert_eq!(sanitize_input(&long, InputKind::Generic).len(), 1_000);
    }
}
