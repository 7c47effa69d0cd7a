//! Text cleanup and validators applied to every captured substring.

use std::sync::LazyLock;

use regex::Regex;

static EMAIL_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email shape"));

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"));

/// Strip complete `<...>` tags and collapse runs of whitespace into single
/// spaces. An unterminated `<` is kept as text.
pub fn strip_html(html: &str) -> String {
    TAG.replace_all(html, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Exactly one `@`, a dotted domain, no whitespace.
pub fn is_valid_email(candidate: &str) -> bool {
    EMAIL_SHAPE.is_match(candidate)
}

/// Between 10 and 15 digits once every non-digit is removed.
pub fn is_valid_phone(candidate: &str) -> bool {
    let digits = candidate.chars().filter(|c| c.is_ascii_digit()).count();
    (10..=15).contains(&digits)
}

/// Captured names just need to survive cleanup.
pub fn is_present(candidate: &str) -> bool {
    !candidate.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_html_keeps_unterminated_angle_bracket() {
        assert_eq!(strip_html("Jane <3 Doe"), "Jane <3 Doe");
        assert_eq!(strip_html("<b>Jane</b> <3"), "Jane <3");
    }

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<p>Hello</p>"), "Hello");
    }

    #[test]
    fn strip_html_nested_tags() {
        assert_eq!(
            strip_html("<div><b>Jane</b>   <i>Doe</i></div>"),
            "Jane Doe"
        );
    }

    #[test]
    fn strip_html_with_attributes() {
        assert_eq!(
            strip_html(r#"<a href="mailto:jane@x.com">jane@x.com</a>"#),
            "jane@x.com"
        );
    }

    #[test]
    fn strip_html_collapses_newlines() {
        assert_eq!(strip_html("  Jane\r\n\t Doe \n"), "Jane Doe");
    }

    #[test]
    fn strip_html_keeps_stray_closing_bracket() {
        assert_eq!(strip_html("5 > 4"), "5 > 4");
    }

    #[test]
    fn strip_html_empty() {
        assert_eq!(strip_html(""), "");
        assert_eq!(strip_html("<br/>"), "");
    }

    #[test]
    fn email_shape() {
        assert!(is_valid_email("jane@x.com"));
        assert!(is_valid_email("jane.doe+jobs@mail.example.co.uk"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("jane@localhost"));
        assert!(!is_valid_email("jane@@x.com"));
        assert!(!is_valid_email("jane doe@x.com"));
        assert!(!is_valid_email("jane@x.com Phone"));
    }

    #[test]
    fn phone_digit_bounds() {
        assert!(is_valid_phone("555-123-4567"));
        assert!(is_valid_phone("+44 (20) 7946 0958"));
        assert!(is_valid_phone("123456789012345"));
        assert!(!is_valid_phone("555-1234"));
        assert!(!is_valid_phone("1234567890123456"));
        assert!(!is_valid_phone("call me"));
    }
}
