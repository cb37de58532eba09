//! Pattern scrubbing of cross-customer identifiers.

use regex::{Captures, Regex};
use std::sync::LazyLock;

struct Patterns {
    email: Regex,
    url: Regex,
    ipv4: Regex,
    phone: Regex,
}

static PATTERNS: LazyLock<Result<Patterns, regex::Error>> = LazyLock::new(|| {
    Ok(Patterns {
        email: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")?,
        url: Regex::new(r"(https?://[^\s/]+)(/[^\s)>\]]*)")?,
        ipv4: Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b")?,
        // Grouped like a dialable number: NANP 3-3-4, or `+` and digit groups.
        phone: Regex::new(
            r"(?:\+?\b\d{1,3}[\s.-]?)?(?:\(\d{3}\)|\b\d{3})[\s.-]?\d{3}[\s.-]\d{4}\b|\+\d{1,3}(?:[\s.-]?\d{2,4}){2,4}\b",
        )?,
    })
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redacted {
    pub text: String,
    pub replacements: usize,
    /// Scrubbing did not run; `text` is the input unchanged.
    pub warning: bool,
}

/// Never fails: on internal error the original text comes back with `warning` set.
pub fn redact(text: &str) -> Redacted {
    let patterns = match PATTERNS.as_ref() {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "redaction patterns unavailable; passing text through");
            return Redacted {
                text: text.to_string(),
                replacements: 0,
                warning: true,
            };
        }
    };

    let mut replacements = 0usize;
    let mut out = patterns
        .email
        .replace_all(text, |_: &Captures| {
            replacements += 1;
            "[email]".to_string()
        })
        .into_owned();
    out = patterns
        .url
        .replace_all(&out, |caps: &Captures| {
            if caps[2].len() <= 1 {
                return caps[0].to_string();
            }
            replacements += 1;
            format!("{}/[path]", &caps[1])
        })
        .into_owned();
    out = patterns
        .ipv4
        .replace_all(&out, |_: &Captures| {
            replacements += 1;
            "[ip]".to_string()
        })
        .into_owned();
    out = patterns
        .phone
        .replace_all(&out, |caps: &Captures| {
            let digits = caps[0].chars().filter(char::is_ascii_digit).count();
            if digits < 7 {
                return caps[0].to_string();
            }
            replacements += 1;
            "[phone]".to_string()
        })
        .into_owned();

    Redacted {
        text: out,
        replacements,
        warning: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrubs_identifiers() {
        let r = redact(
            "Mail dana@acme.io or call +1 (415) 555-0134; server 10.2.3.4, see https://acme.example.com/accounts/991/billing",
        );
        assert_eq!(
            r.text,
            "Mail [email] or call [phone]; server [ip], see https://acme.example.com/[path]"
        );
        assert_eq!(r.replacements, 4);
        assert!(!r.warning);
    }

    #[test]
    fn plain_answers_are_untouched() {
        let text = "Pro plan includes up to 9 seats, Business 25. Docs: https://example.com/";
        let r = redact(text);
        assert_eq!(r.text, text);
        assert_eq!(r.replacements, 0);
    }

    #[test]
    fn dates_and_long_numbers_are_not_phones() {
        let text = "Renewed 2024-05-17 (invoice 2024.06.01), order 1234567890, 12,500 seats.";
        let r = redact(text);
        assert_eq!(r.text, text);
        assert_eq!(r.replacements, 0);
    }

    #[test]
    fn common_phone_layouts_are_scrubbed() {
        let r = redact("Call 415-555-0134, 415.555.0134 or +44 20 7946 0958.");
        assert_eq!(r.text, "Call [phone], [phone] or [phone].");
        assert_eq!(r.replacements, 3);
    }
}
