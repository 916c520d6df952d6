//! Textual placeholder substitution applied to request bodies and header
//! values before every request.
//!
//! Supported placeholders: `{{uuid}}`, `{{timestamp}}`, `{{random:N}}`,
//! `{{random_string:N}}`, `{{date:FORMAT}}`. Unknown placeholders are left
//! verbatim rather than treated as an error, so a body containing literal
//! `{{` text unrelated to this vocabulary is not corrupted.

use chrono::Utc;
use rand::Rng;

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Apply every recognized `{{...}}` placeholder in `input`, returning a new
/// string. A fresh value is generated for every occurrence.
pub fn substitute(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    loop {
        let Some(start) = rest.find("{{") else {
            out.push_str(rest);
            break;
        };
        let Some(end_rel) = rest[start..].find("}}") else {
            // Unterminated placeholder marker — emit the rest verbatim.
            out.push_str(rest);
            break;
        };
        let end = start + end_rel;
        out.push_str(&rest[..start]);

        let placeholder = &rest[start + 2..end];
        match render_placeholder(placeholder) {
            Some(value) => out.push_str(&value),
            None => {
                // Unknown placeholder: leave it exactly as written.
                out.push_str("{{");
                out.push_str(placeholder);
                out.push_str("}}");
            }
        }

        rest = &rest[end + 2..];
    }

    out
}

fn render_placeholder(name: &str) -> Option<String> {
    if name == "uuid" {
        return Some(uuid::Uuid::new_v4().to_string());
    }
    if name == "timestamp" {
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        return Some(secs.to_string());
    }
    if let Some(n_str) = name.strip_prefix("random:") {
        let n: u64 = n_str.trim().parse().ok()?;
        if n == 0 {
            return Some("0".to_string());
        }
        let mut rng = rand::thread_rng();
        return Some(rng.gen_range(0..n).to_string());
    }
    if let Some(n_str) = name.strip_prefix("random_string:") {
        let n: usize = n_str.trim().parse().ok()?;
        let mut rng = rand::thread_rng();
        let s: String = (0..n)
            .map(|_| ALPHANUMERIC[rng.gen_range(0..ALPHANUMERIC.len())] as char)
            .collect();
        return Some(s);
    }
    if let Some(fmt) = name.strip_prefix("date:") {
        return Some(Utc::now().format(fmt).to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_plain_text_untouched() {
        assert_eq!(substitute("hello world"), "hello world");
    }

    #[test]
    fn unknown_placeholder_is_left_verbatim() {
        assert_eq!(substitute("{{not_a_thing}}"), "{{not_a_thing}}");
    }

    #[test]
    fn uuid_placeholder_expands_to_a_valid_uuid() {
        let out = substitute("id={{uuid}}");
        let id = out.strip_prefix("id=").unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[test]
    fn timestamp_placeholder_expands_to_digits() {
        let out = substitute("{{timestamp}}");
        assert!(!out.is_empty());
        assert!(out.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn random_n_is_within_bounds() {
        for _ in 0..20 {
            let out = substitute("{{random:10}}");
            let n: u64 = out.parse().unwrap();
            assert!(n < 10);
        }
    }

    #[test]
    fn random_string_has_requested_length() {
        let out = substitute("{{random_string:16}}");
        assert_eq!(out.len(), 16);
        assert!(out.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn date_placeholder_uses_the_given_format() {
        let out = substitute("{{date:%Y}}");
        assert_eq!(out.len(), 4);
        assert!(out.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn multiple_placeholders_each_get_fresh_values() {
        let out = substitute("{{uuid}}-{{uuid}}");
        let mut parts = out.split('-');
        let a = parts.next().unwrap();
        let b = parts.next().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn unterminated_placeholder_is_emitted_verbatim() {
        assert_eq!(substitute("a {{uuid b"), "a {{uuid b");
    }
}
