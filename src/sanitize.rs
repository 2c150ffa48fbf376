//! Secret redaction shared by the error normalizer and the base
//! transport's debug logging.

use std::collections::HashMap;

/// Headers whose values are never logged or stored in the clear.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "x-api-key",
    "api-key",
    "x-auth-token",
    "auth-token",
    "anthropic-version",
];

pub fn is_sensitive_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SENSITIVE_HEADERS.contains(&lower.as_str()) || lower.ends_with("-version")
}

/// Redact every sensitive header's value, preserving order and case of keys.
pub fn sanitize_headers<'a>(
    headers: impl Iterator<Item = (&'a str, &'a str)>,
) -> HashMap<String, String> {
    headers
        .map(|(k, v)| {
            if is_sensitive_header(k) {
                (k.to_string(), "[REDACTED]".to_string())
            } else {
                (k.to_string(), v.to_string())
            }
        })
        .collect()
}

/// Redact bearer tokens, `sk-...`-style API keys, and `api-key=`/`x-api-key:`/
/// `authorization:` value pairs that appear inline in a free-text message.
pub fn sanitize_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut rest = message;

    loop {
        let Some((prefix, matched, consumed)) = find_next_secret(rest) else {
            out.push_str(rest);
            break;
        };
        out.push_str(prefix);
        out.push_str(matched);
        rest = &rest[consumed..];
    }

    out
}

/// Find the next secret-shaped span in `text`. Returns
/// `(text_before, redacted_replacement, bytes_consumed_from_text_start)`.
fn find_next_secret(text: &str) -> Option<(&str, &'static str, usize)> {
    let patterns: &[(&str, bool)] = &[
        ("bearer ", true),
        ("sk-", false),
        ("api-key=", true),
        ("x-api-key:", true),
        ("x-api-key=", true),
        ("authorization:", true),
        ("authorization=", true),
    ];

    let lower = text.to_ascii_lowercase();
    let mut best: Option<(usize, usize, bool)> = None;

    for (pat, has_value_separator) in patterns {
        if let Some(idx) = lower.find(pat) {
            if best.is_none_or(|(best_idx, _, _)| idx < best_idx) {
                best = Some((idx, pat.len(), *has_value_separator));
            }
        }
    }

    let (idx, pat_len, has_value_separator) = best?;
    let prefix = &text[..idx];
    let after_pat = idx + pat_len;
    let value_start = after_pat + skip_spaces(&text[after_pat..]);

    let mut value_end = token_end(&text[value_start..]);
    // `authorization: Basic dXNlcjpwYXNz` etc: a key-style pattern followed
    // by a scheme word is followed by the actual credential, which must be
    // redacted too rather than left dangling after only the scheme is hidden.
    if has_value_separator && is_auth_scheme(&text[value_start..value_start + value_end]) {
        let after_scheme = value_start + value_end;
        let gap = skip_spaces(&text[after_scheme..]);
        if gap > 0 {
            let credential_start = after_scheme + gap;
            let credential_end = token_end(&text[credential_start..]);
            if credential_end > 0 {
                value_end = (credential_start + credential_end) - value_start;
            }
        }
    }

    let consumed = value_start + value_end;
    Some((prefix, "[REDACTED]", consumed))
}

fn skip_spaces(text: &str) -> usize {
    text.char_indices()
        .find(|(_, c)| *c != ' ')
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

const AUTH_SCHEMES: &[&str] = &["bearer", "basic", "digest", "token", "hmac"];

fn is_auth_scheme(word: &str) -> bool {
    AUTH_SCHEMES.contains(&word.to_ascii_lowercase().as_str())
}

fn token_end(text: &str) -> usize {
    text.char_indices()
        .find(|(_, c)| c.is_whitespace() || matches!(c, ',' | ';' | '"' | '\''))
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_bearer_token() {
        let msg = "failed with Authorization: Bearer sk-ant-abc123xyz in header";
        let out = sanitize_message(msg);
        assert!(!out.contains("sk-ant-abc123xyz"));
    }

    #[test]
    fn redacts_raw_sk_key() {
        let msg = "invalid key sk-ant-REDACTED used";
        let out = sanitize_message(msg);
        assert!(!out.contains("verysecretvalue"));
    }

    #[test]
    fn redacts_api_key_query_param() {
        let msg = "request to https://api.example.com?api-key=topsecret failed";
        let out = sanitize_message(msg);
        assert!(!out.contains("topsecret"));
    }

    #[test]
    fn redacts_x_api_key_header_text() {
        let msg = "x-api-key: abcdef1234 rejected";
        let out = sanitize_message(msg);
        assert!(!out.contains("abcdef1234"));
    }

    #[test]
    fn redacts_basic_auth_credential_after_scheme_word() {
        let msg = "leaked Authorization: Basic dXNlcjpwYXNz in log";
        let out = sanitize_message(msg);
        assert!(!out.contains("dXNlcjpwYXNz"));
        assert!(out.contains("in log"));
    }

    #[test]
    fn leaves_unrelated_text_untouched() {
        let msg = "connection refused on port 443";
        assert_eq!(sanitize_message(msg), msg);
    }

    #[test]
    fn sanitize_headers_redacts_sensitive_set_case_insensitively() {
        let headers = vec![
            ("Authorization", "Bearer abc"),
            ("Content-Type", "application/json"),
            ("X-Api-Key", "secret"),
        ];
        let sanitized = sanitize_headers(headers.into_iter());
        assert_eq!(sanitized.get("Authorization").unwrap(), "[REDACTED]");
        assert_eq!(sanitized.get("X-Api-Key").unwrap(), "[REDACTED]");
        assert_eq!(sanitized.get("Content-Type").unwrap(), "application/json");
    }
}
