//! Metric-name sanitization.

/// Whitespace class collapsed by [`sanitize`]: space, tab, newline, vertical tab,
/// form feed and carriage return.
#[inline]
fn is_collapsible_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\x0B' | '\x0C' | '\r')
}

/// Sanitizes a metric name segment.
///
/// Every run of one or more whitespace characters becomes a single `-`. If the
/// input contains a double or single quote, embedded double quotes are escaped
/// as `\"`. Single quotes are never escaped.
///
/// ```
/// use span_reporter::sanitize;
///
/// assert_eq!(sanitize("my service name"), "my-service-name");
/// assert_eq!(sanitize("has \"quotes\""), "has-\\\"quotes\\\"");
/// ```
pub fn sanitize(s: &str) -> String {
    let escape_quotes = s.contains('"') || s.contains('\'');
    let mut out = String::with_capacity(s.len());
    let mut in_whitespace = false;

    for c in s.chars() {
        if is_collapsible_whitespace(c) {
            if !in_whitespace {
                out.push('-');
                in_whitespace = true;
            }
            continue;
        }
        in_whitespace = false;
        if escape_quotes && c == '"' {
            out.push('\\');
        }
        out.push(c);
    }

    out
}
