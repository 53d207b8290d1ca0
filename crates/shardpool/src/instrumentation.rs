//! Statement logging helpers.
//!
//! When statement logging is enabled, every delegated execute call is logged
//! at debug level with its bound parameters substituted into the SQL text.
//!
//! ## Fields
//!
//! - `connection_id`: Pool-unique connection id
//! - `operation`: Leading SQL keyword (SELECT, INSERT, ...)
//! - `sql`: SQL text with `?` placeholders replaced by bound values

use crate::hooks::LogParams;

/// Maximum length of SQL text written to the log.
pub const MAX_LOGGED_SQL_LEN: usize = 2048;

/// Substitute bound parameters into `sql` for logging.
///
/// Each `?` outside a quoted literal is replaced by the parameter bound at
/// the matching 1-based position. Placeholders with nothing bound are left
/// as `?`. The result is truncated to [`MAX_LOGGED_SQL_LEN`].
#[must_use]
pub fn fill_log_params(sql: &str, params: &LogParams) -> String {
    if params.is_empty() {
        return truncate_string(sql, MAX_LOGGED_SQL_LEN);
    }

    let mut result = String::with_capacity(sql.len() + params.len() * 8);
    let mut position = 0usize;
    let mut in_string = false;
    let mut string_char = ' ';

    for c in sql.chars() {
        if in_string {
            if c == string_char {
                in_string = false;
            }
            result.push(c);
            continue;
        }

        if c == '\'' || c == '"' {
            in_string = true;
            string_char = c;
            result.push(c);
            continue;
        }

        if c == '?' {
            position += 1;
            match params.get(&position) {
                Some(value) => result.push_str(&value.to_string()),
                None => result.push('?'),
            }
            continue;
        }

        result.push(c);
    }

    truncate_string(&result, MAX_LOGGED_SQL_LEN)
}

/// Truncate a string to at most `max_len` bytes, on a char boundary.
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len.saturating_sub(3);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Extract the operation type from a SQL statement.
#[must_use]
pub fn extract_operation(sql: &str) -> &'static str {
    let head: String = sql
        .trim_start()
        .chars()
        .take(10)
        .collect::<String>()
        .to_ascii_uppercase();

    const OPERATIONS: &[(&str, &str)] = &[
        ("SELECT", "SELECT"),
        ("INSERT", "INSERT"),
        ("UPDATE", "UPDATE"),
        ("DELETE", "DELETE"),
        ("MERGE", "MERGE"),
        ("CALL", "CALL"),
        ("{CALL", "CALL"),
        ("EXEC", "EXECUTE"),
        ("BEGIN", "BEGIN"),
        ("COMMIT", "COMMIT"),
        ("ROLLBACK", "ROLLBACK"),
        ("CREATE", "CREATE"),
        ("ALTER", "ALTER"),
        ("DROP", "DROP"),
    ];

    OPERATIONS
        .iter()
        .find(|(prefix, _)| head.starts_with(prefix))
        .map_or("OTHER", |(_, op)| op)
}
