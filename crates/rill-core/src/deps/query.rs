//! Template placeholder handling for query cells.
//!
//! Query cells reference notebook variables with `{name}` placeholders,
//! where `name` is a word-character run.

use std::collections::BTreeSet;

/// Every distinct placeholder name referenced by the query.
pub fn extract_query(sql: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    scan(sql, |name, _| {
        names.insert(name.to_string());
    });
    names
}

/// Rewrite placeholders to positional parameter markers (`$1`, `$2`, …).
///
/// Repeated occurrences of the same name share one parameter index. Returns
/// the rewritten SQL and the parameter names in index order.
pub fn rewrite_placeholders(sql: &str) -> (String, Vec<String>) {
    let mut params: Vec<String> = Vec::new();
    let mut rewritten = String::with_capacity(sql.len());
    let mut last = 0;
    scan(sql, |name, span| {
        rewritten.push_str(&sql[last..span.0]);
        let index = match params.iter().position(|p| p == name) {
            Some(index) => index,
            None => {
                params.push(name.to_string());
                params.len() - 1
            }
        };
        rewritten.push('$');
        rewritten.push_str(&(index + 1).to_string());
        last = span.1;
    });
    rewritten.push_str(&sql[last..]);
    (rewritten, params)
}

/// Call `f(name, (start, end))` for each `{name}` occurrence, byte spans
/// covering the braces.
fn scan(sql: &str, mut f: impl FnMut(&str, (usize, usize))) {
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                end += 1;
            }
            if end > start && end < bytes.len() && bytes[end] == b'}' {
                f(&sql[start..end], (i, end + 1));
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_distinct_placeholders() {
        let names = extract_query("SELECT * FROM users WHERE id = {user_id} AND org = {org}");
        assert_eq!(
            names,
            BTreeSet::from(["user_id".to_string(), "org".to_string()])
        );
    }

    #[test]
    fn test_repeated_placeholder_counted_once() {
        let names = extract_query("SELECT {a}, {a}");
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_non_placeholder_braces_ignored() {
        assert!(extract_query("SELECT '{not a placeholder!}'").is_empty());
        assert!(extract_query("SELECT '{}'").is_empty());
    }

    #[test]
    fn test_rewrite_to_positional_markers() {
        let (sql, params) = rewrite_placeholders("SELECT {user_id} AS id");
        assert_eq!(sql, "SELECT $1 AS id");
        assert_eq!(params, vec!["user_id"]);
    }

    #[test]
    fn test_repeated_name_shares_index() {
        let (sql, params) = rewrite_placeholders("SELECT {a}, {b}, {a}");
        assert_eq!(sql, "SELECT $1, $2, $1");
        assert_eq!(params, vec!["a", "b"]);
    }

    #[test]
    fn test_rewrite_without_placeholders_is_identity() {
        let (sql, params) = rewrite_placeholders("SELECT 1");
        assert_eq!(sql, "SELECT 1");
        assert!(params.is_empty());
    }
}
