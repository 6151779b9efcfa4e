//! Filter expression helpers for LanceDB's SQL-like predicates.
//!
//! Unquoted identifiers are folded to lower case by the query engine, so
//! camelCase columns must be wrapped in backticks to resolve.

use crate::vector::table::{CASE_SENSITIVE_COLUMNS, COL_FILE_PATH};

/// Wrap known camelCase column names in backticks. String literals and
/// already-quoted identifiers are left untouched.
pub fn quote_identifiers(filter: &str) -> String {
    let mut output = String::with_capacity(filter.len() + 8);
    let mut chars = filter.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                output.push(c);
                // Copy through the closing quote; doubled quotes are escapes
                // and simply reopen the literal on the next iteration.
                for inner in chars.by_ref() {
                    output.push(inner);
                    if inner == c {
                        break;
                    }
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if CASE_SENSITIVE_COLUMNS.contains(&word.as_str()) {
                    output.push('`');
                    output.push_str(&word);
                    output.push('`');
                } else {
                    output.push_str(&word);
                }
            }
            c => output.push(c),
        }
    }

    output
}

/// Quote a value as a SQL string literal.
pub fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Predicate matching every record stored for one source file.
pub fn file_path_equals(path: &str) -> String {
    format!("{COL_FILE_PATH} = {}", string_literal(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_camel_case_columns() {
        assert_eq!(quote_identifiers("filePath = 'a.ts'"), "`filePath` = 'a.ts'");
        assert_eq!(
            quote_identifiers("symbolKind = 'fn' AND startLine > 10"),
            "`symbolKind` = 'fn' AND `startLine` > 10"
        );
    }

    #[test]
    fn leaves_literals_and_quoted_names_alone() {
        assert_eq!(
            quote_identifiers("`filePath` = 'filePath'"),
            "`filePath` = 'filePath'"
        );
        assert_eq!(
            quote_identifiers("text = 'it''s filePath'"),
            "text = 'it''s filePath'"
        );
    }

    #[test]
    fn ignores_partial_matches_and_plain_columns() {
        assert_eq!(
            quote_identifiers("id = 'x' OR filePathx = 1"),
            "id = 'x' OR filePathx = 1"
        );
        assert_eq!(quote_identifiers("kind IN ('code')"), "kind IN ('code')");
    }

    #[test]
    fn escapes_string_literals() {
        assert_eq!(string_literal("o'neil.rs"), "'o''neil.rs'");
    }

    #[test]
    fn file_path_predicate_survives_quoting() {
        let predicate = file_path_equals("src/it's.rs");
        assert_eq!(predicate, "filePath = 'src/it''s.rs'");
        assert_eq!(quote_identifiers(&predicate), "`filePath` = 'src/it''s.rs'");
    }
}
