//! Shell quoting and argument splitting
//!
//! Remote commands travel to the far side as a single string that the
//! remote shell re-parses, so everything embedded in it has to be quoted.

use crate::error::{Result, TransportError};

/// Escapes a string for use inside a single-quoted shell context.
///
/// Replaces single quotes with `'"'"'`: end the quote, emit a literal quote
/// from a double-quoted string, reopen the quote.
///
/// # Examples
///
/// ```
/// use ssh_transport::ssh::sanitize::escape_for_shell;
///
/// assert_eq!(escape_for_shell("hello"), "hello");
/// assert_eq!(escape_for_shell("it's"), "it'\"'\"'s");
/// ```
pub fn escape_for_shell(s: &str) -> String {
    s.replace('\'', "'\"'\"'")
}

/// Quotes a string as a single shell word.
///
/// Words made only of characters the shell never interprets are returned
/// as-is; anything else is wrapped in single quotes.
///
/// # Examples
///
/// ```
/// use ssh_transport::ssh::sanitize::shell_quote;
///
/// assert_eq!(shell_quote("/tmp/file.txt"), "/tmp/file.txt");
/// assert_eq!(shell_quote("echo hi"), "'echo hi'");
/// assert_eq!(shell_quote(""), "''");
/// ```
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }

    let safe = s
        .chars()
        .all(|c| c.is_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", escape_for_shell(s))
    }
}

/// Splits a string into words following POSIX shell quoting rules.
///
/// Used for the extra client arguments override. Empty words are dropped.
pub fn split_args(input: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(unterminated(input)),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('\\' | '"' | '$' | '`')) => current.push(ch),
                            Some('\n') => {}
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => return Err(unterminated(input)),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(unterminated(input)),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some('\n') => {}
                    Some(ch) => current.push(ch),
                    None => current.push('\\'),
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        words.push(current);
    }

    Ok(words
        .into_iter()
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
        .collect())
}

fn unterminated(input: &str) -> TransportError {
    TransportError::config(format!("unterminated quote in ssh args: {}", input))
}
