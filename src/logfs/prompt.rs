//! This module implements prompting.

use std::fmt;
use std::io;
use std::io::BufRead;
use std::io::Write;

/// Show a prompt, then read one line from standard input.
///
/// `text` is the prompt's text.
///
/// If standard input cannot be read or reaches end-of-file, the function
/// returns `None`.
pub fn prompt<T: fmt::Display>(text: T) -> Option<String> {
    print!("{text}");
    let _ = io::stdout().flush();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches('\n').to_owned()),
    }
}
