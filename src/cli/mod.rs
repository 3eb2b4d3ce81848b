pub mod doctor;
pub mod grant;
pub mod ingest;
pub mod search;
pub mod stats;

use crate::knowledge::types::{Caller, Channel};

/// The local operator: `--login` if given, else `$USER`.
pub fn local_caller(login: Option<&str>) -> Caller {
    let login = login
        .map(String::from)
        .or_else(|| std::env::var("USER").ok())
        .filter(|l| !l.trim().is_empty());
    Caller {
        login,
        display_name: None,
        channel: Channel::Cli,
    }
}

/// First `max` characters of `content` on one line, with an ellipsis when cut.
pub(crate) fn preview(content: &str, max: usize) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}
