//! Path dispatcher: resolves request paths to registered handlers and
//! synthesizes the default responses (spec.md section 4.4).
//!
//! Grounded on `h3zero_common.c::h3zero_find_path_item` (prefix match, first
//! hit wins) and `h3zero_process_request_frame`'s GET/POST default-response
//! branches. The welcome page and POST-ack template are carried over
//! byte-for-byte from `h3zero_server_default_page` /
//! `h3zero_server_post_response_page` per spec.md section 6.

use crate::headers::ContentType;
use std::path::{Path, PathBuf};

/// Byte-for-byte copy of `h3zero_server_default_page`.
pub const DEFAULT_PAGE: &str = "\
<!DOCTYPE HTML PUBLIC \"-//IETF//DTD HTML 2.0//EN\">\r\n<HTML>\r\n<HEAD>\r\n<TITLE>\
Picoquic HTTP 3 service\
</TITLE>\r\n</HEAD><BODY>\r\n\
<h1>Simple HTTP 3 Responder</h1>\r\n\
<p>GET / or GET /index.html returns this text</p>\r\n\
<p>Get /NNNNN returns txt document of length NNNNN bytes(decimal)</p>\r\n\
<p>Any other command will result in an error, and an empty response.</p>\r\n\
<h1>Enjoy!</h1>\r\n\
</BODY></HTML>\r\n";

/// Byte-for-byte copy of `h3zero_server_post_response_page`, `%d` substituted
/// with the received byte count the way `picoquic_sprintf` would.
pub fn post_response_page(received_bytes: u64) -> String {
    format!(
        "\
<!DOCTYPE HTML PUBLIC \"-//IETF//DTD HTML 2.0//EN\">\r\n<HTML>\r\n<HEAD>\r\n<TITLE>\
Picoquic POST Response\
</TITLE>\r\n</HEAD><BODY>\r\n\
<h1>POST successful</h1>\r\n\
<p>Received {received_bytes} bytes.\r\n\
</BODY></HTML>\r\n"
    )
}

pub struct PathEntry<H> {
    pub path: Vec<u8>,
    pub handler: H,
}

#[derive(Default)]
pub struct PathTable<H> {
    entries: Vec<PathEntry<H>>,
}

impl<H> PathTable<H> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn register(&mut self, path: impl Into<Vec<u8>>, handler: H) {
        self.entries.push(PathEntry { path: path.into(), handler });
    }

    /// Prefix match on the request path: the first entry whose `path` is a
    /// byte-wise prefix of `request_path` wins.
    pub fn find(&self, request_path: &[u8]) -> Option<&H> {
        self.entries
            .iter()
            .find(|e| request_path.len() >= e.path.len() && request_path.starts_with(&e.path))
            .map(|e| &e.handler)
    }
}

/// The outcome of resolving a GET request, with or without a configured web
/// folder (spec.md section 3: "optional web-folder path"; section 4.5.1:
/// GET resolves to a file under that folder, the synthetic welcome page, an
/// echo, or a miss).
pub enum GetOutcome {
    WelcomePage,
    /// A file under the configured web folder; `len` is its size on disk so
    /// the caller can decide whether to inline it or stream it.
    File { path: PathBuf, len: u64 },
    Echo { length: u64 },
    NotFound,
}

/// Parses a request path the way `h3zero_server_parse_path` does: first try
/// to resolve it to a file under `web_folder` (if one is configured), then
/// fall back to the synthetic defaults: `/` and `/index.html` map to the
/// welcome page; `/NNNNN` (all-decimal-digit) maps to an echo of that many
/// bytes; anything else misses.
pub fn resolve_get(path: &[u8], web_folder: Option<&Path>) -> GetOutcome {
    if let Some(folder) = web_folder {
        if let Some(outcome) = resolve_file(folder, path) {
            return outcome;
        }
    }
    resolve_default_get(path)
}

/// Resolves `path` against `folder`, rejecting traversal outside it.
/// Returns `None` (not a miss) when there's no on-disk match, so the caller
/// falls through to the synthetic defaults.
fn resolve_file(folder: &Path, path: &[u8]) -> Option<GetOutcome> {
    let relative = std::str::from_utf8(path).ok()?.trim_start_matches('/');
    if relative.is_empty() || relative.contains("..") {
        return None;
    }

    let candidate = folder.join(relative);
    let metadata = std::fs::metadata(&candidate).ok()?;
    if !metadata.is_file() {
        return None;
    }

    Some(GetOutcome::File { path: candidate, len: metadata.len() })
}

/// Content-type for a file served from the web folder, guessed from its
/// extension since this endpoint carries no MIME database.
pub fn content_type_for_path(path: &Path) -> ContentType {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") | Some("htm") => ContentType::TextHtml,
        _ => ContentType::TextPlain,
    }
}

fn resolve_default_get(path: &[u8]) -> GetOutcome {
    if path == b"/" || path == b"/index.html" {
        return GetOutcome::WelcomePage;
    }

    if let Some(digits) = path.strip_prefix(b"/") {
        if !digits.is_empty() && digits.iter().all(u8::is_ascii_digit) {
            if let Ok(text) = std::str::from_utf8(digits) {
                if let Ok(length) = text.parse::<u64>() {
                    return GetOutcome::Echo { length };
                }
            }
        }
    }

    GetOutcome::NotFound
}

/// Content-type for a GET response resolved with no registered handler and
/// no web-folder hit, per spec.md section 9's resolution of the open
/// question: default to `text/html` unless the GET resolved to an echo
/// body, which is always `text/plain`.
pub fn get_content_type(outcome: &GetOutcome) -> ContentType {
    match outcome {
        GetOutcome::WelcomePage | GetOutcome::NotFound => ContentType::TextHtml,
        GetOutcome::Echo { .. } => ContentType::TextPlain,
        GetOutcome::File { path, .. } => content_type_for_path(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_and_index_resolve_to_welcome_page() {
        assert!(matches!(resolve_default_get(b"/"), GetOutcome::WelcomePage));
        assert!(matches!(resolve_default_get(b"/index.html"), GetOutcome::WelcomePage));
    }

    #[test]
    fn numeric_path_resolves_to_echo_of_that_length() {
        match resolve_default_get(b"/1234") {
            GetOutcome::Echo { length } => assert_eq!(length, 1234),
            _ => panic!("expected echo"),
        }
    }

    #[test]
    fn non_numeric_unknown_path_is_not_found() {
        assert!(matches!(resolve_default_get(b"/does-not-exist"), GetOutcome::NotFound));
    }

    #[test]
    fn web_folder_hit_takes_priority_over_synthetic_defaults() {
        let dir = std::env::temp_dir().join(format!("h3relay-dispatcher-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("1234"), b"not an echo, an actual file").unwrap();

        match resolve_get(b"/1234", Some(&dir)) {
            GetOutcome::File { len, .. } => assert_eq!(len, 27),
            _ => panic!("expected a file hit"),
        }

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn web_folder_rejects_path_traversal() {
        let dir = std::env::temp_dir();
        assert!(!matches!(resolve_get(b"/../etc/passwd", Some(&dir)), GetOutcome::File { .. }));
    }

    #[test]
    fn path_table_prefix_match_picks_first_hit() {
        let mut table = PathTable::new();
        table.register("/a", "first");
        table.register("/a/b", "second");
        assert_eq!(table.find(b"/a/b/c"), Some(&"first"));
    }

    #[test]
    fn post_response_page_embeds_byte_count() {
        let page = post_response_page(5);
        assert!(page.contains("Received 5 bytes."));
    }

    #[test]
    fn default_page_matches_reference_byte_for_byte() {
        assert!(DEFAULT_PAGE.starts_with("<!DOCTYPE HTML PUBLIC \"-//IETF//DTD HTML 2.0//EN\">\r\n"));
        assert!(DEFAULT_PAGE.ends_with("</BODY></HTML>\r\n"));
        assert!(DEFAULT_PAGE.contains("<h1>Simple HTTP 3 Responder</h1>"));
    }
}
