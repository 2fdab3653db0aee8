//! Static file serving for the development server.

use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use mime_guess::MimeGuess;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{ServeState, LIVERELOAD_PATH};

/// Script added to every HTML page. Reloads the page on `reload` events and
/// swaps matching stylesheets on `inject` events.
pub fn client_script() -> String {
    format!(
        concat!(
            "<script>(function(){{",
            "var s=new EventSource(\"{}\");",
            "s.addEventListener(\"reload\",function(){{location.reload();}});",
            "s.addEventListener(\"inject\",function(e){{",
            "var changed=JSON.parse(e.data);",
            "document.querySelectorAll('link[rel=\"stylesheet\"]').forEach(function(l){{",
            "var href=l.getAttribute(\"href\").split(\"?\")[0];",
            "if(changed.some(function(c){{return href.endsWith(c);}})){{",
            "l.href=href+\"?v=\"+Date.now();",
            "}}",
            "}});",
            "}});",
            "}})();</script>"
        ),
        LIVERELOAD_PATH
    )
}

/// Insert the live-reload client before the last `</body>`, or append it.
pub fn inject_client(html: &str) -> String {
    let script = client_script();
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(at) => format!("{}{}{}", &html[..at], script, &html[at..]),
        None => format!("{}{}", html, script),
    }
}

// Every `%` must start a two-digit hex escape.
fn escapes_are_valid(path: &str) -> bool {
    path.split('%')
        .skip(1)
        .all(|rest| rest.len() >= 2 && rest.as_bytes()[..2].iter().all(u8::is_ascii_hexdigit))
}

/// Map a request path onto a file below `root`.
///
/// Returns `None` for paths that would leave the root.
pub fn resolve_request_path(root: &Path, request: &str) -> Option<PathBuf> {
    if !escapes_are_valid(request) {
        return None;
    }
    let decoded = urlencoding::decode(request).ok()?;
    let mut path = root.to_path_buf();
    for component in decoded.split('/') {
        match component {
            "" | "." => {}
            ".." => return None,
            c if c.contains('\\') || c.contains(':') => return None,
            c => path.push(c),
        }
    }
    Some(path)
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

pub(super) async fn serve_static(State(state): State<ServeState>, uri: Uri) -> Response {
    let Some(mut path) = resolve_request_path(&state.root, uri.path()) else {
        debug!(path = uri.path(), "rejected request outside the served root");
        return not_found();
    };
    if tokio::fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
        path.push("index.html");
    }

    let Ok(contents) = tokio::fs::read(&path).await else {
        return not_found();
    };
    let mime = MimeGuess::from_path(&path).first_or_octet_stream();
    let headers = [
        (header::CONTENT_TYPE, mime.to_string()),
        (header::CACHE_CONTROL, "no-cache".to_string()),
    ];

    if mime.subtype() == mime_guess::mime::HTML {
        let html = String::from_utf8_lossy(&contents);
        return (StatusCode::OK, headers, inject_client(&html)).into_response();
    }
    (StatusCode::OK, headers, contents).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_request_path() {
        let root = Path::new("/srv/dist");
        assert_eq!(resolve_request_path(root, "/"), Some(PathBuf::from("/srv/dist")));
        assert_eq!(
            resolve_request_path(root, "/stylesheets/main.min.css"),
            Some(PathBuf::from("/srv/dist/stylesheets/main.min.css"))
        );
        assert_eq!(
            resolve_request_path(root, "/a%20b.html"),
            Some(PathBuf::from("/srv/dist/a b.html"))
        );
        assert_eq!(resolve_request_path(root, "/./x//y"), Some(PathBuf::from("/srv/dist/x/y")));
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let root = Path::new("/srv/dist");
        assert_eq!(resolve_request_path(root, "/../etc/passwd"), None);
        assert_eq!(resolve_request_path(root, "/a/%2e%2e/%2e%2e/x"), None);
        assert_eq!(resolve_request_path(root, "/a%5c..%5cb"), None);
        assert_eq!(resolve_request_path(root, "/bad%zz"), None);
        assert_eq!(resolve_request_path(root, "/short%2"), None);
        assert_eq!(resolve_request_path(root, "/latin%e9"), None);
    }

    #[test]
    fn test_inject_client() {
        let html = inject_client("<html><BODY><p>x</p></BODY></html>");
        assert!(html.starts_with("<html><BODY><p>x</p><script>"));
        assert!(html.ends_with("</script></BODY></html>"));
        assert!(html.contains(LIVERELOAD_PATH));

        let fragment = inject_client("<p>x</p>");
        assert!(fragment.starts_with("<p>x</p><script>"));
    }
}
