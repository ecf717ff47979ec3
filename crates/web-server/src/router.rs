//! Fixed route table.

/// Path of the WebSocket endpoint (without the leading slash).
pub const WS_PATH: &str = "ws";

const STATE_PATH: &str = "state";
const IMAGES_PREFIX: &str = "images/";

/// Destination of a plain (non-upgrade) GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `/` → cached index document.
    Index,
    /// `/state` → current snapshot as JSON.
    State,
    /// `/images/<name>` → map image.
    Image(String),
    /// Anything else → file under the web-asset root, or 404.
    Asset(String),
}

/// Maps a decoded path (leading `/` already stripped) to a route.
pub fn route(path: &str) -> Route {
    if path.is_empty() {
        return Route::Index;
    }
    if path.eq_ignore_ascii_case(STATE_PATH) {
        return Route::State;
    }
    match path.get(..IMAGES_PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(IMAGES_PREFIX) => {
            Route::Image(path[IMAGES_PREFIX.len()..].to_string())
        }
        _ => Route::Asset(path.to_string()),
    }
}

/// Returns `true` if `path` names the WebSocket endpoint.
pub fn is_ws_path(path: &str) -> bool {
    path.eq_ignore_ascii_case(WS_PATH)
}
