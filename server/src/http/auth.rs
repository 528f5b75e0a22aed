use axum::{
    extract::{Request, State},
    http::{HeaderName, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use api::UPLOAD_PATH;

// user auth information passed in from middleware to the axum extractors,
// attached to the request via an extension with this type
#[derive(Clone, Debug)]
pub struct CurrentUser {
    pub uid: String,
}

// authentication via reverse proxy
//
// the proxy in front of darkroom authenticates the user and passes the uid
// along in a header; requests without it never reach a handler
#[derive(Clone, Debug)]
pub struct ProxyAuthData {
    pub header_key: HeaderName,
}

pub async fn proxy_auth(
    State(state): State<ProxyAuthData>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // attempt to unpack the auth header, returning None if we cannot convert to a str
    let header_val = req
        .headers()
        .get(&state.header_key)
        .and_then(|header| header.to_str().ok())
        .map(str::trim)
        .filter(|val| !val.is_empty());

    let header_val = match header_val {
        Some(val) => val,
        None => {
            debug!({ path = %req.uri().path() }, "missing user header");
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    let user = CurrentUser {
        uid: header_val.to_owned(),
    };

    // if auth succeeds, pass CurrentUser as a request extension to handlers
    req.extensions_mut().insert(user);

    // then, continue on in the tower of middleware
    Ok(next.run(req).await)
}

// stored files are public, but anything hidden in the upload directory (the
// staging files of in-flight uploads, say) is not
pub fn is_hidden_upload(path: &str) -> bool {
    let Some(rest) = path.strip_prefix(UPLOAD_PATH) else {
        return false;
    };

    rest.split('/').any(|segment| {
        let segment = segment.to_ascii_lowercase();
        segment.starts_with('.') || segment.starts_with("%2e")
    })
}

pub async fn hide_dotfiles(req: Request, next: Next) -> Result<Response, StatusCode> {
    if is_hidden_upload(req.uri().path()) {
        debug!({ path = %req.uri().path() }, "refusing hidden upload path");
        return Err(StatusCode::NOT_FOUND);
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_uploads_are_recognised() {
        assert!(is_hidden_upload("/uploads/.staging_1712345678901234567"));
        assert!(is_hidden_upload("/uploads/%2Estaging_1"));
        assert!(is_hidden_upload("/uploads/sub/.hidden"));

        assert!(!is_hidden_upload("/uploads/1712345678_deadbeef.jpg"));
        assert!(!is_hidden_upload("/uploads/thumb_1712345678_deadbeef.jpg"));
        assert!(!is_hidden_upload("/api/photos"));
        assert!(!is_hidden_upload("/.well-known/x"));
    }
}
