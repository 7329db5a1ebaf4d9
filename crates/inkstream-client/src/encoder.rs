//! Request encoder: one chat turn becomes one `GET` URL.

use inkstream_models::ChatRequest;
use url::Url;

use crate::error::Result;

/// Endpoint path, resolved relative to the server base URL.
pub const CHAT_PATH: &str = "api/chat";

/// Build the streaming URL for `request`.
///
/// `request.history` must hold the turns before this one; the server appends
/// the new user message itself. Empty image and history lists are left out of
/// the query string.
pub fn encode_request(base_url: &Url, request: &ChatRequest) -> Result<Url> {
    let mut url = base_url.join(CHAT_PATH)?;
    let query = request.to_query()?;

    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        if let Some(message) = &query.message {
            pairs.append_pair("message", message);
        }
        if let Some(images) = &query.images {
            pairs.append_pair("images", images);
        }
        if let Some(history) = &query.history {
            pairs.append_pair("history", history);
        }
    }

    Ok(url)
}
