//! Exhaustive paginated scanning.
//!
//! Used for existence checks against listings that offer no server-side
//! filter on the attribute being matched: walk the token-paged stream
//! until something matches (short-circuiting immediately) or the stream
//! ends.

use std::future::Future;

use tracing::debug;

use crate::remote::{Page, RemoteFailure};

/// Walk a paginated listing until `matches` accepts an item or the token
/// stream ends.
///
/// Returns the first matching item; `None` means the full listing was
/// scanned without a match. No pages are fetched after the first match.
pub async fn scan_all<T, F, Fut, P>(
    mut fetch_page: F,
    matches: P,
) -> std::result::Result<Option<T>, RemoteFailure>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = std::result::Result<Page<T>, RemoteFailure>>,
    P: Fn(&T) -> bool,
{
    let mut token: Option<String> = None;
    let mut pages = 0u32;

    loop {
        let Page { items, next_token } = fetch_page(token.take()).await?;
        pages = pages.saturating_add(1);

        if let Some(found) = items.into_iter().find(|item| matches(item)) {
            debug!(pages, "scan matched");
            return Ok(Some(found));
        }

        match next_token {
            Some(next) => token = Some(next),
            None => {
                debug!(pages, "scan exhausted listing without a match");
                return Ok(None);
            }
        }
    }
}
