//! Avatar video requests
//!
//! Each assistant reply is rendered into a signing-avatar video by the
//! gesture service. Requests are fire and forget: the conversation
//! never waits on rendering, and whichever render finishes last is the
//! one displayed.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::gesture::GestureService;

/// Requests avatar videos and publishes the current asset URL.
///
/// The URL carries a cache-busting token so a re-render of identical
/// text still refreshes the player. A failed render leaves the previous
/// asset in place. Concurrent renders are allowed; completions apply in
/// arrival order (last arrival wins), never cancelling one another.
pub struct AvatarVideoRequester {
    service: Arc<dyn GestureService>,
    asset_tx: watch::Sender<Option<String>>,
}

impl AvatarVideoRequester {
    #[must_use]
    pub fn new(service: Arc<dyn GestureService>) -> Self {
        let (asset_tx, _) = watch::channel(None);
        Self { service, asset_tx }
    }

    /// Subscribe to the current video asset URL
    #[must_use]
    pub fn asset_url(&self) -> watch::Receiver<Option<String>> {
        self.asset_tx.subscribe()
    }

    /// Request a render of `text`. Blank text is a no-op (`None`).
    ///
    /// Returns the handle of the spawned render job; the caller may
    /// drop it (fire and forget) or await it.
    pub fn request(&self, text: &str) -> Option<JoinHandle<()>> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let service = Arc::clone(&self.service);
        let asset_tx = self.asset_tx.clone();
        let sentence = text.to_string();

        Some(tokio::spawn(async move {
            match service.generate_video(&sentence).await {
                Ok(url) => {
                    let busted = cache_bust(&url);
                    tracing::debug!(url = %busted, "avatar video ready");
                    // send_replace stores the value even with no subscribers yet
                    asset_tx.send_replace(Some(busted));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "avatar video request failed");
                }
            }
        }))
    }
}

/// Append a timestamp token so identical URLs still refresh the player
fn cache_bust(url: &str) -> String {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis());
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}t={stamp}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::GesturePrediction;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Renders by popping scripted outcomes in order
    struct ScriptedRenderer {
        outcomes: StdMutex<Vec<Result<String>>>,
    }

    impl ScriptedRenderer {
        fn new(outcomes: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: StdMutex::new(outcomes),
            })
        }
    }

    #[async_trait]
    impl GestureService for ScriptedRenderer {
        async fn start_camera(&self) -> Result<()> {
            unreachable!()
        }

        async fn stop_camera(&self) -> Result<()> {
            unreachable!()
        }

        async fn predict(&self) -> Result<GesturePrediction> {
            unreachable!()
        }

        async fn reset(&self) -> Result<()> {
            unreachable!()
        }

        async fn generate_video(&self, _sentence: &str) -> Result<String> {
            self.outcomes.lock().unwrap().remove(0)
        }
    }

    #[tokio::test]
    async fn publishes_url_with_cache_token() {
        let renderer =
            ScriptedRenderer::new(vec![Ok("http://host/v/clip.mp4".to_string())]);
        let requester = AvatarVideoRequester::new(renderer);
        let asset = requester.asset_url();

        requester.request("hello there").unwrap().await.unwrap();

        let url = asset.borrow().clone().unwrap();
        assert!(url.starts_with("http://host/v/clip.mp4?t="));
    }

    #[tokio::test]
    async fn asset_is_visible_without_a_prior_subscription() {
        let renderer =
            ScriptedRenderer::new(vec![Ok("http://h/v/late.mp4".to_string())]);
        let requester = AvatarVideoRequester::new(renderer);

        requester.request("hello").unwrap().await.unwrap();

        // First subscription happens after the render completed
        let url = requester.asset_url().borrow().clone().unwrap();
        assert!(url.starts_with("http://h/v/late.mp4?t="));
    }

    #[tokio::test]
    async fn cache_token_appends_to_existing_query() {
        assert!(cache_bust("http://h/v?id=1").starts_with("http://h/v?id=1&t="));
    }

    #[tokio::test]
    async fn blank_text_is_a_no_op() {
        let renderer = ScriptedRenderer::new(vec![]);
        let requester = AvatarVideoRequester::new(renderer);

        assert!(requester.request("   ").is_none());
        assert_eq!(*requester.asset_url().borrow(), None);
    }

    #[tokio::test]
    async fn failure_keeps_previous_asset() {
        let renderer = ScriptedRenderer::new(vec![
            Ok("http://h/v/first.mp4".to_string()),
            Err(Error::Video("render crashed".to_string())),
        ]);
        let requester = AvatarVideoRequester::new(renderer);
        let asset = requester.asset_url();

        requester.request("one").unwrap().await.unwrap();
        let first = asset.borrow().clone().unwrap();

        requester.request("two").unwrap().await.unwrap();
        assert_eq!(asset.borrow().clone().unwrap(), first);
    }

    #[tokio::test]
    async fn later_arrival_wins() {
        let renderer = ScriptedRenderer::new(vec![
            Ok("http://h/v/a.mp4".to_string()),
            Ok("http://h/v/b.mp4".to_string()),
        ]);
        let requester = AvatarVideoRequester::new(renderer);
        let asset = requester.asset_url();

        let first = requester.request("a").unwrap();
        let second = requester.request("b").unwrap();
        first.await.unwrap();
        second.await.unwrap();

        assert!(asset.borrow().clone().unwrap().contains("b.mp4"));
    }
}
