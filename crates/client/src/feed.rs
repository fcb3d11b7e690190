use chirp_backend::{
    ChatDocument, DocumentStore, FEED_WINDOW_LIMIT, FeedQuery, SnapshotSubscription,
    UnsubscribeHandle,
};
use snafu::ResultExt;

use super::error::{ClientResult, SubscribeSnafu};
use super::message::ChatMessage;

/// The most recent messages, oldest first, replaced wholesale on every update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedWindow {
    messages: Vec<ChatMessage>,
    limit: usize,
    revision: u64,
}

impl FeedWindow {
    pub fn new(limit: usize) -> Self {
        Self {
            messages: Vec::new(),
            limit,
            revision: 0,
        }
    }

    /// Installs `snapshot` as the whole window. Keeps the newest `limit`
    /// entries, stably sorted by send time.
    pub fn replace(&mut self, mut snapshot: Vec<ChatMessage>) {
        snapshot.sort_by_key(|message| message.sent_at_ms);
        if snapshot.len() > self.limit {
            let excess = snapshot.len() - self.limit;
            snapshot.drain(..excess);
        }
        self.messages = snapshot;
        self.revision = self.revision.wrapping_add(1);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.revision = self.revision.wrapping_add(1);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bumped on every replace or clear; views use it to detect new content.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

impl Default for FeedWindow {
    fn default() -> Self {
        Self::new(FEED_WINDOW_LIMIT)
    }
}

/// Owns the feed window of one mounted chat view and its standing subscription.
#[derive(Debug, Default)]
pub struct FeedSubscriber {
    window: FeedWindow,
    subscription: Option<UnsubscribeHandle>,
}

impl FeedSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the standing query for the recent-chats window.
    ///
    /// The caller spawns the returned worker on tokio and feeds every snapshot
    /// read from the stream back through [`FeedSubscriber::apply_snapshot`].
    /// Mounting again replaces the previous subscription.
    pub fn mount<S>(&mut self, store: &S) -> ClientResult<SnapshotSubscription>
    where
        S: DocumentStore + ?Sized,
    {
        self.unmount();

        let query = FeedQuery::recent_chats().with_limit(self.window.limit());
        let subscription = store.subscribe_recent(query).context(SubscribeSnafu {
            stage: "feed-mount-subscribe",
        })?;
        self.subscription = Some(subscription.stream.unsubscribe_handle());

        tracing::debug!(limit = self.window.limit(), "feed subscription mounted");
        Ok(subscription)
    }

    pub fn is_mounted(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|handle| !handle.is_cancelled())
    }

    /// Replaces the window with `snapshot`. Ignored once unmounted; returns
    /// whether the window changed.
    pub fn apply_snapshot(&mut self, snapshot: Vec<ChatDocument>) -> bool {
        if !self.is_mounted() {
            return false;
        }

        self.window
            .replace(snapshot.into_iter().map(ChatMessage::from).collect());
        true
    }

    /// Tears the subscription down. Returns `true` only for the call that
    /// actually cancelled it.
    pub fn unmount(&mut self) -> bool {
        let Some(handle) = self.subscription.take() else {
            return false;
        };

        let cancelled = handle.unsubscribe();
        if cancelled {
            tracing::debug!("feed subscription unmounted");
        }
        cancelled
    }

    pub fn window(&self) -> &FeedWindow {
        &self.window
    }

    pub fn clear_window(&mut self) {
        self.window.clear();
    }
}

impl Drop for FeedSubscriber {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use chirp_backend::{MemoryBackend, NewChatDocument};

    use super::*;

    fn message(text: &str, sent_at_ms: u64) -> ChatMessage {
        ChatMessage {
            text: text.to_string(),
            sender: "lin@example.com".to_string(),
            sent_at_ms,
        }
    }

    fn is_sorted_and_bounded(window: &FeedWindow) -> bool {
        window.len() <= window.limit()
            && window
                .messages()
                .windows(2)
                .all(|pair| pair[0].sent_at_ms <= pair[1].sent_at_ms)
    }

    #[test]
    fn replace_sorts_and_keeps_newest() {
        let mut window = FeedWindow::new(3);
        window.replace(vec![
            message("d", 4),
            message("a", 1),
            message("c", 3),
            message("b", 2),
        ]);

        let texts = window
            .messages()
            .iter()
            .map(|message| message.text.as_str())
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["b", "c", "d"]);
        assert_eq!(window.revision(), 1);
    }

    #[test]
    fn replace_is_stable_for_equal_timestamps() {
        let mut window = FeedWindow::default();
        window.replace(vec![message("first", 5), message("second", 5)]);
        assert_eq!(window.messages()[0].text, "first");
        assert_eq!(window.messages()[1].text, "second");
    }

    #[test]
    fn window_invariants_hold_across_updates() {
        let mut window = FeedWindow::default();
        for round in 0..5_u64 {
            let snapshot = (0..(round * 9))
                .map(|index| message(&format!("m{index}"), (index * 7919) % 101))
                .collect();
            window.replace(snapshot);
            assert!(is_sorted_and_bounded(&window));
        }
        window.clear();
        assert!(window.is_empty());
    }

    #[test]
    fn apply_before_mount_is_ignored() {
        let mut subscriber = FeedSubscriber::new();
        assert!(!subscriber.apply_snapshot(Vec::new()));
        assert_eq!(subscriber.window().revision(), 0);
    }

    #[tokio::test]
    async fn unmount_stops_further_updates() {
        let backend = MemoryBackend::new();
        let mut subscriber = FeedSubscriber::new();
        let SnapshotSubscription { mut stream, worker } =
            subscriber.mount(&backend).expect("mount");
        let worker = tokio::spawn(worker);

        let initial = stream.recv().await.expect("initial snapshot");
        assert!(subscriber.apply_snapshot(initial));

        backend
            .add_chat(NewChatDocument {
                text: "hello".to_string(),
                sender: "lin@example.com".to_string(),
                timestamp_ms: 10,
            })
            .await
            .expect("add");
        let snapshot = stream.recv().await.expect("snapshot");
        assert!(subscriber.apply_snapshot(snapshot));
        assert_eq!(subscriber.window().len(), 1);

        assert!(subscriber.unmount());
        assert!(!subscriber.unmount());
        assert!(!subscriber.is_mounted());

        backend
            .add_chat(NewChatDocument {
                text: "too late".to_string(),
                sender: "lin@example.com".to_string(),
                timestamp_ms: 11,
            })
            .await
            .expect("add");
        assert_eq!(stream.recv().await, None);
        assert!(!subscriber.apply_snapshot(Vec::new()));
        assert_eq!(subscriber.window().len(), 1);
        worker.await.expect("worker stops");
    }
}
