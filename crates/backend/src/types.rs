use std::time::{SystemTime, UNIX_EPOCH};

use super::ids::{DocumentId, UserId};

/// Collection holding every chat message document.
pub const CHATS_COLLECTION: &str = "chats";
/// The only ordering key the chat collection supports.
pub const TIMESTAMP_FIELD: &str = "timestamp";
/// Key-path prefix for presence records (`status/{uid}`).
pub const STATUS_PATH_PREFIX: &str = "status";
/// Size of the live feed window.
pub const FEED_WINDOW_LIMIT: usize = 20;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_u64, |duration| duration.as_millis() as u64)
}

pub fn status_path(uid: UserId) -> String {
    format!("{STATUS_PATH_PREFIX}/{uid}")
}

/// Identity returned by a successful credential exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthUser {
    pub uid: UserId,
    pub email: String,
}

/// One stored chat document. The id only exists so bulk deletes can address rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatDocument {
    pub id: DocumentId,
    pub text: String,
    pub sender: String,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatDocument {
    pub text: String,
    pub sender: String,
    pub timestamp_ms: u64,
}

/// Presence value stored at `status/{uid}`; `last_seen_ms` is assigned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceRecord {
    pub online: bool,
    pub last_seen_ms: u64,
}

/// Client-side half of a presence write. The backend stamps `last_seen_ms` itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PresenceWrite {
    pub online: bool,
}

impl PresenceWrite {
    pub const ONLINE: Self = Self { online: true };
    pub const OFFLINE: Self = Self { online: false };

    pub fn stamp(self, server_time_ms: u64) -> PresenceRecord {
        PresenceRecord {
            online: self.online,
            last_seen_ms: server_time_ms,
        }
    }
}

/// Ordered, bounded query over a document collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub collection: String,
    pub order_by: String,
    pub limit: usize,
}

impl FeedQuery {
    /// Most recent `FEED_WINDOW_LIMIT` chat messages, oldest first.
    pub fn recent_chats() -> Self {
        Self {
            collection: CHATS_COLLECTION.to_string(),
            order_by: TIMESTAMP_FIELD.to_string(),
            limit: FEED_WINDOW_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

impl Default for FeedQuery {
    fn default() -> Self {
        Self::recent_chats()
    }
}

/// Keeps the newest `limit` documents and returns them ascending by timestamp.
///
/// Ties are broken by document id, which is time-ordered, so snapshots stay stable.
pub fn recent_window(mut documents: Vec<ChatDocument>, limit: usize) -> Vec<ChatDocument> {
    documents.sort_by(|left, right| {
        left.timestamp_ms
            .cmp(&right.timestamp_ms)
            .then_with(|| left.id.cmp(&right.id))
    });

    if documents.len() > limit {
        let excess = documents.len() - limit;
        documents.drain(..excess);
    }

    documents
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(text: &str, timestamp_ms: u64) -> ChatDocument {
        ChatDocument {
            id: DocumentId::new_v7(),
            text: text.to_string(),
            sender: "ada@example.com".to_string(),
            timestamp_ms,
        }
    }

    #[test]
    fn recent_window_keeps_newest_entries_in_ascending_order() {
        let documents = (0..30)
            .rev()
            .map(|index| document(&format!("m{index}"), index))
            .collect::<Vec<_>>();

        let window = recent_window(documents, FEED_WINDOW_LIMIT);

        assert_eq!(window.len(), FEED_WINDOW_LIMIT);
        assert_eq!(window.first().map(|doc| doc.timestamp_ms), Some(10));
        assert_eq!(window.last().map(|doc| doc.timestamp_ms), Some(29));
        assert!(
            window
                .windows(2)
                .all(|pair| pair[0].timestamp_ms <= pair[1].timestamp_ms)
        );
    }

    #[test]
    fn recent_window_leaves_short_collections_untouched() {
        let window = recent_window(vec![document("b", 2), document("a", 1)], 20);
        let texts = window.iter().map(|doc| doc.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn status_path_uses_status_prefix() {
        let uid = UserId::new_v7();
        assert_eq!(status_path(uid), format!("status/{uid}"));
    }

    #[test]
    fn presence_write_takes_server_timestamp() {
        let record = PresenceWrite::OFFLINE.stamp(1_700_000_000_000);
        assert!(!record.online);
        assert_eq!(record.last_seen_ms, 1_700_000_000_000);
    }
}
