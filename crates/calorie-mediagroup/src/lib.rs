//! Media-group aggregation.
//!
//! Modeled as arena + index: the buffer map
//! owns every `MediaGroupBuffer`; callers waiting on completion only hold
//! the `media_group_id` string, never a reference into the map, so there is
//! no lifetime cycle between the aggregator and its waiters.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use calorie_core::types::Update;

/// Finalization quiesces after this much silence since the last arrival.
const QUIET_WINDOW: Duration = Duration::from_millis(50);
/// Minimum time since the first update before quiescence is checked.
const WAIT_WINDOW: Duration = Duration::from_millis(200);
/// Excess updates beyond this are dropped.
const MAX_RETAINED: usize = 5;
/// A buffer that outlives this with no finalization is treated as malformed
/// and evicted.
const STALE_EVICTION: Duration = Duration::from_secs(2);

struct MediaGroupBuffer {
    first_seen: Instant,
    last_arrival: Instant,
    updates: Vec<Update>,
    first_caption: Option<String>,
    overflow_notified: bool,
}

/// What happened to an update handed to [`MediaGroupAggregator::ingest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Buffered normally; the group is still within `MAX_RETAINED`.
    Buffered { media_group_id: String },
    /// The group just exceeded `MAX_RETAINED` for the first time and this
    /// update was dropped — callers should surface a user-facing notice.
    Overflow { media_group_id: String },
}

impl IngestOutcome {
    pub fn media_group_id(&self) -> &str {
        match self {
            IngestOutcome::Buffered { media_group_id } => media_group_id,
            IngestOutcome::Overflow { media_group_id } => media_group_id,
        }
    }
}

/// The finalized result of a completed media group: an ordered photo list
/// plus the first non-empty caption across all buffered updates.
#[derive(Debug, Clone)]
pub struct FinalizedMediaGroup {
    pub media_group_id: String,
    pub photo_file_ids: Vec<String>,
    pub caption: Option<String>,
    pub updates: Vec<Update>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoCountError {
    TooFew,
    TooMany,
}

impl PhotoCountError {
    pub fn message(self) -> &'static str {
        match self {
            PhotoCountError::TooFew => "at least one photo",
            PhotoCountError::TooMany => {
                "Maximum 5 photos per message for better calorie estimation"
            }
        }
    }
}

/// `n<1` -> too few; `n>5` -> too many; `n in [1,5]` returns silently.
pub fn validate_photo_count(n: usize) -> Result<(), PhotoCountError> {
    if n < 1 {
        Err(PhotoCountError::TooFew)
    } else if n > 5 {
        Err(PhotoCountError::TooMany)
    } else {
        Ok(())
    }
}

/// Display-order index must sit in the platform's 0-indexed 5-photo window.
pub fn validate_display_order(i: usize) -> bool {
    i <= 4
}

const ALLOWED_MIME_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "image/jpg"];
const MAX_FILE_SIZE_BYTES: i64 = 20 * 1024 * 1024;

pub fn validate_mime_type(mime: &str) -> bool {
    ALLOWED_MIME_TYPES.contains(&mime)
}

pub fn validate_file_size(bytes: i64) -> bool {
    bytes <= MAX_FILE_SIZE_BYTES
}

/// Reads `message.media_group_id` off an update, if any.
pub fn get_media_group_id(update: &Update) -> Option<String> {
    update
        .message
        .as_ref()
        .and_then(|m| m.media_group_id.clone())
}

/// First non-empty caption across a set of updates.
pub fn extract_media_group_caption(updates: &[Update]) -> Option<String> {
    updates
        .iter()
        .filter_map(|u| u.message.as_ref())
        .find_map(|m| m.caption.clone().filter(|c| !c.is_empty()))
}

fn message_id_of(update: &Update) -> i64 {
    update.message.as_ref().map(|m| m.message_id).unwrap_or(0)
}

/// In-memory coalescer for updates sharing a `media_group_id`.
pub struct MediaGroupAggregator {
    buffers: Mutex<HashMap<String, MediaGroupBuffer>>,
}

impl Default for MediaGroupAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaGroupAggregator {
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// Buffers `update` under its `media_group_id`, allocating the buffer
    /// on first sight. Returns `None` if the update doesn't carry one.
    /// Siblings are kept ordered by `(message_id, arrival)`; beyond
    /// `MAX_RETAINED` updates are dropped, and the first update that
    /// overflows a group reports [`IngestOutcome::Overflow`] so a caller can
    /// tell the sender once — later overflowing updates in the same group
    /// report `Buffered` again since the notice already went out.
    pub fn ingest(&self, update: Update) -> Option<IngestOutcome> {
        let group_id = get_media_group_id(&update)?;
        let mut buffers = self.buffers.lock().unwrap();
        self.evict_stale(&mut buffers);

        let now = Instant::now();
        let entry = buffers.entry(group_id.clone()).or_insert_with(|| MediaGroupBuffer {
            first_seen: now,
            last_arrival: now,
            updates: Vec::new(),
            first_caption: None,
            overflow_notified: false,
        });
        entry.last_arrival = now;

        if entry.updates.len() < MAX_RETAINED {
            if entry.first_caption.is_none() {
                if let Some(message) = &update.message {
                    if let Some(caption) = message.caption.clone().filter(|c| !c.is_empty()) {
                        entry.first_caption = Some(caption);
                    }
                }
            }
            let incoming_id = message_id_of(&update);
            let pos = entry
                .updates
                .iter()
                .position(|u| message_id_of(u) > incoming_id)
                .unwrap_or(entry.updates.len());
            entry.updates.insert(pos, update);
            return Some(IngestOutcome::Buffered { media_group_id: group_id });
        }

        if entry.overflow_notified {
            return Some(IngestOutcome::Buffered { media_group_id: group_id });
        }
        entry.overflow_notified = true;
        Some(IngestOutcome::Overflow { media_group_id: group_id })
    }

    fn evict_stale(&self, buffers: &mut HashMap<String, MediaGroupBuffer>) {
        buffers.retain(|_, buf| buf.first_seen.elapsed() < STALE_EVICTION);
    }

    fn is_quiesced(buffer: &MediaGroupBuffer, expected_count: Option<usize>) -> bool {
        if let Some(expected) = expected_count {
            if buffer.updates.len() >= expected {
                return true;
            }
        }
        buffer.first_seen.elapsed() >= WAIT_WINDOW && buffer.last_arrival.elapsed() >= QUIET_WINDOW
    }

    /// Waits for the group identified by `group_id` to quiesce: either its
    /// cardinality reaches `expected_count`, or `WAIT_WINDOW` has elapsed
    /// since the first update with `QUIET_WINDOW` of silence since the
    /// last one. Polls in small increments rather than
    /// a single sleep so an early-arriving sibling can shorten the wait.
    /// Returns `None` if the group vanished or never held a photo.
    pub async fn wait_for_media_group_complete(
        &self,
        group_id: &str,
        expected_count: Option<usize>,
        timeout_ms: u64,
    ) -> Option<FinalizedMediaGroup> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let quiesced = {
                let buffers = self.buffers.lock().unwrap();
                match buffers.get(group_id) {
                    Some(buf) => Self::is_quiesced(buf, expected_count),
                    None => return None,
                }
            };
            if quiesced || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.finalize(group_id)
    }

    /// Emits the ordered photo list and first caption, then drops the
    /// buffer. Returns `None` if no photo was ever
    /// buffered under this id.
    fn finalize(&self, group_id: &str) -> Option<FinalizedMediaGroup> {
        let mut buffers = self.buffers.lock().unwrap();
        let buffer = buffers.remove(group_id)?;

        let photo_file_ids: Vec<String> = buffer
            .updates
            .iter()
            .filter_map(|u| u.message.as_ref())
            .filter_map(|m| m.photo.last())
            .map(|p| p.file_id.clone())
            .collect();

        if photo_file_ids.is_empty() {
            return None;
        }

        Some(FinalizedMediaGroup {
            media_group_id: group_id.to_string(),
            photo_file_ids,
            caption: buffer.first_caption,
            updates: buffer.updates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calorie_core::types::{Chat, ChatType, Message, PhotoSize};

    fn photo_update(group_id: &str, message_id: i64, caption: Option<&str>) -> Update {
        Update {
            update_id: message_id,
            message: Some(Message {
                message_id,
                chat: Chat {
                    id: -100500600,
                    chat_type: ChatType::Supergroup,
                },
                from: None,
                message_thread_id: None,
                media_group_id: Some(group_id.to_string()),
                caption: caption.map(|c| c.to_string()),
                text: None,
                entities: vec![],
                photo: vec![PhotoSize {
                    file_id: format!("file-{message_id}"),
                    file_unique_id: format!("uniq-{message_id}"),
                    width: 800,
                    height: 600,
                    file_size: Some(12345),
                }],
                reply_to_message: None,
            }),
            inline_query: None,
        }
    }

    #[test]
    fn photo_count_bounds() {
        assert!(validate_photo_count(0).is_err());
        for n in 1..=5 {
            assert!(validate_photo_count(n).is_ok());
        }
        assert!(validate_photo_count(6).is_err());
    }

    #[test]
    fn photo_over_limit_message_names_the_limit() {
        let err = validate_photo_count(6).unwrap_err();
        assert!(err.message().contains("Maximum 5 photos"));
    }

    #[test]
    fn display_order_bounds() {
        assert!(validate_display_order(0));
        assert!(validate_display_order(4));
        assert!(!validate_display_order(5));
    }

    #[test]
    fn mime_validation_accepts_known_types_only() {
        assert!(validate_mime_type("image/jpeg"));
        assert!(validate_mime_type("image/webp"));
        assert!(!validate_mime_type("image/gif"));
    }

    #[test]
    fn file_size_guard_rejects_over_20mb() {
        assert!(validate_file_size(19 * 1024 * 1024));
        assert!(!validate_file_size(21 * 1024 * 1024));
    }

    #[test]
    fn extract_caption_picks_first_non_empty() {
        let updates = vec![
            photo_update("g1", 2, Some("")),
            photo_update("g1", 3, Some("Chicken pasta")),
        ];
        assert_eq!(
            extract_media_group_caption(&updates).as_deref(),
            Some("Chicken pasta")
        );
    }

    #[tokio::test]
    async fn aggregates_media_group_of_three_in_message_id_order() {
        let aggregator = MediaGroupAggregator::new();
        aggregator.ingest(photo_update("g123", 3, None));
        aggregator.ingest(photo_update("g123", 1, Some("Chicken pasta")));
        aggregator.ingest(photo_update("g123", 2, None));

        let finalized = aggregator
            .wait_for_media_group_complete("g123", Some(3), 200)
            .await
            .expect("group should finalize");

        assert_eq!(
            finalized.photo_file_ids,
            vec!["file-1".to_string(), "file-2".to_string(), "file-3".to_string()]
        );
        assert_eq!(finalized.caption.as_deref(), Some("Chicken pasta"));
    }

    #[tokio::test]
    async fn timeout_without_any_photo_returns_none() {
        let aggregator = MediaGroupAggregator::new();
        let finalized = aggregator
            .wait_for_media_group_complete("never-seen", None, 50)
            .await;
        assert!(finalized.is_none());
    }

    #[tokio::test]
    async fn excess_updates_beyond_max_retained_are_dropped() {
        let aggregator = MediaGroupAggregator::new();
        for i in 1..=5 {
            let outcome = aggregator.ingest(photo_update("g-big", i, None));
            assert!(matches!(outcome, Some(IngestOutcome::Buffered { .. })));
        }
        let first_overflow = aggregator.ingest(photo_update("g-big", 6, None));
        assert!(matches!(first_overflow, Some(IngestOutcome::Overflow { .. })));
        let second_overflow = aggregator.ingest(photo_update("g-big", 7, None));
        assert!(matches!(second_overflow, Some(IngestOutcome::Buffered { .. })));

        let finalized = aggregator
            .wait_for_media_group_complete("g-big", Some(5), 200)
            .await
            .expect("group should finalize");
        assert_eq!(finalized.photo_file_ids.len(), 5);
    }
}
