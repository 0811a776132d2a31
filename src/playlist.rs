//! Playlist items, content-hash identity, and ordered playlist state.

use std::path::Path;

use sha2::{Digest, Sha256};

/// How a playlist item entered the playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOrigin {
    /// Local file; its bytes are cached in the blob store under the item id.
    File,
    /// Remote URL; fetched at play time, size unknown.
    Link,
}

impl ItemOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemOrigin::File => "file",
            ItemOrigin::Link => "link",
        }
    }

    pub fn from_str(value: &str) -> Option<ItemOrigin> {
        match value {
            "file" => Some(ItemOrigin::File),
            "link" => Some(ItemOrigin::Link),
            _ => None,
        }
    }
}

/// One entry of the playlist.
///
/// Identity is the content hash: SHA-256 over the file bytes for local files,
/// SHA-256 over the literal URL string for links. The same content therefore
/// maps to the same id across sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistItem {
    pub id: String,
    pub name: String,
    pub extension: String,
    pub origin: ItemOrigin,
    /// Original path for files, URL for links.
    pub source: String,
    /// Payload size in bytes; -1 for links.
    pub size: i64,
}

/// Content hash of a local file payload.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Content hash of a link; the URL string itself is the content.
pub fn hash_link(url: &str) -> String {
    hash_bytes(url.as_bytes())
}

/// Builds a file-backed item from a path and its payload.
pub fn file_item(path: &Path, bytes: &[u8]) -> PlaylistItem {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string();
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();
    PlaylistItem {
        id: hash_bytes(bytes),
        name,
        extension,
        origin: ItemOrigin::File,
        source: path.to_string_lossy().into_owned(),
        size: bytes.len() as i64,
    }
}

/// Builds a link-backed item from a URL.
pub fn link_item(url: &str) -> PlaylistItem {
    let trimmed = url.trim();
    let last_segment = trimmed
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(trimmed);
    let (name, extension) = match last_segment.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), ext.to_lowercase()),
        _ => (last_segment.to_string(), String::new()),
    };
    PlaylistItem {
        id: hash_link(trimmed),
        name,
        extension,
        origin: ItemOrigin::Link,
        source: trimmed.to_string(),
        size: -1,
    }
}

/// Merges `incoming` into `existing`, deduplicating by content hash while
/// preserving first-seen order.
pub fn merge_items(existing: Vec<PlaylistItem>, incoming: Vec<PlaylistItem>) -> Vec<PlaylistItem> {
    let mut merged: Vec<PlaylistItem> = Vec::with_capacity(existing.len() + incoming.len());
    for item in existing.into_iter().chain(incoming) {
        if !merged.iter().any(|present| present.id == item.id) {
            merged.push(item);
        }
    }
    merged
}

/// Ordered playlist with selection and playing cursors.
pub struct Playlist {
    items: Vec<PlaylistItem>,
    playing_index: Option<usize>,
    selected_index: Option<usize>,
}

impl Playlist {
    pub fn new() -> Playlist {
        Playlist {
            items: Vec::new(),
            playing_index: None,
            selected_index: None,
        }
    }

    pub fn items(&self) -> &[PlaylistItem] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&PlaylistItem> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Replaces the item list, keeping cursors only if they still point at the
    /// same items.
    pub fn set_items(&mut self, items: Vec<PlaylistItem>) {
        let playing_id = self.playing_index.and_then(|i| self.items.get(i)).map(|t| t.id.clone());
        let selected_id = self
            .selected_index
            .and_then(|i| self.items.get(i))
            .map(|t| t.id.clone());
        self.items = items;
        self.playing_index = playing_id.and_then(|id| self.position_of(&id));
        self.selected_index = selected_id.and_then(|id| self.position_of(&id));
    }

    /// Merges new items in, returning true when the list actually changed.
    /// Cursors are resolved by id before the list is rebuilt, so items that
    /// survive the merge keep their cursors.
    pub fn merge(&mut self, incoming: Vec<PlaylistItem>) -> bool {
        let before = self.items.len();
        let playing_id = self
            .playing_index
            .and_then(|i| self.items.get(i))
            .map(|t| t.id.clone());
        let selected_id = self
            .selected_index
            .and_then(|i| self.items.get(i))
            .map(|t| t.id.clone());
        self.items = merge_items(std::mem::take(&mut self.items), incoming);
        let changed = self.items.len() != before;
        self.playing_index = playing_id.and_then(|id| self.position_of(&id));
        self.selected_index = selected_id.and_then(|id| self.position_of(&id));
        changed
    }

    pub fn remove(&mut self, index: usize) -> Option<PlaylistItem> {
        if index >= self.items.len() {
            return None;
        }
        let removed = self.items.remove(index);
        self.playing_index = adjust_cursor(self.playing_index, index);
        self.selected_index = adjust_cursor(self.selected_index, index);
        Some(removed)
    }

    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    pub fn playing_index(&self) -> Option<usize> {
        self.playing_index
    }

    pub fn set_playing_index(&mut self, index: Option<usize>) {
        self.playing_index = index.filter(|i| *i < self.items.len());
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected_index
    }

    pub fn set_selected_index(&mut self, index: Option<usize>) {
        self.selected_index = index.filter(|i| *i < self.items.len());
    }

    /// Index after the currently playing one, or `None` at the end.
    pub fn next_index(&self) -> Option<usize> {
        let current = self.playing_index?;
        let next = current + 1;
        (next < self.items.len()).then_some(next)
    }

    /// Index before the currently playing one, or `None` at the start.
    pub fn previous_index(&self) -> Option<usize> {
        let current = self.playing_index?;
        current.checked_sub(1)
    }
}

fn adjust_cursor(cursor: Option<usize>, removed: usize) -> Option<usize> {
    match cursor {
        Some(i) if i == removed => None,
        Some(i) if i > removed => Some(i - 1),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn file_hash_is_stable_and_content_derived() {
        let a = file_item(&PathBuf::from("/music/song.mp3"), b"same bytes");
        let b = file_item(&PathBuf::from("/elsewhere/renamed.mp3"), b"same bytes");
        let c = file_item(&PathBuf::from("/music/song.mp3"), b"other bytes");
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.name, "song");
        assert_eq!(a.extension, "mp3");
        assert_eq!(a.size, 10);
    }

    #[test]
    fn link_items_have_unknown_size() {
        let item = link_item("https://radio.example/streams/morning.mp3");
        assert_eq!(item.origin, ItemOrigin::Link);
        assert_eq!(item.size, -1);
        assert_eq!(item.name, "morning");
        assert_eq!(item.extension, "mp3");
        assert_eq!(item.id, hash_link("https://radio.example/streams/morning.mp3"));
    }

    #[test]
    fn merge_deduplicates_by_hash_preserving_first_seen_order() {
        let existing = vec![link_item("https://a.example/one.mp3"), link_item("https://a.example/two.mp3")];
        let incoming = vec![
            link_item("https://a.example/two.mp3"),
            file_item(&PathBuf::from("three.ogg"), b"three"),
            link_item("https://a.example/one.mp3"),
        ];
        let merged = merge_items(existing, incoming);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].name, "one");
        assert_eq!(merged[1].name, "two");
        assert_eq!(merged[2].name, "three");
        for (i, left) in merged.iter().enumerate() {
            for right in &merged[i + 1..] {
                assert_ne!(left.id, right.id);
            }
        }
    }

    #[test]
    fn merging_same_url_twice_yields_one_element() {
        let merged = merge_items(
            Vec::new(),
            vec![link_item("a.mp3"), link_item("a.mp3")],
        );
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn mixed_file_and_link_batch_keeps_first_occurrence() {
        let bytes = b"payload";
        let merged = merge_items(
            Vec::new(),
            vec![
                file_item(&PathBuf::from("a.mp3"), bytes),
                link_item("https://x.example/a.mp3"),
                file_item(&PathBuf::from("copy-of-a.mp3"), bytes),
            ],
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].source, "a.mp3");
        assert_eq!(merged[1].origin, ItemOrigin::Link);
    }

    #[test]
    fn removal_shifts_cursors() {
        let mut playlist = Playlist::new();
        playlist.merge(vec![
            link_item("https://a.example/1"),
            link_item("https://a.example/2"),
            link_item("https://a.example/3"),
        ]);
        playlist.set_playing_index(Some(2));
        playlist.set_selected_index(Some(1));

        playlist.remove(0);
        assert_eq!(playlist.playing_index(), Some(1));
        assert_eq!(playlist.selected_index(), Some(0));

        playlist.remove(1);
        assert_eq!(playlist.playing_index(), None);
        assert_eq!(playlist.selected_index(), Some(0));
    }

    #[test]
    fn merge_keeps_cursors_on_existing_items() {
        let mut playlist = Playlist::new();
        playlist.merge(vec![
            link_item("https://a.example/1"),
            link_item("https://a.example/2"),
        ]);
        playlist.set_playing_index(Some(0));
        playlist.set_selected_index(Some(1));

        playlist.merge(vec![link_item("https://a.example/3")]);
        assert_eq!(playlist.playing_index(), Some(0));
        assert_eq!(playlist.selected_index(), Some(1));
        assert_eq!(playlist.next_index(), Some(1));

        // Merging an already-present item changes nothing either.
        playlist.merge(vec![link_item("https://a.example/1")]);
        assert_eq!(playlist.playing_index(), Some(0));
        assert_eq!(playlist.len(), 3);
    }

    #[test]
    fn next_and_previous_are_sequential_without_wrap() {
        let mut playlist = Playlist::new();
        playlist.merge(vec![
            link_item("https://a.example/1"),
            link_item("https://a.example/2"),
        ]);
        playlist.set_playing_index(Some(0));
        assert_eq!(playlist.next_index(), Some(1));
        assert_eq!(playlist.previous_index(), None);
        playlist.set_playing_index(Some(1));
        assert_eq!(playlist.next_index(), None);
        assert_eq!(playlist.previous_index(), Some(0));
    }
}
