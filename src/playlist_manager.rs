use std::path::Path;

use log::{debug, error, warn};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::db_manager::DbManager;
use crate::playlist::{file_item, link_item, ItemOrigin, Playlist, PlaylistItem};
use crate::protocol::{
    Message, PlaybackMessage, PlaybackStatus, PlaylistMessage, TrackSource,
};

/// Owns the ordered playlist, its persistence, and the mapping from playlist
/// intents to playback requests. Every play intent gets a fresh generation so
/// the player can discard results of superseded intents.
pub struct PlaylistManager {
    playlist: Playlist,
    bus_receiver: Receiver<Message>,
    bus_sender: Sender<Message>,
    db_manager: DbManager,
    generation: u64,
    last_status: PlaybackStatus,
}

impl PlaylistManager {
    pub fn new(
        playlist: Playlist,
        bus_receiver: Receiver<Message>,
        bus_sender: Sender<Message>,
        db_manager: DbManager,
    ) -> Self {
        Self {
            playlist,
            bus_receiver,
            bus_sender,
            db_manager,
            generation: 0,
            last_status: PlaybackStatus::Ready,
        }
    }

    fn restore(&mut self) {
        match self.db_manager.restore_items() {
            Ok(items) => {
                debug!("PlaylistManager: restored {} items", items.len());
                self.playlist.set_items(items);
            }
            Err(e) => {
                warn!("PlaylistManager: failed to restore playlist, starting empty: {}", e);
            }
        }
        self.broadcast_items();
    }

    fn persist(&mut self) {
        let items: Vec<PlaylistItem> = self.playlist.items().to_vec();
        if let Err(e) = self.db_manager.replace_items(&items) {
            warn!("PlaylistManager: failed to persist playlist: {}", e);
        }
    }

    fn broadcast_items(&self) {
        let _ = self.bus_sender.send(Message::Playlist(PlaylistMessage::ItemsChanged(
            self.playlist.items().to_vec(),
        )));
    }

    fn add_files(&mut self, paths: Vec<std::path::PathBuf>) {
        let mut incoming = Vec::new();
        for path in paths {
            match std::fs::read(&path) {
                Ok(bytes) => {
                    let item = file_item(&path, &bytes);
                    if let Err(e) = self.db_manager.put_blob(&item.id, &bytes) {
                        warn!("PlaylistManager: failed to cache payload for {}: {}", item.name, e);
                    }
                    incoming.push(item);
                }
                Err(e) => {
                    warn!("PlaylistManager: skipping unreadable file {}: {}", path.display(), e);
                }
            }
        }
        if incoming.is_empty() {
            return;
        }
        self.playlist.merge(incoming);
        self.persist();
        self.broadcast_items();
    }

    fn add_link(&mut self, url: String) {
        if url.trim().is_empty() {
            return;
        }
        self.playlist.merge(vec![link_item(&url)]);
        self.persist();
        self.broadcast_items();
    }

    fn remove_item(&mut self, index: usize) {
        let was_playing = self.playlist.playing_index() == Some(index);
        let Some(removed) = self.playlist.remove(index) else {
            return;
        };
        if removed.origin == ItemOrigin::File {
            if let Err(e) = self.db_manager.delete_blob(&removed.id) {
                warn!("PlaylistManager: failed to delete payload of {}: {}", removed.name, e);
            }
        }
        self.persist();
        self.broadcast_items();
        if was_playing {
            let _ = self.bus_sender.send(Message::Playback(PlaybackMessage::Stop));
            let _ = self
                .bus_sender
                .send(Message::Playlist(PlaylistMessage::PlayingIndexChanged(None)));
        }
    }

    /// Resolves the payload of an item: cached blob first, the original path
    /// as a fallback (re-caching it), the raw URL for links.
    fn resolve_source(&self, item: &PlaylistItem) -> Result<TrackSource, String> {
        match item.origin {
            ItemOrigin::Link => Ok(TrackSource::Link(item.source.clone())),
            ItemOrigin::File => {
                match self.db_manager.get_blob(&item.id) {
                    Ok(Some(data)) => {
                        return Ok(TrackSource::Bytes {
                            display_name: item.name.clone(),
                            extension: item.extension.clone(),
                            data,
                        })
                    }
                    Ok(None) => {
                        debug!("PlaylistManager: no cached payload for {}, reading source", item.name)
                    }
                    Err(e) => warn!("PlaylistManager: blob read failed for {}: {}", item.name, e),
                }
                let data = std::fs::read(Path::new(&item.source))
                    .map_err(|e| format!("cannot read {}: {}", item.source, e))?;
                if let Err(e) = self.db_manager.put_blob(&item.id, &data) {
                    warn!("PlaylistManager: failed to re-cache {}: {}", item.name, e);
                }
                Ok(TrackSource::Bytes {
                    display_name: item.name.clone(),
                    extension: item.extension.clone(),
                    data,
                })
            }
        }
    }

    fn play_index(&mut self, index: usize) {
        let Some(item) = self.playlist.get(index).cloned() else {
            return;
        };
        let source = match self.resolve_source(&item) {
            Ok(source) => source,
            Err(reason) => {
                error!("PlaylistManager: cannot play {}: {}", item.name, reason);
                let _ = self
                    .bus_sender
                    .send(Message::Playback(PlaybackMessage::PlaybackFailed { reason }));
                return;
            }
        };

        self.generation += 1;
        self.playlist.set_playing_index(Some(index));
        self.playlist.set_selected_index(Some(index));
        let _ = self.bus_sender.send(Message::Playlist(
            PlaylistMessage::PlayingIndexChanged(Some(index)),
        ));
        let _ = self.bus_sender.send(Message::Playlist(
            PlaylistMessage::SelectedIndexChanged(Some(index)),
        ));
        let _ = self.bus_sender.send(Message::Playback(PlaybackMessage::LoadSource {
            generation: self.generation,
            source,
        }));
    }

    fn handle_play_intent(&mut self) {
        // A paused player resumes by itself; everything else restarts a track.
        if self.last_status == PlaybackStatus::Paused
            || self.last_status == PlaybackStatus::Playing
            || self.last_status == PlaybackStatus::Waiting
        {
            return;
        }
        let index = self
            .playlist
            .playing_index()
            .or(self.playlist.selected_index())
            .unwrap_or(0);
        if index < self.playlist.len() {
            self.play_index(index);
        }
    }

    fn handle_track_ended(&mut self, natural: bool) {
        if !natural {
            return;
        }
        match self.playlist.next_index() {
            Some(next) => self.play_index(next),
            None => {
                self.playlist.set_playing_index(None);
                let _ = self
                    .bus_sender
                    .send(Message::Playlist(PlaylistMessage::PlayingIndexChanged(None)));
            }
        }
    }

    pub fn run(&mut self) {
        self.restore();
        loop {
            while let Ok(message) = self.bus_receiver.blocking_recv() {
                match message {
                    Message::Playlist(PlaylistMessage::AddFiles(paths)) => self.add_files(paths),
                    Message::Playlist(PlaylistMessage::AddLink(url)) => self.add_link(url),
                    Message::Playlist(PlaylistMessage::SelectItem(index)) => {
                        self.playlist.set_selected_index(Some(index));
                        let _ = self.bus_sender.send(Message::Playlist(
                            PlaylistMessage::SelectedIndexChanged(self.playlist.selected_index()),
                        ));
                    }
                    Message::Playlist(PlaylistMessage::RemoveItem(index)) => {
                        self.remove_item(index)
                    }
                    Message::Playlist(PlaylistMessage::PlayItemByIndex(index)) => {
                        self.play_index(index)
                    }
                    Message::Playback(PlaybackMessage::Play) => self.handle_play_intent(),
                    Message::Playback(PlaybackMessage::Next) => {
                        if let Some(next) = self.playlist.next_index() {
                            self.play_index(next);
                        }
                    }
                    Message::Playback(PlaybackMessage::Previous) => {
                        let target = self
                            .playlist
                            .previous_index()
                            .or(self.playlist.playing_index());
                        if let Some(index) = target {
                            self.play_index(index);
                        }
                    }
                    Message::Playback(PlaybackMessage::TrackEnded { natural }) => {
                        self.handle_track_ended(natural)
                    }
                    Message::Playback(PlaybackMessage::StatusChanged(status)) => {
                        self.last_status = status;
                    }
                    _ => {} // Ignore other messages
                }
            }
            error!("PlaylistManager: receiver error, restarting loop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};
    use tokio::sync::broadcast::{self, error::TryRecvError};

    fn wait_for_message<F>(
        receiver: &mut Receiver<Message>,
        timeout: Duration,
        predicate: F,
    ) -> Option<Message>
    where
        F: Fn(&Message) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match receiver.try_recv() {
                Ok(message) => {
                    if predicate(&message) {
                        return Some(message);
                    }
                }
                Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(5)),
                Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Closed) => return None,
            }
        }
        None
    }

    struct PlaylistManagerHarness {
        bus_sender: Sender<Message>,
        receiver: Receiver<Message>,
    }

    impl PlaylistManagerHarness {
        fn new() -> Self {
            let (bus_sender, _) = broadcast::channel(4096);
            let manager_bus_sender = bus_sender.clone();
            let manager_receiver = bus_sender.subscribe();
            let db_manager = DbManager::new_in_memory().expect("failed to create in-memory db");

            let mut receiver = bus_sender.subscribe();
            thread::spawn(move || {
                let mut manager = PlaylistManager::new(
                    Playlist::new(),
                    manager_receiver,
                    manager_bus_sender,
                    db_manager,
                );
                manager.run();
            });

            // The manager announces its (empty) restored playlist on startup.
            let _ = wait_for_message(&mut receiver, Duration::from_secs(1), |message| {
                matches!(message, Message::Playlist(PlaylistMessage::ItemsChanged(_)))
            });

            Self {
                bus_sender,
                receiver,
            }
        }

        fn send(&self, message: Message) {
            self.bus_sender
                .send(message)
                .expect("failed to send message to bus");
        }

        fn add_link(&mut self, url: &str) -> Vec<PlaylistItem> {
            self.send(Message::Playlist(PlaylistMessage::AddLink(url.to_string())));
            let message = wait_for_message(&mut self.receiver, Duration::from_secs(1), |message| {
                matches!(message, Message::Playlist(PlaylistMessage::ItemsChanged(_)))
            })
            .expect("no ItemsChanged after AddLink");
            match message {
                Message::Playlist(PlaylistMessage::ItemsChanged(items)) => items,
                _ => unreachable!(),
            }
        }

        fn expect_load_source(&mut self) -> (u64, TrackSource) {
            let message = wait_for_message(&mut self.receiver, Duration::from_secs(1), |message| {
                matches!(message, Message::Playback(PlaybackMessage::LoadSource { .. }))
            })
            .expect("no LoadSource on bus");
            match message {
                Message::Playback(PlaybackMessage::LoadSource { generation, source }) => {
                    (generation, source)
                }
                _ => unreachable!(),
            }
        }
    }

    #[test]
    fn adding_the_same_link_twice_keeps_one_item() {
        let mut harness = PlaylistManagerHarness::new();
        let items = harness.add_link("https://radio.example/a.mp3");
        assert_eq!(items.len(), 1);
        let items = harness.add_link("https://radio.example/a.mp3");
        assert_eq!(items.len(), 1);
        let items = harness.add_link("https://radio.example/b.mp3");
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn play_intents_carry_increasing_generations() {
        let mut harness = PlaylistManagerHarness::new();
        harness.add_link("https://radio.example/a.mp3");
        harness.add_link("https://radio.example/b.mp3");

        harness.send(Message::Playlist(PlaylistMessage::PlayItemByIndex(0)));
        let (first_generation, source) = harness.expect_load_source();
        assert!(matches!(source, TrackSource::Link(url) if url.ends_with("a.mp3")));

        harness.send(Message::Playlist(PlaylistMessage::PlayItemByIndex(1)));
        let (second_generation, _) = harness.expect_load_source();
        assert!(second_generation > first_generation);
    }

    #[test]
    fn file_items_play_from_their_cached_payload() {
        let payload = b"fake audio payload";
        let path = std::env::temp_dir().join(format!(
            "spectune-playlist-test-{}.mp3",
            std::process::id()
        ));
        std::fs::write(&path, payload).expect("write temp file");

        let mut harness = PlaylistManagerHarness::new();
        harness.send(Message::Playlist(PlaylistMessage::AddFiles(vec![path.clone()])));
        let message = wait_for_message(&mut harness.receiver, Duration::from_secs(1), |message| {
            matches!(message, Message::Playlist(PlaylistMessage::ItemsChanged(items)) if !items.is_empty())
        })
        .expect("no ItemsChanged after AddFiles");
        let Message::Playlist(PlaylistMessage::ItemsChanged(items)) = message else {
            unreachable!()
        };
        assert_eq!(items[0].origin, ItemOrigin::File);
        assert_eq!(items[0].size, payload.len() as i64);

        // Delete the original; playback must still resolve from the blob store.
        std::fs::remove_file(&path).expect("remove temp file");
        harness.send(Message::Playlist(PlaylistMessage::PlayItemByIndex(0)));
        let (_, source) = harness.expect_load_source();
        match source {
            TrackSource::Bytes { data, .. } => assert_eq!(data, payload),
            other => panic!("expected bytes source, got {:?}", other),
        }
    }

    #[test]
    fn removing_the_playing_item_stops_playback() {
        let mut harness = PlaylistManagerHarness::new();
        harness.add_link("https://radio.example/a.mp3");
        harness.send(Message::Playlist(PlaylistMessage::PlayItemByIndex(0)));
        let _ = harness.expect_load_source();

        harness.send(Message::Playlist(PlaylistMessage::RemoveItem(0)));
        let stop = wait_for_message(&mut harness.receiver, Duration::from_secs(1), |message| {
            matches!(message, Message::Playback(PlaybackMessage::Stop))
        });
        assert!(stop.is_some());
        let cleared = wait_for_message(&mut harness.receiver, Duration::from_secs(1), |message| {
            matches!(
                message,
                Message::Playlist(PlaylistMessage::PlayingIndexChanged(None))
            )
        });
        assert!(cleared.is_some());
    }

    #[test]
    fn natural_track_end_advances_to_the_next_item() {
        let mut harness = PlaylistManagerHarness::new();
        harness.add_link("https://radio.example/a.mp3");
        harness.add_link("https://radio.example/b.mp3");
        harness.send(Message::Playlist(PlaylistMessage::PlayItemByIndex(0)));
        let _ = harness.expect_load_source();

        harness.send(Message::Playback(PlaybackMessage::TrackEnded { natural: true }));
        let (_, source) = harness.expect_load_source();
        assert!(matches!(source, TrackSource::Link(url) if url.ends_with("b.mp3")));

        // End of the last track clears the playing cursor instead of wrapping.
        harness.send(Message::Playback(PlaybackMessage::TrackEnded { natural: true }));
        let cleared = wait_for_message(&mut harness.receiver, Duration::from_secs(1), |message| {
            matches!(
                message,
                Message::Playlist(PlaylistMessage::PlayingIndexChanged(None))
            )
        });
        assert!(cleared.is_some());
    }

    #[test]
    fn user_stop_does_not_advance() {
        let mut harness = PlaylistManagerHarness::new();
        harness.add_link("https://radio.example/a.mp3");
        harness.add_link("https://radio.example/b.mp3");
        harness.send(Message::Playlist(PlaylistMessage::PlayItemByIndex(0)));
        let _ = harness.expect_load_source();

        harness.send(Message::Playback(PlaybackMessage::TrackEnded { natural: false }));
        let message = wait_for_message(&mut harness.receiver, Duration::from_millis(200), |message| {
            matches!(message, Message::Playback(PlaybackMessage::LoadSource { .. }))
        });
        assert!(message.is_none());
    }
}
