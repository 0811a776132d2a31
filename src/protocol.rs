//! Event-bus protocol shared by all runtime components.
//!
//! This module defines all message payloads exchanged between playlist logic,
//! decoding, playback, spectrum analysis, and the UI manager.

use std::path::PathBuf;

use crate::config::Config;
use crate::playlist::PlaylistItem;

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Playlist(PlaylistMessage),
    Playback(PlaybackMessage),
    Analysis(AnalysisMessage),
    Config(ConfigMessage),
}

/// Playback-engine status reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    /// Idle, nothing loaded or track finished.
    Ready,
    /// A source is being fetched/decoded.
    Waiting,
    Playing,
    Paused,
}

/// Where the bytes of a track come from.
///
/// File items play from their cached blob payload so the playlist survives the
/// original file moving or disappearing, matching how dropped files are cached
/// by hash in the persistence layer.
#[derive(Debug, Clone)]
pub enum TrackSource {
    /// In-memory payload restored from the blob store or read from disk.
    Bytes {
        display_name: String,
        extension: String,
        data: Vec<u8>,
    },
    /// Remote URL fetched at play time, never cached.
    Link(String),
}

/// Fully decoded track ready for the output stream.
#[derive(Debug, Clone)]
pub struct DecodedTrack {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    /// `None` when the decoder could not establish a finite length.
    pub duration_ms: Option<u64>,
}

/// Playlist-domain commands and notifications.
#[derive(Debug, Clone)]
pub enum PlaylistMessage {
    /// UI handed over local files (file dialog or drop).
    AddFiles(Vec<PathBuf>),
    /// UI handed over a remote URL.
    AddLink(String),
    SelectItem(usize),
    RemoveItem(usize),
    PlayItemByIndex(usize),
    /// The ordered, deduplicated list changed (restore, merge, or removal).
    ItemsChanged(Vec<PlaylistItem>),
    PlayingIndexChanged(Option<usize>),
    SelectedIndexChanged(Option<usize>),
}

/// Playback-domain commands and notifications.
///
/// Messages that participate in track loading carry a generation counter so a
/// late decode result for a superseded play intent is discarded instead of
/// starting stale audio.
#[derive(Debug, Clone)]
pub enum PlaybackMessage {
    /// Resume playback, or start the selected item when idle.
    Play,
    Pause,
    /// Pause and reset position to zero.
    Stop,
    Next,
    Previous,
    /// Seek to a playlist-relative fraction; clamped to [0, 1] by the player.
    Seek(f32),
    /// Output gain in [0, 1], applied by the stream callback.
    SetVolume(f32),
    /// Request decode of a new source (playlist manager -> decoder/player).
    LoadSource {
        generation: u64,
        source: TrackSource,
    },
    /// Decoder finished a source (decoder -> player).
    SourceDecoded {
        generation: u64,
        track: DecodedTrack,
    },
    DecodeFailed {
        generation: u64,
        reason: String,
    },
    /// The output stream actually started rendering the new track.
    TrackStarted {
        generation: u64,
    },
    /// Playback reached the end of the track (`natural`) or was stopped.
    TrackEnded {
        natural: bool,
    },
    PlaybackFailed {
        reason: String,
    },
    StatusChanged(PlaybackStatus),
    Progress {
        fraction: f32,
        elapsed_ms: u64,
        total_ms: u64,
    },
}

/// Analysis-domain notifications.
#[derive(Debug, Clone)]
pub enum AnalysisMessage {
    /// Byte-frequency snapshot from the spectrum analyser, one byte per bin.
    SpectrumFrame(Vec<u8>),
}

/// Configuration updates applied at runtime.
#[derive(Debug, Clone)]
pub enum ConfigMessage {
    Updated(Config),
}
