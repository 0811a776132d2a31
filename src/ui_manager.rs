use std::num::NonZeroU32;
use std::rc::Rc;

use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use log::debug;
use slint::{ModelRc, SharedString, VecModel};
use tokio::sync::broadcast::Receiver;

use crate::playlist::PlaylistItem;
use crate::protocol::{
    AnalysisMessage, ConfigMessage, Message, PlaybackMessage, PlaybackStatus, PlaylistMessage,
};
use crate::{AppWindow, TrackRow};

/// Bars shown by the spectrum view; snapshots are downsampled to this width.
const SPECTRUM_BARS: usize = 32;

/// Mirrors bus state into the Slint window. Progress and spectrum frames are
/// rate limited so a fast producer cannot flood the UI event loop.
pub struct UiManager {
    ui: slint::Weak<AppWindow>,
    bus_receiver: Receiver<Message>,
    items: Vec<PlaylistItem>,
    playing_index: Option<usize>,
    progress_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    spectrum_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl UiManager {
    pub fn new(ui: slint::Weak<AppWindow>, bus_receiver: Receiver<Message>) -> Self {
        Self {
            ui,
            bus_receiver,
            items: Vec::new(),
            playing_index: None,
            progress_limiter: RateLimiter::direct(Quota::per_second(
                NonZeroU32::new(10).expect("nonzero quota"),
            )),
            spectrum_limiter: RateLimiter::direct(Quota::per_second(
                NonZeroU32::new(30).expect("nonzero quota"),
            )),
        }
    }

    fn status_line(&self) -> String {
        match self.playing_index.and_then(|i| self.items.get(i)) {
            Some(item) => item.name.clone(),
            None => "Nothing playing".to_string(),
        }
    }

    fn push_items(&self) {
        let rows: Vec<TrackRow> = self.items.iter().map(track_row).collect();
        let _ = self.ui.upgrade_in_event_loop(move |ui| {
            ui.set_playlist_model(ModelRc::from(Rc::new(VecModel::from(rows))));
        });
    }

    fn push_status_line(&self) {
        let status = self.status_line();
        let _ = self.ui.upgrade_in_event_loop(move |ui| {
            ui.set_status_text(status.into());
        });
    }

    pub fn run(&mut self) {
        loop {
            while let Ok(message) = self.bus_receiver.blocking_recv() {
                match message {
                    Message::Playlist(PlaylistMessage::ItemsChanged(items)) => {
                        debug!("UiManager: playlist now has {} items", items.len());
                        self.items = items;
                        self.push_items();
                        self.push_status_line();
                    }
                    Message::Playlist(PlaylistMessage::PlayingIndexChanged(index)) => {
                        self.playing_index = index;
                        let slint_index = index.map(|i| i as i32).unwrap_or(-1);
                        let _ = self.ui.upgrade_in_event_loop(move |ui| {
                            ui.set_playing_index(slint_index);
                        });
                        self.push_status_line();
                    }
                    Message::Playlist(PlaylistMessage::SelectedIndexChanged(index)) => {
                        let slint_index = index.map(|i| i as i32).unwrap_or(-1);
                        let _ = self.ui.upgrade_in_event_loop(move |ui| {
                            ui.set_selected_index(slint_index);
                        });
                    }
                    Message::Playback(PlaybackMessage::StatusChanged(status)) => {
                        let playing = status == PlaybackStatus::Playing;
                        let waiting = status == PlaybackStatus::Waiting;
                        let _ = self.ui.upgrade_in_event_loop(move |ui| {
                            ui.set_playing(playing);
                            if waiting {
                                ui.set_status_text("Loading...".into());
                            }
                        });
                        if status == PlaybackStatus::Ready {
                            let _ = self.ui.upgrade_in_event_loop(move |ui| {
                                ui.set_position_fraction(0.0);
                                ui.set_time_info("00:00 / 00:00".into());
                            });
                        }
                    }
                    Message::Playback(PlaybackMessage::Progress {
                        fraction,
                        elapsed_ms,
                        total_ms,
                    }) => {
                        if self.progress_limiter.check().is_err() {
                            continue;
                        }
                        let time_info: SharedString =
                            format!("{} / {}", format_time(elapsed_ms), format_time(total_ms))
                                .into();
                        let _ = self.ui.upgrade_in_event_loop(move |ui| {
                            ui.set_position_fraction(fraction);
                            ui.set_time_info(time_info);
                        });
                    }
                    Message::Playback(PlaybackMessage::PlaybackFailed { reason })
                    | Message::Playback(PlaybackMessage::DecodeFailed { reason, .. }) => {
                        let _ = self.ui.upgrade_in_event_loop(move |ui| {
                            ui.set_status_text(format!("Playback failed: {}", reason).into());
                        });
                    }
                    Message::Analysis(AnalysisMessage::SpectrumFrame(bytes)) => {
                        if self.spectrum_limiter.check().is_err() {
                            continue;
                        }
                        let bars = spectrum_bars(&bytes, SPECTRUM_BARS);
                        let _ = self.ui.upgrade_in_event_loop(move |ui| {
                            ui.set_spectrum(ModelRc::from(Rc::new(VecModel::from(bars))));
                        });
                    }
                    Message::Config(ConfigMessage::Updated(config)) => {
                        let volume = config.ui.volume;
                        let _ = self.ui.upgrade_in_event_loop(move |ui| {
                            ui.set_volume(volume);
                        });
                    }
                    _ => {} // Ignore other messages
                }
            }
        }
    }
}

fn track_row(item: &PlaylistItem) -> TrackRow {
    TrackRow {
        name: item.name.as_str().into(),
        origin: item.origin.as_str().into(),
        size_text: format_size(item.size).into(),
    }
}

fn format_time(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

fn format_size(size: i64) -> String {
    if size < 0 {
        return String::new();
    }
    let size = size as f64;
    if size >= 1024.0 * 1024.0 {
        format!("{:.1} MB", size / (1024.0 * 1024.0))
    } else if size >= 1024.0 {
        format!("{:.1} KB", size / 1024.0)
    } else {
        format!("{} B", size)
    }
}

/// Reduces a byte-frequency snapshot to `bars` heights in `0..=1`, taking the
/// loudest bin of each bucket so narrow peaks stay visible.
fn spectrum_bars(bytes: &[u8], bars: usize) -> Vec<f32> {
    if bytes.is_empty() || bars == 0 {
        return vec![0.0; bars];
    }
    let bucket = (bytes.len() + bars - 1) / bars;
    (0..bars)
        .map(|i| {
            let start = i * bucket;
            let end = ((i + 1) * bucket).min(bytes.len());
            if start >= end {
                return 0.0;
            }
            let peak = bytes[start..end].iter().copied().max().unwrap_or(0);
            f32::from(peak) / 255.0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::ItemOrigin;

    #[test]
    fn spectrum_bars_keep_narrow_peaks() {
        let mut bytes = vec![0u8; 256];
        bytes[100] = 255;
        let bars = spectrum_bars(&bytes, 32);
        assert_eq!(bars.len(), 32);
        assert_eq!(bars[100 / 8], 1.0);
        assert!(bars.iter().filter(|&&b| b > 0.0).count() == 1);
    }

    #[test]
    fn spectrum_bars_handle_short_snapshots() {
        let bars = spectrum_bars(&[255, 0], 32);
        assert_eq!(bars.len(), 32);
        assert_eq!(bars[0], 1.0);
        assert!(bars[1..].iter().all(|&b| b == 0.0));
    }

    #[test]
    fn time_and_size_formatting() {
        assert_eq!(format_time(0), "00:00");
        assert_eq!(format_time(61_000), "01:01");
        assert_eq!(format_size(-1), "");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn track_rows_carry_origin_labels() {
        let item = crate::playlist::link_item("https://radio.example/a.mp3");
        let row = track_row(&item);
        assert_eq!(row.name.as_str(), "a");
        assert_eq!(row.origin.as_str(), ItemOrigin::Link.as_str());
        assert_eq!(row.size_text.as_str(), "");
    }
}
