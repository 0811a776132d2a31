use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, error, warn};
use rubato::{FftFixedIn, Resampler};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::analysis::AnalysisTap;
use crate::config::Config;
use crate::protocol::{DecodedTrack, Message, PlaybackMessage, PlaybackStatus};

/// Progress notifications are emitted roughly this often while playing.
const PROGRESS_INTERVAL_MS: u64 = 100;

/// State shared between the engine thread and the output stream callback.
struct SharedPlayback {
    /// Interleaved samples at the device rate/channel count.
    buffer: Mutex<Arc<Vec<f32>>>,
    /// Interleaved sample index into `buffer`; also held by the track state
    /// machine so seeks land directly in the stream callback.
    position: Arc<AtomicUsize>,
    playing: AtomicBool,
    /// Set once the ended notification for the current track went out.
    ended_sent: AtomicBool,
    total_ms: AtomicU64,
    volume_milli: AtomicU64,
}

/// Per-track playback state machine: ready -> waiting -> playing, with
/// pause/stop/seek transitions. Position is shared with the stream callback.
struct Track {
    status: PlaybackStatus,
    total_samples: usize,
    duration_ms: Option<u64>,
    channels: u16,
    position: Arc<AtomicUsize>,
}

impl Track {
    fn new(position: Arc<AtomicUsize>, channels: u16) -> Self {
        Self {
            status: PlaybackStatus::Ready,
            total_samples: 0,
            duration_ms: None,
            channels: channels.max(1),
            position,
        }
    }

    fn begin_loading(&mut self) {
        self.status = PlaybackStatus::Waiting;
        self.total_samples = 0;
        self.duration_ms = None;
        self.position.store(0, Ordering::Relaxed);
    }

    fn begin_playing(&mut self, total_samples: usize, duration_ms: Option<u64>) {
        self.status = PlaybackStatus::Playing;
        self.total_samples = total_samples;
        self.duration_ms = duration_ms;
        self.position.store(0, Ordering::Relaxed);
    }

    fn pause(&mut self) {
        if self.status == PlaybackStatus::Playing {
            self.status = PlaybackStatus::Paused;
        }
    }

    fn resume(&mut self) -> bool {
        if self.status == PlaybackStatus::Paused {
            self.status = PlaybackStatus::Playing;
            return true;
        }
        false
    }

    /// Back to ready with position reset; used for both stop and natural end.
    fn reset(&mut self) {
        self.status = PlaybackStatus::Ready;
        self.position.store(0, Ordering::Relaxed);
    }

    /// Seeks to a fraction of the duration. The input is clamped to [0, 1];
    /// when the duration is unknown the call is a no-op returning 0.
    fn seek_fraction(&mut self, fraction: f32) -> f32 {
        if self.duration_ms.is_none() || self.total_samples == 0 {
            return 0.0;
        }
        let clamped = fraction.clamp(0.0, 1.0);
        let frames = self.total_samples / self.channels as usize;
        let target_frame = ((frames as f64 * f64::from(clamped)) as usize).min(frames);
        self.position
            .store(target_frame * self.channels as usize, Ordering::Relaxed);
        clamped
    }

    fn progress(&self) -> (f32, u64, u64) {
        let total_ms = self.duration_ms.unwrap_or(0);
        if self.total_samples == 0 {
            return (0.0, 0, total_ms);
        }
        let position = self.position.load(Ordering::Relaxed).min(self.total_samples);
        let fraction = position as f32 / self.total_samples as f32;
        let elapsed_ms = (total_ms as f64 * f64::from(fraction)) as u64;
        (fraction, elapsed_ms, total_ms)
    }
}

/// Sends the ended notification unless it already went out for this track.
/// Returns true when a notification was actually sent.
fn send_ended_once(
    ended_sent: &AtomicBool,
    bus_sender: &Sender<Message>,
    natural: bool,
) -> bool {
    if ended_sent.swap(true, Ordering::SeqCst) {
        return false;
    }
    let _ = bus_sender.send(Message::Playback(PlaybackMessage::TrackEnded { natural }));
    true
}

/// Owns the single output stream, the current track, and the analysis tap fed
/// from the stream callback.
pub struct AudioPlayer {
    bus_receiver: Receiver<Message>,
    bus_sender: Sender<Message>,
    target_sample_rate: u32,
    target_channels: u16,
    device: Option<cpal::Device>,
    stream_config: Option<cpal::StreamConfig>,
    stream: Option<cpal::Stream>,
    shared: Arc<SharedPlayback>,
    track: Track,
    tap: AnalysisTap,
    /// Generation of the newest play intent; older decode results are stale.
    current_generation: u64,
}

impl AudioPlayer {
    pub fn new(
        bus_receiver: Receiver<Message>,
        bus_sender: Sender<Message>,
        tap: AnalysisTap,
        config: &Config,
    ) -> Self {
        let shared = Arc::new(SharedPlayback {
            buffer: Mutex::new(Arc::new(Vec::new())),
            position: Arc::new(AtomicUsize::new(0)),
            playing: AtomicBool::new(false),
            ended_sent: AtomicBool::new(false),
            total_ms: AtomicU64::new(0),
            volume_milli: AtomicU64::new((config.ui.volume * 1000.0) as u64),
        });

        let mut player = Self {
            bus_receiver,
            bus_sender,
            target_sample_rate: config.output.sample_rate_hz,
            target_channels: config.output.channel_count,
            device: None,
            stream_config: None,
            stream: None,
            track: Track::new(shared.position.clone(), config.output.channel_count),
            shared,
            tap,
            current_generation: 0,
        };

        player.setup_audio_device();
        player
    }

    fn setup_audio_device(&mut self) {
        let host = cpal::default_host();
        let device = match host.default_output_device() {
            Some(device) => device,
            None => {
                error!("AudioPlayer: no output device available");
                return;
            }
        };

        let preferred_rate = self.target_sample_rate;
        let preferred_channels = self.target_channels;
        let config = match device.supported_output_configs() {
            Ok(mut configs) => {
                match configs.find(|config| {
                    config.channels() == preferred_channels
                        && config.min_sample_rate().0 <= preferred_rate
                        && config.max_sample_rate().0 >= preferred_rate
                }) {
                    Some(config) => config.with_sample_rate(cpal::SampleRate(preferred_rate)),
                    None => {
                        warn!(
                            "AudioPlayer: no device config for {} Hz / {} ch, using device default",
                            preferred_rate, preferred_channels
                        );
                        match device.default_output_config() {
                            Ok(config) => config,
                            Err(e) => {
                                error!("AudioPlayer: error getting default config: {}", e);
                                return;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                error!("AudioPlayer: error getting device configs: {}", e);
                return;
            }
        };

        self.target_channels = config.channels();
        self.target_sample_rate = config.sample_rate().0;
        self.stream_config = Some(config.into());
        self.device = Some(device);
        self.track = Track::new(self.shared.position.clone(), self.target_channels);
        debug!(
            "AudioPlayer: audio device initialized, sample_rate={} channels={}",
            self.target_sample_rate, self.target_channels
        );
    }

    fn create_stream(&mut self) {
        let Some(device) = &self.device else {
            error!("AudioPlayer: cannot create stream, no audio device initialized");
            return;
        };
        let Some(config) = &self.stream_config else {
            error!("AudioPlayer: cannot create stream, no stream config set");
            return;
        };

        let shared = self.shared.clone();
        let bus_sender = self.bus_sender.clone();
        let tap = self.tap.clone();
        let channels = self.target_channels.max(1) as usize;
        let progress_step =
            (self.target_sample_rate as u64 * PROGRESS_INTERVAL_MS / 1_000).max(1) as usize * channels;

        match device.build_output_stream(
            config,
            move |output_buffer: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut mono = Vec::with_capacity(output_buffer.len() / channels);
                if !shared.playing.load(Ordering::Relaxed) {
                    output_buffer.fill(0.0);
                    mono.resize(output_buffer.len() / channels, 0.0);
                    tap.push(&mono);
                    return;
                }

                let buffer = shared.buffer.lock().unwrap().clone();
                let volume = shared.volume_milli.load(Ordering::Relaxed) as f32 / 1000.0;
                let mut position = shared.position.load(Ordering::Relaxed);
                let previous_position = position;
                let mut reached_end = false;

                for frame in output_buffer.chunks_mut(channels) {
                    if position + channels <= buffer.len() {
                        let mut frame_sum = 0.0;
                        for (slot, &sample) in frame.iter_mut().zip(&buffer[position..position + channels]) {
                            *slot = sample * volume;
                            frame_sum += sample;
                        }
                        mono.push(frame_sum / channels as f32);
                        position += channels;
                    } else {
                        frame.fill(0.0);
                        mono.push(0.0);
                        reached_end = true;
                    }
                }
                tap.push(&mono);

                if reached_end {
                    shared.playing.store(false, Ordering::Relaxed);
                    shared.position.store(0, Ordering::Relaxed);
                    send_ended_once(&shared.ended_sent, &bus_sender, true);
                    return;
                }

                shared.position.store(position, Ordering::Relaxed);
                if !buffer.is_empty() && position / progress_step != previous_position / progress_step {
                    let fraction = position as f32 / buffer.len() as f32;
                    let total_ms = shared.total_ms.load(Ordering::Relaxed);
                    let _ = bus_sender.send(Message::Playback(PlaybackMessage::Progress {
                        fraction,
                        elapsed_ms: (total_ms as f64 * f64::from(fraction)) as u64,
                        total_ms,
                    }));
                }
            },
            |err| error!("AudioPlayer: audio stream error: {}", err),
            None,
        ) {
            Ok(stream) => {
                self.stream = Some(stream);
                debug!("AudioPlayer: audio stream created");
            }
            Err(e) => error!("AudioPlayer: failed to build audio stream: {}", e),
        }
    }

    fn set_status(&mut self, status: PlaybackStatus) {
        if self.track.status != status {
            self.track.status = status;
        }
        let _ = self
            .bus_sender
            .send(Message::Playback(PlaybackMessage::StatusChanged(status)));
    }

    fn install_track(&mut self, generation: u64, decoded: DecodedTrack) {
        let prepared = match prepare_for_device(
            decoded,
            self.target_sample_rate,
            self.target_channels,
        ) {
            Ok(prepared) => prepared,
            Err(reason) => {
                error!("AudioPlayer: failed to prepare track: {}", reason);
                self.track.reset();
                let _ = self
                    .bus_sender
                    .send(Message::Playback(PlaybackMessage::PlaybackFailed { reason }));
                self.set_status(PlaybackStatus::Ready);
                return;
            }
        };

        let total_samples = prepared.samples.len();
        self.shared
            .total_ms
            .store(prepared.duration_ms.unwrap_or(0), Ordering::Relaxed);
        *self.shared.buffer.lock().unwrap() = Arc::new(prepared.samples);
        self.shared.position.store(0, Ordering::Relaxed);
        self.shared.ended_sent.store(false, Ordering::SeqCst);
        self.track.begin_playing(total_samples, prepared.duration_ms);

        if self.stream.is_none() {
            self.create_stream();
        }
        let Some(stream) = &self.stream else {
            self.track.reset();
            let _ = self.bus_sender.send(Message::Playback(PlaybackMessage::PlaybackFailed {
                reason: "no audio stream available".to_string(),
            }));
            self.set_status(PlaybackStatus::Ready);
            return;
        };
        if let Err(e) = stream.play() {
            error!("AudioPlayer: failed to start playback: {}", e);
            self.track.reset();
            let _ = self.bus_sender.send(Message::Playback(PlaybackMessage::PlaybackFailed {
                reason: e.to_string(),
            }));
            self.set_status(PlaybackStatus::Ready);
            return;
        }

        self.shared.playing.store(true, Ordering::Relaxed);
        let _ = self
            .bus_sender
            .send(Message::Playback(PlaybackMessage::TrackStarted { generation }));
        self.set_status(PlaybackStatus::Playing);
        debug!("AudioPlayer: playback started, generation {}", generation);
    }

    fn send_progress(&self) {
        let (fraction, elapsed_ms, total_ms) = self.track.progress();
        let _ = self.bus_sender.send(Message::Playback(PlaybackMessage::Progress {
            fraction,
            elapsed_ms,
            total_ms,
        }));
    }

    pub fn run(&mut self) {
        loop {
            while let Ok(message) = self.bus_receiver.blocking_recv() {
                match message {
                    Message::Playback(PlaybackMessage::LoadSource { generation, .. }) => {
                        self.current_generation = generation;
                        self.shared.playing.store(false, Ordering::Relaxed);
                        self.shared.ended_sent.store(true, Ordering::SeqCst);
                        self.track.begin_loading();
                        self.tap.clear();
                        self.set_status(PlaybackStatus::Waiting);
                    }
                    Message::Playback(PlaybackMessage::SourceDecoded { generation, track }) => {
                        if generation != self.current_generation {
                            debug!(
                                "AudioPlayer: discarding stale decode, generation {} < {}",
                                generation, self.current_generation
                            );
                            continue;
                        }
                        self.install_track(generation, track);
                    }
                    Message::Playback(PlaybackMessage::DecodeFailed { generation, reason }) => {
                        if generation != self.current_generation {
                            debug!("AudioPlayer: discarding stale decode failure");
                            continue;
                        }
                        self.track.reset();
                        let _ = self.bus_sender.send(Message::Playback(
                            PlaybackMessage::PlaybackFailed { reason },
                        ));
                        self.set_status(PlaybackStatus::Ready);
                    }
                    Message::Playback(PlaybackMessage::Play) => {
                        if self.track.resume() {
                            self.shared.playing.store(true, Ordering::Relaxed);
                            self.set_status(PlaybackStatus::Playing);
                        }
                    }
                    Message::Playback(PlaybackMessage::Pause) => {
                        if self.track.status == PlaybackStatus::Playing {
                            self.shared.playing.store(false, Ordering::Relaxed);
                            self.track.pause();
                            self.set_status(PlaybackStatus::Paused);
                        }
                    }
                    Message::Playback(PlaybackMessage::Stop) => match self.track.status {
                        PlaybackStatus::Playing | PlaybackStatus::Paused => {
                            self.shared.playing.store(false, Ordering::Relaxed);
                            send_ended_once(&self.shared.ended_sent, &self.bus_sender, false);
                            self.track.reset();
                            self.send_progress();
                            self.set_status(PlaybackStatus::Ready);
                        }
                        PlaybackStatus::Waiting => {
                            // Invalidate the in-flight load so its decode
                            // result arrives stale and never starts playback.
                            self.current_generation = self.current_generation.wrapping_add(1);
                            self.track.reset();
                            self.set_status(PlaybackStatus::Ready);
                        }
                        PlaybackStatus::Ready => {}
                    },
                    Message::Playback(PlaybackMessage::SetVolume(volume)) => {
                        let milli = (volume.clamp(0.0, 1.0) * 1000.0) as u64;
                        self.shared.volume_milli.store(milli, Ordering::Relaxed);
                    }
                    Message::Playback(PlaybackMessage::Seek(fraction)) => {
                        let applied = self.track.seek_fraction(fraction);
                        debug!("AudioPlayer: seek to {} (applied {})", fraction, applied);
                        self.send_progress();
                    }
                    Message::Playback(PlaybackMessage::TrackEnded { natural: true }) => {
                        // The stream callback already silenced output and reset
                        // the position; bring the state machine along.
                        self.track.reset();
                        self.send_progress();
                        self.set_status(PlaybackStatus::Ready);
                    }
                    _ => {} // Ignore other messages
                }
            }
            error!("AudioPlayer: receiver error, restarting loop");
        }
    }
}

/// A decoded track converted to the device's channel count and sample rate.
struct PreparedTrack {
    samples: Vec<f32>,
    duration_ms: Option<u64>,
}

fn prepare_for_device(
    decoded: DecodedTrack,
    device_rate: u32,
    device_channels: u16,
) -> Result<PreparedTrack, String> {
    let channel_adapted = adapt_channels(&decoded.samples, decoded.channels, device_channels);
    let samples = if decoded.sample_rate == device_rate {
        channel_adapted
    } else {
        resample(
            &channel_adapted,
            decoded.sample_rate,
            device_rate,
            device_channels,
        )?
    };
    Ok(PreparedTrack {
        samples,
        duration_ms: decoded.duration_ms,
    })
}

/// Maps interleaved samples between channel counts: repeats channels when
/// upmixing, averages channel groups when downmixing.
fn adapt_channels(samples: &[f32], src_channels: u16, dst_channels: u16) -> Vec<f32> {
    let src = src_channels.max(1) as usize;
    let dst = dst_channels.max(1) as usize;
    if src == dst {
        return samples.to_vec();
    }

    let frames = samples.len() / src;
    let mut adapted = Vec::with_capacity(frames * dst);
    for frame in samples.chunks_exact(src) {
        if dst > src {
            for c in 0..dst {
                adapted.push(frame[c % src]);
            }
        } else {
            // Average the source channels assigned to each output channel.
            for c in 0..dst {
                let mut sum = 0.0;
                let mut count = 0;
                let mut s = c;
                while s < src {
                    sum += frame[s];
                    count += 1;
                    s += dst;
                }
                adapted.push(sum / count as f32);
            }
        }
    }
    adapted
}

const RESAMPLE_CHUNK_FRAMES: usize = 1024;

fn resample(
    samples: &[f32],
    src_rate: u32,
    dst_rate: u32,
    channels: u16,
) -> Result<Vec<f32>, String> {
    let channels = channels.max(1) as usize;
    let frames = samples.len() / channels;

    // Deinterleave into per-channel buffers the resampler expects.
    let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (channel, &sample) in planar.iter_mut().zip(frame) {
            channel.push(sample);
        }
    }

    let mut resampler = FftFixedIn::<f32>::new(
        src_rate as usize,
        dst_rate as usize,
        RESAMPLE_CHUNK_FRAMES,
        4,
        channels,
    )
    .map_err(|e| format!("failed to create resampler: {}", e))?;

    let mut output: Vec<Vec<f32>> = vec![Vec::new(); channels];
    let mut appended = |chunks: Vec<Vec<f32>>, output: &mut Vec<Vec<f32>>| {
        for (out, chunk) in output.iter_mut().zip(chunks) {
            out.extend(chunk);
        }
    };

    let mut position = 0;
    while frames - position >= resampler.input_frames_next() {
        let need = resampler.input_frames_next();
        let chunk: Vec<&[f32]> = planar
            .iter()
            .map(|channel| &channel[position..position + need])
            .collect();
        let resampled = resampler
            .process(&chunk, None)
            .map_err(|e| format!("resampling failed: {}", e))?;
        appended(resampled, &mut output);
        position += need;
    }

    if position < frames {
        let tail: Vec<&[f32]> = planar.iter().map(|channel| &channel[position..]).collect();
        let resampled = resampler
            .process_partial(Some(&tail), None)
            .map_err(|e| format!("resampling failed: {}", e))?;
        appended(resampled, &mut output);
    }
    let flush: Option<&[&[f32]]> = None;
    let resampled = resampler
        .process_partial(flush, None)
        .map_err(|e| format!("resampling failed: {}", e))?;
    appended(resampled, &mut output);

    // Interleave back.
    let out_frames = output[0].len();
    let mut interleaved = Vec::with_capacity(out_frames * channels);
    for frame in 0..out_frames {
        for channel in &output {
            interleaved.push(channel[frame]);
        }
    }
    Ok(interleaved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};
    use tokio::sync::broadcast::{self, error::TryRecvError};

    fn test_track(total_samples: usize, duration_ms: Option<u64>, channels: u16) -> Track {
        let mut track = Track::new(Arc::new(AtomicUsize::new(0)), channels);
        track.begin_playing(total_samples, duration_ms);
        track
    }

    #[test]
    fn seek_out_of_range_equals_clamped_seek() {
        let mut track = test_track(96_000, Some(1_000), 2);
        assert_eq!(track.seek_fraction(1.5), track.seek_fraction(1.0));
        let high = track.position.load(Ordering::Relaxed);
        assert_eq!(high, 96_000);

        assert_eq!(track.seek_fraction(-0.3), track.seek_fraction(0.0));
        assert_eq!(track.position.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn seek_with_unknown_duration_returns_zero_and_keeps_position() {
        let mut track = test_track(96_000, None, 2);
        track.position.store(42, Ordering::Relaxed);
        assert_eq!(track.seek_fraction(0.5), 0.0);
        assert_eq!(track.position.load(Ordering::Relaxed), 42);
    }

    #[test]
    fn seek_positions_are_frame_aligned() {
        let mut track = test_track(10 * 2, Some(1_000), 2);
        track.seek_fraction(0.55);
        let position = track.position.load(Ordering::Relaxed);
        assert_eq!(position % 2, 0);
        assert_eq!(position, 10); // frame 5 of 10, two channels
    }

    #[test]
    fn reset_returns_to_ready_at_position_zero() {
        let mut track = test_track(96_000, Some(1_000), 2);
        track.position.store(500, Ordering::Relaxed);
        track.reset();
        assert_eq!(track.status, PlaybackStatus::Ready);
        assert_eq!(track.position.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn progress_reports_fraction_of_total() {
        let mut track = test_track(1_000, Some(2_000), 2);
        track.position.store(250, Ordering::Relaxed);
        let (fraction, elapsed_ms, total_ms) = track.progress();
        assert!((fraction - 0.25).abs() < 1e-6);
        assert_eq!(elapsed_ms, 500);
        assert_eq!(total_ms, 2_000);
    }

    #[test]
    fn ended_notification_goes_out_exactly_once() {
        let (bus_sender, mut receiver) = broadcast::channel::<Message>(16);
        let ended_sent = AtomicBool::new(false);

        assert!(send_ended_once(&ended_sent, &bus_sender, false));
        assert!(!send_ended_once(&ended_sent, &bus_sender, false));
        assert!(!send_ended_once(&ended_sent, &bus_sender, true));

        let mut ended_count = 0;
        while let Ok(message) = receiver.try_recv() {
            if matches!(message, Message::Playback(PlaybackMessage::TrackEnded { .. })) {
                ended_count += 1;
            }
        }
        assert_eq!(ended_count, 1);
    }

    #[test]
    fn pause_and_resume_round_trip() {
        let mut track = test_track(1_000, Some(1_000), 2);
        track.pause();
        assert_eq!(track.status, PlaybackStatus::Paused);
        assert!(track.resume());
        assert_eq!(track.status, PlaybackStatus::Playing);
        assert!(!track.resume());
    }

    #[test]
    fn adapt_channels_mono_to_stereo_duplicates() {
        let adapted = adapt_channels(&[0.1, 0.2], 1, 2);
        assert_eq!(adapted, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn adapt_channels_stereo_to_mono_averages() {
        let adapted = adapt_channels(&[0.2, 0.4, -1.0, 1.0], 2, 1);
        assert_eq!(adapted.len(), 2);
        assert!((adapted[0] - 0.3).abs() < 1e-6);
        assert!(adapted[1].abs() < 1e-6);
    }

    #[test]
    fn resample_changes_length_by_rate_ratio() {
        let input = vec![0.0f32; 44_100 * 2];
        let output = resample(&input, 44_100, 48_000, 2).expect("resample");
        let out_frames = output.len() / 2;
        // One second of audio; allow for resampler startup/flush slack.
        assert!((out_frames as i64 - 48_000).abs() < 4_096, "{}", out_frames);
    }

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

    #[test]
    fn stale_decode_results_are_discarded() {
        let (bus_sender, _) = broadcast::channel::<Message>(256);
        let player_receiver = bus_sender.subscribe();
        let player_sender = bus_sender.clone();
        let mut receiver = bus_sender.subscribe();
        thread::spawn(move || {
            let mut player = AudioPlayer::new(
                player_receiver,
                player_sender,
                AnalysisTap::new(),
                &Config::default(),
            );
            player.run();
        });

        let track = DecodedTrack {
            samples: vec![0.0; 4_800],
            sample_rate: 48_000,
            channels: 2,
            duration_ms: Some(50),
        };

        // A newer intent supersedes generation 1 before its decode lands.
        bus_sender
            .send(Message::Playback(PlaybackMessage::LoadSource {
                generation: 2,
                source: crate::protocol::TrackSource::Link("stale.test".to_string()),
            }))
            .expect("send");
        let waiting = wait_for_message(&mut receiver, Duration::from_secs(1), |message| {
            matches!(
                message,
                Message::Playback(PlaybackMessage::StatusChanged(PlaybackStatus::Waiting))
            )
        });
        assert!(waiting.is_some());

        bus_sender
            .send(Message::Playback(PlaybackMessage::SourceDecoded {
                generation: 1,
                track: track.clone(),
            }))
            .expect("send");
        let reaction = wait_for_message(&mut receiver, Duration::from_millis(300), |message| {
            matches!(
                message,
                Message::Playback(PlaybackMessage::TrackStarted { .. })
                    | Message::Playback(PlaybackMessage::PlaybackFailed { .. })
            )
        });
        assert!(reaction.is_none(), "stale decode must be ignored");

        // The current generation is acted on: playback starts, or fails
        // loudly when the host has no output device.
        bus_sender
            .send(Message::Playback(PlaybackMessage::SourceDecoded {
                generation: 2,
                track,
            }))
            .expect("send");
        let reaction = wait_for_message(&mut receiver, Duration::from_secs(1), |message| {
            matches!(
                message,
                Message::Playback(PlaybackMessage::TrackStarted { generation: 2 })
                    | Message::Playback(PlaybackMessage::PlaybackFailed { .. })
            )
        });
        assert!(reaction.is_some());
    }

    #[test]
    fn stop_while_loading_cancels_the_pending_decode() {
        let (bus_sender, _) = broadcast::channel::<Message>(256);
        let player_receiver = bus_sender.subscribe();
        let player_sender = bus_sender.clone();
        let mut receiver = bus_sender.subscribe();
        thread::spawn(move || {
            let mut player = AudioPlayer::new(
                player_receiver,
                player_sender,
                AnalysisTap::new(),
                &Config::default(),
            );
            player.run();
        });

        bus_sender
            .send(Message::Playback(PlaybackMessage::LoadSource {
                generation: 1,
                source: crate::protocol::TrackSource::Link("cancelled.test".to_string()),
            }))
            .expect("send");
        let waiting = wait_for_message(&mut receiver, Duration::from_secs(1), |message| {
            matches!(
                message,
                Message::Playback(PlaybackMessage::StatusChanged(PlaybackStatus::Waiting))
            )
        });
        assert!(waiting.is_some());

        bus_sender
            .send(Message::Playback(PlaybackMessage::Stop))
            .expect("send");
        let ready = wait_for_message(&mut receiver, Duration::from_secs(1), |message| {
            matches!(
                message,
                Message::Playback(PlaybackMessage::StatusChanged(PlaybackStatus::Ready))
            )
        });
        assert!(ready.is_some(), "stop while loading must report ready");

        // The decode of the stopped intent lands afterwards and must not
        // start anything.
        bus_sender
            .send(Message::Playback(PlaybackMessage::SourceDecoded {
                generation: 1,
                track: DecodedTrack {
                    samples: vec![0.0; 4_800],
                    sample_rate: 48_000,
                    channels: 2,
                    duration_ms: Some(50),
                },
            }))
            .expect("send");
        let reaction = wait_for_message(&mut receiver, Duration::from_millis(300), |message| {
            matches!(
                message,
                Message::Playback(PlaybackMessage::TrackStarted { .. })
                    | Message::Playback(PlaybackMessage::PlaybackFailed { .. })
            )
        });
        assert!(reaction.is_none(), "decode of a stopped intent must be ignored");
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let input = vec![0.25f32; 512];
        let prepared = prepare_for_device(
            DecodedTrack {
                samples: input.clone(),
                sample_rate: 48_000,
                channels: 2,
                duration_ms: Some(10),
            },
            48_000,
            2,
        )
        .expect("prepare");
        assert_eq!(prepared.samples, input);
    }
}
