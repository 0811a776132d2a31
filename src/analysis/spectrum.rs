//! Frequency-spectrum plugin: fixed-rate byte-frequency snapshots of the
//! shared output tap.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};
use rustfft::{num_complex::Complex, FftPlanner};

use crate::analysis::plugin::{AnalysisFrame, AnalysisPlugin, ListenerMap};
use crate::analysis::AnalysisTap;
use crate::config::AnalysisConfig;

/// Tuning shared with the frame loop; the FFT size may be changed while the
/// loop runs and takes effect on the next frame.
pub struct SpectrumSettings {
    fft_size: AtomicUsize,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
    frame_interval: Duration,
}

impl SpectrumSettings {
    pub fn set_fft_size(&self, fft_size: usize) {
        let clamped = fft_size.next_power_of_two().clamp(32, crate::analysis::MAX_TAP_WINDOW);
        self.fft_size.store(clamped, Ordering::Relaxed);
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size.load(Ordering::Relaxed)
    }
}

/// Computes byte-frequency snapshots on a frame loop, broadcasting each one
/// under the plugin name. The mapping mirrors a platform analyser node:
/// Hann window, magnitude in dB, `[min_db, max_db]` scaled to `0..=255`, with
/// exponential smoothing between frames.
pub struct SpectrumAnalyzer {
    settings: Arc<SpectrumSettings>,
    tap: Option<AnalysisTap>,
    listeners: Option<ListenerMap>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SpectrumAnalyzer {
    pub const NAME: &'static str = "spectrum";

    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            settings: Arc::new(SpectrumSettings {
                fft_size: AtomicUsize::new(config.fft_size),
                smoothing: config.smoothing,
                min_db: config.min_db,
                max_db: config.max_db,
                frame_interval: Duration::from_millis(config.frame_interval_ms),
            }),
            tap: None,
            listeners: None,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Handle for changing the FFT size between frames.
    pub fn settings(&self) -> Arc<SpectrumSettings> {
        self.settings.clone()
    }
}

impl AnalysisPlugin for SpectrumAnalyzer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn bind_listeners(&mut self, listeners: ListenerMap) {
        self.listeners = Some(listeners);
    }

    fn connect(&mut self, tap: &AnalysisTap) {
        self.tap = Some(tap.clone());
    }

    fn disconnect(&mut self) {
        self.tap = None;
    }

    fn start(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            return;
        }
        let (Some(tap), Some(listeners)) = (self.tap.clone(), self.listeners.clone()) else {
            warn!("SpectrumAnalyzer: start without tap or listeners, ignoring");
            return;
        };

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let settings = self.settings.clone();
        debug!("SpectrumAnalyzer: frame loop starting");
        self.worker = Some(thread::spawn(move || {
            let mut planner = FftPlanner::<f32>::new();
            let mut smoothed: Vec<f32> = Vec::new();
            while running.load(Ordering::SeqCst) {
                let fft_size = settings.fft_size();
                let window = tap.latest(fft_size);
                let snapshot = byte_frequency_snapshot(
                    &window,
                    &mut planner,
                    &mut smoothed,
                    settings.smoothing,
                    settings.min_db,
                    settings.max_db,
                );
                listeners.dispatch(SpectrumAnalyzer::NAME, &AnalysisFrame::Spectrum(snapshot));
                thread::sleep(settings.frame_interval);
            }
            debug!("SpectrumAnalyzer: frame loop stopped");
        }));
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("SpectrumAnalyzer: frame loop panicked");
            }
        }
    }
}

impl Drop for SpectrumAnalyzer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One analyser read: windowed FFT of the latest samples mapped to bytes.
/// `smoothed` carries the inter-frame magnitude state and is resized when the
/// FFT size changed since the previous frame.
fn byte_frequency_snapshot(
    window: &[f32],
    planner: &mut FftPlanner<f32>,
    smoothed: &mut Vec<f32>,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
) -> Vec<u8> {
    let n = window.len();
    let bins = n / 2;
    if bins == 0 {
        return Vec::new();
    }

    let mut buffer: Vec<Complex<f32>> = window
        .iter()
        .enumerate()
        .map(|(i, &sample)| {
            let hann =
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (n - 1).max(1) as f32).cos());
            Complex::new(sample * hann, 0.0)
        })
        .collect();
    planner.plan_fft_forward(n).process(&mut buffer);

    if smoothed.len() != bins {
        smoothed.clear();
        smoothed.resize(bins, 0.0);
    }

    let scale = 255.0 / (max_db - min_db);
    let mut snapshot = Vec::with_capacity(bins);
    for (state, value) in smoothed.iter_mut().zip(buffer.iter().take(bins)) {
        let magnitude = value.norm() / n as f32;
        *state = smoothing * *state + (1.0 - smoothing) * magnitude;
        let db = 20.0 * state.max(1e-10).log10();
        let byte = ((db - min_db) * scale).clamp(0.0, 255.0);
        snapshot.push(byte as u8);
    }
    snapshot
}
