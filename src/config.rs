//! Persistent application configuration model and defaults.

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    /// Audio output preferences.
    #[serde(default)]
    pub output: OutputConfig,
    /// Spectrum analyser behavior.
    #[serde(default)]
    pub analysis: AnalysisConfig,
    /// UI preferences.
    #[serde(default)]
    pub ui: UiConfig,
}

/// Output device and format preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: u32,
    #[serde(default = "default_channel_count")]
    pub channel_count: u16,
}

/// Spectrum analyser tuning, mirroring the byte-frequency mapping of a
/// platform analyser node.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AnalysisConfig {
    /// FFT window size in samples; power of two.
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    /// Interval between spectrum snapshots.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    /// Exponential smoothing applied between frames, in [0, 1).
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
    /// Magnitudes at or below this level map to byte 0.
    #[serde(default = "default_min_db")]
    pub min_db: f32,
    /// Magnitudes at or above this level map to byte 255.
    #[serde(default = "default_max_db")]
    pub max_db: f32,
}

/// UI preferences persisted between sessions.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct UiConfig {
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    #[serde(default = "default_volume")]
    pub volume: f32,
}

fn default_sample_rate_hz() -> u32 {
    48_000
}

fn default_channel_count() -> u16 {
    2
}

fn default_fft_size() -> usize {
    2048
}

fn default_frame_interval_ms() -> u64 {
    16
}

fn default_smoothing() -> f32 {
    0.8
}

fn default_min_db() -> f32 {
    -100.0
}

fn default_max_db() -> f32 {
    -30.0
}

fn default_window_width() -> u32 {
    900
}

fn default_window_height() -> u32 {
    600
}

fn default_volume() -> f32 {
    1.0
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: default_sample_rate_hz(),
            channel_count: default_channel_count(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            frame_interval_ms: default_frame_interval_ms(),
            smoothing: default_smoothing(),
            min_db: default_min_db(),
            max_db: default_max_db(),
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            window_width: default_window_width(),
            window_height: default_window_height(),
            volume: default_volume(),
        }
    }
}

/// Clamps loaded values into ranges the runtime can actually honor.
pub fn sanitize_config(config: Config) -> Config {
    let fft_size = config
        .analysis
        .fft_size
        .next_power_of_two()
        .clamp(32, 32_768);
    let smoothing = config.analysis.smoothing.clamp(0.0, 0.99);
    let min_db = config.analysis.min_db.min(config.analysis.max_db - 1.0);

    Config {
        output: OutputConfig {
            sample_rate_hz: config.output.sample_rate_hz.clamp(8_000, 192_000),
            channel_count: config.output.channel_count.clamp(1, 8),
        },
        analysis: AnalysisConfig {
            fft_size,
            frame_interval_ms: config.analysis.frame_interval_ms.clamp(4, 1_000),
            smoothing,
            min_db,
            max_db: config.analysis.max_db,
        },
        ui: UiConfig {
            window_width: config.ui.window_width.max(480),
            window_height: config.ui.window_height.max(320),
            volume: config.ui.volume.clamp(0.0, 1.0),
        },
    }
}
