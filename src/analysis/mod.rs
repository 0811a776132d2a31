//! Shared audio tap and the plugin master that fans analysis out to it.

mod plugin;
mod spectrum;

pub use plugin::{AnalysisFrame, AnalysisPlugin, Listener, ListenerMap};
pub use spectrum::{SpectrumAnalyzer, SpectrumSettings};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::debug;

/// Largest window any plugin may request from a tap.
pub const MAX_TAP_WINDOW: usize = 32_768;

/// Ring of the most recent mono output samples, written by the output stream
/// callback and read by analysis plugins.
///
/// Cloning a tap yields another handle onto the same ring, so any number of
/// plugins can read it concurrently without consuming each other's data.
#[derive(Clone)]
pub struct AnalysisTap {
    ring: Arc<Mutex<VecDeque<f32>>>,
}

impl AnalysisTap {
    pub fn new() -> Self {
        Self {
            ring: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_TAP_WINDOW))),
        }
    }

    /// Appends rendered mono samples, discarding the oldest beyond the window.
    pub fn push(&self, samples: &[f32]) {
        let mut ring = self.ring.lock().unwrap();
        for &sample in samples {
            if ring.len() == MAX_TAP_WINDOW {
                ring.pop_front();
            }
            ring.push_back(sample);
        }
    }

    /// Copies out the latest `n` samples, zero-padded at the front when fewer
    /// have been rendered so far.
    pub fn latest(&self, n: usize) -> Vec<f32> {
        let ring = self.ring.lock().unwrap();
        let available = ring.len().min(n);
        let mut window = vec![0.0; n - available];
        window.extend(ring.iter().skip(ring.len() - available));
        window
    }

    pub fn clear(&self) {
        self.ring.lock().unwrap().clear();
    }
}

/// Owns the shared tap, the registered plugins, and the name-keyed listener
/// map; wires every new playback tap into all registered plugins.
pub struct AnalysisMaster {
    tap: AnalysisTap,
    plugins: Vec<Box<dyn AnalysisPlugin>>,
    listeners: ListenerMap,
}

impl AnalysisMaster {
    pub fn new() -> Self {
        Self {
            tap: AnalysisTap::new(),
            plugins: Vec::new(),
            listeners: ListenerMap::new(),
        }
    }

    /// Appends a plugin and binds its broadcast target to the shared dispatch
    /// map. Two plugins may share a name; listeners are keyed by name, so the
    /// later `on` registration for that name receives the frames.
    pub fn register_plugin(&mut self, mut plugin: Box<dyn AnalysisPlugin>) {
        debug!("AnalysisMaster: registering plugin {}", plugin.name());
        plugin.bind_listeners(self.listeners.clone());
        self.plugins.push(plugin);
    }

    /// Overwrites the listener for a plugin name.
    pub fn on(&self, name: &str, listener: Listener) {
        self.listeners.set(name, listener);
    }

    /// Connects every registered plugin to the shared tap, starts them, and
    /// returns a tap handle for the playback engine to feed.
    pub fn create_track_tap(&mut self) -> AnalysisTap {
        for plugin in &mut self.plugins {
            plugin.connect(&self.tap);
            plugin.start();
        }
        self.tap.clone()
    }

    /// Stops, disconnects, and clears all plugins. The tap itself survives.
    pub fn reset(&mut self) {
        debug!("AnalysisMaster: reset, dropping {} plugins", self.plugins.len());
        for plugin in &mut self.plugins {
            plugin.stop();
            plugin.disconnect();
        }
        self.plugins.clear();
        self.listeners.clear();
    }
}
