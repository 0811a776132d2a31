//! Analysis plugin capability and listener fan-out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::analysis::AnalysisTap;

/// Payload broadcast by an analysis plugin, tagged per plugin kind.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisFrame {
    /// Byte-frequency snapshot, one byte per bin.
    Spectrum(Vec<u8>),
}

pub type Listener = Box<dyn Fn(&AnalysisFrame) + Send + Sync>;

/// Name-keyed dispatch map shared between the master and its plugins.
///
/// Exactly one listener per plugin name: setting a listener for a name
/// replaces the previous one, so the last registration wins.
#[derive(Clone, Default)]
pub struct ListenerMap {
    inner: Arc<Mutex<HashMap<String, Listener>>>,
}

impl ListenerMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, listener: Listener) {
        self.inner
            .lock()
            .unwrap()
            .insert(name.to_string(), listener);
    }

    pub fn dispatch(&self, name: &str, frame: &AnalysisFrame) {
        if let Some(listener) = self.inner.lock().unwrap().get(name) {
            listener(frame);
        }
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

/// A named analysis capability bound to the shared output tap.
///
/// Lifecycle: `bind_listeners` and `connect` wire the plugin up, `start`
/// begins its sampling loop, `stop` halts it. `stop` and `disconnect` must be
/// safe to call repeatedly and on a plugin that never started.
pub trait AnalysisPlugin: Send {
    fn name(&self) -> &str;
    /// Gives the plugin the shared dispatch map it broadcasts through.
    fn bind_listeners(&mut self, listeners: ListenerMap);
    /// Attaches the plugin to a tap. Non-exclusive: several plugins may read
    /// the same tap.
    fn connect(&mut self, tap: &AnalysisTap);
    fn disconnect(&mut self);
    fn start(&mut self);
    fn stop(&mut self);
}
