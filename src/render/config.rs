//! Engine configuration
//!
//! Loaded from JSON with every field optional; missing fields take the
//! defaults below.

use serde::{Deserialize, Serialize};

/// Tunables for a `RenderEngine`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on concurrent render workers
    pub worker_threads: usize,
    /// Threads for the CPU fallback (0 = one per core)
    pub cpu_threads: usize,
    /// Largest accepted width or height
    pub max_dimension: u32,
    /// Longest edge of a preview render at display scale 1.0
    pub preview_max_edge: u32,
    /// Render on the CPU when no GPU is available
    pub cpu_fallback: bool,
    /// How long shutdown waits for running workers
    pub shutdown_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            cpu_threads: 0,
            max_dimension: 16384,
            preview_max_edge: 2560,
            cpu_fallback: true,
            shutdown_timeout_ms: 2000,
        }
    }
}

impl EngineConfig {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Longest edge allowed for a preview at the given display scale
    pub fn preview_edge(&self, display_scale: f32) -> u32 {
        let scale = if display_scale.is_finite() && display_scale > 0.0 {
            display_scale
        } else {
            1.0
        };
        ((self.preview_max_edge as f32 * scale).round() as u32).max(1)
    }
}
