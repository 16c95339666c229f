use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "AudioConfig::default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "AudioConfig::default_block_size")]
    pub block_size: usize,
    #[serde(default = "AudioConfig::default_hop_size")]
    pub hop_size: usize,
}

impl AudioConfig {
    fn default_sample_rate() -> u32 {
        44_100
    }
    fn default_block_size() -> usize {
        4096
    }
    fn default_hop_size() -> usize {
        512
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: Self::default_sample_rate(),
            block_size: Self::default_block_size(),
            hop_size: Self::default_hop_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Scan radius around the current position, in frames.
    #[serde(default = "TrackerConfig::default_search_window")]
    pub search_window: usize,
    /// Multiplicative discount on carried-forward cost per step.
    #[serde(default = "TrackerConfig::default_damping")]
    pub damping: f32,
    #[serde(default = "TrackerConfig::default_wait_penalty")]
    pub wait_penalty: f32,
    #[serde(default = "TrackerConfig::default_step_penalty")]
    pub step_penalty: f32,
    #[serde(default = "TrackerConfig::default_skip_penalty")]
    pub skip_penalty: f32,
    /// Moving-average length over raw live vectors (1 = off).
    #[serde(default = "TrackerConfig::default_smoothing_window")]
    pub smoothing_window: usize,
    /// RMS level that arms the tracker.
    #[serde(default = "TrackerConfig::default_start_threshold")]
    pub start_threshold: f32,
    /// Fire the turn this many frames before the page-end index.
    #[serde(default = "TrackerConfig::default_page_turn_offset")]
    pub page_turn_offset: usize,
    /// Frames short of the final frame that still count as finished.
    #[serde(default = "TrackerConfig::default_finish_tolerance")]
    pub finish_tolerance: usize,
    #[serde(default = "TrackerConfig::default_bpm")]
    pub bpm: u32,
    #[serde(default = "TrackerConfig::default_beats_per_measure")]
    pub beats_per_measure: u32,
}

impl TrackerConfig {
    fn default_search_window() -> usize {
        100
    }
    fn default_damping() -> f32 {
        0.96
    }
    fn default_wait_penalty() -> f32 {
        0.4
    }
    fn default_step_penalty() -> f32 {
        0.0
    }
    fn default_skip_penalty() -> f32 {
        0.2
    }
    fn default_smoothing_window() -> usize {
        1
    }
    fn default_start_threshold() -> f32 {
        0.01
    }
    fn default_page_turn_offset() -> usize {
        10
    }
    fn default_finish_tolerance() -> usize {
        5
    }
    fn default_bpm() -> u32 {
        40
    }
    fn default_beats_per_measure() -> u32 {
        4
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            search_window: Self::default_search_window(),
            damping: Self::default_damping(),
            wait_penalty: Self::default_wait_penalty(),
            step_penalty: Self::default_step_penalty(),
            skip_penalty: Self::default_skip_penalty(),
            smoothing_window: Self::default_smoothing_window(),
            start_threshold: Self::default_start_threshold(),
            page_turn_offset: Self::default_page_turn_offset(),
            finish_tolerance: Self::default_finish_tolerance(),
            bpm: Self::default_bpm(),
            beats_per_measure: Self::default_beats_per_measure(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Mean cost over the sliding window that triggers a full rescan.
    #[serde(default = "RecoveryConfig::default_threshold")]
    pub threshold: f32,
    /// Sliding-window length for the cost average.
    #[serde(default = "RecoveryConfig::default_avg_window")]
    pub avg_window: usize,
    /// Live frames kept for the rescan.
    #[serde(default = "RecoveryConfig::default_history_size")]
    pub history_size: usize,
}

impl RecoveryConfig {
    fn default_threshold() -> f32 {
        10.5
    }
    fn default_avg_window() -> usize {
        300
    }
    fn default_history_size() -> usize {
        500
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            threshold: Self::default_threshold(),
            avg_window: Self::default_avg_window(),
            history_size: Self::default_history_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Snapshot channel capacity; overflow drops the oldest entry.
    #[serde(default = "SessionConfig::default_channel_capacity")]
    pub channel_capacity: usize,
    /// Consumer polling interval in milliseconds.
    #[serde(default = "SessionConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl SessionConfig {
    fn default_channel_capacity() -> usize {
        5
    }
    fn default_poll_interval_ms() -> u64 {
        50
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel_capacity: Self::default_channel_capacity(),
            poll_interval_ms: Self::default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl AppConfig {
    fn round_f32(x: f32) -> f32 {
        (x * 1_000_000.0).round() / 1_000_000.0
    }

    fn format_f32_compact(x: f32) -> String {
        let mut s = format!("{:.6}", x);
        while s.contains('.') && s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
        if s.is_empty() { "0".to_string() } else { s }
    }

    fn rounded(mut self) -> Self {
        self.tracker.damping = Self::round_f32(self.tracker.damping);
        self.tracker.wait_penalty = Self::round_f32(self.tracker.wait_penalty);
        self.tracker.step_penalty = Self::round_f32(self.tracker.step_penalty);
        self.tracker.skip_penalty = Self::round_f32(self.tracker.skip_penalty);
        self.tracker.start_threshold = Self::round_f32(self.tracker.start_threshold);
        self.recovery.threshold = Self::round_f32(self.recovery.threshold);
        self
    }

    pub fn load_or_default(path: &str) -> Self {
        let path_obj = Path::new(path);
        if path_obj.exists() {
            match fs::read_to_string(path_obj) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(cfg) => return cfg,
                    Err(err) => {
                        eprintln!("Failed to parse config {path}: {err}. Using defaults.");
                    }
                },
                Err(err) => {
                    eprintln!("Failed to read config {path}: {err}. Using defaults.");
                }
            }
            return Self::default();
        }

        // File does not exist: write defaults and return them.
        let default_cfg = Self::default().rounded();
        if let Ok(text) = toml::to_string_pretty(&default_cfg) {
            let mut commented = String::new();
            for line in text.lines() {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    commented.push('\n');
                } else if trimmed.starts_with('[') && trimmed.ends_with(']') {
                    commented.push_str(line);
                    commented.push('\n');
                } else {
                    let mut out_line = line.to_string();
                    if let Some((lhs, rhs)) = line.split_once('=') {
                        let rhs_trim = rhs.trim();
                        let has_decimal = rhs_trim.contains('.');
                        if (has_decimal || rhs_trim.contains('e') || rhs_trim.contains('E'))
                            && !rhs_trim.contains('"')
                            && rhs_trim != "true"
                            && rhs_trim != "false"
                        {
                            if let Ok(val) = rhs_trim.parse::<f32>() {
                                let mut formatted = Self::format_f32_compact(val);
                                if has_decimal && !formatted.contains('.') {
                                    formatted.push_str(".0");
                                }
                                out_line = format!("{} = {}", lhs.trim(), formatted);
                            }
                        }
                    }
                    commented.push_str("# ");
                    commented.push_str(&out_line);
                    commented.push('\n');
                }
            }
            if let Err(err) = fs::write(path_obj, commented) {
                eprintln!("Failed to write default config to {path}: {err}");
            }
        } else {
            eprintln!("Failed to serialize default config; continuing with defaults");
        }
        default_cfg
    }
}
