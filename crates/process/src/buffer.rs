//! Adaptive timestamp buffer sizing.
//!
//! Client timestamps arrive skewed by clocks and network jitter. The
//! processor withholds mutations that are "too new" relative to a buffer
//! window and defers them to a later frame. The window adapts: a forced
//! miss (a deferral that held back ready work) grows it, and long quiet
//! stretches shrink it back toward the minimum.

/// Buffer window configuration, milliseconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BufferOptions {
    /// Starting window.
    pub initial_ms: f64,
    /// Smallest the window may shrink to.
    pub min_ms: f64,
    /// Largest the window may grow to.
    pub max_ms: f64,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            initial_ms: 250.0,
            min_ms: 25.0,
            max_ms: 1_000.0,
        }
    }
}

/// Frames without a miss before the window decays one step.
const DECAY_AFTER_FRAMES: u32 = 256;

/// The adaptive buffer window controller.
#[derive(Debug)]
pub struct BufferSizer {
    options: BufferOptions,
    window_ms: f64,
    clean_frames: u32,
    misses: u64,
}

impl BufferSizer {
    /// Creates a sizer with the given options.
    pub fn new(options: BufferOptions) -> Self {
        Self {
            options,
            window_ms: options.initial_ms,
            clean_frames: 0,
            misses: 0,
        }
    }

    /// The current window, milliseconds.
    pub fn window_ms(&self) -> f64 {
        self.window_ms
    }

    /// Total forced misses recorded.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Records a forced miss: a deferred mutation held ready work back.
    /// The window doubles, up to the maximum.
    pub fn record_miss(&mut self) {
        self.misses += 1;
        self.window_ms = (self.window_ms * 2.0).min(self.options.max_ms);
    }

    /// Records the end of a frame. A long streak of clean frames halves
    /// the window, down to the minimum.
    pub fn record_frame(&mut self, had_miss: bool) {
        if had_miss {
            self.clean_frames = 0;
            return;
        }
        self.clean_frames += 1;
        if self.clean_frames >= DECAY_AFTER_FRAMES {
            self.clean_frames = 0;
            self.window_ms = (self.window_ms / 2.0).max(self.options.min_ms);
        }
    }
}

impl Default for BufferSizer {
    fn default() -> Self {
        Self::new(BufferOptions::default())
    }
}
