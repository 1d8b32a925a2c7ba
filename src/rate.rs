use std::collections::VecDeque;

const DEFAULT_WINDOW_MS: u64 = 1000;

/// Sliding-window byte counter used to derive a transmission rate in
/// bits per second.
#[derive(Debug)]
pub struct RateCalculator {
    window_ms: u64,
    samples: VecDeque<(u64, usize)>,
    window_bytes: usize,
}

impl Default for RateCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_MS)
    }
}

impl RateCalculator {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            samples: VecDeque::new(),
            window_bytes: 0,
        }
    }

    pub fn update(&mut self, size: usize, now_ms: u64) {
        self.trim(now_ms);
        self.samples.push_back((now_ms, size));
        self.window_bytes += size;
    }

    /// Current rate in bits per second.
    pub fn rate(&mut self, now_ms: u64) -> u32 {
        self.trim(now_ms);
        (self.window_bytes as u64 * 8 * 1000 / self.window_ms) as u32
    }

    fn trim(&mut self, now_ms: u64) {
        while let Some(&(ts, size)) = self.samples.front() {
            if ts + self.window_ms <= now_ms {
                self.samples.pop_front();
                self.window_bytes -= size;
            } else {
                break;
            }
        }
    }
}
