/// Percentage of `done` over `total`, rounded and clamped to `0..=100`.
///
/// An empty total counts as fully done.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let ratio = done as f64 / total as f64 * 100.0;
    ratio.round().clamp(0.0, 100.0) as u8
}

/// Byte counter with a percentage that never moves backwards.
#[derive(Debug, Clone)]
pub struct ProgressMeter {
    total: u64,
    done: u64,
    percent: u8,
}

impl ProgressMeter {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            done: 0,
            percent: 0,
        }
    }

    /// Records `bytes` more. Returns the new percentage when it changed.
    pub fn advance(&mut self, bytes: u64) -> Option<u8> {
        self.done = self.done.saturating_add(bytes);
        let next = percent(self.done, self.total).max(self.percent);
        self.bump(next)
    }

    /// Forces 100. Returns it when the meter was below.
    pub fn finish(&mut self) -> Option<u8> {
        self.bump(100)
    }

    pub fn done(&self) -> u64 {
        self.done
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    fn bump(&mut self, next: u8) -> Option<u8> {
        if next > self.percent {
            self.percent = next;
            Some(next)
        } else {
            None
        }
    }
}
