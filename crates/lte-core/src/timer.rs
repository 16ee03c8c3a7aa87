/// Millisecond timer stepped once per TTI.
/// A timeout of 0 means the timer never expires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MacTimer {
    timeout: u32,
    counter: u32,
    running: bool,
}

impl MacTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timeout and rewinds the counter. Does not start the timer.
    pub fn set(&mut self, timeout: u32) {
        self.timeout = timeout;
        self.counter = 0;
    }

    pub fn run(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Rewinds the counter without touching the running flag
    pub fn reset(&mut self) {
        self.counter = 0;
    }

    /// Advances the timer by one TTI. Returns true exactly once, on the step that
    /// reaches the timeout, after which the timer is stopped.
    pub fn step(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.counter = self.counter.saturating_add(1);
        if self.timeout > 0 && self.counter >= self.timeout {
            self.running = false;
            return true;
        }
        false
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_expired(&self) -> bool {
        self.timeout > 0 && self.counter >= self.timeout
    }

    pub fn timeout(&self) -> u32 {
        self.timeout
    }

    pub fn elapsed(&self) -> u32 {
        self.counter
    }
}
