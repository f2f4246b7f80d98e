use core::time::Duration;

// PIT generates 3579545 / 3 Hz input signal which we wait to receive 0xffff (65535) of before sending a timer interrupt.
// This gives us an interval of 0xffff * 3 / 3579545 seconds between each timer interrupt
// https://wiki.osdev.org/Programmable_Interval_Timer
pub const TIMER_INTERRUPT_INTERVAL: Duration =
    Duration::from_micros((10u64).pow(6) * 0xffff * 3 / 3579545);

/// Counts timer interrupts and says when an aging epoch is due.
#[derive(Clone, Copy, Debug)]
pub struct Timer {
    ticks: usize,
    aging_interval_ticks: usize,
}

impl Timer {
    pub fn new(aging_interval_ticks: usize) -> Self {
        Self {
            ticks: 0,
            aging_interval_ticks: aging_interval_ticks.max(1),
        }
    }

    pub fn ticks(&self) -> usize {
        self.ticks
    }

    pub fn uptime(&self) -> Duration {
        TIMER_INTERRUPT_INTERVAL * u32::try_from(self.ticks).unwrap_or(u32::MAX)
    }

    /// Count one interrupt. Returns whether the aging sampler should run on
    /// this tick.
    pub fn tick(&mut self) -> bool {
        self.ticks = self.ticks.wrapping_add(1);
        self.ticks % self.aging_interval_ticks == 0
    }
}
