use crate::units::radians_to_degrees;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use tracing::debug;

// Lets the daemon settle before the first nudge
pub const DODGE_START_DELAY_MS: u64 = 1000;
pub const DODGE_TICK_MS: u64 = 200;

pub const LONG_DODGE_TICKS: u8 = 6;
pub const SHORT_DODGE_TICKS: u8 = 2;
const LONG_DODGE_THRESHOLD_DEG: f64 = 5.0;

pub const SERVO_NEUTRAL: i8 = 0;

const_assert!(SHORT_DODGE_TICKS >= 1);
const_assert!(LONG_DODGE_TICKS > SHORT_DODGE_TICKS);

/// Identifies one started dodge sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DodgeHandle(u32);

impl DodgeHandle {
    pub fn id(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DodgeSequence {
    pub id: u32,
    pub command: i8,
    pub tick_budget: u8,
    pub remaining_ticks: u8,
    pub next_due: u64,
    pub started_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DodgeStats {
    pub total_started: u32,
    pub total_completed: u32,
    pub total_cancelled: u32,
    pub total_replaced: u32,
    pub total_ticks_sent: u32,
}

/// Decaying servo nudge schedule.
///
/// At most one sequence runs at a time: starting a dodge while another is in
/// flight replaces it. Ticks only advance when [`DodgeScheduler::poll`] is
/// called with the current time.
#[derive(Debug)]
pub struct DodgeScheduler {
    active: Option<DodgeSequence>,
    next_id: u32,
    stats: DodgeStats,
}

impl DodgeScheduler {
    pub fn new() -> Self {
        Self {
            active: None,
            next_id: 1,
            stats: DodgeStats::default(),
        }
    }

    /// Start a dodge of the given magnitude. Zero (or non-finite) magnitudes
    /// are ignored and return `None`.
    pub fn start(&mut self, magnitude_radians: f64, current_time: u64) -> Option<DodgeHandle> {
        if magnitude_radians == 0.0 || !magnitude_radians.is_finite() {
            debug!(magnitude_radians, "Ignoring dodge request");
            return None;
        }

        let sign: i8 = if magnitude_radians > 0.0 { 1 } else { -1 };
        let tick_budget = if radians_to_degrees(magnitude_radians).abs() > LONG_DODGE_THRESHOLD_DEG {
            LONG_DODGE_TICKS
        } else {
            SHORT_DODGE_TICKS
        };

        if let Some(previous) = self.active.take() {
            debug!(id = previous.id, remaining = previous.remaining_ticks, "Replacing active dodge");
            self.stats.total_replaced += 1;
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        // Servo command runs opposite to the requested sign
        self.active = Some(DodgeSequence {
            id,
            command: -sign,
            tick_budget,
            remaining_ticks: tick_budget,
            next_due: current_time + DODGE_START_DELAY_MS,
            started_at: current_time,
        });
        self.stats.total_started += 1;

        Some(DodgeHandle(id))
    }

    /// Run every tick due at `current_time` and return the servo commands to
    /// send, in order. The last tick of a sequence always yields neutral.
    pub fn poll(&mut self, current_time: u64) -> alloc::vec::Vec<i8> {
        let mut commands = alloc::vec::Vec::new();

        while let Some(sequence) = self.active.as_mut() {
            if sequence.next_due > current_time {
                break;
            }

            sequence.remaining_ticks -= 1;
            if sequence.remaining_ticks == 0 {
                sequence.command = SERVO_NEUTRAL;
            }
            commands.push(sequence.command);
            self.stats.total_ticks_sent += 1;

            if sequence.remaining_ticks == 0 {
                debug!(id = sequence.id, "Dodge complete");
                self.active = None;
                self.stats.total_completed += 1;
            } else {
                sequence.next_due += DODGE_TICK_MS;
            }
        }

        commands
    }

    /// Stop the active sequence without sending anything further.
    pub fn cancel(&mut self) -> bool {
        match self.active.take() {
            Some(sequence) => {
                debug!(id = sequence.id, remaining = sequence.remaining_ticks, "Dodge cancelled");
                self.stats.total_cancelled += 1;
                true
            }
            None => false,
        }
    }

    /// Cancel only if `handle` still names the active sequence.
    pub fn cancel_handle(&mut self, handle: DodgeHandle) -> bool {
        if self.active.as_ref().map(|s| s.id) == Some(handle.id()) {
            self.cancel()
        } else {
            false
        }
    }

    pub fn next_due(&self) -> Option<u64> {
        self.active.as_ref().map(|s| s.next_due)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn get_active(&self) -> Option<&DodgeSequence> {
        self.active.as_ref()
    }

    pub fn get_stats(&self) -> &DodgeStats {
        &self.stats
    }
}

impl Default for DodgeScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::degrees_to_radians;

    #[test]
    fn test_scheduler_creation() {
        let scheduler = DodgeScheduler::new();
        assert!(!scheduler.is_active());
        assert_eq!(scheduler.stats.total_started, 0);
        assert!(scheduler.next_due().is_none());
    }

    #[test]
    fn test_zero_magnitude_ignored() {
        let mut scheduler = DodgeScheduler::new();
        assert!(scheduler.start(0.0, 1000).is_none());
        assert!(!scheduler.is_active());
        assert!(scheduler.poll(10_000).is_empty());
    }

    #[test]
    fn test_first_tick_deferred() {
        let mut scheduler = DodgeScheduler::new();
        let current_time = 1000;
        scheduler.start(degrees_to_radians(10.0), current_time).unwrap();

        // Nothing before the start delay elapses
        assert!(scheduler.poll(current_time + DODGE_START_DELAY_MS - 1).is_empty());

        let commands = scheduler.poll(current_time + DODGE_START_DELAY_MS);
        assert_eq!(commands, vec![-1]);
        assert_eq!(
            scheduler.next_due(),
            Some(current_time + DODGE_START_DELAY_MS + DODGE_TICK_MS)
        );
    }

    #[test]
    fn test_long_dodge_decays_to_neutral() {
        let mut scheduler = DodgeScheduler::new();
        scheduler.start(degrees_to_radians(10.0), 0).unwrap();

        let commands = scheduler.poll(60_000);
        assert_eq!(commands, vec![-1, -1, -1, -1, -1, 0]);
        assert!(!scheduler.is_active());
        assert_eq!(scheduler.stats.total_completed, 1);
        assert_eq!(scheduler.stats.total_ticks_sent, 6);
    }

    #[test]
    fn test_short_negative_dodge() {
        let mut scheduler = DodgeScheduler::new();
        scheduler.start(degrees_to_radians(-3.0), 0).unwrap();

        // Negative magnitude nudges the servo positive
        let commands = scheduler.poll(60_000);
        assert_eq!(commands, vec![1, 0]);
    }

    #[test]
    fn test_exactly_five_degrees_is_short() {
        let mut scheduler = DodgeScheduler::new();
        scheduler.start(degrees_to_radians(4.999), 0).unwrap();
        assert_eq!(scheduler.get_active().unwrap().tick_budget, SHORT_DODGE_TICKS);
    }

    #[test]
    fn test_ticks_follow_cadence() {
        let mut scheduler = DodgeScheduler::new();
        scheduler.start(1.0, 0).unwrap();

        let mut sent = 0;
        let mut now = DODGE_START_DELAY_MS;
        while scheduler.is_active() {
            let commands = scheduler.poll(now);
            assert_eq!(commands.len(), 1);
            sent += 1;
            now += DODGE_TICK_MS;
        }
        assert_eq!(sent, LONG_DODGE_TICKS as usize);
    }

    #[test]
    fn test_new_dodge_replaces_active() {
        let mut scheduler = DodgeScheduler::new();
        let first = scheduler.start(1.0, 0).unwrap();
        scheduler.poll(DODGE_START_DELAY_MS);

        let second = scheduler.start(-1.0, 1500).unwrap();
        assert_ne!(first, second);
        assert_eq!(scheduler.stats.total_replaced, 1);

        // Old handle no longer cancels anything
        assert!(!scheduler.cancel_handle(first));

        let commands = scheduler.poll(60_000);
        assert_eq!(commands, vec![1, 1, 1, 1, 1, 0]);
    }

    #[test]
    fn test_cancel_stops_sends() {
        let mut scheduler = DodgeScheduler::new();
        let handle = scheduler.start(1.0, 0).unwrap();
        scheduler.poll(DODGE_START_DELAY_MS);

        assert!(scheduler.cancel_handle(handle));
        assert!(scheduler.poll(60_000).is_empty());
        assert_eq!(scheduler.stats.total_cancelled, 1);
        assert!(!scheduler.cancel());
    }
}
