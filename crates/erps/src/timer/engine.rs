//! Arena-based timer engine driven by an explicit clock.

use crate::debug_log;
use serde::Serialize;

/// Reference to a timer slot. Handles to released slots are stale and
/// every operation on them is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    index: usize,
    generation: u64,
}

/// Counters of a single timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimerStats {
    pub fired: u64,
    /// Periods skipped because the engine woke up late.
    pub missed: u64,
}

#[derive(Debug)]
struct Slot<T> {
    name: &'static str,
    payload: T,
    period_ms: u64,
    repeat: bool,
    deadline: Option<u64>,
    stats: TimerStats,
    generation: u64,
    in_use: bool,
}

/// Cooperative timer service.
///
/// Timers never fire on their own. The owner advances the clock through
/// [`TimerEngine::next_expired`], which hands back the payload of one expired
/// timer at a time. Handling an event may start or stop other timers before
/// the next one is popped.
#[derive(Debug)]
pub struct TimerEngine<T: Copy> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    now: u64,
}

impl<T: Copy> Default for TimerEngine<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> TimerEngine<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            now: 0,
        }
    }

    /// Current engine time in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.now
    }

    /// Moves the clock forward. The clock never goes backwards.
    pub fn set_now(&mut self, now_ms: u64) {
        if now_ms > self.now {
            self.now = now_ms;
        }
    }

    /// Allocates an idle timer carrying `payload`.
    pub fn allocate(&mut self, name: &'static str, payload: T) -> TimerHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.name = name;
            slot.payload = payload;
            slot.period_ms = 0;
            slot.repeat = false;
            slot.deadline = None;
            slot.stats = TimerStats::default();
            slot.in_use = true;
            return TimerHandle {
                index,
                generation: slot.generation,
            };
        }

        self.slots.push(Slot {
            name,
            payload,
            period_ms: 0,
            repeat: false,
            deadline: None,
            stats: TimerStats::default(),
            generation: 0,
            in_use: true,
        });
        TimerHandle {
            index: self.slots.len() - 1,
            generation: 0,
        }
    }

    /// Stops the timer and returns its slot to the free list.
    pub fn release(&mut self, handle: TimerHandle) {
        if let Some(slot) = self.slot_mut(handle) {
            slot.deadline = None;
            slot.in_use = false;
            slot.generation += 1;
            self.free.push(handle.index);
        }
    }

    /// (Re)starts the timer to expire `period_ms` from now.
    pub fn start(&mut self, handle: TimerHandle, period_ms: u64, repeat: bool) {
        let now = self.now;
        if let Some(slot) = self.slot_mut(handle) {
            slot.period_ms = period_ms;
            slot.repeat = repeat;
            slot.deadline = Some(now + period_ms);
            debug_log!("TimerEngine", timer = slot.name, period_ms, repeat, "started");
        }
    }

    /// Restarts a one-shot timer with `min_remaining_ms` unless it is already
    /// running with at least that much time left.
    pub fn extend(&mut self, handle: TimerHandle, min_remaining_ms: u64) {
        let remaining = self.remaining_ms(handle);
        if remaining.map_or(true, |left| left < min_remaining_ms) {
            self.start(handle, min_remaining_ms, false);
        }
    }

    pub fn stop(&mut self, handle: TimerHandle) {
        if let Some(slot) = self.slot_mut(handle) {
            if slot.deadline.take().is_some() {
                debug_log!("TimerEngine", timer = slot.name, "stopped");
            }
        }
    }

    pub fn is_active(&self, handle: TimerHandle) -> bool {
        self.slot(handle).is_some_and(|slot| slot.deadline.is_some())
    }

    /// Milliseconds until expiry, or `None` if the timer is idle.
    pub fn remaining_ms(&self, handle: TimerHandle) -> Option<u64> {
        self.slot(handle)
            .and_then(|slot| slot.deadline)
            .map(|deadline| deadline.saturating_sub(self.now))
    }

    pub fn stats(&self, handle: TimerHandle) -> Option<TimerStats> {
        self.slot(handle).map(|slot| slot.stats)
    }

    /// Earliest deadline of any running timer.
    pub fn next_deadline(&self) -> Option<u64> {
        self.slots
            .iter()
            .filter(|slot| slot.in_use)
            .filter_map(|slot| slot.deadline)
            .min()
    }

    /// Pops the earliest timer that expires at or before `until`, advancing
    /// the clock to its deadline. Ties go to the lower slot index.
    pub fn next_expired(&mut self, until: u64) -> Option<T> {
        let (index, deadline) = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.in_use)
            .filter_map(|(index, slot)| slot.deadline.map(|d| (index, d)))
            .filter(|&(_, d)| d <= until)
            .min_by_key(|&(index, d)| (d, index))?;

        self.set_now(deadline);
        let now = self.now;
        let slot = &mut self.slots[index];
        slot.stats.fired += 1;

        if slot.repeat && slot.period_ms > 0 {
            let mut next = deadline + slot.period_ms;
            while next <= now {
                next += slot.period_ms;
                slot.stats.missed += 1;
            }
            slot.deadline = Some(next);
        } else {
            slot.deadline = None;
        }

        debug_log!("TimerEngine", timer = slot.name, now, "expired");
        Some(slot.payload)
    }

    fn slot(&self, handle: TimerHandle) -> Option<&Slot<T>> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.in_use && slot.generation == handle.generation)
    }

    fn slot_mut(&mut self, handle: TimerHandle) -> Option<&mut Slot<T>> {
        self.slots
            .get_mut(handle.index)
            .filter(|slot| slot.in_use && slot.generation == handle.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_one_shot_fires_once() {
        let mut engine = TimerEngine::new();
        let h = engine.allocate("guard", 7u32);
        engine.start(h, 100, false);

        assert_eq!(engine.next_expired(99), None);
        assert_eq!(engine.next_expired(100), Some(7));
        assert!(!engine.is_active(h));
        assert_eq!(engine.next_expired(1000), None);
        assert_eq!(engine.stats(h).unwrap().fired, 1);
    }

    #[test]
    fn test_periodic_counts_missed_periods() {
        let mut engine = TimerEngine::new();
        let h = engine.allocate("tx", 1u32);
        engine.start(h, 5000, true);

        engine.set_now(17_000);
        assert_eq!(engine.next_expired(17_000), Some(1));
        // Woke at 17000 for the 5000 deadline: 10000 and 15000 were missed.
        assert_eq!(engine.remaining_ms(h), Some(3000));
        assert_eq!(engine.stats(h).unwrap(), TimerStats { fired: 1, missed: 2 });
    }

    #[test]
    fn test_stepwise_expiry_order() {
        let mut engine = TimerEngine::new();
        let a = engine.allocate("a", 'a');
        let b = engine.allocate("b", 'b');
        let c = engine.allocate("c", 'c');
        engine.start(a, 300, false);
        engine.start(b, 100, false);
        engine.start(c, 100, false);

        assert_eq!(engine.next_expired(1000), Some('b'));
        assert_eq!(engine.now_ms(), 100);
        assert_eq!(engine.next_expired(1000), Some('c'));
        assert_eq!(engine.next_expired(1000), Some('a'));
        assert_eq!(engine.now_ms(), 300);
    }

    #[test]
    fn test_extend_keeps_longer_deadline() {
        let mut engine = TimerEngine::new();
        let h = engine.allocate("hoff", ());
        engine.start(h, 1000, false);
        engine.extend(h, 500);
        assert_eq!(engine.remaining_ms(h), Some(1000));
        engine.extend(h, 2000);
        assert_eq!(engine.remaining_ms(h), Some(2000));

        engine.stop(h);
        engine.extend(h, 10);
        assert!(engine.is_active(h));
    }

    #[test]
    fn test_stale_handle_is_ignored() {
        let mut engine = TimerEngine::new();
        let old = engine.allocate("wtr", 1u8);
        engine.release(old);
        let new = engine.allocate("wtb", 2u8);

        engine.start(old, 10, false);
        assert!(!engine.is_active(new));
        assert_eq!(engine.next_deadline(), None);

        engine.start(new, 10, false);
        assert_eq!(engine.next_deadline(), Some(10));
        assert_eq!(engine.next_expired(10), Some(2));
    }

    #[test]
    fn test_stopping_sibling_prevents_firing() {
        let mut engine = TimerEngine::new();
        let a = engine.allocate("a", 'a');
        let b = engine.allocate("b", 'b');
        engine.start(a, 50, false);
        engine.start(b, 50, false);

        assert_eq!(engine.next_expired(50), Some('a'));
        engine.stop(b);
        assert_eq!(engine.next_expired(50), None);
    }
}
