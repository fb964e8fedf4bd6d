//! Pattern rotation on a shared time grid.
//!
//! Transition boundaries sit on absolute multiples of the transition period,
//! so two boards whose clocks agree flip at the same instant no matter when
//! they booted. A peer can pull the next boundary elsewhere with a countdown
//! hint; the last hint received wins.

use log::{debug, info};

use crate::LogicalTime;

/// Mutable part of the schedule, created on the first tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleState {
    /// Index into the pattern rotation
    pub current_index: usize,
    /// Logical time at which the rotation advances next
    pub next_transition: LogicalTime,
}

/// Decides which pattern is current and how bright to show it.
#[derive(Debug, Clone)]
pub struct PatternScheduler {
    pattern_count: usize,
    period: LogicalTime,
    min_intensity: u8,
    max_intensity: u8,
    state: Option<ScheduleState>,
}

impl PatternScheduler {
    /// Rotate through `pattern_count` patterns, one per `period`.
    ///
    /// Zero values are bumped to one.
    pub fn new(pattern_count: usize, period: LogicalTime) -> Self {
        Self {
            pattern_count: pattern_count.max(1),
            period: period.max(1),
            min_intensity: 0,
            max_intensity: 5,
            state: None,
        }
    }

    /// Set the fade range used by [`Self::brightness`]
    pub fn with_intensity(mut self, min: u8, max: u8) -> Self {
        self.min_intensity = min.min(max);
        self.max_intensity = max;
        self
    }

    /// Current state, `None` until the first tick or hint
    pub fn state(&self) -> Option<ScheduleState> {
        self.state
    }

    /// Index of the pattern currently in rotation
    pub fn current_index(&self) -> usize {
        self.state.map_or(0, |state| state.current_index)
    }

    /// Time left until the next boundary, `None` before the first tick
    pub fn countdown(&self, now: LogicalTime) -> Option<LogicalTime> {
        self.state
            .map(|state| state.next_transition.saturating_sub(now))
    }

    /// Advance the rotation if `now` has reached the next boundary.
    ///
    /// The first call only initialises the schedule. A late call that skipped
    /// several boundaries still advances by exactly one. Returns whether the
    /// rotation advanced.
    pub fn tick(&mut self, now: LogicalTime) -> bool {
        let Some(state) = self.state.as_mut() else {
            let initial = self.initial_state(now);
            debug!(
                "Schedule starts at pattern {}, next transition at {}",
                initial.current_index, initial.next_transition
            );
            self.state = Some(initial);
            return false;
        };

        if now < state.next_transition {
            return false;
        }

        state.current_index = (state.current_index + 1) % self.pattern_count;
        state.next_transition = next_boundary(now, self.period);
        info!(
            "Time {}: switched to pattern {}, next transition at {}",
            now, state.current_index, state.next_transition
        );
        true
    }

    /// Adopt a peer's countdown: the next transition happens at `now + countdown`.
    pub fn accept_time_hint(&mut self, countdown: LogicalTime, now: LogicalTime) {
        let initial = self.initial_state(now);
        let state = self.state.get_or_insert(initial);
        let adopted = now.saturating_add(countdown);
        if state.next_transition != adopted {
            debug!(
                "Adopting time hint: next transition {} -> {}",
                state.next_transition, adopted
            );
        }
        state.next_transition = adopted;
    }

    /// Display intensity at `now`.
    ///
    /// Ramps linearly from the minimum at a boundary to the maximum a quarter
    /// period away, on both sides of every boundary, and holds the maximum in
    /// between.
    pub fn brightness(&self, now: LogicalTime) -> u8 {
        let ramp = self.period / 4;
        if ramp == 0 {
            return self.max_intensity;
        }

        let next = self
            .state
            .map_or_else(|| next_boundary(now, self.period), |s| s.next_transition);
        let period = i128::from(self.period);
        let ahead = (i128::from(next) - i128::from(now)).rem_euclid(period) as LogicalTime;
        let distance = ahead.min(self.period - ahead);

        if distance >= ramp {
            return self.max_intensity;
        }
        let span = LogicalTime::from(self.max_intensity - self.min_intensity);
        self.min_intensity + (span * distance / ramp) as u8
    }

    fn initial_state(&self, now: LogicalTime) -> ScheduleState {
        let next_transition = next_boundary(now, self.period);
        let slot = next_transition / self.period;
        ScheduleState {
            current_index: (slot % self.pattern_count as LogicalTime) as usize,
            next_transition,
        }
    }
}

/// Smallest multiple of `period` strictly greater than `now`
fn next_boundary(now: LogicalTime, period: LogicalTime) -> LogicalTime {
    (now / period + 1) * period
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_tick_does_not_advance() {
        let mut scheduler = PatternScheduler::new(4, 4_000);
        assert!(!scheduler.tick(8_000));
        let state = scheduler.state().unwrap();
        assert_eq!(state.next_transition, 12_000);
        assert_eq!(state.current_index, 3);
    }

    #[test]
    fn test_boards_booting_apart_agree() {
        let mut early = PatternScheduler::new(4, 4_000);
        let mut late = PatternScheduler::new(4, 4_000);
        early.tick(1_000);
        for now in (1_100..=6_500).step_by(100) {
            early.tick(now);
        }
        late.tick(6_500);
        assert_eq!(early.state(), late.state());
    }

    #[test]
    fn test_time_hint_moves_next_transition() {
        let mut scheduler = PatternScheduler::new(4, 4_000);
        scheduler.accept_time_hint(4, 100);
        assert_eq!(scheduler.state().unwrap().next_transition, 104);
        let index = scheduler.current_index();

        assert!(!scheduler.tick(103));
        assert_eq!(scheduler.current_index(), index);
        assert!(scheduler.tick(104));
        assert_eq!(scheduler.current_index(), (index + 1) % 4);
    }

    #[test]
    fn test_last_hint_wins() {
        let mut scheduler = PatternScheduler::new(4, 4_000);
        scheduler.tick(0);
        scheduler.accept_time_hint(3_000, 500);
        scheduler.accept_time_hint(200, 600);
        assert_eq!(scheduler.countdown(600), Some(200));
    }

    #[test]
    fn test_advance_realigns_to_grid() {
        let mut scheduler = PatternScheduler::new(4, 4_000);
        scheduler.tick(0);
        scheduler.accept_time_hint(1_234, 1_000);
        assert!(scheduler.tick(2_234));
        assert_eq!(scheduler.state().unwrap().next_transition, 4_000);
    }

    #[test]
    fn test_skipped_boundaries_advance_once() {
        let mut scheduler = PatternScheduler::new(5, 10);
        scheduler.tick(0);
        let before = scheduler.current_index();
        assert!(scheduler.tick(95));
        assert_eq!(scheduler.current_index(), (before + 1) % 5);
        assert_eq!(scheduler.state().unwrap().next_transition, 100);
    }

    #[test]
    fn test_brightness_fades_around_boundary() {
        let mut scheduler = PatternScheduler::new(4, 4_000).with_intensity(0, 5);
        scheduler.tick(2_000);
        assert_eq!(scheduler.brightness(4_000), 0);
        assert_eq!(scheduler.brightness(3_800), 1);
        assert_eq!(scheduler.brightness(3_500), 2);
        assert_eq!(scheduler.brightness(3_000), 5);
        assert_eq!(scheduler.brightness(2_000), 5);
        // the boundary before `next` fades the same way
        assert_eq!(scheduler.brightness(200), 1);
    }

    #[test]
    fn test_brightness_before_first_tick_uses_grid() {
        let scheduler = PatternScheduler::new(4, 4_000);
        assert_eq!(scheduler.brightness(8_000), 0);
        assert_eq!(scheduler.brightness(10_000), 5);
    }

    proptest! {
        #[test]
        fn prop_one_advance_per_boundary(
            period in 1u64..200,
            start in 0u64..10_000,
            steps in prop::collection::vec(1u64..200, 1..100),
        ) {
            let count = 5;
            let mut scheduler = PatternScheduler::new(count, period);
            scheduler.tick(start);
            let first = scheduler.current_index();

            let mut now = start;
            let mut advances = 0;
            for step in steps {
                // never cross more than one boundary per tick
                now += step.min(period);
                let crossed = now / period != (now - step.min(period)) / period;
                let advanced = scheduler.tick(now);
                prop_assert_eq!(advanced, crossed);
                prop_assert!(!scheduler.tick(now));
                if advanced {
                    advances += 1;
                }
            }
            prop_assert_eq!(advances as u64, now / period - start / period);
            prop_assert_eq!(scheduler.current_index(), (first + advances) % count);
        }

        #[test]
        fn prop_brightness_symmetric_and_flat(
            period in 8u64..10_000,
            start in 0u64..100_000,
            offset in 0u64..10_000,
        ) {
            let mut scheduler = PatternScheduler::new(3, period).with_intensity(0, 5);
            scheduler.tick(start);
            let boundary = scheduler.state().unwrap().next_transition;
            let d = offset % period;

            prop_assert_eq!(
                scheduler.brightness(boundary - d),
                scheduler.brightness(boundary + d)
            );
            if d > period / 4 && period - d > period / 4 {
                prop_assert_eq!(scheduler.brightness(boundary + d), 5);
            }
        }

        #[test]
        fn prop_brightness_changes_by_at_most_one_level(
            period in 40u64..10_000,
            start in 0u64..100_000,
        ) {
            let mut scheduler = PatternScheduler::new(3, period).with_intensity(0, 5);
            scheduler.tick(start);
            let boundary = scheduler.state().unwrap().next_transition;
            let mut previous = scheduler.brightness(boundary - period);
            for now in boundary - period + 1..=boundary + period {
                let level = scheduler.brightness(now);
                prop_assert!(level.abs_diff(previous) <= 1);
                previous = level;
            }
        }
    }
}
