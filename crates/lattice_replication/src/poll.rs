//! # Poll Frequency Limiter
//!
//! Decides each tick which objects get their expensive explicit sample.
//!
//! ## Schedule
//!
//! Every object with a period `N` (in ticks) also gets a phase in `0..N`.
//! It is due on tick `t` iff `(t + phase) mod N == 0`.
//!
//! The phase writes the object index in base `N` and sums its digits
//! weighted by `1, u, u², ...` (mod `N`), where `u` is the unit of `N`
//! nearest `N / φ`:
//!
//! ```text
//! period 4 (u = 3), objects 0..8   tick: 0  1  2  3  4  5  6  7
//!   phase 0 (objects 0, 5)               ●  ·  ·  ·  ●  ·  ·  ·
//!   phase 1 (objects 1, 6)               ·  ·  ·  ●  ·  ·  ·  ●
//!   phase 2 (objects 2, 7)               ·  ·  ●  ·  ·  ·  ●  ·
//!   phase 3 (objects 3, 4)               ·  ●  ·  ·  ·  ●  ·  ·
//! ```
//!
//! - Any `N` consecutive ticks poll each object exactly once.
//! - Each aligned run of `N` indices covers every phase once.
//! - Co-period objects spaced exactly `N` apart also cover every phase,
//!   and higher digits keep wider strides from piling onto one tick.
//! - The phase depends only on `(index, period)`: not on registration
//!   order, not on the current tick, not on wall-clock time.

use lattice_core::NetBitArray;

use crate::config::ReplicationConfig;

/// Per-object poll periods and the global tick counter.
#[derive(Debug)]
pub struct PollFrequencyLimiter {
    /// Ticks between polls; 0 = no period assigned, never due.
    periods: Box<[u32]>,
    phases: Box<[u32]>,
    tick: u64,
}

impl PollFrequencyLimiter {
    /// Creates a limiter for `max_objects` dense object indices.
    ///
    /// # Panics
    ///
    /// Panics if `max_objects` is zero.
    #[must_use]
    pub fn new(max_objects: usize) -> Self {
        assert!(max_objects > 0, "max_objects must be greater than zero");
        Self {
            periods: vec![0; max_objects].into_boxed_slice(),
            phases: vec![0; max_objects].into_boxed_slice(),
            tick: 0,
        }
    }

    /// Creates a limiter sized from a validated config.
    #[must_use]
    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self::new(config.max_objects)
    }

    /// Returns the number of addressable object indices.
    #[inline]
    #[must_use]
    pub fn max_objects(&self) -> usize {
        self.periods.len()
    }

    /// Returns the number of completed [`update`](Self::update) calls.
    #[inline]
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Assigns or changes an object's poll period, in ticks.
    ///
    /// A period of 1 polls every tick; 0 clears the assignment.
    pub fn set_poll_period(&mut self, object_index: u32, period: u32) {
        let index = object_index as usize;
        if index >= self.periods.len() {
            tracing::warn!(
                object_index,
                max_objects = self.periods.len(),
                "set_poll_period past object capacity"
            );
            return;
        }
        self.periods[index] = period;
        self.phases[index] = phase_for(object_index, period);
    }

    /// Removes an object's period so it is never due.
    pub fn clear_poll_period(&mut self, object_index: u32) {
        self.set_poll_period(object_index, 0);
    }

    /// Returns the object's period, if one is assigned.
    #[must_use]
    pub fn poll_period(&self, object_index: u32) -> Option<u32> {
        self.periods
            .get(object_index as usize)
            .copied()
            .filter(|&period| period != 0)
    }

    /// Returns the object's phase within its period, if one is assigned.
    #[must_use]
    pub fn phase(&self, object_index: u32) -> Option<u32> {
        self.poll_period(object_index)
            .map(|_| self.phases[object_index as usize])
    }

    /// Advances one tick and writes the objects due this tick into `due`.
    ///
    /// Only objects set in `scope` are considered. Objects set in `paused`
    /// are skipped this tick and wait for their next natural slot.
    /// Returns the number of due objects.
    ///
    /// `due` is cleared first and grown to `max_objects` if smaller, so a
    /// caller reusing one array across ticks allocates only once.
    pub fn update(&mut self, scope: &NetBitArray, paused: &NetBitArray, due: &mut NetBitArray) -> usize {
        due.grow(self.periods.len());
        due.clear_all();

        let tick = self.tick;
        let mut due_count = 0usize;
        for object_index in scope.iter_ones() {
            let index = object_index as usize;
            if index >= self.periods.len() {
                break;
            }
            let period = self.periods[index];
            if period == 0 || paused.get(object_index) {
                continue;
            }
            if is_due(tick, period, self.phases[index]) {
                due.set(object_index);
                due_count += 1;
            }
        }

        self.tick += 1;
        due_count
    }
}

/// `2^32 / φ`, for scaling a period to its golden point.
const GOLDEN_FRACTION: u64 = 0x9E37_79B9;

/// Phase of `object_index` within `period`: base-`period` digits of the
/// index weighted by powers of [`golden_unit`].
#[allow(clippy::cast_possible_truncation)]
fn phase_for(object_index: u32, period: u32) -> u32 {
    if period <= 1 {
        return 0;
    }
    let base = u64::from(period);
    let unit = u64::from(golden_unit(period));

    let mut rest = u64::from(object_index);
    let mut weight = 1u64;
    let mut phase = 0u64;
    while rest != 0 {
        phase = (phase + (rest % base) * weight) % base;
        weight = weight * unit % base;
        rest /= base;
    }
    phase as u32
}

/// The unit of `period` (coprime to it) closest to `period / φ`.
///
/// Ties go to the larger candidate. Periods up to 2 only have the unit 1.
fn golden_unit(period: u32) -> u32 {
    if period <= 2 {
        return 1;
    }
    #[allow(clippy::cast_possible_truncation)]
    let target = ((u64::from(period) * GOLDEN_FRACTION) >> 32) as u32;
    (0..target)
        .flat_map(|offset| [target.checked_add(offset), Some(target - offset)])
        .flatten()
        .find(|&candidate| candidate < period && gcd(candidate, period) == 1)
        .unwrap_or(1)
}

const fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

#[inline]
const fn is_due(tick: u64, period: u32, phase: u32) -> bool {
    let period = period as u64;
    (tick % period + phase as u64) % period == 0
}

/// Converts an update rate into a tick period.
///
/// Rounds so the object is polled at least as often as requested.
/// Rates of zero or below (and NaN) give 0, "never polled"; rates at or
/// above `tick_rate` give 1, "every tick".
#[must_use]
pub fn period_for_frequency(update_hz: f32, tick_rate: u32) -> u32 {
    if update_hz.is_nan() || update_hz <= 0.0 {
        return 0;
    }
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let period = (tick_rate as f32 / update_hz).floor() as u32;
    period.max(1)
}
