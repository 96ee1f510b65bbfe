// Copyright (c) 2025 vivo Mobile Communication Co., Ltd.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::{
    error::{Error, Result},
    thread::ThreadFrame,
};
use core::ptr::NonNull;
use lame_kconfig::BUNDLE_SLOTS;
use log::warn;

#[derive(Default, Debug, Clone, Copy)]
pub(crate) struct Slot {
    thread: Option<NonNull<ThreadFrame>>,
    present: bool,
    cycles: u64,
    lame_count: u64,
}

impl Slot {
    #[inline]
    fn clear(&mut self) {
        self.thread = None;
        self.present = false;
        self.cycles = 0;
        self.lame_count = 0;
    }
}

/// Monotonic switching counters, readable per bundle or aggregated
/// over all workers.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleStats {
    pub total_cycles: u64,
    pub total_lames: u64,
    pub total_xsave_lames: u64,
    pub total_skips: u64,
}

impl BundleStats {
    pub(crate) fn accumulate(&mut self, other: &BundleStats) {
        self.total_cycles += other.total_cycles;
        self.total_lames += other.total_lames;
        self.total_xsave_lames += other.total_xsave_lames;
        self.total_skips += other.total_skips;
    }
}

/// A fixed-capacity ordered set of threads co-resident on one worker,
/// rotated by the asynchronous switching tick. Owned by exactly one
/// worker and only ever mutated from that worker's context.
#[derive(Debug)]
pub struct Bundle {
    slots: [Slot; BUNDLE_SLOTS],
    size: u32,
    used: u32,
    active: u32,
    enabled: bool,
    last_tick_tsc: u64,
    stats: BundleStats,
}

impl Bundle {
    pub(crate) fn new(size: u32) -> Result<Self> {
        if size == 0 || size as usize > BUNDLE_SLOTS {
            return Err(Error::InvalidConfig);
        }
        let mut bundle = Self::empty();
        bundle.size = size;
        Ok(bundle)
    }

    fn empty() -> Self {
        Self {
            slots: [Slot::default(); BUNDLE_SLOTS],
            size: 0,
            used: 0,
            active: 0,
            enabled: false,
            last_tick_tsc: 0,
            stats: BundleStats::default(),
        }
    }

    /// Reinitialises in place, keeping nothing.
    pub(crate) fn init(&mut self, size: u32) -> Result<()> {
        if size == 0 || size as usize > BUNDLE_SLOTS {
            return Err(Error::InvalidConfig);
        }
        *self = Self::empty();
        self.size = size;
        Ok(())
    }

    /// Shrinks to zero slots, leaving the bundle statically disabled.
    pub(crate) fn cleanup(&mut self) {
        *self = Self::empty();
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn used(&self) -> u32 {
        self.used
    }

    #[inline]
    pub fn active(&self) -> u32 {
        self.active
    }

    #[inline]
    pub fn is_statically_enabled(&self) -> bool {
        self.size > 1
    }

    #[inline]
    pub fn is_dynamically_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn enable(&mut self, now: u64) {
        if !self.enabled {
            self.last_tick_tsc = now;
        }
        self.enabled = true;
    }

    pub(crate) fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn stats(&self) -> BundleStats {
        self.stats
    }

    /// Places `thread` in the first empty slot. A second add of the
    /// same thread succeeds without a second membership.
    pub(crate) fn add(&mut self, thread: NonNull<ThreadFrame>, set_active: bool) -> Result<()> {
        let mut free = None;
        for i in 0..self.size as usize {
            let slot = &self.slots[i];
            if slot.present {
                if slot.thread == Some(thread) {
                    warn!("thread {:p} is already a bundle member", thread.as_ptr());
                    return Ok(());
                }
            } else if free.is_none() {
                free = Some(i);
            }
        }
        let Some(i) = free else {
            return Err(Error::NoSpace);
        };
        self.slots[i] = Slot {
            thread: Some(thread),
            present: true,
            cycles: 0,
            lame_count: 0,
        };
        self.used += 1;
        if set_active {
            self.active = i as u32;
        }
        Ok(())
    }

    pub(crate) fn remove(&mut self, thread: NonNull<ThreadFrame>) -> Result<()> {
        for i in 0..self.size as usize {
            if self.slots[i].present && self.slots[i].thread == Some(thread) {
                self.slots[i].thread = None;
                self.slots[i].present = false;
                self.used -= 1;
                return Ok(());
            }
        }
        Err(Error::NotFound)
    }

    pub(crate) fn remove_by_index(&mut self, index: u32) -> Result<()> {
        if index >= self.size {
            return Err(Error::InvalidIndex);
        }
        let slot = &mut self.slots[index as usize];
        if !slot.present {
            return Err(Error::NotFound);
        }
        slot.thread = None;
        slot.present = false;
        self.used -= 1;
        Ok(())
    }

    pub(crate) fn remove_at_active(&mut self) -> Result<()> {
        match self.remove_by_index(self.active) {
            Err(Error::InvalidIndex) => Err(Error::NotFound),
            other => other,
        }
    }

    /// The round-robin step: the first occupied slot after `active`,
    /// wrapping, becomes the new active slot. Visits each occupied
    /// slot exactly once per full rotation.
    pub(crate) fn next(&mut self) -> Option<NonNull<ThreadFrame>> {
        if self.size == 0 {
            return None;
        }
        for step in 1..=self.size {
            let i = ((self.active + step) % self.size) as usize;
            if self.slots[i].present {
                self.active = i as u32;
                self.stats.total_lames += 1;
                self.slots[i].lame_count += 1;
                return self.slots[i].thread;
            }
        }
        None
    }

    /// Rotation step for callers that keep occupied slots packed in
    /// `[0, used)`. Constant time, but unsound if the packing
    /// invariant was not maintained.
    pub(crate) fn next_fast(&mut self) -> Option<NonNull<ThreadFrame>> {
        if self.used == 0 {
            return None;
        }
        let i = ((self.active + 1) % self.used) as usize;
        self.active = i as u32;
        self.stats.total_lames += 1;
        self.slots[i].lame_count += 1;
        self.slots[i].thread
    }

    pub(crate) fn current(&self) -> Option<NonNull<ThreadFrame>> {
        let slot = &self.slots[self.active as usize];
        if slot.present {
            slot.thread
        } else {
            None
        }
    }

    /// Charges the cycles since the previous tick to the slot being
    /// switched out.
    pub(crate) fn charge_switch(&mut self, now: u64) {
        let delta = now.saturating_sub(self.last_tick_tsc);
        self.slots[self.active as usize].cycles += delta;
        self.stats.total_cycles += delta;
        self.last_tick_tsc = now;
    }

    #[inline]
    pub(crate) fn note_xsave_lame(&mut self) {
        self.stats.total_xsave_lames += 1;
    }

    #[inline]
    pub(crate) fn note_skip(&mut self) {
        self.stats.total_skips += 1;
    }

    /// Takes the thread out of slot `index` for the dismantle spill,
    /// zeroing the slot.
    pub(crate) fn take_slot(&mut self, index: u32) -> Option<NonNull<ThreadFrame>> {
        let slot = &mut self.slots[index as usize];
        if !slot.present {
            return None;
        }
        let thread = slot.thread;
        slot.clear();
        thread
    }

    /// Post-spill reset. `enabled` belongs to the gating policy and is
    /// deliberately left alone.
    pub(crate) fn reset_membership(&mut self) {
        self.used = 0;
        self.active = 0;
    }

    pub(crate) fn set_ready_false_all(&self) {
        self.for_each_member(|t| t.set_ready(false));
    }

    pub(crate) fn set_running_true_all(&self) {
        self.for_each_member(|t| t.set_running(true));
    }

    fn for_each_member(&self, f: impl Fn(&ThreadFrame)) {
        for i in 0..self.size as usize {
            if self.slots[i].present {
                if let Some(t) = self.slots[i].thread {
                    f(unsafe { t.as_ref() });
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let occupied = self.slots[..self.size as usize]
            .iter()
            .filter(|s| s.present)
            .count() as u32;
        assert_eq!(self.used, occupied);
        assert!(self.used <= self.size);
        assert!(self.size == 0 || self.active < self.size);
        for s in &self.slots[..self.size as usize] {
            assert_eq!(s.present, s.thread.is_some());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(n: usize) -> Vec<NonNull<ThreadFrame>> {
        (0..n)
            .map(|_| NonNull::from(Box::leak(Box::new(ThreadFrame::new()))))
            .collect()
    }

    #[test]
    fn test_init_bounds() {
        assert_eq!(Bundle::new(0).unwrap_err(), Error::InvalidConfig);
        assert_eq!(
            Bundle::new(BUNDLE_SLOTS as u32 + 1).unwrap_err(),
            Error::InvalidConfig
        );
        let b = Bundle::new(4).unwrap();
        assert_eq!(b.size(), 4);
        assert_eq!(b.used(), 0);
        assert_eq!(b.active(), 0);
        assert!(!b.is_dynamically_enabled());
    }

    #[test]
    fn test_add_remove_round_trip() {
        let t = frames(1);
        let mut b = Bundle::new(2).unwrap();
        b.add(t[0], false).unwrap();
        assert_eq!(b.used(), 1);
        b.check_invariants();
        b.remove(t[0]).unwrap();
        assert_eq!(b.used(), 0);
        assert_eq!(b.remove(t[0]).unwrap_err(), Error::NotFound);
        b.check_invariants();
    }

    #[test]
    fn test_duplicate_add_is_success() {
        let t = frames(1);
        let mut b = Bundle::new(2).unwrap();
        b.add(t[0], false).unwrap();
        b.add(t[0], false).unwrap();
        assert_eq!(b.used(), 1);
    }

    #[test]
    fn test_add_until_full() {
        let t = frames(3);
        let mut b = Bundle::new(2).unwrap();
        b.add(t[0], false).unwrap();
        b.add(t[1], false).unwrap();
        assert_eq!(b.add(t[2], false).unwrap_err(), Error::NoSpace);
        assert_eq!(b.used(), 2);
    }

    #[test]
    fn test_remove_by_index_bounds() {
        let mut b = Bundle::new(3).unwrap();
        assert_eq!(b.remove_by_index(3).unwrap_err(), Error::InvalidIndex);
        assert_eq!(b.remove_by_index(1).unwrap_err(), Error::NotFound);
    }

    #[test]
    fn test_rotation_visits_all_slots_once() {
        let t = frames(4);
        let mut b = Bundle::new(4).unwrap();
        for f in &t {
            b.add(*f, false).unwrap();
        }
        let order: Vec<_> = (0..4).map(|_| b.next().unwrap()).collect();
        assert_eq!(order, [t[1], t[2], t[3], t[0]]);
        assert_eq!(b.active(), 0);
        assert_eq!(b.stats().total_lames, 4);
    }

    #[test]
    fn test_rotation_skips_holes() {
        let t = frames(3);
        let mut b = Bundle::new(3).unwrap();
        for f in &t {
            b.add(*f, false).unwrap();
        }
        b.remove(t[1]).unwrap();
        assert_eq!(b.next().unwrap(), t[2]);
        assert_eq!(b.active(), 2);
        assert_eq!(b.next().unwrap(), t[0]);
        assert_eq!(b.active(), 0);
    }

    #[test]
    fn test_remove_at_active_then_next() {
        let t = frames(3);
        let mut b = Bundle::new(3).unwrap();
        b.add(t[0], false).unwrap();
        b.add(t[1], true).unwrap();
        b.add(t[2], false).unwrap();
        assert_eq!(b.active(), 1);
        b.remove_at_active().unwrap();
        assert_eq!(b.next().unwrap(), t[2]);
        assert_eq!(b.active(), 2);
    }

    #[test]
    fn test_remove_at_active_empty() {
        let mut b = Bundle::new(2).unwrap();
        assert_eq!(b.remove_at_active().unwrap_err(), Error::NotFound);
    }

    #[test]
    fn test_single_slot_rotates_in_place() {
        let t = frames(1);
        let mut b = Bundle::new(1).unwrap();
        b.add(t[0], false).unwrap();
        assert!(!b.is_statically_enabled());
        for expected in 1..=3u64 {
            assert_eq!(b.next().unwrap(), t[0]);
            assert_eq!(b.slots[0].lame_count, expected);
        }
    }

    #[test]
    fn test_next_on_empty() {
        let mut b = Bundle::new(4).unwrap();
        assert!(b.next().is_none());
        assert!(b.current().is_none());
        assert_eq!(b.stats().total_lames, 0);
    }

    #[test]
    fn test_next_fast_on_packed() {
        let t = frames(3);
        let mut b = Bundle::new(3).unwrap();
        for f in &t {
            b.add(*f, false).unwrap();
        }
        // Packed bundle: both rotations agree.
        let order: Vec<_> = (0..3).map(|_| b.next_fast().unwrap()).collect();
        assert_eq!(order, [t[1], t[2], t[0]]);
    }

    #[test]
    fn test_enable_idempotent() {
        let mut b = Bundle::new(2).unwrap();
        b.enable(10);
        b.enable(20);
        assert!(b.is_dynamically_enabled());
        // The tick origin is only stamped on the disabled→enabled edge.
        assert_eq!(b.last_tick_tsc, 10);
        b.disable();
        b.disable();
        assert!(!b.is_dynamically_enabled());
    }

    #[test]
    fn test_charge_switch_accounts_active_slot() {
        let t = frames(2);
        let mut b = Bundle::new(2).unwrap();
        b.add(t[0], false).unwrap();
        b.add(t[1], false).unwrap();
        b.enable(1000);
        b.charge_switch(1600);
        assert_eq!(b.stats().total_cycles, 600);
        assert_eq!(b.slots[0].cycles, 600);
    }

    #[test]
    fn test_bulk_flag_ops() {
        let t = frames(2);
        let mut b = Bundle::new(2).unwrap();
        b.add(t[0], false).unwrap();
        b.add(t[1], false).unwrap();
        b.set_running_true_all();
        b.set_ready_false_all();
        for f in &t {
            let tf = unsafe { f.as_ref() };
            assert!(tf.is_running());
            assert!(!tf.is_ready());
        }
    }
}
