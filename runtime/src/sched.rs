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

//! The switching tick and the bundle surface the surrounding runtime
//! drives. Membership operations must be called from the owning
//! worker's context; the handler entry points are reached from the
//! trap stubs.

use crate::{
    arch::{self, XsaveArea},
    bundle::BundleStats,
    error::Result,
    sites,
    support::PreemptGuard,
    sync::{SpinLock, SpinLockGuard},
    thread::ThreadFrame,
    worker::{RunQueue, Worker},
};
use core::{mem::MaybeUninit, ptr::NonNull};
use lame_kconfig::{LAME_PRETEND_CYCLES, LAME_STALL_CYCLES};
use log::error;

/// Deep-reschedule callbacks installed by the surrounding runtime.
/// The defaults do nothing, leaving the slow return path inert.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeHooks {
    pub thread_yield: fn(),
    pub thread_cede: fn(),
}

fn hook_noop() {}

impl Default for RuntimeHooks {
    fn default() -> Self {
        Self {
            thread_yield: hook_noop,
            thread_cede: hook_noop,
        }
    }
}

static HOOKS: SpinLock<RuntimeHooks> = SpinLock::new(RuntimeHooks {
    thread_yield: hook_noop,
    thread_cede: hook_noop,
});

pub fn set_runtime_hooks(hooks: RuntimeHooks) {
    *HOOKS.lock() = hooks;
}

fn hooks() -> RuntimeHooks {
    *HOOKS.lock()
}

fn corruption_abort(
    w: &Worker,
    cur: Option<NonNull<ThreadFrame>>,
    next: Option<NonNull<ThreadFrame>>,
) -> ! {
    error!(
        "bundle corrupted on worker {}: current {:?}, next {:?}",
        w.id(),
        cur,
        next
    );
    std::process::abort();
}

#[inline]
fn stall_until(deadline: u64) {
    while arch::read_tsc() < deadline {
        arch::cpu_relax();
    }
}

/// One asynchronous tick: rotate the bundle and resume the next
/// member. Entered from a trap stub with the volatile registers
/// already saved; a reentrant tick on the same worker is a bug, which
/// delivery prevents by keeping the tick masked while the handler
/// runs.
fn switch_tick(pc: u64, pretend: bool) {
    let Some(w) = Worker::current() else {
        return;
    };
    let _pg = PreemptGuard::new();
    // SAFETY: owning-worker context with the tick held off.
    let bundle = unsafe { w.bundle_mut() };
    if !bundle.is_dynamically_enabled() || bundle.used() <= 1 {
        bundle.note_skip();
        return;
    }
    let Some(cur) = bundle.current() else {
        // A hole at the active index with members present means the
        // rotation state is gone.
        corruption_abort(w, None, None);
    };
    let now = arch::read_tsc();
    bundle.charge_switch(now);
    let Some(next) = bundle.next() else {
        corruption_abort(w, Some(cur), None);
    };
    w.set_self_thread(next);
    if pretend {
        stall_until(now.wrapping_add(LAME_PRETEND_CYCLES));
    }
    let save = unsafe { cur.as_ref() }.frame_ptr();
    let load = unsafe { next.as_ref() }.frame_ptr();
    if sites::needs_xsave(pc) {
        bundle.note_xsave_lame();
        let mask = arch::active_xstate_mask();
        let mut area = MaybeUninit::<XsaveArea>::uninit();
        // SAFETY: the scratch area outlives the switch; whoever
        // switches back resumes right after `switch_frames` with the
        // area still on this stack.
        unsafe {
            arch::xsavec(&mut area, mask);
            arch::switch_frames(save, load);
            arch::xrstor(&area, mask);
        }
    } else {
        unsafe { arch::switch_frames(save, load) };
    }
}

/// The switching handler body behind the `INT`-vector stub.
#[no_mangle]
pub extern "C" fn lame_handle(pc: u64) {
    switch_tick(pc, false);
}

// Counter-overflow delivery runs the deep-reschedule check on the way
// out; the stubs return through the flags-popping exit sequence.
pub(crate) extern "C" fn lame_handle_pmu(pc: u64) {
    switch_tick(pc, false);
    lame_handle_bret_slowpath();
}

// Switch body with a fixed extra stall, for calibrating the cost of
// the switch against a known delay.
pub(crate) extern "C" fn lame_handle_pretend_pmu(pc: u64) {
    switch_tick(pc, true);
    lame_handle_bret_slowpath();
}

/// Stall body: burn a fixed cycle budget instead of switching, for
/// measurement baselines.
#[no_mangle]
pub extern "C" fn lame_stall() {
    stall_until(arch::read_tsc().wrapping_add(LAME_STALL_CYCLES));
}

/// Slow half of the counter-overflow return: if the runtime asked for
/// a deeper reschedule, run its yield or cede callback with extended
/// state saved around the call.
#[no_mangle]
pub extern "C" fn lame_handle_bret_slowpath() {
    let Some(w) = Worker::current() else {
        return;
    };
    if !w.take_resched_wanted() {
        return;
    }
    let hooks = hooks();
    let mask = arch::active_xstate_mask();
    let mut area = MaybeUninit::<XsaveArea>::uninit();
    unsafe { arch::xsavec(&mut area, mask) };
    if w.take_cede_wanted() {
        (hooks.thread_cede)();
    } else {
        (hooks.thread_yield)();
    }
    unsafe { arch::xrstor(&area, mask) };
}

/// Reconfigures the bundle's slot count, dropping all membership.
pub fn bundle_init(w: &Worker, size: u32) -> Result<()> {
    let _pg = PreemptGuard::new();
    // SAFETY: owning-worker context (holds for all membership ops
    // below).
    unsafe { w.bundle_mut() }.init(size)
}

/// Shrinks the bundle to zero slots, statically disabling it.
pub fn bundle_cleanup(w: &Worker) {
    let _pg = PreemptGuard::new();
    unsafe { w.bundle_mut() }.cleanup()
}

pub fn bundle_add(w: &Worker, thread: NonNull<ThreadFrame>, set_active: bool) -> Result<()> {
    let _pg = PreemptGuard::new();
    unsafe { w.bundle_mut() }.add(thread, set_active)
}

pub fn bundle_remove(w: &Worker, thread: NonNull<ThreadFrame>) -> Result<()> {
    let _pg = PreemptGuard::new();
    unsafe { w.bundle_mut() }.remove(thread)
}

pub fn bundle_remove_by_index(w: &Worker, index: u32) -> Result<()> {
    let _pg = PreemptGuard::new();
    unsafe { w.bundle_mut() }.remove_by_index(index)
}

pub fn bundle_remove_at_active(w: &Worker) -> Result<()> {
    let _pg = PreemptGuard::new();
    unsafe { w.bundle_mut() }.remove_at_active()
}

pub fn bundle_used_count(w: &Worker) -> u32 {
    unsafe { w.bundle_mut() }.used()
}

pub fn bundle_set_ready_false_all(w: &Worker) {
    let _pg = PreemptGuard::new();
    unsafe { w.bundle_mut() }.set_ready_false_all()
}

pub fn bundle_set_running_true_all(w: &Worker) {
    let _pg = PreemptGuard::new();
    unsafe { w.bundle_mut() }.set_running_true_all()
}

pub fn bundle_stats(w: &Worker) -> BundleStats {
    w.bundle_stats()
}

/// Opens the dynamic gate. Idempotent.
pub fn sched_enable(w: &Worker) {
    let _pg = PreemptGuard::new();
    unsafe { w.bundle_mut() }.enable(arch::read_tsc())
}

/// Closes the dynamic gate. Idempotent; membership is untouched.
pub fn sched_disable(w: &Worker) {
    let _pg = PreemptGuard::new();
    unsafe { w.bundle_mut() }.disable()
}

/// Whether a tick landing now would switch: both gates open.
pub fn sched_is_enabled(w: &Worker) -> bool {
    let bundle = unsafe { w.bundle_mut() };
    bundle.is_statically_enabled() && bundle.is_dynamically_enabled()
}

pub fn sched_is_statically_enabled(w: &Worker) -> bool {
    unsafe { w.bundle_mut() }.is_statically_enabled()
}

pub fn sched_is_dynamically_enabled(w: &Worker) -> bool {
    unsafe { w.bundle_mut() }.is_dynamically_enabled()
}

/// Returns every bundle member to the worker's run queue in slot
/// order. Called when the worker is about to give up its CPU.
pub fn sched_bundle_dismantle(w: &Worker) {
    let mut rq = w.run_queue().preempt_lock();
    w.spill_bundle(&mut rq);
}

/// Dismantle for callers already holding the worker's run-queue lock.
pub fn sched_bundle_dismantle_locked(w: &Worker, rq: &mut SpinLockGuard<'_, RunQueue>) {
    debug_assert!(w.run_queue().is_locked());
    w.spill_bundle(rq);
}

#[cfg(test)]
mod tests {
    use super::*;
    use lame_kconfig::RUNTIME_RQ_SIZE;

    fn leak_frame() -> NonNull<ThreadFrame> {
        NonNull::from(Box::leak(Box::new(ThreadFrame::new())))
    }

    fn filled_worker(id: u32, size: u32) -> (&'static Worker, Vec<NonNull<ThreadFrame>>) {
        let w = Worker::new(id, size).unwrap();
        let frames: Vec<_> = (0..size).map(|_| leak_frame()).collect();
        for f in &frames {
            bundle_add(w, *f, false).unwrap();
        }
        (w, frames)
    }

    #[test]
    fn test_gate_off_tick_skips() {
        let (w, _frames) = filled_worker(800, 4);
        Worker::set_current(w);
        let before = bundle_stats(w);
        lame_handle(0);
        let after = bundle_stats(w);
        assert_eq!(after.total_lames, before.total_lames);
        assert_eq!(after.total_skips, before.total_skips + 1);
        assert!(w.preemptable());
    }

    #[test]
    fn test_enable_disable_idempotent() {
        let (w, _frames) = filled_worker(801, 2);
        assert!(!sched_is_enabled(w));
        sched_enable(w);
        sched_enable(w);
        assert!(sched_is_enabled(w));
        assert!(sched_is_statically_enabled(w));
        assert!(sched_is_dynamically_enabled(w));
        sched_disable(w);
        sched_disable(w);
        assert!(!sched_is_dynamically_enabled(w));
        assert!(sched_is_statically_enabled(w));
    }

    #[test]
    fn test_single_slot_is_statically_disabled() {
        let w = Worker::new(802, 1).unwrap();
        sched_enable(w);
        assert!(!sched_is_enabled(w));
        assert!(sched_is_dynamically_enabled(w));
    }

    #[test]
    fn test_dismantle_spills_in_slot_order() {
        let (w, frames) = filled_worker(803, 4);
        sched_enable(w);
        sched_bundle_dismantle(w);
        assert_eq!(bundle_used_count(w), 0);
        // The gate outlives the descheduling.
        assert!(sched_is_dynamically_enabled(w));
        let spilled: Vec<_> = core::iter::from_fn(|| w.rq_pop()).collect();
        assert_eq!(spilled, frames);
        for f in &frames {
            let tf = unsafe { f.as_ref() };
            assert!(tf.is_ready());
            assert!(!tf.is_running());
            assert_ne!(tf.ready_tsc(), 0);
        }
    }

    #[test]
    fn test_dismantle_empty_is_noop() {
        let w = Worker::new(804, 4).unwrap();
        sched_bundle_dismantle(w);
        assert_eq!(w.rq_len(), 0);
        assert_eq!(bundle_used_count(w), 0);
    }

    #[test]
    fn test_dismantle_locked_variant() {
        let (w, frames) = filled_worker(805, 2);
        {
            let mut rq = w.run_queue().preempt_lock();
            sched_bundle_dismantle_locked(w, &mut rq);
        }
        assert_eq!(bundle_used_count(w), 0);
        assert_eq!(w.rq_len(), frames.len() as u32);
    }

    #[test]
    fn test_dismantle_overflow_preserves_fifo() {
        let (w, frames) = filled_worker(806, 4);
        let filler: Vec<_> = (0..RUNTIME_RQ_SIZE - 1).map(|_| leak_frame()).collect();
        for f in &filler {
            w.rq_push(*f);
        }
        sched_bundle_dismantle(w);
        // One member fits in the queue, the rest wait on the overflow
        // list until pops make room.
        assert_eq!(w.rq_len(), RUNTIME_RQ_SIZE as u32);
        assert_eq!(w.run_queue().preempt_lock().overflow_len(), 3);
        let drained: Vec<_> = core::iter::from_fn(|| w.rq_pop()).collect();
        let expected: Vec<_> = filler.iter().chain(frames.iter()).copied().collect();
        assert_eq!(drained, expected);
    }

    #[test]
    fn test_slowpath_without_request_is_inert() {
        let w = Worker::new(807, 2).unwrap();
        Worker::set_current(w);
        lame_handle_bret_slowpath();
        assert!(w.preemptable());
    }

    #[test]
    fn test_slowpath_routes_yield_and_cede() {
        use core::sync::atomic::{AtomicU32, Ordering};
        static YIELDS: AtomicU32 = AtomicU32::new(0);
        static CEDES: AtomicU32 = AtomicU32::new(0);
        fn count_yield() {
            YIELDS.fetch_add(1, Ordering::SeqCst);
        }
        fn count_cede() {
            CEDES.fetch_add(1, Ordering::SeqCst);
        }
        if !std::arch::is_x86_feature_detected!("xsavec") {
            return;
        }
        let w = Worker::new(808, 2).unwrap();
        Worker::set_current(w);
        set_runtime_hooks(RuntimeHooks {
            thread_yield: count_yield,
            thread_cede: count_cede,
        });
        w.set_resched_wanted(true);
        lame_handle_bret_slowpath();
        assert_eq!(YIELDS.load(Ordering::SeqCst), 1);
        w.set_resched_wanted(true);
        w.set_cede_wanted(true);
        lame_handle_bret_slowpath();
        assert_eq!(CEDES.load(Ordering::SeqCst), 1);
        set_runtime_hooks(RuntimeHooks::default());
    }
}
