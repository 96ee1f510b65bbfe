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
    arch,
    bundle::{Bundle, BundleStats},
    error::{Error, Result},
    sync::SpinLock,
    thread::{OffsetOfLink, ThreadFrame},
};
use core::{
    cell::{Cell, UnsafeCell},
    ptr::NonNull,
    sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
};
use lame_infra::list::List;
use lame_kconfig::{NUM_WORKERS_MAX, RUNTIME_RQ_SIZE};

static WORKERS: SpinLock<Vec<&'static Worker>> = SpinLock::new(Vec::new());

std::thread_local! {
    static CURRENT_WORKER: Cell<Option<NonNull<Worker>>> = const { Cell::new(None) };
}

/// Queue pointers shared with the control plane: a monotonic enqueue
/// counter and the enqueue timestamp of the oldest entry.
#[derive(Default, Debug)]
pub struct QPtrs {
    pub rq_head: AtomicU64,
    pub oldest_tsc: AtomicU64,
}

/// Run-queue storage guarded by the worker lock. The head/tail cursors
/// live outside so the control plane can read queue depth without the
/// lock.
#[derive(Debug)]
pub struct RunQueue {
    slots: [Option<NonNull<ThreadFrame>>; RUNTIME_RQ_SIZE],
    overflow: List<ThreadFrame, OffsetOfLink>,
}

impl RunQueue {
    fn new() -> Self {
        Self {
            slots: [None; RUNTIME_RQ_SIZE],
            overflow: List::new(),
        }
    }

    #[inline]
    pub fn overflow_len(&self) -> usize {
        self.overflow.len()
    }
}

/// A per-CPU execution context. Parallel across workers, single
/// threaded within one: everything except the run queue is only
/// touched from the owning core, and the run queue is guarded by
/// `lock`.
#[derive(Debug)]
pub struct Worker {
    id: u32,
    lock: SpinLock<RunQueue>,
    rq_head: AtomicU32,
    rq_tail: AtomicU32,
    q_ptrs: QPtrs,
    bundle: UnsafeCell<Bundle>,
    self_thread: Cell<Option<NonNull<ThreadFrame>>>,
    preempt_count: AtomicU32,
    resched_wanted: AtomicBool,
    cede_wanted: AtomicBool,
}

// Cross-worker access is limited to atomics and the locked run queue.
unsafe impl Send for Worker {}
unsafe impl Sync for Worker {}

impl Worker {
    /// Creates and registers a worker whose bundle holds up to
    /// `bundle_size` threads. The worker lives for the process.
    pub fn new(id: u32, bundle_size: u32) -> Result<&'static Worker> {
        let bundle = Bundle::new(bundle_size)?;
        let mut workers = WORKERS.lock();
        if workers.len() >= NUM_WORKERS_MAX {
            return Err(Error::InvalidConfig);
        }
        let worker: &'static Worker = Box::leak(Box::new(Worker {
            id,
            lock: SpinLock::new(RunQueue::new()),
            rq_head: AtomicU32::new(0),
            rq_tail: AtomicU32::new(0),
            q_ptrs: QPtrs::default(),
            bundle: UnsafeCell::new(bundle),
            self_thread: Cell::new(None),
            preempt_count: AtomicU32::new(0),
            resched_wanted: AtomicBool::new(false),
            cede_wanted: AtomicBool::new(false),
        }));
        workers.push(worker);
        Ok(worker)
    }

    #[inline]
    pub fn current() -> Option<&'static Worker> {
        CURRENT_WORKER
            .with(|c| c.get())
            .map(|p| unsafe { &*p.as_ptr() })
    }

    /// Pins this worker to the calling thread; from here on the core
    /// treats that thread as the worker's execution context.
    pub fn set_current(w: &'static Worker) {
        CURRENT_WORKER.with(|c| c.set(Some(NonNull::from(w))));
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn q_ptrs(&self) -> &QPtrs {
        &self.q_ptrs
    }

    #[inline]
    pub fn run_queue(&self) -> &SpinLock<RunQueue> {
        &self.lock
    }

    // The bundle is only mutated from the owning worker's context with
    // the tick held off, which is what makes this sound.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn bundle_mut(&self) -> &mut Bundle {
        &mut *self.bundle.get()
    }

    /// Counter snapshot; advisory when read off-worker.
    pub fn bundle_stats(&self) -> BundleStats {
        unsafe { &*self.bundle.get() }.stats()
    }

    #[inline]
    pub fn self_thread(&self) -> Option<NonNull<ThreadFrame>> {
        self.self_thread.get()
    }

    #[inline]
    pub fn set_self_thread(&self, t: NonNull<ThreadFrame>) {
        self.self_thread.set(Some(t));
    }

    #[inline]
    pub fn preempt_disable(&self) -> bool {
        self.preempt_count.fetch_add(1, Ordering::AcqRel) == 0
    }

    #[inline]
    pub fn preempt_enable(&self) {
        debug_assert!(self.preempt_count.load(Ordering::Acquire) > 0);
        self.preempt_count.fetch_sub(1, Ordering::AcqRel);
    }

    #[inline]
    pub fn preemptable(&self) -> bool {
        self.preempt_count.load(Ordering::Acquire) == 0
    }

    #[inline]
    pub fn set_resched_wanted(&self, val: bool) {
        self.resched_wanted.store(val, Ordering::Release);
    }

    #[inline]
    pub(crate) fn take_resched_wanted(&self) -> bool {
        self.resched_wanted.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn set_cede_wanted(&self, val: bool) {
        self.cede_wanted.store(val, Ordering::Release);
    }

    #[inline]
    pub(crate) fn take_cede_wanted(&self) -> bool {
        self.cede_wanted.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn rq_len(&self) -> u32 {
        let tail = self.rq_tail.load(Ordering::Acquire);
        let head = self.rq_head.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    /// Producer-side enqueue used by the surrounding runtime.
    pub fn rq_push(&self, t: NonNull<ThreadFrame>) {
        let mut rq = self.lock.preempt_lock();
        self.rq_push_locked(&mut rq, t);
    }

    /// Enqueue with the worker lock already held. Spills to the
    /// overflow list when the circular queue is full or older spilled
    /// entries still wait, then drains whatever fits, keeping FIFO
    /// order across both.
    pub(crate) fn rq_push_locked(&self, rq: &mut RunQueue, t: NonNull<ThreadFrame>) {
        let head = self.rq_head.load(Ordering::Relaxed);
        let tail = self.rq_tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) >= RUNTIME_RQ_SIZE as u32 || !rq.overflow.is_empty() {
            rq.overflow.push_back(unsafe { t.as_ref() }.link_ptr());
            self.drain_overflow_locked(rq);
            return;
        }
        self.rq_store(rq, head, tail, t);
    }

    fn rq_store(&self, rq: &mut RunQueue, head: u32, tail: u32, t: NonNull<ThreadFrame>) {
        if head == tail {
            self.q_ptrs
                .oldest_tsc
                .store(unsafe { t.as_ref() }.ready_tsc(), Ordering::Release);
        }
        rq.slots[head as usize % RUNTIME_RQ_SIZE] = Some(t);
        self.rq_head.store(head.wrapping_add(1), Ordering::Release);
        self.q_ptrs.rq_head.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn drain_overflow_locked(&self, rq: &mut RunQueue) {
        loop {
            let head = self.rq_head.load(Ordering::Relaxed);
            let tail = self.rq_tail.load(Ordering::Acquire);
            if head.wrapping_sub(tail) >= RUNTIME_RQ_SIZE as u32 {
                return;
            }
            let Some(t) = rq.overflow.pop_front() else {
                return;
            };
            self.rq_store(rq, head, tail, t);
        }
    }

    /// Consumer-side dequeue used by the surrounding runtime's
    /// dispatch loop.
    pub fn rq_pop(&self) -> Option<NonNull<ThreadFrame>> {
        let mut rq = self.lock.preempt_lock();
        let tail = self.rq_tail.load(Ordering::Relaxed);
        let head = self.rq_head.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let t = rq.slots[tail as usize % RUNTIME_RQ_SIZE].take();
        debug_assert!(t.is_some());
        self.rq_tail.store(tail.wrapping_add(1), Ordering::Release);
        self.drain_overflow_locked(&mut rq);
        t
    }

    /// The dismantle spill: every bundle member goes back to the run
    /// queue in slot order, marked ready, and the bundle membership is
    /// reset. The dynamic gate is left as it was.
    pub(crate) fn spill_bundle(&self, rq: &mut RunQueue) {
        let now = arch::read_tsc();
        // SAFETY: owning-worker context; the tick is held off by the
        // caller's lock.
        let bundle = unsafe { self.bundle_mut() };
        for i in 0..bundle.size() {
            let Some(t) = bundle.take_slot(i) else {
                continue;
            };
            let tf = unsafe { t.as_ref() };
            tf.set_ready(true);
            tf.set_running(false);
            tf.set_ready_tsc(now);
            self.rq_push_locked(rq, t);
        }
        bundle.reset_membership();
    }
}

/// Sums the bundle counters over every registered worker.
pub fn aggregate_stats() -> BundleStats {
    let mut total = BundleStats::default();
    for w in WORKERS.lock().iter() {
        total.accumulate(&w.bundle_stats());
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leak_frame() -> NonNull<ThreadFrame> {
        NonNull::from(Box::leak(Box::new(ThreadFrame::new())))
    }

    #[test]
    fn test_rq_fifo() {
        let w = Worker::new(900, 2).unwrap();
        let a = leak_frame();
        let b = leak_frame();
        w.rq_push(a);
        w.rq_push(b);
        assert_eq!(w.rq_len(), 2);
        assert_eq!(w.rq_pop(), Some(a));
        assert_eq!(w.rq_pop(), Some(b));
        assert_eq!(w.rq_pop(), None);
    }

    #[test]
    fn test_rq_overflow_keeps_fifo() {
        let w = Worker::new(901, 2).unwrap();
        let frames: Vec<_> = (0..RUNTIME_RQ_SIZE + 3).map(|_| leak_frame()).collect();
        for f in &frames {
            w.rq_push(*f);
        }
        assert_eq!(w.rq_len(), RUNTIME_RQ_SIZE as u32);
        assert_eq!(w.run_queue().preempt_lock().overflow_len(), 3);
        // Pops free slots; the drain pulls spilled entries in arrival
        // order behind the queued ones.
        let mut got = Vec::new();
        while let Some(t) = w.rq_pop() {
            got.push(t);
        }
        assert_eq!(got, frames);
        assert_eq!(w.run_queue().preempt_lock().overflow_len(), 0);
    }

    #[test]
    fn test_oldest_tsc_published_on_empty_queue() {
        let w = Worker::new(902, 2).unwrap();
        let a = leak_frame();
        unsafe { a.as_ref() }.set_ready_tsc(77);
        w.rq_push(a);
        assert_eq!(w.q_ptrs().oldest_tsc.load(Ordering::Acquire), 77);
        assert_eq!(w.q_ptrs().rq_head.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_aggregate_stats_covers_every_worker() {
        let w = Worker::new(904, 2).unwrap();
        let own = w.bundle_stats();
        let total = aggregate_stats();
        // Registered workers contribute monotonically.
        assert!(total.total_lames >= own.total_lames);
        assert!(total.total_cycles >= own.total_cycles);
    }

    #[test]
    fn test_preempt_counter_nests() {
        let w = Worker::new(903, 2).unwrap();
        assert!(w.preemptable());
        assert!(w.preempt_disable());
        assert!(!w.preempt_disable());
        assert!(!w.preemptable());
        w.preempt_enable();
        w.preempt_enable();
        assert!(w.preemptable());
    }
}
