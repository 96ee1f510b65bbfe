use crate::arch::Frame;
use core::{
    cell::UnsafeCell,
    ptr::NonNull,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};
use lame_infra::{impl_intrusive_adapter, list::ListHead};

impl_intrusive_adapter!(OffsetOfLink, ThreadFrame, link);

/// The per-thread record the scheduler core touches: scheduling flags,
/// the linkage node used by the run-queue overflow list, and the
/// machine-state block swapped by the switch primitive. The rest of a
/// user thread (stack ownership, entry bookkeeping) belongs to the
/// surrounding runtime, which lends frames to bundles and run queues.
#[derive(Default, Debug)]
pub struct ThreadFrame {
    link: ListHead<ThreadFrame, OffsetOfLink>,
    ready: AtomicBool,
    running: AtomicBool,
    ready_tsc: AtomicU64,
    frame: UnsafeCell<Frame>,
}

impl ThreadFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// A frame whose first switch-in enters `entry(arg)` on the stack
    /// ending at `stack_top`. The caller keeps the stack alive for the
    /// thread's lifetime.
    pub fn with_entry(stack_top: usize, entry: extern "C" fn(usize), arg: usize) -> Self {
        let tf = Self::default();
        unsafe { (*tf.frame.get()).init_entry(stack_top, entry, arg) };
        tf
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_ready(&self, val: bool) {
        self.ready.store(val, Ordering::Release)
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_running(&self, val: bool) {
        self.running.store(val, Ordering::Release)
    }

    #[inline]
    pub fn ready_tsc(&self) -> u64 {
        self.ready_tsc.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_ready_tsc(&self, tsc: u64) {
        self.ready_tsc.store(tsc, Ordering::Release)
    }

    #[inline]
    pub(crate) fn frame_ptr(&self) -> *mut Frame {
        self.frame.get()
    }

    #[inline]
    pub(crate) fn link_ptr(&self) -> NonNull<ListHead<ThreadFrame, OffsetOfLink>> {
        NonNull::from(&self.link)
    }
}
