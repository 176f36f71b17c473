//! A fixed-size, process-wide pool of [`Thread`]s, one per configured
//! logical core. Volume channels are handed out from this pool the first
//! time a thread issues I/O to a volume.

use crate::core::thread::{Thread, ThreadHandle};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct Reactors {
    threads: Vec<Thread>,
    next: AtomicUsize,
}

static REACTORS: OnceCell<Reactors> = OnceCell::new();

impl Reactors {
    /// Initializes the process-wide reactor pool. Must be called exactly
    /// once, before any volume I/O is issued.
    pub fn init(core_count: usize) {
        let core_count = core_count.max(1);
        let threads = (0 .. core_count)
            .map(|i| Thread::spawn(format!("reactor-{i}")))
            .collect();
        REACTORS
            .set(Reactors {
                threads,
                next: AtomicUsize::new(0),
            })
            .ok();
    }

    fn get() -> &'static Reactors {
        REACTORS.get().expect("Reactors::init was not called")
    }

    /// The control thread is always core 0's reactor.
    pub fn control_thread() -> ThreadHandle {
        Self::get().threads[0].handle()
    }

    /// Round-robin over the pool, used to place a new volume channel.
    pub fn next_thread() -> ThreadHandle {
        let reactors = Self::get();
        let idx = reactors.next.fetch_add(1, Ordering::SeqCst) % reactors.threads.len();
        reactors.threads[idx].handle()
    }

    pub fn core_count() -> usize {
        Self::get().threads.len()
    }

    pub fn all_threads() -> Vec<ThreadHandle> {
        Self::get().threads.iter().map(Thread::handle).collect()
    }
}
