//! Reference runtime for synchronized task bodies.
//!
//! - [`SyncRing`]: the past/future coordination arrays of one parallel
//!   region, wired as a ring over the workers
//! - [`Interpreter`]: executes a task body for one worker
//! - [`run_parallel`]: runs every worker on its own scoped thread
//!
//! Worker `t` waits on array `t` and signals array `(t + 1) % T`. Each
//! array holds one cache-line-sized slot per segment, so the slot of
//! segment `s` lives at `array base + s * CACHE_LINE_SIZE`.

pub mod interp;

pub use interp::{ExternalHook, Interpreter, ThreadStats};

use crate::ir::abi::CACHE_LINE_SIZE;
use crate::ir::Task;
use crate::utils::errors::RuntimeError;
use log::debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// One coordination slot, alone on its cache line.
#[derive(Debug, Default)]
#[repr(align(64))]
pub struct Slot(AtomicU64);

const _: () = assert!(std::mem::size_of::<Slot>() == CACHE_LINE_SIZE as usize);

impl Slot {
    pub fn is_signaled(&self) -> bool {
        self.0.load(Ordering::Acquire) != 0
    }
}

/// Spins before the waiting thread starts yielding.
const SPIN_LIMIT: u32 = 64;

/// Coordination arrays for one parallel region.
///
/// The ring size is fixed for the lifetime of the region.
#[derive(Debug)]
pub struct SyncRing {
    arrays: Vec<Box<[Slot]>>,
    num_segments: usize,
    poisoned: AtomicBool,
}

impl SyncRing {
    /// Allocate the arrays for `num_threads` workers and `num_segments`
    /// segments. Worker 0 may enter every segment right away.
    pub fn new(num_threads: usize, num_segments: usize) -> Result<Self, RuntimeError> {
        if num_threads == 0 {
            return Err(RuntimeError::EmptyRing);
        }
        let arrays: Vec<Box<[Slot]>> = (0..num_threads)
            .map(|_| (0..num_segments).map(|_| Slot::default()).collect())
            .collect();
        for slot in arrays[0].iter() {
            slot.0.store(1, Ordering::Relaxed);
        }
        Ok(Self { arrays, num_segments, poisoned: AtomicBool::new(false) })
    }

    pub fn num_threads(&self) -> usize {
        self.arrays.len()
    }

    pub fn num_segments(&self) -> usize {
        self.num_segments
    }

    fn base_of(&self, array: usize) -> i64 {
        self.arrays[array % self.arrays.len()].as_ptr() as usize as i64
    }

    /// Base address of the array worker `thread` waits on.
    pub fn past_base(&self, thread: usize) -> i64 {
        self.base_of(thread)
    }

    /// Base address of the array worker `thread` signals.
    pub fn future_base(&self, thread: usize) -> i64 {
        self.base_of(thread + 1)
    }

    /// Map a slot address back to its slot.
    pub fn resolve(&self, addr: i64) -> Result<&Slot, RuntimeError> {
        let stride = CACHE_LINE_SIZE as usize;
        for array in &self.arrays {
            let base = array.as_ptr() as usize as i64;
            let offset = addr.wrapping_sub(base);
            if offset < 0 || offset as usize % stride != 0 {
                continue;
            }
            if let Some(slot) = array.get(offset as usize / stride) {
                return Ok(slot);
            }
        }
        Err(RuntimeError::BadSlotAddress(addr))
    }

    /// Block until the slot at `addr` is signaled, then consume the signal.
    pub fn wait(&self, addr: i64) -> Result<(), RuntimeError> {
        let slot = self.resolve(addr)?;
        let mut spins = 0u32;
        while slot.0.compare_exchange(1, 0, Ordering::Acquire, Ordering::Relaxed).is_err() {
            if self.poisoned.load(Ordering::Relaxed) {
                return Err(RuntimeError::RingPoisoned);
            }
            if spins < SPIN_LIMIT {
                spins += 1;
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
        Ok(())
    }

    /// Signal the slot at `addr`.
    pub fn signal(&self, addr: i64) -> Result<(), RuntimeError> {
        self.resolve(addr)?.0.store(1, Ordering::Release);
        Ok(())
    }

    /// Wake every waiter with an error; used when a worker fails.
    pub fn poison(&self) {
        self.poisoned.store(true, Ordering::Relaxed);
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Relaxed)
    }
}

/// Run `task` on every worker of `ring`, one scoped thread per worker.
///
/// Statistics come back in worker order. The first failing worker
/// poisons the ring so that its peers stop waiting.
pub fn run_parallel(
    task: &Task,
    ring: &SyncRing,
    user_args: &[i64],
    hook: Option<&ExternalHook>,
    step_limit: u64,
) -> Result<Vec<ThreadStats>, RuntimeError> {
    let mut interp = Interpreter::new(task, ring).with_step_limit(step_limit);
    if let Some(hook) = hook {
        interp = interp.with_hook(hook);
    }
    let interp = &interp;

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..ring.num_threads())
            .map(|t| {
                s.spawn(move || {
                    let result = interp.run(t, user_args);
                    if result.is_err() {
                        ring.poison();
                    }
                    result
                })
            })
            .collect();

        let mut stats = Vec::with_capacity(handles.len());
        let mut errors = Vec::new();
        for (t, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(Ok(s)) => stats.push(s),
                Ok(Err(e)) => errors.push(e),
                Err(_) => {
                    ring.poison();
                    errors.push(RuntimeError::WorkerPanicked(t));
                }
            }
        }
        // Peers released by the poison report `RingPoisoned`; surface the cause.
        if let Some(e) = errors.iter().find(|e| **e != RuntimeError::RingPoisoned).or_else(|| errors.first()) {
            return Err(e.clone());
        }
        debug!("{} workers finished", stats.len());
        Ok(stats)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_is_one_cache_line() {
        assert_eq!(std::mem::size_of::<Slot>(), 64);
        assert_eq!(std::mem::align_of::<Slot>(), 64);
    }

    #[test]
    fn test_ring_wiring() {
        let ring = SyncRing::new(3, 2).unwrap();
        assert_eq!(ring.future_base(0), ring.past_base(1));
        assert_eq!(ring.future_base(2), ring.past_base(0));
        // Worker 0 starts with every segment signaled.
        assert!(ring.resolve(ring.past_base(0)).unwrap().is_signaled());
        assert!(ring.resolve(ring.past_base(0) + 64).unwrap().is_signaled());
        assert!(!ring.resolve(ring.past_base(1)).unwrap().is_signaled());
    }

    #[test]
    fn test_slot_addresses_are_cache_line_apart() {
        let ring = SyncRing::new(1, 2).unwrap();
        let first = ring.resolve(ring.past_base(0)).unwrap() as *const Slot as usize;
        let second = ring.resolve(ring.past_base(0) + 64).unwrap() as *const Slot as usize;
        assert_eq!(second - first, 64);
    }

    #[test]
    fn test_bad_addresses() {
        let ring = SyncRing::new(2, 1).unwrap();
        let base = ring.past_base(1);
        assert_eq!(ring.resolve(base + 8).unwrap_err(), RuntimeError::BadSlotAddress(base + 8));
        assert_eq!(ring.resolve(-1).unwrap_err(), RuntimeError::BadSlotAddress(-1));

        let single = SyncRing::new(1, 1).unwrap();
        let end = single.past_base(0) + 64;
        assert_eq!(single.resolve(end).unwrap_err(), RuntimeError::BadSlotAddress(end));
    }

    #[test]
    fn test_wait_consumes_signal() {
        let ring = SyncRing::new(2, 1).unwrap();
        let past = ring.past_base(1);
        ring.signal(ring.future_base(0)).unwrap();
        ring.wait(past).unwrap();
        assert!(!ring.resolve(past).unwrap().is_signaled());
    }

    #[test]
    fn test_wait_blocks_until_signal() {
        let ring = SyncRing::new(2, 1).unwrap();
        std::thread::scope(|s| {
            let waiter = s.spawn(|| ring.wait(ring.past_base(1)));
            std::thread::sleep(std::time::Duration::from_millis(10));
            ring.signal(ring.future_base(0)).unwrap();
            waiter.join().unwrap().unwrap();
        });
    }

    #[test]
    fn test_poison_releases_waiters() {
        let ring = SyncRing::new(2, 1).unwrap();
        std::thread::scope(|s| {
            let waiter = s.spawn(|| ring.wait(ring.past_base(1)));
            ring.poison();
            assert_eq!(waiter.join().unwrap(), Err(RuntimeError::RingPoisoned));
        });
    }

    #[test]
    fn test_empty_ring_rejected() {
        assert_eq!(SyncRing::new(0, 1).unwrap_err(), RuntimeError::EmptyRing);
    }
}
