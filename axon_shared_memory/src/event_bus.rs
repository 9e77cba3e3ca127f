//! Global event-flag bus: a fixed-width bit-set with a process-shared
//! mutex/condition-variable pair, one bit per `(topic, event)` key.
//!
//! The bus carries edge notifications only. The topic channel holds the
//! authoritative current value; a publisher must complete its payload write
//! *before* triggering the corresponding bit.

use crate::channel::now_micros;
use crate::error::{ShmError, ShmResult};
use crate::segment::SharedSegment;
use crate::sync::{SharedLock, init_shared_cond, init_shared_mutex};
use axon::consts::{EVENT_BUS_SIZE, EVENT_MAX_COUNT, EVENT_WORDS};
use static_assertions::const_assert;
use std::sync::atomic::{Ordering, fence};
use tracing::warn;

/// Magic word marking a fully initialized bus header: "AXEB".
///
/// Distinct from the channel magic so a re-initialization race is
/// diagnosable from the header alone.
pub const EVENT_BUS_MAGIC: u32 = 0x4158_4542;

#[repr(C)]
struct BusHeader {
    magic: u32,
    mutex: libc::pthread_mutex_t,
    cond: libc::pthread_cond_t,
    stamp_us: u64,
    bits: [u64; EVENT_WORDS],
}

const_assert!(size_of::<BusHeader>() <= EVENT_BUS_SIZE);

/// Snapshot of the bus bit-set.
///
/// Bit `i` set means at least one publisher produced on `event_id i` since
/// the bit was last cleared.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EventSet {
    words: [u64; EVENT_WORDS],
}

impl EventSet {
    /// The empty set.
    pub fn empty() -> Self {
        Self {
            words: [0; EVENT_WORDS],
        }
    }

    /// Test bit `id`. Out-of-width ids read as unset.
    pub fn get(&self, id: usize) -> bool {
        id < EVENT_MAX_COUNT && self.words[id / 64] & (1u64 << (id % 64)) != 0
    }

    /// Set bit `id`.
    pub fn set(&mut self, id: usize) {
        if id < EVENT_MAX_COUNT {
            self.words[id / 64] |= 1u64 << (id % 64);
        }
    }

    /// Clear bit `id`.
    pub fn clear(&mut self, id: usize) {
        if id < EVENT_MAX_COUNT {
            self.words[id / 64] &= !(1u64 << (id % 64));
        }
    }

    /// True when no bit is set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterate the indices of set bits, ascending.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, word)| {
            let word = *word;
            (0..64).filter_map(move |bit| {
                if word & (1u64 << bit) != 0 {
                    Some(wi * 64 + bit)
                } else {
                    None
                }
            })
        })
    }

    /// Union with `other`, in place.
    pub fn merge(&mut self, other: &EventSet) {
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w |= *o;
        }
    }
}

impl Default for EventSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for EventSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.ones()).finish()
    }
}

/// The process-global event bus.
///
/// Every participant opens the same named segment; whoever arrives first
/// creates it and becomes the unlinking owner.
pub struct EventBus {
    segment: SharedSegment,
    header: *mut BusHeader,
    lock: SharedLock,
}

unsafe impl Send for EventBus {}
unsafe impl Sync for EventBus {}

impl EventBus {
    /// Create the bus under `name`, becoming its owner.
    pub fn create(name: &str) -> ShmResult<Self> {
        let segment = SharedSegment::create(name, EVENT_BUS_SIZE)?;
        let bus = Self::from_segment(segment);
        bus.init_primitives()?;
        Ok(bus)
    }

    /// Attach to an existing bus, completing a dead creator's
    /// initialization when the magic word is missing.
    pub fn open(name: &str) -> ShmResult<Self> {
        let segment = SharedSegment::open(name)?;
        if segment.len() < EVENT_BUS_SIZE {
            return Err(ShmError::InvalidSize {
                size: segment.len(),
            });
        }
        let bus = Self::from_segment(segment);
        let magic = unsafe { std::ptr::read_volatile(&raw const (*bus.header).magic) };
        if magic != EVENT_BUS_MAGIC {
            warn!(name, "event bus header uninitialized, completing setup for a dead creator");
            bus.init_primitives()?;
        }
        Ok(bus)
    }

    /// Decentralized rendezvous: create, or attach when someone else won
    /// the creation race.
    pub fn open_or_create(name: &str) -> ShmResult<Self> {
        match Self::create(name) {
            Ok(bus) => Ok(bus),
            Err(ShmError::AlreadyExists { .. }) => Self::open(name),
            Err(e) => Err(e),
        }
    }

    fn from_segment(segment: SharedSegment) -> Self {
        let header = segment.as_ptr() as *mut BusHeader;
        let lock = SharedLock::new(
            unsafe { &raw mut (*header).mutex },
            unsafe { &raw mut (*header).cond },
        );
        Self {
            segment,
            header,
            lock,
        }
    }

    fn init_primitives(&self) -> ShmResult<()> {
        unsafe {
            init_shared_mutex(&raw mut (*self.header).mutex)?;
            init_shared_cond(&raw mut (*self.header).cond)?;
            (*self.header).bits = [0; EVENT_WORDS];
            std::ptr::write_volatile(&raw mut (*self.header).stamp_us, 0);
            fence(Ordering::Release);
            std::ptr::write_volatile(&raw mut (*self.header).magic, EVENT_BUS_MAGIC);
        }
        Ok(())
    }

    fn bits(&self) -> *mut [u64; EVENT_WORDS] {
        unsafe { &raw mut (*self.header).bits }
    }

    /// Set bit `event_id`, stamp, and broadcast to every waiter.
    pub fn trigger(&self, event_id: usize) -> ShmResult<()> {
        if event_id >= EVENT_MAX_COUNT {
            return Err(ShmError::Capacity {
                what: "event_id",
                limit: EVENT_MAX_COUNT,
            });
        }
        let _guard = self.lock.lock()?;
        unsafe {
            (*self.bits())[event_id / 64] |= 1u64 << (event_id % 64);
            std::ptr::write_volatile(&raw mut (*self.header).stamp_us, now_micros());
        }
        self.lock.broadcast()?;
        Ok(())
    }

    /// Block until a trigger arrives or `timeout_ms` elapses, then return
    /// the current bit-set. A timeout is not an error and spurious wakeups
    /// are fine either way: the caller re-examines the snapshot.
    pub fn wait(&self, timeout_ms: u64) -> ShmResult<EventSet> {
        let guard = self.lock.lock()?;
        self.lock.wait_timeout(&guard, timeout_ms)?;
        Ok(EventSet {
            words: unsafe { *self.bits() },
        })
    }

    /// Current bit-set without waiting.
    pub fn read(&self) -> ShmResult<EventSet> {
        let _guard = self.lock.lock()?;
        Ok(EventSet {
            words: unsafe { *self.bits() },
        })
    }

    /// Atomically copy the bit-set and zero it.
    ///
    /// Concurrent callers observe a disjoint union of the set bits. Do not
    /// use this from an executor sharing the bus with other processes;
    /// clear per-bit instead.
    pub fn read_and_clear(&self) -> ShmResult<EventSet> {
        let _guard = self.lock.lock()?;
        let words = unsafe { *self.bits() };
        unsafe { *self.bits() = [0; EVENT_WORDS] };
        Ok(EventSet { words })
    }

    /// Atomically clear one bit.
    pub fn clear(&self, event_id: usize) -> ShmResult<()> {
        if event_id >= EVENT_MAX_COUNT {
            return Err(ShmError::Capacity {
                what: "event_id",
                limit: EVENT_MAX_COUNT,
            });
        }
        let _guard = self.lock.lock()?;
        unsafe {
            (*self.bits())[event_id / 64] &= !(1u64 << (event_id % 64));
        }
        Ok(())
    }

    /// Clear the whole bit-set.
    pub fn clear_all(&self) -> ShmResult<()> {
        let _guard = self.lock.lock()?;
        unsafe { *self.bits() = [0; EVENT_WORDS] };
        Ok(())
    }

    /// Unconditional broadcast, used during shutdown to drain waiters.
    pub fn notify_all(&self) -> ShmResult<()> {
        let _guard = self.lock.lock()?;
        self.lock.broadcast()
    }

    /// True when this handle created the bus and will unlink it.
    pub fn is_owner(&self) -> bool {
        self.segment.is_owner()
    }

    /// Bus segment name.
    pub fn name(&self) -> &str {
        self.segment.name()
    }
}
