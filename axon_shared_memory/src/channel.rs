//! Latest-value shared memory channels: `[Header][Payload]` with a
//! process-shared lock in the header

use crate::error::{ShmError, ShmResult};
use crate::segment::SharedSegment;
use crate::sync::{SharedLock, SharedLockGuard, init_shared_cond, init_shared_mutex};
use static_assertions::const_assert;
use std::sync::atomic::{Ordering, fence};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Magic word marking a fully initialized channel header: "AXCH".
pub const CHANNEL_MAGIC: u32 = 0x4158_4348;

/// Fixed header prefix of every channel segment.
///
/// The magic word is written *last* during creation, so an attacher that
/// finds it absent knows the creator died mid-initialization and must
/// repeat the primitive setup itself.
#[repr(C)]
pub struct ChannelHeader {
    magic: u32,
    mutex: libc::pthread_mutex_t,
    cond: libc::pthread_cond_t,
    stamp_us: u64,
}

// The header must stay a small fixed prefix; a platform where pthread
// primitives blow past this bound needs explicit attention.
const_assert!(size_of::<ChannelHeader>() <= 256);

/// A named shared region carrying one latest-value payload slot.
///
/// All payload access goes through the header's process-shared mutex, so a
/// read never observes a torn write. There is no queue: each write
/// overwrites the previous value.
pub struct ShmChannel {
    segment: SharedSegment,
    header: *mut ChannelHeader,
    payload: *mut u8,
    payload_len: usize,
    lock: SharedLock,
}

unsafe impl Send for ShmChannel {}
unsafe impl Sync for ShmChannel {}

impl ShmChannel {
    /// Byte length of the header prefix.
    pub const HEADER_LEN: usize = size_of::<ChannelHeader>();

    /// Create a channel with a payload of `payload_len` bytes, becoming
    /// its owner. Fails with `AlreadyExists` if the name is taken.
    pub fn create(name: &str, payload_len: usize) -> ShmResult<Self> {
        if payload_len == 0 {
            return Err(ShmError::InvalidSize { size: payload_len });
        }
        let segment = SharedSegment::create(name, Self::HEADER_LEN + payload_len)?;
        let chan = Self::from_segment(segment, payload_len);
        chan.init_primitives()?;
        Ok(chan)
    }

    /// Attach to an existing channel, inferring the payload size from the
    /// mapping. Completes a dead creator's initialization when the magic
    /// word is missing.
    pub fn open(name: &str) -> ShmResult<Self> {
        let segment = SharedSegment::open(name)?;
        if segment.len() <= Self::HEADER_LEN {
            return Err(ShmError::InvalidSize {
                size: segment.len(),
            });
        }
        let payload_len = segment.len() - Self::HEADER_LEN;
        let chan = Self::from_segment(segment, payload_len);

        let magic = unsafe { std::ptr::read_volatile(&raw const (*chan.header).magic) };
        if magic != CHANNEL_MAGIC {
            warn!(
                name = chan.segment.name(),
                "channel header uninitialized, completing setup for a dead creator"
            );
            chan.init_primitives()?;
        }
        Ok(chan)
    }

    /// Create the channel, or attach when another participant got there
    /// first. The decentralized rendezvous used for global segments.
    pub fn open_or_create(name: &str, payload_len: usize) -> ShmResult<Self> {
        match Self::create(name, payload_len) {
            Ok(chan) => Ok(chan),
            Err(ShmError::AlreadyExists { .. }) => Self::open(name),
            Err(e) => Err(e),
        }
    }

    fn from_segment(segment: SharedSegment, payload_len: usize) -> Self {
        let base = segment.as_ptr();
        let header = base as *mut ChannelHeader;
        let payload = unsafe { base.add(Self::HEADER_LEN) };
        let lock = SharedLock::new(
            unsafe { &raw mut (*header).mutex },
            unsafe { &raw mut (*header).cond },
        );
        Self {
            segment,
            header,
            payload,
            payload_len,
            lock,
        }
    }

    /// Initialize the process-shared primitives and stamp the magic word
    /// last, with a release fence between.
    fn init_primitives(&self) -> ShmResult<()> {
        unsafe {
            init_shared_mutex(&raw mut (*self.header).mutex)?;
            init_shared_cond(&raw mut (*self.header).cond)?;
            std::ptr::write_volatile(&raw mut (*self.header).stamp_us, 0);
            fence(Ordering::Release);
            std::ptr::write_volatile(&raw mut (*self.header).magic, CHANNEL_MAGIC);
        }
        Ok(())
    }

    /// Acquire the channel lock for a compound read-modify-write.
    pub fn lock(&self) -> ShmResult<ChannelGuard<'_>> {
        let guard = self.lock.lock()?;
        Ok(ChannelGuard {
            chan: self,
            _guard: guard,
        })
    }

    /// Locked write of `data` at `offset` within the payload.
    pub fn write(&self, data: &[u8], offset: usize) -> ShmResult<()> {
        self.lock()?.write(data, offset)
    }

    /// Locked read of `buf.len()` bytes at `offset` within the payload.
    pub fn read_into(&self, buf: &mut [u8], offset: usize) -> ShmResult<()> {
        self.lock()?.read_into(buf, offset)
    }

    /// Locked read of `len` bytes at `offset` into a fresh buffer.
    pub fn read_vec(&self, len: usize, offset: usize) -> ShmResult<Vec<u8>> {
        self.lock()?.read_vec(len, offset)
    }

    /// Microsecond timestamp of the last completed write.
    pub fn last_write_micros(&self) -> ShmResult<u64> {
        let _guard = self.lock()?;
        Ok(unsafe { std::ptr::read_volatile(&raw const (*self.header).stamp_us) })
    }

    /// Payload size in bytes, constant from creation to destruction.
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        self.segment.name()
    }

    /// True when this handle created the channel and will unlink it.
    pub fn is_owner(&self) -> bool {
        self.segment.is_owner()
    }

    fn check_bounds(&self, offset: usize, len: usize) -> ShmResult<()> {
        if offset.checked_add(len).is_none_or(|end| end > self.payload_len) {
            return Err(ShmError::OutOfRange {
                offset,
                len,
                payload: self.payload_len,
            });
        }
        Ok(())
    }
}

/// RAII view of a locked channel. Payload access is bounded-duration:
/// nothing but the byte copy and the timestamp update runs under the lock.
pub struct ChannelGuard<'a> {
    chan: &'a ShmChannel,
    _guard: SharedLockGuard<'a>,
}

impl ChannelGuard<'_> {
    /// Copy `data` into the payload at `offset` and refresh the timestamp.
    pub fn write(&mut self, data: &[u8], offset: usize) -> ShmResult<()> {
        self.chan.check_bounds(offset, data.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.chan.payload.add(offset),
                data.len(),
            );
            // Best-effort stamp; never observed for correctness.
            std::ptr::write_volatile(&raw mut (*self.chan.header).stamp_us, now_micros());
        }
        Ok(())
    }

    /// Copy `buf.len()` payload bytes at `offset` out into `buf`.
    pub fn read_into(&self, buf: &mut [u8], offset: usize) -> ShmResult<()> {
        self.chan.check_bounds(offset, buf.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.chan.payload.add(offset),
                buf.as_mut_ptr(),
                buf.len(),
            );
        }
        Ok(())
    }

    /// Copy `len` payload bytes at `offset` into a fresh buffer.
    pub fn read_vec(&self, len: usize, offset: usize) -> ShmResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(&mut buf, offset)?;
        Ok(buf)
    }
}

/// Microseconds since the Unix epoch.
pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
