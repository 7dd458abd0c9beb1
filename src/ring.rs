//! Lock-free single-producer/single-consumer byte channel.
//!
//! The UI thread writes short binary records (3-byte MIDI note messages) and publishes them
//! with [`EventProducer::commit_write`]; the audio thread drains them with
//! [`EventConsumer::read_exact`]. Storage is fixed at construction and never resized.
use std::mem::size_of;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::{MmapMut, MmapOptions};

/// Header stored at the front of a shared mapping so that both cursors live next to the
/// arena they describe.
#[repr(C, align(64))]
pub struct ChannelHeader {
    capacity: u32,
    write_index: AtomicU64,
    read_index: AtomicU64,
}

impl ChannelHeader {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity as u32,
            write_index: AtomicU64::new(0),
            read_index: AtomicU64::new(0),
        }
    }
}

enum ChannelStorage {
    Local {
        header: *mut ChannelHeader,
        data: *mut [u8],
    },
    Shared {
        _mmap: MmapMut,
        header: *mut ChannelHeader,
        data: *mut u8,
    },
}

/// Fixed-capacity byte ring with two monotonic cursors.
///
/// Construct it, then [`split`](EventChannel::split) it into its two halves. Each half is
/// owned by exactly one thread.
pub struct EventChannel {
    storage: ChannelStorage,
    capacity: usize,
}

// The producer only touches bytes in `[read, read + capacity)` ahead of the committed write
// cursor and the consumer only bytes behind it; the cursors are atomics.
unsafe impl Send for EventChannel {}
unsafe impl Sync for EventChannel {}

impl EventChannel {
    /// Create a heap-backed channel holding `capacity` bytes.
    pub fn new_local(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let header = Box::into_raw(Box::new(ChannelHeader::new(capacity)));
        let data = Box::into_raw(vec![0u8; capacity].into_boxed_slice());
        Self {
            storage: ChannelStorage::Local { header, data },
            capacity,
        }
    }

    /// Create a channel backed by an anonymous memory mapping laid out as header + arena.
    pub fn new_shared(capacity: usize) -> std::io::Result<Self> {
        let capacity = capacity.max(1);
        let bytes = size_of::<ChannelHeader>() + capacity;
        let mut mmap = MmapOptions::new().len(bytes).map_anon()?;
        let header = mmap.as_mut_ptr() as *mut ChannelHeader;
        unsafe {
            header.write(ChannelHeader::new(capacity));
        }
        let data = unsafe { mmap.as_mut_ptr().add(size_of::<ChannelHeader>()) };
        Ok(Self {
            storage: ChannelStorage::Shared {
                _mmap: mmap,
                header,
                data,
            },
            capacity,
        })
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the arena lives in a memory mapping rather than on the heap.
    pub fn is_shared(&self) -> bool {
        matches!(self.storage, ChannelStorage::Shared { .. })
    }

    /// Split into the producer and consumer halves.
    pub fn split(self) -> (EventProducer, EventConsumer) {
        debug_assert_eq!(self.header().capacity as usize, self.capacity);
        let channel = Arc::new(self);
        let producer = EventProducer {
            channel: channel.clone(),
            pending: 0,
        };
        let consumer = EventConsumer { channel, read: 0 };
        (producer, consumer)
    }

    fn header(&self) -> &ChannelHeader {
        match &self.storage {
            ChannelStorage::Local { header, .. } => unsafe { &**header },
            ChannelStorage::Shared { header, .. } => unsafe { &**header },
        }
    }

    fn data_ptr(&self) -> *mut u8 {
        match &self.storage {
            ChannelStorage::Local { data, .. } => *data as *mut u8,
            ChannelStorage::Shared { data, .. } => *data,
        }
    }

    /// Copy `bytes` into the arena starting at the absolute cursor `at`, wrapping once.
    ///
    /// Callers must own the target region.
    unsafe fn copy_in(&self, at: u64, bytes: &[u8]) {
        let start = (at % self.capacity as u64) as usize;
        let first = (self.capacity - start).min(bytes.len());
        let data = self.data_ptr();
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), data.add(start), first);
            if bytes.len() > first {
                ptr::copy_nonoverlapping(bytes.as_ptr().add(first), data, bytes.len() - first);
            }
        }
    }

    /// Copy out of the arena starting at the absolute cursor `at`, wrapping once.
    unsafe fn copy_out(&self, at: u64, out: &mut [u8]) {
        let start = (at % self.capacity as u64) as usize;
        let first = (self.capacity - start).min(out.len());
        let data = self.data_ptr();
        unsafe {
            ptr::copy_nonoverlapping(data.add(start), out.as_mut_ptr(), first);
            if out.len() > first {
                ptr::copy_nonoverlapping(data, out.as_mut_ptr().add(first), out.len() - first);
            }
        }
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        if let ChannelStorage::Local { header, data } = self.storage {
            unsafe {
                drop(Box::from_raw(header));
                drop(Box::from_raw(data));
            }
        }
    }
}

/// Writing half of an [`EventChannel`]. Lives on the non-realtime thread.
pub struct EventProducer {
    channel: Arc<EventChannel>,
    pending: u64,
}

impl EventProducer {
    /// Append `bytes` behind the pending cursor.
    ///
    /// Returns `false` and leaves the channel untouched when the record does not fit. Written
    /// bytes stay invisible to the consumer until [`commit_write`](Self::commit_write).
    pub fn try_write(&mut self, bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            return true;
        }
        let header = self.channel.header();
        let capacity = self.channel.capacity as u64;
        let read = header.read_index.load(Ordering::Acquire);
        let used = self.pending.saturating_sub(read);
        let free = capacity.saturating_sub(used);
        if bytes.len() as u64 > free {
            return false;
        }
        unsafe {
            self.channel.copy_in(self.pending, bytes);
        }
        self.pending += bytes.len() as u64;
        true
    }

    /// Publish everything written since the last commit.
    pub fn commit_write(&mut self) {
        self.channel
            .header()
            .write_index
            .store(self.pending, Ordering::Release);
    }

    /// Write one record and commit it immediately.
    pub fn write_record(&mut self, bytes: &[u8]) -> bool {
        if !self.try_write(bytes) {
            return false;
        }
        self.commit_write();
        true
    }

    /// Bytes that can still be written before the consumer catches up.
    pub fn available_write(&self) -> usize {
        let read = self.channel.header().read_index.load(Ordering::Acquire);
        let used = self.pending.saturating_sub(read);
        (self.channel.capacity as u64).saturating_sub(used) as usize
    }
}

/// Reading half of an [`EventChannel`]. Lives on the audio thread; never blocks or allocates.
pub struct EventConsumer {
    channel: Arc<EventChannel>,
    read: u64,
}

impl EventConsumer {
    /// Whether at least one committed byte is waiting.
    pub fn has_data_available(&self) -> bool {
        self.channel.header().write_index.load(Ordering::Acquire) != self.read
    }

    /// Committed bytes ready for reading.
    pub fn available_read(&self) -> usize {
        let write = self.channel.header().write_index.load(Ordering::Acquire);
        write.saturating_sub(self.read) as usize
    }

    /// Fill `out` completely from the channel.
    ///
    /// Returns `false` without consuming anything when fewer than `out.len()` committed bytes
    /// are available.
    pub fn read_exact(&mut self, out: &mut [u8]) -> bool {
        if out.is_empty() {
            return true;
        }
        let header = self.channel.header();
        let write = header.write_index.load(Ordering::Acquire);
        if write.saturating_sub(self.read) < out.len() as u64 {
            return false;
        }
        unsafe {
            self.channel.copy_out(self.read, out);
        }
        self.read += out.len() as u64;
        header.read_index.store(self.read, Ordering::Release);
        true
    }
}
