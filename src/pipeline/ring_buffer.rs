//! Bounded blocking ring buffer.
//!
//! The queue between every pair of pipeline stages. A single mutex guards
//! head/tail/closed; two condition variables ("can read", "can write")
//! wake the other side. Capacity N is stored in N+1 slots so a full and an
//! empty buffer are distinguishable from the indices alone.
//!
//! All blocking operations return early with a short count once the buffer
//! is closed; remaining elements stay readable after close, writes fail
//! silently.

use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

struct Inner<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    closed: bool,
}

impl<T> Inner<T> {
    fn can_read(&self) -> bool {
        self.head != self.tail
    }

    fn can_write(&self) -> bool {
        (self.head + 1) % self.slots.len() != self.tail
    }

    fn to_read(&self) -> usize {
        if self.head < self.tail {
            self.head + self.slots.len() - self.tail
        } else {
            self.head - self.tail
        }
    }

    fn to_write(&self) -> usize {
        self.slots.len() - 1 - self.to_read()
    }

    fn pop(&mut self) -> Option<T> {
        if !self.can_read() {
            return None;
        }
        let value = self.slots[self.tail].take();
        self.tail = (self.tail + 1) % self.slots.len();
        value
    }

    fn push(&mut self, value: T) -> bool {
        if !self.can_write() {
            return false;
        }
        self.slots[self.head] = Some(value);
        self.head = (self.head + 1) % self.slots.len();
        true
    }
}

/// Bounded MPSC-friendly blocking queue of `T`.
///
/// Multiple readers and writers are allowed and every operation is
/// serialized by the internal mutex; the intended use is one reader and
/// one writer per buffer, and which reader wins a given element under
/// contention is unspecified.
pub struct RingBuffer<T> {
    inner: Mutex<Inner<T>>,
    wait_to_read: Condvar,
    wait_to_write: Condvar,
}

impl<T> RingBuffer<T> {
    /// Creates a buffer holding up to `capacity` elements.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(capacity + 1, || None);
        Self {
            inner: Mutex::new(Inner {
                slots,
                head: 0,
                tail: 0,
                closed: false,
            }),
            wait_to_read: Condvar::new(),
            wait_to_write: Condvar::new(),
        }
    }

    /// Number of elements that fit in this buffer.
    pub fn capacity(&self) -> usize {
        self.inner.lock().slots.len() - 1
    }

    /// Snapshot of the number of elements readable right now.
    pub fn to_read(&self) -> usize {
        self.inner.lock().to_read()
    }

    /// Snapshot of the free space right now.
    pub fn to_write(&self) -> usize {
        self.inner.lock().to_write()
    }

    fn did_read(&self) {
        self.wait_to_write.notify_one();
    }

    fn did_write(&self) {
        self.wait_to_read.notify_one();
    }

    /// Blocks until one element is available; returns `None` only when the
    /// buffer is closed and empty.
    pub fn get(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        self.wait_to_read
            .wait_while(&mut inner, |i| !i.can_read() && !i.closed);
        let value = inner.pop();
        drop(inner);
        if value.is_some() {
            self.did_read();
        }
        value
    }

    /// Blocking single-element write by move. Returns `false` (and drops
    /// the value) only when the buffer is closed before space appears.
    pub fn put(&self, value: T) -> bool {
        let mut inner = self.inner.lock();
        self.wait_to_write
            .wait_while(&mut inner, |i| !i.can_write() && !i.closed);
        if inner.closed {
            return false;
        }
        let pushed = inner.push(value);
        drop(inner);
        if pushed {
            self.did_write();
        }
        pushed
    }

    /// Non-blocking single-element write. Returns `false` when the buffer
    /// is full or closed.
    pub fn put_nowait(&self, value: T) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed || !inner.can_write() {
            return false;
        }
        let pushed = inner.push(value);
        drop(inner);
        if pushed {
            self.did_write();
        }
        pushed
    }

    /// Blocks until `count` elements have been skipped or the buffer is
    /// closed. Returns the number actually discarded.
    pub fn skip_full(&self, count: usize) -> usize {
        let mut left = count;
        while left > 0 {
            let mut inner = self.inner.lock();
            self.wait_to_read
                .wait_while(&mut inner, |i| !i.can_read() && !i.closed);
            if inner.closed && !inner.can_read() {
                break;
            }
            while left > 0 && inner.pop().is_some() {
                left -= 1;
            }
            drop(inner);
            self.did_read();
        }
        count - left
    }

    /// Discards everything currently buffered.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        while inner.pop().is_some() {}
        drop(inner);
        self.did_read();
    }

    /// Closes the buffer and wakes all waiters. Remaining elements can
    /// still be read; subsequent writes fail silently.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            inner.closed = true;
        }
        self.wait_to_read.notify_all();
        self.wait_to_write.notify_all();
    }

    /// True iff the buffer is closed and drained.
    pub fn closed_to_reads(&self) -> bool {
        let inner = self.inner.lock();
        inner.closed && !inner.can_read()
    }

    /// True iff the buffer is closed.
    pub fn closed_to_writes(&self) -> bool {
        self.inner.lock().closed
    }
}

impl<T: Copy> RingBuffer<T> {
    fn drain_into(inner: &mut MutexGuard<'_, Inner<T>>, dst: &mut [T]) -> usize {
        let mut n = 0;
        while n < dst.len() {
            match inner.pop() {
                Some(value) => {
                    dst[n] = value;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    fn fill_from(inner: &mut MutexGuard<'_, Inner<T>>, src: &[T]) -> usize {
        let mut n = 0;
        while n < src.len() && inner.push(src[n]) {
            n += 1;
        }
        n
    }

    /// Non-blocking read of whatever is present, up to `dst.len()`.
    pub fn read_partial(&self, dst: &mut [T]) -> usize {
        let mut inner = self.inner.lock();
        let n = Self::drain_into(&mut inner, dst);
        drop(inner);
        if n > 0 {
            self.did_read();
        }
        n
    }

    /// Blocks until at least one element is available or the buffer is
    /// closed; returns as many as are currently present, up to `dst.len()`.
    pub fn read_some(&self, dst: &mut [T]) -> usize {
        if dst.is_empty() {
            return 0;
        }
        loop {
            let mut inner = self.inner.lock();
            self.wait_to_read
                .wait_while(&mut inner, |i| !i.can_read() && !i.closed);
            if inner.closed && !inner.can_read() {
                return 0;
            }
            let n = Self::drain_into(&mut inner, dst);
            drop(inner);
            if n > 0 {
                self.did_read();
                return n;
            }
        }
    }

    /// Blocks until `dst` is full or the buffer is closed. Returns the
    /// count actually read, short only on close.
    pub fn read_full(&self, dst: &mut [T]) -> usize {
        let mut total = 0;
        while total < dst.len() {
            let mut inner = self.inner.lock();
            self.wait_to_read
                .wait_while(&mut inner, |i| !i.can_read() && !i.closed);
            if inner.closed && !inner.can_read() {
                break;
            }
            let n = Self::drain_into(&mut inner, &mut dst[total..]);
            total += n;
            drop(inner);
            self.did_read();
        }
        total
    }

    /// Non-blocking write. Returns the number of elements admitted.
    pub fn write_partial(&self, src: &[T]) -> usize {
        let mut inner = self.inner.lock();
        if inner.closed {
            return 0;
        }
        let n = Self::fill_from(&mut inner, src);
        drop(inner);
        if n > 0 {
            self.did_write();
        }
        n
    }

    /// Blocks until all of `src` is written or the buffer is closed.
    /// Returns the count actually admitted, short only on close.
    pub fn write_full(&self, src: &[T]) -> usize {
        let mut total = 0;
        while total < src.len() {
            let mut inner = self.inner.lock();
            self.wait_to_write
                .wait_while(&mut inner, |i| !i.can_write() && !i.closed);
            if inner.closed {
                break;
            }
            let n = Self::fill_from(&mut inner, &src[total..]);
            total += n;
            drop(inner);
            self.did_write();
        }
        total
    }

    /// Tries to write all of `src` before the wall-clock `deadline`.
    ///
    /// Returns the count admitted, which may be anything from zero to
    /// `src.len()`. Returns no later than the deadline (plus mutex
    /// acquisition); a past deadline admits only what fits right now.
    pub fn write_timed(&self, src: &[T], deadline: Instant) -> usize {
        let mut total = 0;
        while total < src.len() {
            let mut inner = self.inner.lock();
            loop {
                if inner.closed || inner.can_write() {
                    break;
                }
                if self.wait_to_write.wait_until(&mut inner, deadline).timed_out() {
                    return total;
                }
            }
            if inner.closed {
                break;
            }
            let n = Self::fill_from(&mut inner, &src[total..]);
            total += n;
            drop(inner);
            self.did_write();
            if Instant::now() >= deadline {
                break;
            }
        }
        total
    }
}
