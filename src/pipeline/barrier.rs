//! Track-change barrier.
//!
//! Encoders that share a barrier group emit the first packet of a new
//! track within a tight window: each one calls [`TrackBarrier::sync`]
//! with the track's serial as the token, and nobody proceeds until every
//! listener has arrived for that token.
//!
//! Tokens are compared cyclically, so wrap-around is safe and "newer
//! token wins": a worker arriving with a newer token takes the barrier
//! over and releases anyone still waiting on the old one, while a worker
//! that shows up with an older token has fallen behind and passes through
//! without holding the others up.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Cyclic ordering: is `a` ahead of `b` modulo 2^64?
fn is_ahead(a: u64, b: u64) -> bool {
    a.wrapping_sub(b) < 1 << 63
}

#[derive(Default)]
struct State {
    queued: usize,
    listeners: usize,
    visited: usize,
    token: u64,
}

/// Token-generation barrier shared by a named group of encoders.
#[derive(Default)]
pub struct TrackBarrier {
    state: Mutex<State>,
    barrier: Condvar,
}

impl TrackBarrier {
    /// Creates a barrier with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    fn increment(&self) {
        self.state.lock().listeners += 1;
    }

    fn decrement(&self) {
        let mut state = self.state.lock();
        state.listeners = state.listeners.saturating_sub(1);
        drop(state);
        self.barrier.notify_all();
    }

    /// Waits until every listener has arrived with `token`.
    ///
    /// Returns immediately when the caller has fallen behind (its token is
    /// older than the barrier's) or when a newer token overtakes the
    /// barrier while waiting.
    pub fn sync(&self, token: u64) {
        let mut state = self.state.lock();
        if state.queued == 0 {
            state.token = token;
        } else if state.token != token {
            if is_ahead(token, state.token) {
                // newer token wins: take the barrier over and release the
                // workers still waiting on the stale one
                state.token = token;
                state.visited = 0;
                state.queued = 0;
                self.barrier.notify_all();
            } else {
                // fallen behind, don't hold the others up
                return;
            }
        }

        state.queued += 1;
        if state.queued >= state.listeners {
            self.barrier.notify_all();
        } else {
            self.barrier
                .wait_while(&mut state, |s| s.queued < s.listeners && s.token == token);
            // the token moved on while we waited
            if state.token != token {
                return;
            }
        }

        state.visited += 1;
        if state.visited >= state.queued {
            state.visited = 0;
            state.queued = 0;
        }
    }

    /// Releases everyone and stops gating: listener count drops to zero.
    /// Used at shutdown.
    pub fn free(&self) {
        let mut state = self.state.lock();
        state.listeners = 0;
        drop(state);
        self.barrier.notify_all();
    }

    #[cfg(test)]
    fn listeners(&self) -> usize {
        self.state.lock().listeners
    }
}

/// Listener-slot guard: one per encoder for its whole lifetime.
pub struct BarrierHolder {
    barrier: Arc<TrackBarrier>,
}

impl BarrierHolder {
    /// Registers one listener on the barrier.
    pub fn new(barrier: Arc<TrackBarrier>) -> Self {
        barrier.increment();
        Self { barrier }
    }

    /// The held barrier.
    pub fn barrier(&self) -> &TrackBarrier {
        &self.barrier
    }
}

impl Drop for BarrierHolder {
    fn drop(&mut self) {
        self.barrier.decrement();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_is_ahead_basic() {
        assert!(is_ahead(2, 1));
        assert!(!is_ahead(1, 2));
        // equal counts as "ahead" (distance 0 is in the near half)
        assert!(is_ahead(5, 5));
    }

    #[test]
    fn test_is_ahead_wraps() {
        assert!(is_ahead(0, u64::MAX));
        assert!(is_ahead(3, u64::MAX - 2));
        assert!(!is_ahead(u64::MAX, 0));
    }

    #[test]
    fn test_single_listener_never_blocks() {
        let barrier = Arc::new(TrackBarrier::new());
        let holder = BarrierHolder::new(Arc::clone(&barrier));
        let start = Instant::now();
        for token in 1..50u64 {
            holder.barrier().sync(token);
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_two_listeners_meet() {
        let barrier = Arc::new(TrackBarrier::new());
        let holder_a = BarrierHolder::new(Arc::clone(&barrier));
        let holder_b = BarrierHolder::new(Arc::clone(&barrier));

        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(80));
            holder_b.barrier().sync(1);
        });

        let start = Instant::now();
        holder_a.barrier().sync(1);
        // the first arrival must have waited for the second
        assert!(start.elapsed() >= Duration::from_millis(50));
        worker.join().unwrap();
    }

    #[test]
    fn test_reusable_across_generations() {
        let barrier = Arc::new(TrackBarrier::new());
        let holder_a = BarrierHolder::new(Arc::clone(&barrier));
        let holder_b = BarrierHolder::new(Arc::clone(&barrier));

        let worker = std::thread::spawn(move || {
            for token in 1..=10u64 {
                holder_b.barrier().sync(token);
            }
        });
        for token in 1..=10u64 {
            holder_a.barrier().sync(token);
        }
        worker.join().unwrap();
    }

    #[test]
    fn test_newer_token_releases_stale_waiter() {
        let barrier = Arc::new(TrackBarrier::new());
        let holder_a = BarrierHolder::new(Arc::clone(&barrier));
        let holder_b = BarrierHolder::new(Arc::clone(&barrier));

        // A waits on token 1; B has moved on and arrives with token 2.
        // A must be released rather than deadlock.
        let stale = std::thread::spawn(move || {
            holder_a.barrier().sync(1);
        });
        std::thread::sleep(Duration::from_millis(50));
        holder_b.barrier().sync(2);
        stale.join().unwrap();
    }

    #[test]
    fn test_behind_caller_passes_through() {
        let barrier = Arc::new(TrackBarrier::new());
        let holder_a = BarrierHolder::new(Arc::clone(&barrier));
        let holder_b = BarrierHolder::new(Arc::clone(&barrier));

        let waiter = {
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let holder = holder_a;
                holder.barrier().sync(5);
                drop(holder);
                barrier.free();
            })
        };
        std::thread::sleep(Duration::from_millis(50));

        // B fell behind (token 3 < 5): returns immediately, leaving the
        // barrier queued on token 5
        let start = Instant::now();
        holder_b.barrier().sync(3);
        assert!(start.elapsed() < Duration::from_millis(50));

        // let A out so the test can finish
        drop(holder_b);
        waiter.join().unwrap();
    }

    #[test]
    fn test_free_releases_waiters() {
        let barrier = Arc::new(TrackBarrier::new());
        let holder_a = BarrierHolder::new(Arc::clone(&barrier));
        let _holder_b = BarrierHolder::new(Arc::clone(&barrier));

        let waiter = std::thread::spawn(move || {
            holder_a.barrier().sync(1);
        });
        std::thread::sleep(Duration::from_millis(50));
        barrier.free();
        waiter.join().unwrap();
    }

    #[test]
    fn test_holder_tracks_listener_count() {
        let barrier = Arc::new(TrackBarrier::new());
        assert_eq!(barrier.listeners(), 0);
        {
            let _a = BarrierHolder::new(Arc::clone(&barrier));
            let _b = BarrierHolder::new(Arc::clone(&barrier));
            assert_eq!(barrier.listeners(), 2);
        }
        assert_eq!(barrier.listeners(), 0);
    }

    #[test]
    fn test_many_threads_aligned_on_each_token() {
        use std::sync::atomic::{AtomicU64, Ordering};

        let barrier = Arc::new(TrackBarrier::new());
        let entered = Arc::new(AtomicU64::new(0));
        let mut threads = Vec::new();
        for _ in 0..4 {
            let holder = BarrierHolder::new(Arc::clone(&barrier));
            let entered = Arc::clone(&entered);
            threads.push(std::thread::spawn(move || {
                for token in 1..=20u64 {
                    entered.fetch_add(1, Ordering::SeqCst);
                    holder.barrier().sync(token);
                    // after leaving the barrier, everyone must have
                    // entered at least as often as this thread
                    let seen = entered.load(Ordering::SeqCst);
                    assert!(seen >= token * 4 - 3, "seen {seen} at token {token}");
                }
            }));
        }
        for thread in threads {
            thread.join().unwrap();
        }
    }
}
