//! # Synchronization Primitives
//!
//! Spin-then-park primitives used by the concurrent arena and by callers that
//! need to serialize access to the single-writer containers.
//!
//! ## Primitives
//!
//! - [`SpinLock`] - Busy-wait lock guarding rare, short critical sections
//! - [`Fence`] - Monotonic completion counter threads can wait on
//! - [`SemaphoreLight`] - Counting semaphore with a spinning fast path
//! - [`ReadWriteLock`] - Writer-preferring reader/writer lock over one atomic
//! - [`UnsafeMutex`] - Non-RAII mutex with explicit wait/release
//!
//! ## Waiting
//!
//! Every blocking call spins for `spin_count` rounds (see
//! [`MemoryConfig`](crate::config::MemoryConfig)) with exponential backoff
//! before falling back to yielding or an OS wait. Timeouts are absolute
//! [`Deadline`]s computed once from the monotonic clock and polled; nothing
//! here can be cancelled mid-wait.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_utils::{Backoff, CachePadded};
use parking_lot::lock_api::{RawMutex as _, RawMutexTimed as _};
use parking_lot::{Condvar, Mutex, RawMutex};

use crate::config;

// ============================================================================
// Deadline
// ============================================================================

/// An absolute point in time by which a wait must finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline {
    deadline: Instant,
}

impl Deadline {
    /// Deadline at a specific instant.
    pub fn at(instant: Instant) -> Self {
        Self { deadline: instant }
    }

    /// Deadline `duration` from now.
    pub fn after(duration: Duration) -> Self {
        Self {
            deadline: Instant::now() + duration,
        }
    }

    /// Map an optional timeout to an optional deadline (`None` waits forever).
    pub fn from_timeout(timeout: Option<Duration>) -> Option<Self> {
        timeout.map(Self::after)
    }

    /// The underlying instant.
    pub fn instant(&self) -> Instant {
        self.deadline
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time left, or `None` once expired.
    pub fn remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        if now >= self.deadline {
            None
        } else {
            Some(self.deadline - now)
        }
    }
}

impl From<Instant> for Deadline {
    fn from(instant: Instant) -> Self {
        Self::at(instant)
    }
}

impl From<Duration> for Deadline {
    fn from(duration: Duration) -> Self {
        Self::after(duration)
    }
}

/// Spin with backoff until `done` returns true or the configured spin budget
/// runs out.
fn spin_for(mut done: impl FnMut() -> bool) -> bool {
    let backoff = Backoff::new();
    for _ in 0..config::config().spin_count {
        if done() {
            return true;
        }
        backoff.spin();
    }
    done()
}

/// Spin, then yield, until `done` returns true or the deadline passes.
fn spin_until(deadline: Option<Deadline>, mut done: impl FnMut() -> bool) -> bool {
    if spin_for(&mut done) {
        return true;
    }
    let backoff = Backoff::new();
    loop {
        if done() {
            return true;
        }
        if deadline.is_some_and(|d| d.is_expired()) {
            return false;
        }
        backoff.snooze();
    }
}

// ============================================================================
// SpinLock
// ============================================================================

/// A test-and-test-and-set spin lock.
///
/// Meant for critical sections that are short and rare, such as creating a new
/// arena page. The lock word sits on its own cache line.
#[derive(Default)]
pub struct SpinLock {
    locked: CachePadded<AtomicBool>,
}

impl SpinLock {
    /// Creates an unlocked spin lock.
    pub const fn new() -> Self {
        Self {
            locked: CachePadded::new(AtomicBool::new(false)),
        }
    }

    /// Whether the lock is currently held.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Attempt a single acquisition.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_>> {
        if !self.locked.load(Ordering::Relaxed)
            && self
                .locked
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
        {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    /// Spin until the lock is acquired.
    pub fn lock(&self) -> SpinLockGuard<'_> {
        let backoff = Backoff::new();
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            backoff.snooze();
        }
    }

    /// Spin until the lock is acquired or `abandon` returns true.
    ///
    /// `abandon` is checked between attempts. It lets a waiter give up once
    /// whatever it wanted the lock for has been done by the current holder.
    pub fn lock_unless(&self, mut abandon: impl FnMut() -> bool) -> Option<SpinLockGuard<'_>> {
        let backoff = Backoff::new();
        loop {
            if let Some(guard) = self.try_lock() {
                return Some(guard);
            }
            if abandon() {
                return None;
            }
            backoff.snooze();
        }
    }
}

impl fmt::Debug for SpinLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Releases a [`SpinLock`] on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SpinLockGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

impl fmt::Debug for SpinLockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SpinLockGuard")
    }
}

// ============================================================================
// Fence
// ============================================================================

/// A monotonically increasing completion counter.
///
/// Producers [`signal`](Fence::signal) values as work completes; consumers
/// [`wait`](Fence::wait) until the completed value reaches a target. Signalling
/// a value lower than the current one has no effect.
pub struct Fence {
    completed: AtomicU64,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl Fence {
    /// Creates a fence whose completed value starts at `initial`.
    pub fn new(initial: u64) -> Self {
        Self {
            completed: AtomicU64::new(initial),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// The highest value signalled so far.
    pub fn completed_value(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Whether `value` has been reached.
    pub fn is_completed(&self, value: u64) -> bool {
        self.completed_value() >= value
    }

    /// Raise the completed value to `value` and wake every waiter.
    pub fn signal(&self, value: u64) {
        let previous = self.completed.fetch_max(value, Ordering::AcqRel);
        if value > previous {
            // Taking the mutex orders the store before any waiter's re-check.
            let _guard = self.mutex.lock();
            self.condvar.notify_all();
        }
    }

    /// Block until the completed value reaches `value`.
    ///
    /// Returns `false` if `timeout` elapses first. `None` waits forever.
    pub fn wait(&self, value: u64, timeout: Option<Duration>) -> bool {
        let deadline = Deadline::from_timeout(timeout);
        if spin_for(|| self.is_completed(value)) {
            return true;
        }

        let mut guard = self.mutex.lock();
        while !self.is_completed(value) {
            match deadline {
                Some(deadline) => {
                    if self.condvar.wait_until(&mut guard, deadline.instant()).timed_out() {
                        return self.is_completed(value);
                    }
                }
                None => self.condvar.wait(&mut guard),
            }
        }
        true
    }
}

impl Default for Fence {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("completed", &self.completed_value())
            .finish()
    }
}

// ============================================================================
// SemaphoreLight
// ============================================================================

/// A counting semaphore that spins before parking.
///
/// Unlike a fair semaphore, permits go to whichever waiter observes them
/// first.
pub struct SemaphoreLight {
    count: AtomicU32,
    waiters: AtomicU32,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl SemaphoreLight {
    /// Creates a semaphore with `initial` permits.
    pub fn new(initial: u32) -> Self {
        Self {
            count: AtomicU32::new(initial),
            waiters: AtomicU32::new(0),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// Permits currently available.
    pub fn current_count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    /// Take a permit if one is available.
    pub fn try_wait(&self) -> bool {
        let mut current = self.count.load(Ordering::SeqCst);
        while current > 0 {
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    /// Take a permit, blocking until one is released.
    ///
    /// Returns `false` if `timeout` elapses first. `None` waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = Deadline::from_timeout(timeout);
        if spin_for(|| self.try_wait()) {
            return true;
        }

        let mut guard = self.mutex.lock();
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let acquired = loop {
            if self.try_wait() {
                break true;
            }
            match deadline {
                Some(deadline) => {
                    if self.condvar.wait_until(&mut guard, deadline.instant()).timed_out() {
                        break self.try_wait();
                    }
                }
                None => self.condvar.wait(&mut guard),
            }
        };
        self.waiters.fetch_sub(1, Ordering::AcqRel);
        acquired
    }

    /// Return `count` permits and wake up to `count` waiters.
    ///
    /// Returns the count before the release.
    pub fn release(&self, count: u32) -> u32 {
        // SeqCst pairs with the waiter registering before its final re-check.
        let previous = self.count.fetch_add(count, Ordering::SeqCst);
        if count > 0 && self.waiters.load(Ordering::SeqCst) > 0 {
            let _guard = self.mutex.lock();
            for _ in 0..count {
                if !self.condvar.notify_one() {
                    break;
                }
            }
        }
        previous
    }
}

impl Default for SemaphoreLight {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Debug for SemaphoreLight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemaphoreLight")
            .field("count", &self.current_count())
            .field("waiters", &self.waiters.load(Ordering::Relaxed))
            .finish()
    }
}

// ============================================================================
// ReadWriteLock
// ============================================================================

const WRITER: u32 = 1 << 31;
const READERS_MASK: u32 = WRITER - 1;

/// A reader/writer lock packed into one atomic word.
///
/// Bit 31 marks an active writer and the low bits count active readers. A
/// separate counter tracks writers that are waiting; new readers hold off
/// while it is non-zero, so a steady stream of readers cannot starve writers,
/// and a writer that times out leaves the other queued writers counted.
///
/// The lock protects no data of its own; callers pair `enter_*`/`exit_*`
/// calls or use the RAII [`read`](Self::read)/[`write`](Self::write) guards.
#[derive(Default)]
pub struct ReadWriteLock {
    state: CachePadded<AtomicU32>,
    waiting_writers: AtomicU32,
}

impl ReadWriteLock {
    /// Creates an unlocked lock.
    pub const fn new() -> Self {
        Self {
            state: CachePadded::new(AtomicU32::new(0)),
            waiting_writers: AtomicU32::new(0),
        }
    }

    /// Number of readers currently inside.
    pub fn current_read_count(&self) -> u32 {
        self.state.load(Ordering::Acquire) & READERS_MASK
    }

    /// Whether any reader holds the lock.
    pub fn is_read_lock_held(&self) -> bool {
        self.current_read_count() > 0
    }

    /// Whether a writer holds the lock.
    pub fn is_write_lock_held(&self) -> bool {
        self.state.load(Ordering::Acquire) & WRITER != 0
    }

    /// Number of writers waiting for the lock.
    pub fn waiting_writer_count(&self) -> u32 {
        self.waiting_writers.load(Ordering::Acquire)
    }

    fn try_enter_read_once(&self) -> bool {
        if self.waiting_writers.load(Ordering::Acquire) != 0 {
            return false;
        }
        let state = self.state.load(Ordering::Acquire);
        if state & WRITER != 0 || state & READERS_MASK == READERS_MASK {
            return false;
        }
        self.state
            .compare_exchange_weak(state, state + 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn try_enter_write_once(&self) -> bool {
        self.state
            .compare_exchange_weak(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Acquire shared access, waiting at most `timeout`.
    pub fn try_enter_read_lock(&self, timeout: Option<Duration>) -> bool {
        spin_until(Deadline::from_timeout(timeout), || self.try_enter_read_once())
    }

    /// Acquire shared access.
    pub fn enter_read_lock(&self) {
        self.try_enter_read_lock(None);
    }

    /// Release shared access.
    pub fn exit_read_lock(&self) {
        let previous = self.state.fetch_sub(1, Ordering::Release);
        debug_assert!(previous & READERS_MASK > 0, "exit_read_lock without a reader");
    }

    /// Acquire exclusive access, waiting at most `timeout`.
    ///
    /// The writer counts itself as waiting for as long as it spins, whether it
    /// ends up acquiring the lock or giving up.
    pub fn try_enter_write_lock(&self, timeout: Option<Duration>) -> bool {
        if self.try_enter_write_once() {
            return true;
        }
        self.waiting_writers.fetch_add(1, Ordering::AcqRel);
        let acquired = spin_until(Deadline::from_timeout(timeout), || self.try_enter_write_once());
        self.waiting_writers.fetch_sub(1, Ordering::AcqRel);
        acquired
    }

    /// Acquire exclusive access.
    pub fn enter_write_lock(&self) {
        self.try_enter_write_lock(None);
    }

    /// Release exclusive access.
    pub fn exit_write_lock(&self) {
        let previous = self.state.fetch_and(!WRITER, Ordering::Release);
        debug_assert!(previous & WRITER != 0, "exit_write_lock without a writer");
    }

    /// Shared access released on drop.
    pub fn read(&self) -> ReadLockGuard<'_> {
        self.enter_read_lock();
        ReadLockGuard { lock: self }
    }

    /// Exclusive access released on drop.
    pub fn write(&self) -> WriteLockGuard<'_> {
        self.enter_write_lock();
        WriteLockGuard { lock: self }
    }
}

impl fmt::Debug for ReadWriteLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadWriteLock")
            .field("readers", &self.current_read_count())
            .field("writer", &self.is_write_lock_held())
            .field("waiting_writers", &self.waiting_writer_count())
            .finish()
    }
}

/// Shared access to a [`ReadWriteLock`].
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ReadLockGuard<'a> {
    lock: &'a ReadWriteLock,
}

impl Drop for ReadLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.exit_read_lock();
    }
}

/// Exclusive access to a [`ReadWriteLock`].
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct WriteLockGuard<'a> {
    lock: &'a ReadWriteLock,
}

impl Drop for WriteLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.exit_write_lock();
    }
}

// ============================================================================
// UnsafeMutex
// ============================================================================

/// A mutex with explicit acquire and release calls.
///
/// Ownership is not tracked: any thread may call
/// [`release_mutex`](Self::release_mutex), which is why that call is unsafe.
/// Prefer [`lock`](Self::lock) when the critical section is lexically scoped.
pub struct UnsafeMutex {
    raw: RawMutex,
}

impl UnsafeMutex {
    /// Creates an unlocked mutex.
    pub const fn new() -> Self {
        Self { raw: RawMutex::INIT }
    }

    /// Acquire the mutex, waiting at most `timeout`. `None` waits forever.
    pub fn wait_one(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            None => {
                self.raw.lock();
                true
            }
            Some(timeout) => self.raw.try_lock_for(timeout),
        }
    }

    /// Acquire the mutex if it is free.
    pub fn try_lock(&self) -> bool {
        self.raw.try_lock()
    }

    /// Whether the mutex is held by anyone.
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Release the mutex.
    ///
    /// # Safety
    ///
    /// The mutex must be held, acquired through [`wait_one`](Self::wait_one)
    /// or [`try_lock`](Self::try_lock) in the current context.
    pub unsafe fn release_mutex(&self) {
        self.raw.unlock();
    }

    /// Acquire the mutex and release it when the guard drops.
    pub fn lock(&self) -> UnsafeMutexGuard<'_> {
        self.raw.lock();
        UnsafeMutexGuard { mutex: self }
    }
}

impl Default for UnsafeMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UnsafeMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsafeMutex")
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Scoped ownership of an [`UnsafeMutex`].
#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct UnsafeMutexGuard<'a> {
    mutex: &'a UnsafeMutex,
}

impl Drop for UnsafeMutexGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: the guard exists only while the mutex is held.
        unsafe { self.mutex.release_mutex() };
    }
}

// ============================================================================
// Tests
// ============================================================================
