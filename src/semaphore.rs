//! An asynchronous, fair, keyed [counting semaphore].
//!
//! A keyed semaphore limits the number of tasks which may execute
//! concurrently, while sharing that limit fairly between independent
//! partitions of demand. See the [`KeyedSemaphore`] type's documentation for
//! details.
//!
//! [counting semaphore]: https://en.wikipedia.org/wiki/Semaphore_(programming)
use crate::{loom::sync::Mutex, WaitResult};
use core::{
    cmp, fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll, Waker},
};
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::Arc,
};


/// An asynchronous, fair, keyed [counting semaphore].
///
/// A semaphore is a synchronization primitive that limits the number of tasks
/// that may run concurrently. It consists of a count of _permits_, which
/// tasks may [`acquire`] in order to execute in some context. When a task
/// acquires permits from the semaphore, the count of available permits is
/// decreased; when no permits remain, a task that wishes to acquire permits
/// must (asynchronously) wait until another task has released some.
///
/// A *keyed* semaphore additionally groups demand into _partitions_ chosen by
/// the caller (a tenant id, a queue name, or any other `Ord + Clone` key) and
/// distributes permits fairly *across* partitions, while keeping strict
/// first-in, first-out order *within* each partition.
///
/// The [`Permit`] type is a RAII guard representing one or more permits
/// acquired from a `KeyedSemaphore`. When a [`Permit`] is dropped, the
/// permits it represents are released back to the semaphore, and are
/// redistributed to waiting tasks.
///
/// # Fairness
///
/// Within one partition, permits are assigned to waiting tasks in the order
/// that those tasks requested them (first-in, first-out). Across partitions,
/// freed permits are distributed round-robin over the partitions with unmet
/// demand: each partition's oldest request is offered the permits it still
/// needs (up to however many are free) before the next partition is visited,
/// and a partition is revisited only after every other waiting partition has
/// had a turn. A request for several permits therefore cannot be starved by
/// a stream of smaller requests, and a partition with many queued requests
/// cannot starve the other partitions.
///
/// Multi-permit acquisitions are atomic: the requesting task either holds
/// all the permits it asked for, or none. While it waits, permits may be
/// *reserved* for it incrementally; if the request is cancelled (by dropping
/// the [`Acquire`] future), every reserved permit is returned to the pool
/// and redistributed.
///
/// # Requests exceeding the capacity
///
/// A request for more permits than the semaphore was constructed with can
/// never be satisfied. Such a request is accepted and waits forever; permits
/// accumulate in its reservation as they free up, so it will eventually wedge
/// the whole semaphore. This is indistinguishable from ordinary backpressure from
/// inside the semaphore, so it is **not** reported as an error; callers that
/// cannot rule it out statically should validate counts against
/// [`capacity`](Self::capacity) or race acquisitions against a timeout.
///
/// # Examples
///
/// Sharing a concurrency limit fairly between two tenants:
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use enoki_sync::KeyedSemaphore;
/// use std::sync::Arc;
///
/// // Allow 4 jobs to run concurrently, regardless of which tenant
/// // submitted them.
/// let semaphore = Arc::new(KeyedSemaphore::new(4));
///
/// # let mut tasks = Vec::new();
/// for i in 0..8 {
///     // Even-numbered jobs belong to "alpha", odd-numbered to "beta"; if
///     // one tenant floods the queue, the other still gets its turn.
///     let tenant = if i % 2 == 0 { "alpha" } else { "beta" };
///     let semaphore = semaphore.clone();
///     # let t =
///     tokio::spawn(async move {
///         let _permit = semaphore
///             .acquire_owned(tenant, 1)
///             .await
///             .expect("semaphore is not closed");
///
///         // do some work...
///     });
///     # tasks.push(t);
/// }
/// # for task in tasks { task.await.unwrap() };
/// # }
/// ```
///
/// [counting semaphore]: https://en.wikipedia.org/wiki/Semaphore_(programming)
/// [`acquire`]: Self::acquire
pub struct KeyedSemaphore<K> {
    /// The fixed number of permits the semaphore was constructed with.
    total: usize,

    /// The permit pool, partition queues, and rotation ring, all guarded by
    /// one mutex so that taking permits, returning them, and distributing
    /// them to waiters never interleave.
    sem: Mutex<Sem<K>>,
}

/// A [RAII guard] representing one or more permits acquired from a
/// [`KeyedSemaphore`].
///
/// When the `Permit` is dropped, the permits it represents are released back
/// to the semaphore, and a distribution pass hands them to waiting
/// partitions.
///
/// This type is returned by the [`KeyedSemaphore::acquire`] and
/// [`KeyedSemaphore::try_acquire`] methods.
///
/// [RAII guard]: https://rust-unofficial.github.io/patterns/patterns/behavioural/RAII.html
#[must_use = "dropping a `Permit` releases the acquired permits back to the `KeyedSemaphore`"]
pub struct Permit<'sem, K: Ord> {
    permits: usize,
    semaphore: &'sem KeyedSemaphore<K>,
}

/// The future returned by the [`KeyedSemaphore::acquire`] method.
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Acquire<'sem, K: Ord> {
    semaphore: &'sem KeyedSemaphore<K>,
    key: K,
    permits: usize,
    state: AcquireState,
}

/// Errors returned by [`KeyedSemaphore::try_acquire`].
#[derive(Debug, PartialEq, Eq)]
pub enum TryAcquireError {
    /// The semaphore has been [closed], so additional permits cannot be
    /// acquired.
    ///
    /// [closed]: KeyedSemaphore::close
    Closed,
    /// The semaphore does not currently have enough permits to satisfy the
    /// request.
    InsufficientPermits,
}

/// The lock-guarded portion of the semaphore's state.
///
/// Every mutation of the permit pool, the partition queues, and the rotation
/// ring happens while this structure is locked, so the bookkeeping invariants
/// (`available + permits held by grants and waiters == total`, a key is in
/// the ring iff its queue is non-empty) hold whenever the lock is free.
struct Sem<K> {
    /// Permits not currently held by a grant or reserved by a waiter.
    available: usize,

    /// Pending requests, FIFO per partition.
    ///
    /// A partition's queue is created lazily by the first request that cannot
    /// be satisfied synchronously, and the entry is removed as soon as the
    /// queue empties, so a key is present here iff it has pending demand.
    queues: BTreeMap<K, VecDeque<Waiter>>,

    /// The rotation ring: the cyclic order in which partitions with pending
    /// demand are visited by a distribution pass.
    ///
    /// The cursor is implicit: a visit pops the front key and, if the key
    /// still has demand afterwards, pushes it to the back, so the next pass
    /// resumes wherever the previous one left off.
    ring: VecDeque<K>,

    /// Requests that have been fully satisfied but whose futures have not
    /// yet observed the grant.
    ///
    /// Permits are transferred to a waiter inside the critical section, but
    /// the woken task only runs later; its id parks here in the meantime so
    /// that a cancellation racing with satisfaction still releases the
    /// permits.
    granted: BTreeSet<u64>,

    /// Identifier for the next waiter.
    next_id: u64,

    /// Has the semaphore closed?
    closed: bool,
}

/// A single pending acquisition.
///
/// `acquired` permits have already been taken out of the pool on this
/// request's behalf; the request is satisfied once `remaining` reaches zero,
/// and `acquired + remaining` always equals the originally requested count.
struct Waiter {
    id: u64,
    acquired: usize,
    remaining: usize,
    waker: Option<Waker>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum AcquireState {
    /// The request has not yet taken any permits.
    Unqueued,
    /// The request is waiting in its partition's queue with this id.
    Queued(u64),
    /// The future has completed (or was never going to take permits).
    Done,
}

// === impl KeyedSemaphore ===

impl<K> KeyedSemaphore<K> {
    /// Returns a new `KeyedSemaphore` with `permits` permits available.
    ///
    /// The total is fixed for the semaphore's lifetime: permits released by
    /// completed or cancelled holders return to the pool, and the pool never
    /// grows past `permits`.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            total: permits,
            sem: Mutex::new(Sem {
                available: permits,
                queues: BTreeMap::new(),
                ring: VecDeque::new(),
                granted: BTreeSet::new(),
                next_id: 0,
                closed: false,
            }),
        }
    }

    /// Returns the fixed number of permits this semaphore was constructed
    /// with.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.total
    }

    /// Returns the number of permits currently available in this semaphore,
    /// or 0 if the semaphore is [closed].
    ///
    /// [closed]: Self::close
    pub fn available_permits(&self) -> usize {
        let sem = self.sem.lock();
        if sem.closed {
            return 0;
        }

        sem.available
    }

    /// Closes the semaphore.
    ///
    /// This wakes all tasks currently waiting to acquire permits, causing
    /// them to return [`Closed`](crate::Closed), and causes subsequent calls
    /// to [`acquire`](Self::acquire) or [`try_acquire`](Self::try_acquire)
    /// to fail. Permits held by running tasks remain valid until dropped;
    /// releasing permits into a closed semaphore is a no-op.
    pub fn close(&self) {
        let mut wakers = Vec::new();
        let mut sem = self.sem.lock();
        if sem.closed {
            return;
        }

        trace!("KeyedSemaphore::close");
        sem.closed = true;
        sem.ring.clear();
        let queues = core::mem::take(&mut sem.queues);
        drop(sem);

        for (_, queue) in queues {
            for waiter in queue {
                if let Some(waker) = waiter.waker {
                    wakers.push(waker);
                }
            }
        }

        for waker in wakers {
            waker.wake();
        }
    }
}

impl<K: Ord> KeyedSemaphore<K> {
    /// Try to acquire `permits` permits from the semaphore, without waiting
    /// for additional permits to become available.
    ///
    /// Unlike [`acquire`](Self::acquire), this method takes no partition
    /// key: a request that cannot be satisfied immediately fails rather than
    /// queueing, so it never participates in fairness bookkeeping. It also
    /// never jumps the queue, because whenever any task is waiting, the pool
    /// is empty and `try_acquire` fails.
    ///
    /// # Returns
    ///
    /// - `Ok(`[`Permit`]`)` with the requested number of permits, if they
    ///   were available.
    /// - `Err(`[`TryAcquireError::Closed`]`)` if the semaphore was [closed].
    /// - `Err(`[`TryAcquireError::InsufficientPermits`]`)` if the semaphore
    ///   had fewer than `permits` permits available.
    ///
    /// [closed]: Self::close
    pub fn try_acquire(&self, permits: usize) -> Result<Permit<'_, K>, TryAcquireError> {
        trace!(permits, "KeyedSemaphore::try_acquire");
        self.try_acquire_inner(permits).map(|_| Permit {
            permits,
            semaphore: self,
        })
    }

    /// Try to acquire `permits` permits from the semaphore, without waiting,
    /// returning an [`OwnedPermit`].
    ///
    /// This method behaves identically to [`try_acquire`](Self::try_acquire),
    /// except that it requires the semaphore to be wrapped in an [`Arc`], and
    /// the returned [`OwnedPermit`] clones the [`Arc`] rather than borrowing
    /// the semaphore, allowing it to be valid for the `'static` lifetime.
    pub fn try_acquire_owned(
        self: &Arc<Self>,
        permits: usize,
    ) -> Result<OwnedPermit<K>, TryAcquireError> {
        trace!(permits, "KeyedSemaphore::try_acquire_owned");
        self.try_acquire_inner(permits).map(|_| OwnedPermit {
            permits,
            semaphore: self.clone(),
        })
    }

    fn try_acquire_inner(&self, permits: usize) -> Result<(), TryAcquireError> {
        let mut sem = self.sem.lock();
        if sem.closed {
            return Err(TryAcquireError::Closed);
        }

        if sem.available < permits {
            return Err(TryAcquireError::InsufficientPermits);
        }

        sem.available -= permits;
        Ok(())
    }

    /// Return `permits` permits to the pool and run a distribution pass.
    ///
    /// Wakers are collected under the lock and invoked after it is released,
    /// so a waking task that immediately re-enters the semaphore cannot
    /// deadlock against us.
    fn release(&self, permits: usize) {
        if permits == 0 {
            return;
        }

        let mut wakers = Vec::new();
        let mut sem = self.sem.lock();
        if sem.closed {
            trace!(permits, "KeyedSemaphore::release -> closed; dropping permits");
            return;
        }

        sem.available += permits;
        debug_assert!(
            sem.available <= self.total,
            "released more permits ({}) than the semaphore holds ({})",
            sem.available,
            self.total,
        );
        trace!(permits, available = sem.available, "KeyedSemaphore::release");
        sem.distribute(&mut wakers);
        drop(sem);

        for waker in wakers {
            waker.wake();
        }
    }

    /// Drop an `Acquire` future.
    ///
    /// This is factored out into a method on `KeyedSemaphore`, because the
    /// same code is run when dropping an `Acquire` future or an
    /// `AcquireOwned` future.
    fn drop_acquire(&self, key: &K, permits: usize, state: AcquireState) {
        let AcquireState::Queued(id) = state else {
            // `Unqueued` and `Done` futures hold nothing: either no permits
            // were ever taken, or ownership already moved into a `Permit`.
            return;
        };

        let mut wakers = Vec::new();
        let mut sem = self.sem.lock();
        if sem.granted.remove(&id) {
            // The request was satisfied between its last poll and this drop;
            // the task will never observe the grant, so the full request
            // goes back to the pool.
            trace!(id, permits, "Acquire::drop -> cancelled after grant");
            if !sem.closed {
                sem.available += permits;
                sem.distribute(&mut wakers);
            }
        } else if !sem.closed {
            let acquired = sem.remove_waiter(key, id);
            trace!(id, acquired, "Acquire::drop -> cancelled while waiting");
            if acquired > 0 {
                sem.available += acquired;
                sem.distribute(&mut wakers);
            }
        }
        drop(sem);

        for waker in wakers {
            waker.wake();
        }
    }
}

impl<K: Clone + Ord> KeyedSemaphore<K> {
    /// Acquire `permits` permits from the semaphore under the partition
    /// `key`, waiting asynchronously if there are insufficient permits
    /// currently available.
    ///
    /// A request for `0` permits completes immediately without touching the
    /// pool, regardless of contention.
    ///
    /// # Returns
    ///
    /// - `Ok(`[`Permit`]`)` with the requested number of permits, if the
    ///   permits were acquired.
    /// - `Err(`[`Closed`]`)` if the semaphore was [closed].
    ///
    /// # Cancellation
    ///
    /// Dropping the returned [`Acquire`] future cancels the request: it is
    /// removed from its partition's queue, and any permits that were already
    /// reserved for it are returned to the pool and redistributed to other
    /// waiters. A cancelled request never runs at reduced capacity and never
    /// strands permits.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// use enoki_sync::KeyedSemaphore;
    ///
    /// let semaphore = KeyedSemaphore::new(2);
    ///
    /// // Take both permits under the "reindex" partition...
    /// let permit = semaphore
    ///     .acquire("reindex", 2)
    ///     .await
    ///     .expect("semaphore is not closed");
    ///
    /// // ...so nothing is left for anyone else until they are released.
    /// assert_eq!(semaphore.available_permits(), 0);
    /// drop(permit);
    /// assert_eq!(semaphore.available_permits(), 2);
    /// # }
    /// ```
    ///
    /// [`Closed`]: crate::Closed
    /// [closed]: Self::close
    pub fn acquire(&self, key: K, permits: usize) -> Acquire<'_, K> {
        Acquire {
            semaphore: self,
            key,
            permits,
            state: AcquireState::Unqueued,
        }
    }

    /// Acquire `permits` permits under the partition `key`, waiting
    /// asynchronously if there are insufficient permits currently available,
    /// and returning an [`OwnedPermit`].
    ///
    /// This method behaves identically to [`acquire`](Self::acquire), except
    /// that it requires the semaphore to be wrapped in an [`Arc`], and
    /// returns an [`OwnedPermit`] which clones the [`Arc`] rather than
    /// borrowing the semaphore. This allows the returned [`OwnedPermit`] to
    /// be valid for the `'static` lifetime.
    pub fn acquire_owned(self: &Arc<Self>, key: K, permits: usize) -> AcquireOwned<K> {
        AcquireOwned {
            semaphore: self.clone(),
            key,
            permits,
            state: AcquireState::Unqueued,
        }
    }

    /// Run `body` while holding `permits` permits under the partition `key`.
    ///
    /// The permits are acquired before `body` is first polled and released
    /// when `body` finishes, or when the returned future is dropped partway
    /// through, so cancellation cannot leak permits. The output of `body` is
    /// returned unchanged; the semaphore never inspects it.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// use enoki_sync::KeyedSemaphore;
    ///
    /// let semaphore = KeyedSemaphore::new(4);
    ///
    /// let answer = semaphore
    ///     .with_permits("tenant-a", 2, async {
    ///         // at most 4 permits' worth of work runs concurrently...
    ///         42
    ///     })
    ///     .await
    ///     .expect("semaphore is not closed");
    ///
    /// assert_eq!(answer, 42);
    /// # }
    /// ```
    pub async fn with_permits<F>(&self, key: K, permits: usize, body: F) -> WaitResult<F::Output>
    where
        F: Future,
    {
        let _permit = self.acquire(key, permits).await?;
        Ok(body.await)
    }

    fn poll_acquire(
        &self,
        key: &K,
        permits: usize,
        state: &mut AcquireState,
        cx: &mut Context<'_>,
    ) -> Poll<WaitResult<()>> {
        let mut sem = self.sem.lock();
        match *state {
            AcquireState::Unqueued => {
                if sem.closed {
                    *state = AcquireState::Done;
                    return crate::closed();
                }

                // zero-permit requests don't interact with the pool at all.
                if permits == 0 {
                    *state = AcquireState::Done;
                    return Poll::Ready(Ok(()));
                }

                let taken = cmp::min(sem.available, permits);
                sem.available -= taken;
                if test_dbg!(taken) == permits {
                    trace!(permits, "KeyedSemaphore::poll_acquire -> acquired");
                    *state = AcquireState::Done;
                    return Poll::Ready(Ok(()));
                }

                let id = sem.next_id;
                sem.next_id += 1;
                sem.enqueue(
                    key,
                    Waiter {
                        id,
                        acquired: taken,
                        remaining: permits - taken,
                        waker: Some(cx.waker().clone()),
                    },
                );
                *state = AcquireState::Queued(id);
                trace!(
                    permits,
                    acquired = taken,
                    id,
                    "KeyedSemaphore::poll_acquire -> queued"
                );
                Poll::Pending
            }
            AcquireState::Queued(id) => {
                if sem.granted.remove(&id) {
                    trace!(id, "KeyedSemaphore::poll_acquire -> granted");
                    *state = AcquireState::Done;
                    return Poll::Ready(Ok(()));
                }

                if sem.closed {
                    *state = AcquireState::Done;
                    return crate::closed();
                }

                // still waiting; keep the registered waker current.
                let waiter = sem
                    .waiter_mut(key, id)
                    .expect("a queued waiter that was not granted or closed is in its queue");
                let will_wake = waiter
                    .waker
                    .as_ref()
                    .map_or(false, |waker| waker.will_wake(cx.waker()));
                if !will_wake {
                    waiter.waker = Some(cx.waker().clone());
                }
                Poll::Pending
            }
            AcquireState::Done => panic!("Acquire future polled after completion"),
        }
    }
}

impl<K> fmt::Debug for KeyedSemaphore<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("KeyedSemaphore");
        s.field("capacity", &self.total);
        match self.sem.try_lock() {
            Some(sem) => s
                .field("available", &sem.available)
                .field("waiting_partitions", &sem.ring.len())
                .field("closed", &sem.closed),
            None => s.field("state", &format_args!("<locked>")),
        }
        .finish()
    }
}

// === impl Sem ===

impl<K: Ord> Sem<K> {
    /// Append a request to its partition's queue. If the partition had no
    /// prior demand, the queue is created and the partition joins the
    /// rotation ring.
    fn enqueue(&mut self, key: &K, waiter: Waiter)
    where
        K: Clone,
    {
        if let Some(queue) = self.queues.get_mut(key) {
            queue.push_back(waiter);
        } else {
            self.ring.push_back(key.clone());
            self.queues.insert(key.clone(), VecDeque::from([waiter]));
        }
    }

    fn waiter_mut(&mut self, key: &K, id: u64) -> Option<&mut Waiter> {
        self.queues
            .get_mut(key)?
            .iter_mut()
            .find(|waiter| waiter.id == id)
    }

    /// Remove a cancelled request from its partition's queue, returning the
    /// number of permits that had been reserved for it.
    ///
    /// If the queue empties, the partition leaves both the queue map and the
    /// rotation ring.
    fn remove_waiter(&mut self, key: &K, id: u64) -> usize {
        let queue = self
            .queues
            .get_mut(key)
            .expect("a cancelled waiter's partition has a queue");
        let idx = queue
            .iter()
            .position(|waiter| waiter.id == id)
            .expect("a cancelled waiter is in its partition's queue");
        let waiter = queue.remove(idx).expect("index is in bounds");
        if queue.is_empty() {
            self.queues.remove(key);
            let ring_idx = self
                .ring
                .iter()
                .position(|k| k == key)
                .expect("a key with pending demand is in the rotation ring");
            self.ring.remove(ring_idx);
        }
        waiter.acquired
    }

    /// Run one distribution pass, assigning free permits to pending requests
    /// round-robin over the partitions with unmet demand.
    ///
    /// Each visit offers a partition's oldest request up to the permits it
    /// still needs, then rotates to the next partition, so several
    /// partitions' head requests can be satisfied by one large release, in
    /// fairness order. The pass ends when the pool is empty or no demand
    /// remains; satisfied requests' wakers are pushed to `wakers`, and the
    /// caller must invoke them after releasing the lock.
    fn distribute(&mut self, wakers: &mut Vec<Waker>) {
        while self.available > 0 {
            let Some(key) = self.ring.pop_front() else { break };
            let queue = self
                .queues
                .get_mut(&key)
                .expect("a key in the rotation ring has a queue");
            let head = queue
                .front_mut()
                .expect("a queue in the rotation ring is non-empty");
            let grant = cmp::min(self.available, head.remaining);
            if grant == 0 {
                // defensive: a queued request always has unmet need.
                self.ring.push_front(key);
                break;
            }

            self.available -= grant;
            head.acquired += grant;
            head.remaining -= grant;
            trace!(
                id = head.id,
                grant,
                remaining = head.remaining,
                "KeyedSemaphore::distribute"
            );
            if head.remaining == 0 {
                let waiter = queue.pop_front().expect("the queue's head was just granted");
                self.granted.insert(waiter.id);
                if let Some(waker) = waiter.waker {
                    wakers.push(waker);
                }
            }

            if queue.is_empty() {
                // the partition's demand is exhausted; it leaves the ring by
                // not being pushed back.
                self.queues.remove(&key);
            } else {
                self.ring.push_back(key);
            }
        }
    }
}

// === impl Acquire ===

impl<'sem, K: Clone + Ord> Future for Acquire<'sem, K> {
    type Output = WaitResult<Permit<'sem, K>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.semaphore
            .poll_acquire(&this.key, this.permits, &mut this.state, cx)
            .map_ok(|_| Permit {
                permits: this.permits,
                semaphore: this.semaphore,
            })
    }
}

impl<K: Ord> Drop for Acquire<'_, K> {
    fn drop(&mut self) {
        self.semaphore
            .drop_acquire(&self.key, self.permits, self.state);
    }
}

// Nothing in an `Acquire` future is structurally pinned (its waiter lives in
// the semaphore's own state, keyed by id), so it can be safely unpinned
// regardless of `K`.
impl<K: Ord> Unpin for Acquire<'_, K> {}

impl<K: Ord> fmt::Debug for Acquire<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquire")
            .field("state", &self.state)
            .field("permits", &self.permits)
            .field("semaphore", &self.semaphore)
            .finish_non_exhaustive()
    }
}

// === impl Permit ===

impl<K: Ord> Permit<'_, K> {
    /// Returns the count of semaphore permits owned by this `Permit`.
    #[inline]
    #[must_use]
    pub fn permits(&self) -> usize {
        self.permits
    }
}

impl<K: Ord> Drop for Permit<'_, K> {
    fn drop(&mut self) {
        trace!(permits = self.permits, "Permit::drop");
        self.semaphore.release(self.permits);
    }
}

impl<K: Ord> fmt::Debug for Permit<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("permits", &self.permits)
            .field("semaphore", &self.semaphore)
            .finish_non_exhaustive()
    }
}

// === impl TryAcquireError ===

impl fmt::Display for TryAcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.pad("semaphore closed"),
            Self::InsufficientPermits => f.pad("semaphore has insufficient permits"),
        }
    }
}

impl std::error::Error for TryAcquireError {}

// === Owned variants ===

/// The future returned by the [`KeyedSemaphore::acquire_owned`] method.
///
/// This is identical to the [`Acquire`] future, except that it holds an
/// [`Arc`] reference to the [`KeyedSemaphore`], allowing the returned future
/// to live for the `'static` lifetime, and resolves to an [`OwnedPermit`]
/// (rather than a [`Permit`]), which is also valid for the `'static`
/// lifetime.
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct AcquireOwned<K: Ord> {
    semaphore: Arc<KeyedSemaphore<K>>,
    key: K,
    permits: usize,
    state: AcquireState,
}

/// An owned [RAII guard] representing one or more permits acquired from a
/// [`KeyedSemaphore`].
///
/// This type is identical to the [`Permit`] type, except that it holds an
/// [`Arc`] clone of the [`KeyedSemaphore`] rather than borrowing it, allowing
/// the guard to be valid for the `'static` lifetime.
///
/// This type is returned by the [`KeyedSemaphore::acquire_owned`] and
/// [`KeyedSemaphore::try_acquire_owned`] methods.
///
/// [RAII guard]: https://rust-unofficial.github.io/patterns/patterns/behavioural/RAII.html
#[must_use = "dropping an `OwnedPermit` releases the acquired permits back to the `KeyedSemaphore`"]
pub struct OwnedPermit<K: Ord> {
    permits: usize,
    semaphore: Arc<KeyedSemaphore<K>>,
}

impl<K: Clone + Ord> Future for AcquireOwned<K> {
    type Output = WaitResult<OwnedPermit<K>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.semaphore
            .poll_acquire(&this.key, this.permits, &mut this.state, cx)
            .map_ok(|_| OwnedPermit {
                permits: this.permits,
                semaphore: this.semaphore.clone(),
            })
    }
}

impl<K: Ord> Drop for AcquireOwned<K> {
    fn drop(&mut self) {
        self.semaphore
            .drop_acquire(&self.key, self.permits, self.state);
    }
}

// See the `Unpin` impl for `Acquire`.
impl<K: Ord> Unpin for AcquireOwned<K> {}

impl<K: Ord> fmt::Debug for AcquireOwned<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquireOwned")
            .field("state", &self.state)
            .field("permits", &self.permits)
            .field("semaphore", &self.semaphore)
            .finish_non_exhaustive()
    }
}

// === impl OwnedPermit ===

impl<K: Ord> OwnedPermit<K> {
    /// Returns the count of semaphore permits owned by this `OwnedPermit`.
    #[inline]
    #[must_use]
    pub fn permits(&self) -> usize {
        self.permits
    }
}

impl<K: Ord> Drop for OwnedPermit<K> {
    fn drop(&mut self) {
        trace!(permits = self.permits, "OwnedPermit::drop");
        self.semaphore.release(self.permits);
    }
}

impl<K: Ord> fmt::Debug for OwnedPermit<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedPermit")
            .field("permits", &self.permits)
            .field("semaphore", &self.semaphore)
            .finish_non_exhaustive()
    }
}
