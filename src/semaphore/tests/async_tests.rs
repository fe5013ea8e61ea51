use super::*;
use core::{future::Future, task::Poll};
use futures_util::FutureExt;
use std::{
    future::poll_fn,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering::Relaxed},
        Arc, Mutex,
    },
    time::Duration,
};

#[tokio::test]
async fn pairs_share_the_pool() {
    const TASKS: usize = 4;
    // 4 permits, 2 per task: at most 2 tasks run at once.
    const CONCURRENT: usize = 2;
    let _trace = crate::util::test::trace_init();
    let semaphore = Arc::new(KeyedSemaphore::new(4));
    let running = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    for _ in 0..TASKS {
        let semaphore = semaphore.clone();
        let running = running.clone();
        let completed = completed.clone();
        tokio::spawn(async move {
            let permit = semaphore
                .acquire_owned("ingest", 2)
                .await
                .expect("semaphore is not closed");
            assert!(test_dbg!(running.fetch_add(1, Relaxed)) < CONCURRENT);

            tokio::task::yield_now().await;
            drop(permit);

            assert!(test_dbg!(running.fetch_sub(1, Relaxed)) <= CONCURRENT);
            completed.fetch_add(1, Relaxed);
        });
    }

    while completed.load(Relaxed) < TASKS {
        assert!(test_dbg!(running.load(Relaxed)) <= CONCURRENT);
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn round_robin_across_partitions() {
    let _trace = crate::util::test::trace_init();
    let semaphore = Arc::new(KeyedSemaphore::new(2));
    let order = Arc::new(Mutex::new(Vec::new()));

    let held = semaphore
        .acquire("holder", 2)
        .await
        .expect("semaphore is not closed");

    // Three requests under "a", then three under "b", all enqueued while the
    // holder keeps the pool empty.
    let names = [
        ("a", "a1"),
        ("a", "a2"),
        ("a", "a3"),
        ("b", "b1"),
        ("b", "b2"),
        ("b", "b3"),
    ];
    let mut tasks = Vec::new();
    for (key, name) in names {
        let semaphore = semaphore.clone();
        let order = order.clone();
        tasks.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned(key, 1)
                .await
                .expect("semaphore is not closed");
            order.lock().unwrap().push(name);
        }));
        // let the task reach its place in the queue before spawning the next
        tokio::task::yield_now().await;
    }

    drop(held);
    for task in tasks {
        task.await.unwrap();
    }

    // freed permits alternate between the partitions rather than draining
    // "a" before "b" gets a turn.
    assert_eq!(
        *order.lock().unwrap(),
        ["a1", "b1", "a2", "b2", "a3", "b3"]
    );
}

#[tokio::test(start_paused = true)]
async fn oversized_request_never_completes() {
    let _trace = crate::util::test::trace_init();
    let semaphore = Arc::new(KeyedSemaphore::new(4));

    let oversized = tokio::spawn({
        let semaphore = semaphore.clone();
        async move {
            let _permit = semaphore.acquire_owned("bulk", 5).await;
            unreachable!("a request for 5 of 4 permits can never be satisfied");
        }
    });

    // even a (simulated) year of waiting doesn't help.
    tokio::time::advance(Duration::from_secs(365 * 24 * 60 * 60)).await;
    assert!(!oversized.is_finished());

    // cancelling the doomed request hands its reservation back.
    oversized.abort();
    let _ = oversized.await;
    assert_eq!(semaphore.available_permits(), 4);
}

#[tokio::test]
async fn cancelled_request_rolls_back_partial_acquisition() {
    let _trace = crate::util::test::trace_init();
    let semaphore = KeyedSemaphore::new(3);
    let held = semaphore
        .acquire("steady", 2)
        .await
        .expect("semaphore is not closed");

    // Polls once, taking the one free permit and queueing for two more,
    // then drops; the drop must roll the reservation back.
    assert!(semaphore.acquire("burst", 3).now_or_never().is_none());
    assert_eq!(semaphore.available_permits(), 1);

    let single = semaphore
        .try_acquire(1)
        .expect("the cancelled request's permit was returned to the pool");
    drop(single);
    drop(held);
    assert_eq!(semaphore.available_permits(), 3);
}

#[tokio::test]
async fn whole_pool_request_excludes_other_partitions() {
    const PERMITS: usize = 4;
    let _trace = crate::util::test::trace_init();
    let semaphore = Arc::new(KeyedSemaphore::new(PERMITS));
    let big_done = Arc::new(AtomicBool::new(false));

    let big = tokio::spawn({
        let semaphore = semaphore.clone();
        let big_done = big_done.clone();
        async move {
            let permit = semaphore
                .acquire_owned("big", PERMITS)
                .await
                .expect("semaphore is not closed");
            for _ in 0..4 {
                tokio::task::yield_now().await;
            }
            big_done.store(true, Relaxed);
            drop(permit);
        }
    });
    tokio::task::yield_now().await;

    let small = tokio::spawn({
        let semaphore = semaphore.clone();
        let big_done = big_done.clone();
        async move {
            let _permit = semaphore
                .acquire_owned("small", 1)
                .await
                .expect("semaphore is not closed");
            assert!(
                big_done.load(Relaxed),
                "no permit frees up until the whole-pool holder finishes"
            );
        }
    });

    big.await.unwrap();
    small.await.unwrap();
}

#[tokio::test]
async fn zero_permit_requests_never_wait() {
    let semaphore = KeyedSemaphore::new(2);
    let _held = semaphore
        .acquire("busy", 2)
        .await
        .expect("semaphore is not closed");

    // the pool is empty, but a zero-permit request still runs immediately.
    let output = semaphore
        .with_permits("busy", 0, async { 42 })
        .now_or_never();
    assert_eq!(output, Some(Ok(42)));
}

#[tokio::test]
async fn multi_permit_requests_fill_incrementally() {
    let _trace = crate::util::test::trace_init();
    let semaphore = Arc::new(KeyedSemaphore::new(4));
    let h1 = semaphore
        .acquire("workers", 2)
        .await
        .expect("semaphore is not closed");
    let h2 = semaphore
        .acquire("workers", 2)
        .await
        .expect("semaphore is not closed");

    let big = tokio::spawn({
        let semaphore = semaphore.clone();
        async move {
            semaphore
                .acquire_owned("batch", 3)
                .await
                .expect("semaphore is not closed")
        }
    });
    tokio::task::yield_now().await;
    assert!(!big.is_finished());

    // two of the three permits are now reserved for the waiter: not enough
    // to wake it, but no longer available to anyone else either.
    drop(h1);
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    assert!(!big.is_finished());
    assert_eq!(semaphore.available_permits(), 0);

    drop(h2);
    let permit = big.await.unwrap();
    assert_eq!(permit.permits(), 3);
    assert_eq!(semaphore.available_permits(), 1);
}

#[tokio::test]
async fn cancellation_preserves_partition_fifo() {
    let _trace = crate::util::test::trace_init();
    let semaphore = Arc::new(KeyedSemaphore::new(1));
    let order = Arc::new(Mutex::new(Vec::new()));
    let held = semaphore
        .acquire("jobs", 1)
        .await
        .expect("semaphore is not closed");

    let first = tokio::spawn({
        let semaphore = semaphore.clone();
        let order = order.clone();
        async move {
            let _permit = semaphore
                .acquire_owned("jobs", 1)
                .await
                .expect("semaphore is not closed");
            order.lock().unwrap().push("first");
        }
    });
    tokio::task::yield_now().await;

    // second in line...
    let mut second = Box::pin(semaphore.acquire("jobs", 1));
    let poll = poll_fn(|cx| Poll::Ready(second.as_mut().poll(cx))).await;
    assert!(poll.is_pending());

    let third = tokio::spawn({
        let semaphore = semaphore.clone();
        let order = order.clone();
        async move {
            let _permit = semaphore
                .acquire_owned("jobs", 1)
                .await
                .expect("semaphore is not closed");
            order.lock().unwrap().push("third");
        }
    });
    tokio::task::yield_now().await;

    // ...cancelled while queued; its neighbors keep their positions.
    drop(second);
    drop(held);

    first.await.unwrap();
    third.await.unwrap();
    assert_eq!(*order.lock().unwrap(), ["first", "third"]);
}

#[tokio::test]
async fn close_wakes_waiters() {
    let _trace = crate::util::test::trace_init();
    let semaphore = Arc::new(KeyedSemaphore::new(1));
    let held = semaphore
        .acquire("a", 1)
        .await
        .expect("semaphore is not closed");

    let waiter = tokio::spawn({
        let semaphore = semaphore.clone();
        async move { semaphore.acquire_owned("a", 1).await }
    });
    tokio::task::yield_now().await;

    semaphore.close();
    assert!(waiter.await.unwrap().is_err());
    assert!(matches!(
        semaphore.try_acquire(1),
        Err(TryAcquireError::Closed)
    ));

    // releasing into a closed semaphore is a no-op.
    drop(held);
    assert_eq!(semaphore.available_permits(), 0);
}

#[tokio::test]
async fn acquire_after_close_fails() {
    let semaphore = KeyedSemaphore::new(2);
    semaphore.close();
    assert!(semaphore.acquire("late", 1).await.is_err());
    // even zero-permit requests observe the shutdown.
    assert!(semaphore.with_permits("late", 0, async {}).await.is_err());
}

#[tokio::test]
async fn interleaved_holders_restore_the_pool() {
    let semaphore = KeyedSemaphore::new(4);

    let a = semaphore
        .acquire("a", 3)
        .await
        .expect("semaphore is not closed");
    // queued for one more permit, then immediately cancelled.
    assert!(semaphore.acquire("b", 2).now_or_never().is_none());
    let b = semaphore
        .try_acquire(1)
        .expect("the cancelled request's permit was returned to the pool");
    drop(a);
    let c = semaphore
        .acquire("c", 3)
        .await
        .expect("semaphore is not closed");
    drop(b);
    drop(c);

    assert_eq!(semaphore.available_permits(), 4);
    assert_eq!(semaphore.capacity(), 4);
}

#[tokio::test]
async fn try_acquire_does_not_queue() {
    let semaphore = KeyedSemaphore::<&str>::new(2);
    let held = semaphore.try_acquire(2).expect("both permits are free");
    assert!(matches!(
        semaphore.try_acquire(1),
        Err(TryAcquireError::InsufficientPermits)
    ));
    drop(held);
    assert!(semaphore.try_acquire(1).is_ok());
}
