//! Queue integration tests - slot budget, ordering, failure isolation, shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use rl_queue::{QueueConfig, RateLimitedQueue, TaskError};
use tokio::time::Instant;
use tokio_test::{assert_pending, assert_ready_eq};

/// Helper: a task that bumps a shared counter and returns the new value.
fn increment(counter: &Arc<AtomicUsize>) -> impl FnOnce() -> Result<usize, String> {
    let counter = Arc::clone(counter);
    move || Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
}

#[tokio::test(start_paused = true)]
async fn test_first_n_run_inline_then_wait_for_window() {
    let queue = RateLimitedQueue::new(3, Duration::from_millis(25)).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let first = queue.submit(increment(&counter));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let _second = queue.submit(increment(&counter));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    let _third = queue.submit(increment(&counter));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    let mut fourth = queue.submit(increment(&counter));
    assert_eq!(counter.load(Ordering::SeqCst), 3, "fourth task must wait for a slot");

    assert_pending!(tokio_test::task::spawn(&mut fourth).poll());
    assert_eq!(first.await, Ok(1));

    assert_eq!(fourth.await, Ok(4));
    assert!(start.elapsed() >= Duration::from_millis(25));
    assert_eq!(counter.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_failure_rejects_only_its_own_handle() {
    let queue = RateLimitedQueue::new(1, Duration::from_millis(10)).unwrap();
    let start = Instant::now();

    let a = queue.submit(|| Err::<u32, _>("transport refused".to_string()));
    let b = queue.submit(|| Ok::<_, String>(5));

    assert_eq!(a.await, Err(TaskError::Failed("transport refused".to_string())));

    let mut b = tokio_test::task::spawn(b);
    assert_pending!(b.poll());
    tokio::time::sleep(Duration::from_millis(11)).await;
    assert!(b.is_woken());
    assert_ready_eq!(b.poll(), Ok(5));
    assert!(start.elapsed() >= Duration::from_millis(10));
}

#[tokio::test(start_paused = true)]
async fn test_execution_follows_submission_order() {
    let queue = RateLimitedQueue::new(2, Duration::from_millis(10)).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for i in 0..7_u32 {
        let order = Arc::clone(&order);
        handles.push(queue.submit(move || {
            order.lock().unwrap().push(i);
            if i % 3 == 0 {
                Err(format!("task {i} failed"))
            } else {
                Ok(i)
            }
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await);
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5, 6]);
    assert_eq!(results[1], Ok(1));
    assert_eq!(results[3], Err(TaskError::Failed("task 3 failed".to_string())));
    assert_eq!(results[6], Err(TaskError::Failed("task 6 failed".to_string())));
}

#[tokio::test(start_paused = true)]
async fn test_never_more_than_n_starts_per_window() {
    let window = Duration::from_millis(100);
    let queue = RateLimitedQueue::new(3, window).unwrap();
    let starts = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let starts = Arc::clone(&starts);
        handles.push(queue.submit(move || {
            starts.lock().unwrap().push(Instant::now());
            Ok::<_, ()>(())
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let starts = starts.lock().unwrap();
    assert_eq!(starts.len(), 10);
    // Slot k is reused by task k+3 no earlier than one window later.
    for pair in starts.windows(4) {
        assert!(pair[3] - pair[0] >= window);
    }
}

#[tokio::test(start_paused = true)]
async fn test_close_cancels_buffered_tasks() {
    let queue = RateLimitedQueue::new(1, Duration::from_millis(20)).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    let running = queue.submit(increment(&counter));
    let waiting_a = queue.submit(increment(&counter));
    let waiting_b = queue.submit(increment(&counter));

    assert_eq!(queue.close(), 2);
    assert_eq!(running.await, Ok(1));
    assert_eq!(waiting_a.await, Err(TaskError::Cancelled));
    let err = waiting_b.await.unwrap_err();
    assert!(err.is_cancelled());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_is_idempotent() {
    let queue = RateLimitedQueue::new(1, Duration::from_millis(5)).unwrap();
    let _running = queue.submit(|| Ok::<_, ()>(()));
    let waiting = queue.submit(|| Ok::<_, ()>(()));

    assert_eq!(queue.close(), 1);
    assert_eq!(queue.close(), 0);
    assert_eq!(queue.close(), 0);
    assert_eq!(waiting.await, Err(TaskError::Cancelled));
    assert_eq!(queue.stats().cancelled, 1);
}

#[tokio::test(start_paused = true)]
async fn test_submit_after_close_is_rejected_without_running() {
    let queue = RateLimitedQueue::new(4, Duration::from_millis(5)).unwrap();
    queue.close();

    let counter = Arc::new(AtomicUsize::new(0));
    let handle = queue.submit(increment(&counter));

    assert_eq!(handle.await, Err(TaskError::Closed));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(queue.pending_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_task_closing_queue_still_completes() {
    let queue = RateLimitedQueue::new(1, Duration::from_millis(10)).unwrap();

    let _occupant = queue.submit(|| Ok::<_, ()>("first"));
    let closer = {
        let queue = queue.clone();
        queue.clone().submit(move || {
            let cancelled = queue.close();
            Ok::<_, ()>(cancelled)
        })
    };
    let trailing = queue.submit(|| Ok::<_, ()>(0));

    // The closing task ran to completion and cancelled the one behind it.
    assert_eq!(closer.await, Ok(1));
    assert_eq!(trailing.await, Err(TaskError::Cancelled));
    assert!(queue.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_panicking_task_is_isolated() {
    let queue = RateLimitedQueue::new(1, Duration::from_millis(10)).unwrap();

    let boom = queue.submit(|| -> Result<u32, ()> { panic!("transport exploded") });
    let after = queue.submit(|| Ok::<_, ()>(9));

    assert_eq!(
        boom.await,
        Err(TaskError::Panicked("transport exploded".to_string()))
    );
    assert_eq!(after.await, Ok(9));
    assert_eq!(queue.stats().panicked, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reentrant_submit_runs_after_current_task() {
    let queue = RateLimitedQueue::new(2, Duration::from_millis(10)).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let inner_handle = Arc::new(Mutex::new(None));
    let outer = {
        let queue = queue.clone();
        let order = Arc::clone(&order);
        let inner_handle = Arc::clone(&inner_handle);
        queue.clone().submit(move || {
            let inner_order = Arc::clone(&order);
            let handle = queue.submit(move || {
                inner_order.lock().unwrap().push("inner");
                Ok::<_, ()>(())
            });
            *inner_handle.lock().unwrap() = Some(handle);
            order.lock().unwrap().push("outer");
            Ok::<_, ()>(())
        })
    };

    assert_eq!(outer.await, Ok(()));
    // Both ran inline: the inner task waited for the outer one to return.
    assert_eq!(*order.lock().unwrap(), vec!["outer", "inner"]);
    let inner = inner_handle.lock().unwrap().take().unwrap();
    assert_eq!(inner.await, Ok(()));
    assert_eq!(queue.available_slots(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_submitters_respect_budget() {
    let config = QueueConfig::new(5, Duration::from_secs(60));
    let queue = RateLimitedQueue::with_runtime(&config, tokio::runtime::Handle::current()).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let queue = queue.clone();
                let counter = Arc::clone(&counter);
                scope.spawn(move || {
                    (0..10)
                        .map(|_| queue.submit(increment(&counter)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect()
    });

    assert_eq!(counter.load(Ordering::SeqCst), 5);
    assert_eq!(queue.available_slots(), 0);
    assert_eq!(queue.pending_len(), 75);
    assert_eq!(queue.outstanding_timers(), 5);

    assert_eq!(queue.close(), 75);
    let mut cancelled = 0;
    let mut executed = 0;
    for handle in handles {
        match handle.await {
            Ok(_) => executed += 1,
            Err(TaskError::Cancelled) => cancelled += 1,
            Err(other) => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!((executed, cancelled), (5, 75));
}

#[tokio::test]
async fn test_from_config_uses_window() {
    let config = QueueConfig::new(7, Duration::from_millis(250));
    let queue = RateLimitedQueue::from_config(&config).unwrap();
    assert_eq!(queue.max_slots(), 7);
    assert_eq!(queue.window(), Duration::from_millis(250));
    assert_eq!(queue.available_slots(), 7);
    assert!(!queue.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_async_task_settles_after_its_slot_is_released() {
    let queue = RateLimitedQueue::new(1, Duration::from_millis(10)).unwrap();
    let start = Instant::now();

    let slow = queue.submit_async(|| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok::<_, String>("delivered")
    });
    let next = queue.submit(|| Ok::<_, String>(Instant::now()));

    // The slot is released one window after invocation, not after the future.
    let next_started = next.await.unwrap() - start;
    assert!(next_started >= Duration::from_millis(10));
    assert!(next_started < Duration::from_millis(50));

    assert_eq!(slow.await, Ok("delivered"));
    assert!(start.elapsed() >= Duration::from_millis(50));

    let stats = queue.stats();
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.executed(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_async_tasks_start_in_submission_order() {
    let queue = RateLimitedQueue::new(1, Duration::from_millis(5)).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let order = Arc::clone(&order);
            queue.submit_async(move || {
                order.lock().unwrap().push(i);
                async move { Ok::<_, String>(i) }
            })
        })
        .collect();
    assert_eq!(*order.lock().unwrap(), vec![0]);

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await, Ok(i));
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_async_task_failures_and_panics_are_reported() {
    let queue = RateLimitedQueue::new(3, Duration::from_millis(10)).unwrap();

    let failed = queue.submit_async(|| async { Err::<u8, _>("refused".to_string()) });
    let panicked_future = queue.submit_async(|| async {
        tokio::task::yield_now().await;
        if true {
            panic!("future blew up");
        }
        Ok::<u8, String>(0)
    });
    let panicked_call = queue.submit_async(|| -> std::future::Ready<Result<u8, String>> {
        panic!("closure blew up")
    });

    assert_eq!(failed.await, Err(TaskError::Failed("refused".to_string())));
    assert_eq!(
        panicked_future.await,
        Err(TaskError::Panicked("future blew up".to_string()))
    );
    assert_eq!(
        panicked_call.await,
        Err(TaskError::Panicked("closure blew up".to_string()))
    );

    let stats = queue.stats();
    assert_eq!((stats.failed, stats.panicked), (1, 2));
}

#[tokio::test(start_paused = true)]
async fn test_close_leaves_started_async_task_running() {
    let queue = RateLimitedQueue::new(1, Duration::from_millis(10)).unwrap();

    let started = queue.submit_async(|| async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok::<_, String>(1)
    });
    let waiting = queue.submit_async(|| async { Ok::<_, String>(2) });

    assert_eq!(queue.close(), 1);
    assert_eq!(waiting.await, Err(TaskError::Cancelled));
    assert_eq!(started.await, Ok(1));
}
