//! End-to-end rendezvous behavior: paired transfers, timeouts, close
//! semantics and pipelines across workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use weft::{channel, RecvError, Runtime, RuntimeConfig, SendError};

fn runtime(workers: usize) -> Runtime {
    Runtime::with_config(
        RuntimeConfig::builder()
            .num_workers(workers)
            .build()
            .unwrap(),
    )
}

#[test]
fn transfers_one_value() {
    let mut rt = runtime(2);
    let (tx, rx) = channel::create::<i32>();
    let got = Arc::new(Mutex::new(None));

    rt.spawn(move || {
        tx.send(42).unwrap();
    });
    {
        let got = got.clone();
        rt.spawn(move || {
            *got.lock() = Some(rx.recv().unwrap());
        });
    }
    rt.run();

    assert_eq!(*got.lock(), Some(42));
}

#[test]
fn transfer_moves_ownership() {
    let mut rt = runtime(1);
    let (tx, rx) = channel::create::<String>();
    let got = Arc::new(Mutex::new(String::new()));

    rt.spawn(move || {
        tx.send("payload".to_string()).unwrap();
    });
    {
        let got = got.clone();
        rt.spawn(move || {
            *got.lock() = rx.recv().unwrap();
        });
    }
    rt.run();

    assert_eq!(&*got.lock(), "payload");
}

#[test]
fn ping_pong_thousand_rounds() {
    let mut rt = runtime(2);
    let (ping_tx, ping_rx) = channel::create::<u32>();
    let (pong_tx, pong_rx) = channel::create::<u32>();

    rt.spawn(move || {
        for i in 0..1000 {
            ping_tx.send(i).unwrap();
            assert_eq!(pong_rx.recv().unwrap(), i);
        }
    });
    rt.spawn(move || {
        for i in 0..1000 {
            assert_eq!(ping_rx.recv().unwrap(), i);
            pong_tx.send(i).unwrap();
        }
    });
    rt.run();
}

#[test]
fn pipeline_of_eight_stages() {
    let mut rt = runtime(4);
    let (first_tx, first_rx) = channel::create::<u32>();
    let sum = Arc::new(AtomicU64::new(0));

    rt.spawn(move || {
        for v in 0..1000u32 {
            first_tx.send(v).unwrap();
        }
        // Dropping the sender closes the head of the pipeline.
    });

    let mut upstream = first_rx;
    for _ in 0..8 {
        let (tx, rx) = channel::create::<u32>();
        let prev = upstream;
        rt.spawn(move || {
            for v in prev.iter() {
                tx.send(v).unwrap();
            }
        });
        upstream = rx;
    }

    {
        let sum = sum.clone();
        rt.spawn(move || {
            let mut acc = 0u64;
            for v in upstream.iter() {
                acc += u64::from(v);
            }
            sum.store(acc, Ordering::SeqCst);
        });
    }
    rt.run();

    assert_eq!(sum.load(Ordering::SeqCst), 499_500);
}

#[test]
fn recv_timeout_fires_in_window() {
    let mut rt = runtime(1);
    let (tx, rx) = channel::create::<i32>();
    let elapsed = Arc::new(Mutex::new(Duration::ZERO));

    {
        let elapsed = elapsed.clone();
        rt.spawn(move || {
            let start = Instant::now();
            let result = rx.recv_for(Duration::from_millis(10));
            *elapsed.lock() = start.elapsed();
            assert_eq!(result, Err(RecvError::Timeout));
        });
    }
    rt.run();
    drop(tx);

    let elapsed = *elapsed.lock();
    assert!(elapsed >= Duration::from_millis(10), "woke early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(500), "woke late: {elapsed:?}");
}

#[test]
fn zero_timeout_send_fails_without_receiver() {
    let mut rt = runtime(1);
    let (tx, rx) = channel::create::<i32>();

    rt.spawn(move || {
        match tx.send_for(7, Duration::ZERO) {
            Err(SendError::Timeout(item)) => assert_eq!(item, 7),
            other => panic!("expected timeout, got {other:?}"),
        }
    });
    rt.run();
    drop(rx);
}

#[test]
fn past_deadline_recv_returns_immediately() {
    let mut rt = runtime(1);
    let (tx, rx) = channel::create::<i32>();

    rt.spawn(move || {
        let past = Instant::now() - Duration::from_millis(5);
        let start = Instant::now();
        assert_eq!(rx.recv_until(past), Err(RecvError::Timeout));
        assert!(start.elapsed() < Duration::from_millis(50));
    });
    rt.run();
    drop(tx);
}

#[test]
fn timed_send_completes_when_receiver_arrives() {
    let mut rt = runtime(2);
    let (tx, rx) = channel::create::<i32>();

    rt.spawn(move || {
        tx.send_for(5, Duration::from_secs(5)).unwrap();
    });
    rt.spawn(move || {
        weft::sleep_for(Duration::from_millis(10));
        assert_eq!(rx.recv().unwrap(), 5);
    });
    rt.run();
}

#[test]
fn close_wakes_parked_receiver() {
    let mut rt = runtime(2);
    let (tx, rx) = channel::create::<i32>();

    rt.spawn(move || {
        assert_eq!(rx.recv(), Err(RecvError::Closed));
    });
    rt.spawn(move || {
        weft::sleep_for(Duration::from_millis(10));
        tx.close();
    });
    rt.run();
}

#[test]
fn close_wakes_parked_sender() {
    let mut rt = runtime(2);
    let (tx, rx) = channel::create::<i32>();

    rt.spawn(move || {
        match tx.send(9) {
            Err(SendError::Closed(item)) => assert_eq!(item, 9),
            other => panic!("expected closed, got {other:?}"),
        }
    });
    rt.spawn(move || {
        weft::sleep_for(Duration::from_millis(10));
        rx.close();
    });
    rt.run();
}

#[test]
fn iterator_ends_on_close() {
    let mut rt = runtime(2);
    let (tx, rx) = channel::create::<u32>();
    let got = Arc::new(Mutex::new(Vec::new()));

    rt.spawn(move || {
        for v in [1, 2, 3] {
            tx.send(v).unwrap();
        }
    });
    {
        let got = got.clone();
        rt.spawn(move || {
            got.lock().extend(rx.iter());
        });
    }
    rt.run();

    assert_eq!(&*got.lock(), &[1, 2, 3]);
}

#[test]
fn many_rendezvous_pairs_across_workers() {
    let mut rt = runtime(4);
    let total = Arc::new(AtomicU64::new(0));

    for i in 0..32u64 {
        let (tx, rx) = channel::create::<u64>();
        rt.spawn(move || {
            tx.send(i).unwrap();
        });
        let total = total.clone();
        rt.spawn(move || {
            total.fetch_add(rx.recv().unwrap(), Ordering::SeqCst);
        });
    }
    rt.run();

    assert_eq!(total.load(Ordering::SeqCst), (0..32).sum::<u64>());
}

#[test]
fn rendezvous_is_synchronous() {
    // The sender must not get past send() before the receiver has arrived.
    let mut rt = runtime(2);
    let (tx, rx) = channel::create::<u8>();
    let order = Arc::new(Mutex::new(Vec::new()));

    {
        let order = order.clone();
        rt.spawn(move || {
            order.lock().push("send-start");
            tx.send(1).unwrap();
            order.lock().push("send-done");
        });
    }
    {
        let order = order.clone();
        rt.spawn(move || {
            weft::sleep_for(Duration::from_millis(20));
            order.lock().push("recv-start");
            rx.recv().unwrap();
        });
    }
    rt.run();

    let order = order.lock();
    let send_done = order.iter().position(|s| *s == "send-done").unwrap();
    let recv_start = order.iter().position(|s| *s == "recv-start").unwrap();
    assert!(recv_start < send_done, "sender resumed before rendezvous");
}
