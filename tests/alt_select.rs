//! End-to-end guarded choice: fan-in, timeouts, skip, clash exclusion and
//! selections sharing channels.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use weft::timer::{Date, Egg};
use weft::{channel, Alt, Runtime, RuntimeConfig};

fn runtime(workers: usize) -> Runtime {
    Runtime::with_config(
        RuntimeConfig::builder()
            .num_workers(workers)
            .build()
            .unwrap(),
    )
}

#[test]
fn single_recv_matches_bare_recv() {
    let mut rt = runtime(2);
    let (tx, rx) = channel::create::<i32>();
    let got = Arc::new(Mutex::new(None));

    rt.spawn(move || {
        tx.send(13).unwrap();
    });
    {
        let got = got.clone();
        rt.spawn(move || {
            Alt::new().recv(&rx, |v| *got.lock() = Some(v)).select();
        });
    }
    rt.run();

    assert_eq!(*got.lock(), Some(13));
}

#[test]
fn alt_send_meets_plain_receiver() {
    let mut rt = runtime(2);
    let (tx, rx) = channel::create::<i32>();
    let fired = Arc::new(AtomicUsize::new(0));

    {
        let fired = fired.clone();
        rt.spawn(move || {
            Alt::new()
                .send_then(&tx, 21, move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                })
                .select();
        });
    }
    rt.spawn(move || {
        assert_eq!(rx.recv().unwrap(), 21);
    });
    rt.run();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn fan_in_receives_every_producer() {
    let mut rt = runtime(4);
    let mut rxs = Vec::new();
    for i in 0..8u32 {
        let (tx, rx) = channel::create::<u32>();
        rxs.push(rx);
        rt.spawn(move || {
            tx.send(i).unwrap();
        });
    }

    let got = Arc::new(Mutex::new(Vec::new()));
    {
        let got = got.clone();
        rt.spawn(move || {
            let mut local = Vec::new();
            for _ in 0..8 {
                Alt::new()
                    .recv_for(rxs.iter(), |v| local.push(v))
                    .select();
            }
            *got.lock() = local;
        });
    }
    rt.run();

    let mut got = got.lock().clone();
    got.sort_unstable();
    assert_eq!(got, (0..8).collect::<Vec<_>>());
}

#[test]
fn timeout_branch_fires_on_idle_channels() {
    let mut rt = runtime(1);
    let (tx, rx) = channel::create::<i32>();
    let timed_out = Arc::new(AtomicUsize::new(0));

    {
        let timed_out = timed_out.clone();
        rt.spawn(move || {
            let start = Instant::now();
            Alt::new()
                .recv(&rx, |_| panic!("no sender exists"))
                .timeout_then(&Egg::new(Duration::from_millis(10)), move || {
                    timed_out.fetch_add(1, Ordering::SeqCst);
                })
                .select();
            assert!(start.elapsed() >= Duration::from_millis(10));
        });
    }
    rt.run();
    drop(tx);

    assert_eq!(timed_out.load(Ordering::SeqCst), 1);
}

#[test]
fn due_timeout_still_selected_among_ready_choices() {
    // A deadline already in the past competes with a ready choice; whichever
    // wins, exactly one branch runs.
    for _ in 0..10 {
        let mut rt = runtime(2);
        let (tx, rx) = channel::create::<i32>();
        let branches = Arc::new(AtomicUsize::new(0));

        rt.spawn(move || {
            // Park a sender so the recv choice is immediately ready; give
            // up eventually in case the timeout branch wins the tie.
            let _ = tx.send_for(1, Duration::from_millis(500));
        });
        {
            let branches = branches.clone();
            rt.spawn(move || {
                weft::sleep_for(Duration::from_millis(5));
                let recv_branch = branches.clone();
                Alt::new()
                    .recv(&rx, move |_| {
                        recv_branch.fetch_add(1, Ordering::SeqCst);
                    })
                    .timeout_then(&Date::new(Instant::now()), move || {
                        branches.fetch_add(1, Ordering::SeqCst);
                    })
                    .select();
            });
        }
        rt.run();

        assert_eq!(branches.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn skip_fires_when_nothing_ready() {
    let mut rt = runtime(1);
    let (tx, rx) = channel::create::<i32>();
    let skipped = Arc::new(AtomicUsize::new(0));

    {
        let skipped = skipped.clone();
        rt.spawn(move || {
            Alt::new()
                .recv(&rx, |_| panic!("nothing was sent"))
                .skip_then(move || {
                    skipped.fetch_add(1, Ordering::SeqCst);
                })
                .select();
        });
    }
    rt.run();
    drop(tx);

    assert_eq!(skipped.load(Ordering::SeqCst), 1);
}

#[test]
fn ready_choice_beats_skip() {
    let mut rt = runtime(2);
    let (tx, rx) = channel::create::<i32>();
    let got = Arc::new(Mutex::new(None));

    rt.spawn(move || {
        tx.send(5).unwrap();
    });
    {
        let got = got.clone();
        rt.spawn(move || {
            // Give the sender time to park.
            weft::sleep_for(Duration::from_millis(10));
            Alt::new()
                .recv(&rx, |v| *got.lock() = Some(v))
                .skip_then(|| panic!("skip chosen over a parked sender"))
                .select();
        });
    }
    rt.run();

    assert_eq!(*got.lock(), Some(5));
}

#[test]
fn clashing_channel_is_excluded() {
    let mut rt = runtime(1);
    let (tx, rx) = channel::create::<i32>();
    let skipped = Arc::new(AtomicUsize::new(0));

    {
        let skipped = skipped.clone();
        rt.spawn(move || {
            // Send and recv on one channel in one alt: the channel is
            // excluded, so only skip can fire.
            Alt::new()
                .send_then(&tx, 1, || panic!("clashing send selected"))
                .recv(&rx, |_| panic!("clashing recv selected"))
                .skip_then(move || {
                    skipped.fetch_add(1, Ordering::SeqCst);
                })
                .select();
        });
    }
    rt.run();

    assert_eq!(skipped.load(Ordering::SeqCst), 1);
}

#[test]
fn guards_exclude_choices() {
    let mut rt = runtime(2);
    let (tx_a, rx_a) = channel::create::<i32>();
    let (tx_b, rx_b) = channel::create::<i32>();
    let got = Arc::new(Mutex::new(None));

    rt.spawn(move || {
        tx_a.send(1).unwrap();
    });
    rt.spawn(move || {
        // Guarded out below, so this send can only time out.
        let _ = tx_b.send_for(2, Duration::from_millis(200));
    });
    {
        let got = got.clone();
        rt.spawn(move || {
            weft::sleep_for(Duration::from_millis(10));
            let a = got.clone();
            Alt::new()
                .recv_if(true, &rx_a, move |v| *a.lock() = Some(v))
                .recv_if(false, &rx_b, |_| panic!("guarded-out choice selected"))
                .select();
        });
    }
    rt.run();

    assert_eq!(*got.lock(), Some(1));
}

#[test]
fn cross_alt_pair_commits_exactly_once() {
    // Two selections share two channels in opposite directions. Exactly one
    // send/recv pair commits; the other two offers are withdrawn and
    // neither fiber deadlocks.
    for _ in 0..20 {
        let mut rt = runtime(2);
        let (tx1, rx1) = channel::create::<u8>();
        let (tx2, rx2) = channel::create::<u8>();
        let commits = Arc::new(AtomicUsize::new(0));

        {
            let commits = commits.clone();
            rt.spawn(move || {
                let send_commits = commits.clone();
                Alt::new()
                    .send_then(&tx1, 1, move || {
                        send_commits.fetch_add(1, Ordering::SeqCst);
                    })
                    .recv(&rx2, move |_| {
                        commits.fetch_add(1, Ordering::SeqCst);
                    })
                    .select();
            });
        }
        {
            let commits = commits.clone();
            rt.spawn(move || {
                let send_commits = commits.clone();
                Alt::new()
                    .send_then(&tx2, 2, move || {
                        send_commits.fetch_add(1, Ordering::SeqCst);
                    })
                    .recv(&rx1, move |_| {
                        commits.fetch_add(1, Ordering::SeqCst);
                    })
                    .select();
            });
        }
        rt.run();

        // One rendezvous: the sending side and the receiving side each ran
        // exactly one closure.
        assert_eq!(commits.load(Ordering::SeqCst), 2);
    }
}

#[test]
fn closed_channel_choice_is_rescinded() {
    let mut rt = runtime(2);
    let (tx_dead, rx_dead) = channel::create::<i32>();
    let (tx_live, rx_live) = channel::create::<i32>();
    let got = Arc::new(Mutex::new(None));

    rt.spawn(move || {
        weft::sleep_for(Duration::from_millis(10));
        // Close under the parked selection, then satisfy the live choice.
        drop(tx_dead);
        weft::sleep_for(Duration::from_millis(10));
        tx_live.send(77).unwrap();
    });
    {
        let got = got.clone();
        rt.spawn(move || {
            Alt::new()
                .recv(&rx_dead, |_| panic!("closed channel delivered"))
                .recv(&rx_live, |v| *got.lock() = Some(v))
                .select();
        });
    }
    rt.run();

    assert_eq!(*got.lock(), Some(77));
}

#[test]
fn replicated_send_offers_one_item() {
    let mut rt = runtime(2);
    let (tx_a, rx_a) = channel::create::<u32>();
    let (tx_b, rx_b) = channel::create::<u32>();
    let delivered = Arc::new(AtomicUsize::new(0));

    {
        rt.spawn(move || {
            let txs = [tx_a, tx_b];
            Alt::new().send_for(txs.iter(), 9u32).select();
            // Handles drop here, closing both channels.
        });
    }
    for rx in [rx_a, rx_b] {
        let delivered = delivered.clone();
        rt.spawn(move || {
            weft::sleep_for(Duration::from_millis(5));
            if rx.recv().is_ok() {
                delivered.fetch_add(1, Ordering::SeqCst);
            }
        });
    }
    rt.run();

    assert_eq!(delivered.load(Ordering::SeqCst), 1);
}
