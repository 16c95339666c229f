use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;

use segue::session::{consumer_loop, publish_latest};
use segue::tracker::Snapshot;

fn snap(position: usize) -> Snapshot {
    Snapshot {
        position,
        page: 1,
        total_pages: 1,
        score_len: 1000,
        progress: position as f32 / 1000.0,
        cost: 0.0,
        energy: 0.1,
        running: true,
        finished: false,
        page_turn: None,
        measure: 1,
        beat: 1,
    }
}

#[test]
fn paused_consumer_sees_only_the_newest_snapshot() {
    let capacity = 5;
    let (tx, rx) = bounded::<Snapshot>(capacity);
    let rx_consumer = rx.clone();

    // Producer outruns the channel capacity many times over while the
    // consumer is paused, then terminates.
    let producer = thread::spawn(move || {
        for i in 0..100 {
            publish_latest(&tx, &rx, snap(i));
        }
    });
    producer.join().unwrap();

    // Consumer wakes up after the burst: the first tick must apply exactly
    // the newest snapshot, not a backlog of stale ones.
    let mut applied = Vec::new();
    consumer_loop(&rx_consumer, Duration::from_millis(1), |s| {
        applied.push(s.position);
    });
    assert_eq!(applied, vec![99]);
}

#[test]
fn producer_cadence_is_independent_of_the_consumer() {
    let (tx, rx) = bounded::<Snapshot>(2);
    let rx_producer = rx.clone();

    // No consumer at all; every publish must still return promptly.
    let start = std::time::Instant::now();
    for i in 0..10_000 {
        publish_latest(&tx, &rx_producer, snap(i));
    }
    assert!(
        start.elapsed() < Duration::from_secs(1),
        "publishing must never wait on a consumer"
    );

    let queued: Vec<usize> = rx.try_iter().map(|s| s.position).collect();
    assert_eq!(queued.last(), Some(&9999));
    assert!(queued.len() <= 2);
}

#[test]
fn consumer_stops_on_a_finished_snapshot() {
    let (tx, rx) = bounded::<Snapshot>(4);

    let mut done = snap(999);
    done.finished = true;
    publish_latest(&tx, &rx, done);
    // Sender stays alive; the finished snapshot alone must end the loop.
    let mut applied = Vec::new();
    consumer_loop(&rx, Duration::from_millis(1), |s| {
        applied.push((s.position, s.finished));
    });
    assert_eq!(applied, vec![(999, true)]);
    drop(tx);
}
