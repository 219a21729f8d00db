use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::NaiveDate;
use futures::future::join_all;
use tempfile::tempdir;

use super::clock::{Clock, Timestamp};
use super::keys::{message_key, message_timestamp};
use super::{Message, MessageStore, SessionGuard, Store};
use crate::utils::Error;

fn at(s: &str) -> Timestamp {
    Timestamp::parse(s).expect("valid timestamp")
}

fn message(topic: &str, ts: &str, author: &str, body: &str) -> Message {
    Message {
        topic: topic.to_string(),
        timestamp: at(ts),
        author: author.to_string(),
        body: body.to_string(),
    }
}

#[test]
fn timestamp_text_form_is_fixed_width_and_parses_back() {
    let ts = at("2024-03-05T07:08:09.000001");
    assert_eq!(ts.to_string(), "2024-03-05T07:08:09.000001");
    assert_eq!(at("2024-03-05T07:08:09").to_string(), "2024-03-05T07:08:09.000000");
    assert_eq!(Timestamp::epoch().to_string(), "1970-01-01T00:00:00.000000");

    let json = serde_json::to_string(&ts).unwrap();
    assert_eq!(json, "\"2024-03-05T07:08:09.000001\"");
}

#[test]
fn clock_never_repeats() {
    let clock = Clock::new();
    let mut last = clock.now();
    for _ in 0..1000 {
        let next = clock.now();
        assert!(next > last, "{next} should be after {last}");
        last = next;
    }
}

#[test]
fn clock_seeded_past_a_future_stamp_stays_ahead_of_it() {
    let clock = Clock::new();
    let ahead = at("2999-01-01T00:00:00");
    clock.advance_past(ahead);
    assert!(clock.now() > ahead);

    // seeding backwards is a no-op
    clock.advance_past(Timestamp::epoch());
    assert!(clock.now() > ahead);
}

#[test]
fn message_keys_carry_their_timestamp() {
    let ts = at("2024-03-05T07:08:09.000001");
    assert_eq!(message_timestamp(&message_key("room1", &ts)), Some(ts));
    assert_eq!(message_timestamp(&message_key("", &ts)), Some(ts));
    assert_eq!(message_timestamp(&message_key("2024-01-01T00:00:00", &ts)), Some(ts));

    assert_eq!(message_timestamp(b"\0\0"), None);
    assert_eq!(message_timestamp(&[0, 0, 0, 9, b'a']), None);
    assert_eq!(message_timestamp(&[0, 0, 0, 1, b'a', b'x']), None);
}

#[test]
fn timestamp_minus_saturates_at_epoch() {
    let ts = at("1970-01-01T00:00:10.000000");
    assert_eq!(ts.minus(Duration::from_secs(4)), at("1970-01-01T00:00:06"));
    assert_eq!(ts.minus(Duration::from_secs(3600)), Timestamp::epoch());
}

#[tokio::test]
async fn publish_then_read_since_epoch_round_trips() {
    let store = Store::temporary().unwrap();
    store
        .messages()
        .publish("room1", "alice", "hello")
        .await
        .unwrap();

    let messages = store
        .messages()
        .read_since("room1", &Timestamp::epoch(), None)
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].topic, "room1");
    assert_eq!(messages[0].author, "alice");
    assert_eq!(messages[0].body, "hello");
}

#[tokio::test]
async fn read_since_is_strict_ascending_and_never_repeats() {
    let store = Store::temporary().unwrap();
    let messages = store.messages();
    for i in 0..5 {
        messages.publish("room1", "bob", &format!("m{i}")).await.unwrap();
    }

    let all = messages.read_since("room1", &Timestamp::epoch(), None).unwrap();
    let bodies: Vec<_> = all.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, ["m0", "m1", "m2", "m3", "m4"]);
    assert!(all.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

    // the cursor itself is excluded
    let after_second = messages.read_since("room1", &all[1].timestamp, None).unwrap();
    assert_eq!(after_second.first().map(|m| m.body.as_str()), Some("m2"));
    assert_eq!(after_second.len(), 3);

    // walk the log two at a time with an advancing cursor
    let mut cursor = Timestamp::epoch();
    let mut seen = Vec::new();
    loop {
        let batch = messages.read_since("room1", &cursor, Some(2)).unwrap();
        if batch.is_empty() {
            break;
        }
        assert!(batch.len() <= 2);
        cursor = batch.last().unwrap().timestamp;
        seen.extend(batch.into_iter().map(|m| m.body));
    }
    assert_eq!(seen, ["m0", "m1", "m2", "m3", "m4"]);
}

#[tokio::test]
async fn topics_do_not_leak_into_each_other() {
    let store = Store::temporary().unwrap();
    let messages = store.messages();
    messages.publish("room", "a", "short topic").await.unwrap();
    messages.publish("room1", "b", "long topic").await.unwrap();
    messages.publish("roo", "c", "shorter topic").await.unwrap();

    let room = messages.read_since("room", &Timestamp::epoch(), None).unwrap();
    assert_eq!(room.len(), 1);
    assert_eq!(room[0].body, "short topic");

    let latest = messages.read_latest("room1", 10).unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].author, "b");

    assert!(messages.read_latest("nonexistent", 10).unwrap().is_empty());
}

#[test]
fn read_latest_returns_newest_oldest_first() {
    let store = Store::temporary().unwrap();
    let messages = store.messages();
    for i in 0..15 {
        let ts = format!("2024-01-01T00:00:{i:02}.000000");
        messages
            .append(&message("room1", &ts, "carol", &format!("m{i}")))
            .unwrap();
    }

    let latest = messages.read_latest("room1", 10).unwrap();
    let bodies: Vec<_> = latest.iter().map(|m| m.body.clone()).collect();
    let expected: Vec<_> = (5..15).map(|i| format!("m{i}")).collect();
    assert_eq!(bodies, expected);
}

#[test]
fn duplicate_timestamp_is_rejected_by_the_store() {
    let store = Store::temporary().unwrap();
    let messages = store.messages();
    let first = message("room1", "2024-01-01T12:00:00.000000", "alice", "first");
    let second = message("room1", "2024-01-01T12:00:00.000000", "mallory", "second");

    messages.append(&first).unwrap();
    let err = messages.append(&second).unwrap_err();
    assert!(matches!(err, Error::DuplicateMessage { ref topic, .. } if topic == "room1"));

    let stored = messages.read_since("room1", &Timestamp::epoch(), None).unwrap();
    assert_eq!(stored, vec![first]);

    // the aborted transaction did not bump the counter either
    let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    assert_eq!(messages.daily_count("room1", day).unwrap(), 1);

    // same timestamp on another topic is a different key
    messages
        .append(&message("room2", "2024-01-01T12:00:00.000000", "alice", "ok"))
        .unwrap();
}

#[test]
fn daily_counts_are_per_topic_and_day() {
    let store = Store::temporary().unwrap();
    let messages = store.messages();
    messages.append(&message("a", "2024-01-01T10:00:00", "x", "1")).unwrap();
    messages.append(&message("a", "2024-01-01T11:00:00", "x", "2")).unwrap();
    messages.append(&message("a", "2024-01-02T10:00:00", "x", "3")).unwrap();
    messages.append(&message("b", "2024-01-01T10:00:00", "x", "4")).unwrap();

    let jan1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let jan2 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    assert_eq!(messages.daily_count("a", jan1).unwrap(), 2);
    assert_eq!(messages.daily_count("a", jan2).unwrap(), 1);
    assert_eq!(messages.daily_count("b", jan1).unwrap(), 1);
    assert_eq!(messages.daily_count("b", jan2).unwrap(), 0);
}

#[test]
fn sweep_removes_only_expired_messages_across_topics() {
    let store = Store::temporary().unwrap();
    let messages = store.messages();
    messages.append(&message("a", "2024-01-01T09:00:00", "x", "old a")).unwrap();
    messages.append(&message("b", "2024-01-01T09:30:00", "x", "old b")).unwrap();
    messages.append(&message("a", "2024-01-01T10:30:00", "x", "new a")).unwrap();
    messages.append(&message("b", "2024-01-01T11:00:00", "x", "new b")).unwrap();

    let removed = messages.sweep_expired(&at("2024-01-01T10:00:00")).unwrap();
    assert_eq!(removed, 2);

    let a = messages.read_since("a", &Timestamp::epoch(), None).unwrap();
    let b = messages.read_since("b", &Timestamp::epoch(), None).unwrap();
    assert_eq!(a.iter().map(|m| m.body.as_str()).collect::<Vec<_>>(), ["new a"]);
    assert_eq!(b.iter().map(|m| m.body.as_str()).collect::<Vec<_>>(), ["new b"]);

    assert_eq!(messages.sweep_expired(&at("2024-01-01T10:00:00")).unwrap(), 0);
}

#[tokio::test]
async fn background_sweeper_retires_old_messages() {
    let store = Store::temporary().unwrap();
    store
        .messages()
        .append(&message("room1", "2000-01-01T00:00:00", "old", "gone soon"))
        .unwrap();
    store.messages().publish("room1", "new", "stays").await.unwrap();

    store.spawn_sweeper(Duration::from_secs(3600), Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let left = store
        .messages()
        .read_since("room1", &Timestamp::epoch(), None)
        .unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].body, "stays");

    store.close().await.unwrap();
}

#[test]
fn open_and_close_sessions_move_the_active_count() {
    let store = Store::temporary().unwrap();
    let tracker = store.subscribers();

    let first = tracker.open_session("room1").unwrap();
    let second = tracker.open_session("room1").unwrap();
    let other = tracker.open_session("room2").unwrap();
    assert_eq!(tracker.active_count("room1").unwrap(), 2);
    assert_eq!(tracker.active_count("room2").unwrap(), 1);

    let closed = tracker.close_session(&first).unwrap();
    assert!(closed.end.is_some());
    assert_eq!(tracker.active_count("room1").unwrap(), 1);

    // a second close keeps the original end time
    let again = tracker.close_session(&first).unwrap();
    assert_eq!(again.end, closed.end);
    assert_eq!(tracker.active_count("room1").unwrap(), 1);

    tracker.close_session(&second).unwrap();
    tracker.close_session(&other).unwrap();
    assert_eq!(tracker.active_count("room1").unwrap(), 0);

    let history = tracker.sessions("room1").unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|s| !s.is_open()));
}

#[test]
fn concurrent_open_close_never_miscounts() {
    let store = Store::temporary().unwrap();
    let tracker = store.subscribers().clone();

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let tracker = tracker.clone();
            std::thread::spawn(move || {
                for _ in 0..20 {
                    let handle = tracker.open_session("busy").unwrap();
                    assert!(tracker.active_count("busy").unwrap() >= 1);
                    tracker.close_session(&handle).unwrap();
                }
                tracker.open_session("busy").unwrap()
            })
        })
        .collect();
    let still_open: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

    assert_eq!(tracker.active_count("busy").unwrap(), 8);
    let starts: HashSet<_> = still_open.iter().map(|h| h.start).collect();
    assert_eq!(starts.len(), 8);
    assert_eq!(tracker.sessions("busy").unwrap().len(), 8 * 21);

    for handle in &still_open {
        tracker.close_session(handle).unwrap();
    }
    assert_eq!(tracker.active_count("busy").unwrap(), 0);
}

#[test]
fn session_guard_closes_exactly_once() {
    let store = Store::temporary().unwrap();
    let tracker = store.subscribers();

    let dropped = SessionGuard::open(tracker, "room1").unwrap();
    let explicit = SessionGuard::open(tracker, "room1").unwrap();
    assert_eq!(tracker.active_count("room1").unwrap(), 2);

    drop(dropped);
    assert_eq!(tracker.active_count("room1").unwrap(), 1);

    explicit.close().unwrap();
    assert_eq!(tracker.active_count("room1").unwrap(), 0);

    let history = tracker.sessions("room1").unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|s| s.end.is_some()));
}

#[test]
fn reopening_closes_sessions_left_open_by_previous_run() {
    let dir = tempdir().unwrap();
    {
        let store = Store::open(dir.path()).unwrap();
        store.subscribers().open_session("room1").unwrap();
        assert_eq!(store.subscribers().active_count("room1").unwrap(), 1);
    }

    let store = Store::open(dir.path()).unwrap();
    assert_eq!(store.subscribers().active_count("room1").unwrap(), 0);
    let history = store.subscribers().sessions("room1").unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].end.is_some());
}

#[tokio::test]
async fn published_messages_survive_reopen() {
    let dir = tempdir().unwrap();
    {
        let store = Store::open(dir.path()).unwrap();
        store.messages().publish("room1", "alice", "durable").await.unwrap();
        store.close().await.unwrap();
    }

    let store = Store::open(dir.path()).unwrap();
    let messages = store.messages().read_latest("room1", 10).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, "durable");
}

#[tokio::test]
async fn reopened_store_stamps_after_the_newest_stored_message() {
    let dir = tempdir().unwrap();
    let ahead = at("2999-01-01T00:00:00");
    {
        let store = Store::open(dir.path()).unwrap();
        store
            .messages()
            .append(&message("room1", "2999-01-01T00:00:00", "future", "ahead of the wall clock"))
            .unwrap();
        store.close().await.unwrap();
    }

    let store = Store::open(dir.path()).unwrap();
    assert_eq!(store.messages().newest_timestamp().unwrap(), Some(ahead));

    let same_topic = store.messages().publish("room1", "alice", "after").await.unwrap();
    let other_topic = store.messages().publish("room2", "bob", "after").await.unwrap();
    assert!(same_topic.timestamp > ahead);
    assert!(other_topic.timestamp > same_topic.timestamp);

    let latest = store.messages().read_latest("room1", 1).unwrap();
    assert_eq!(latest[0].body, "after");
}

#[tokio::test]
async fn acquired_guard_holds_a_session_until_dropped() {
    let store = Store::temporary().unwrap();
    let tracker = store.subscribers();

    let guard = SessionGuard::acquire(tracker, "room1").await.unwrap();
    assert!(guard.handle().is_some());
    assert_eq!(tracker.active_count("room1").unwrap(), 1);

    drop(guard);
    assert_eq!(tracker.active_count("room1").unwrap(), 0);
}

const PUBLISHERS: usize = 8;
const PER_PUBLISHER: usize = 40;

fn spawn_publishers(messages: &MessageStore, topic: &str) -> Vec<tokio::task::JoinHandle<()>> {
    (0..PUBLISHERS)
        .map(|p| {
            let messages = messages.clone();
            let topic = topic.to_string();
            tokio::spawn(async move {
                for i in 0..PER_PUBLISHER {
                    messages
                        .publish(&topic, &format!("p{p}"), &format!("{p}-{i}"))
                        .await
                        .unwrap();
                }
            })
        })
        .collect()
}

async fn finish(publishers: Vec<tokio::task::JoinHandle<()>>) {
    let results = tokio::time::timeout(Duration::from_secs(30), join_all(publishers))
        .await
        .expect("publishers stalled");
    for result in results {
        result.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_publishers_all_land_in_order() {
    let store = Store::temporary().unwrap();
    finish(spawn_publishers(store.messages(), "busy")).await;

    let stored = store
        .messages()
        .read_since("busy", &Timestamp::epoch(), None)
        .unwrap();
    assert_eq!(stored.len(), PUBLISHERS * PER_PUBLISHER);
    assert!(stored.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

    let mut per_day: HashMap<NaiveDate, u64> = HashMap::new();
    for message in &stored {
        *per_day.entry(message.timestamp.date()).or_default() += 1;
    }
    for (day, expected) in per_day {
        assert_eq!(store.messages().daily_count("busy", day).unwrap(), expected);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn cursor_reader_misses_nothing_while_publishers_run() {
    let store = Store::temporary().unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let messages = store.messages().clone();
        let done = done.clone();
        std::thread::spawn(move || {
            let mut cursor = Timestamp::epoch();
            let mut seen = Vec::new();
            loop {
                let finished = done.load(Ordering::SeqCst);
                let batch = messages.read_since("busy", &cursor, Some(5)).unwrap();
                if batch.is_empty() {
                    if finished {
                        break;
                    }
                    std::thread::yield_now();
                }
                for message in batch {
                    assert!(message.timestamp > cursor);
                    cursor = message.timestamp;
                    seen.push(message.body);
                }
            }
            seen
        })
    };

    finish(spawn_publishers(store.messages(), "busy")).await;
    done.store(true, Ordering::SeqCst);
    let seen = tokio::task::spawn_blocking(move || reader.join().unwrap())
        .await
        .unwrap();

    // anything published after the cursor passed it would be missing here
    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(seen.len(), PUBLISHERS * PER_PUBLISHER);
    assert_eq!(unique.len(), PUBLISHERS * PER_PUBLISHER);
}
