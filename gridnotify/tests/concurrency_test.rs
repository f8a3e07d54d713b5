//! Registers listeners with `include_current_state` while writer threads keep
//! mutating the cache, then checks what each listener ends up with.

mod common;

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Barrier, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use common::{Notifier, PrefixTopology, Recorder};
use gridnotify::{
    CacheEntry, CacheMode, CacheNotifier, EntryRetriever, EntryStream, EventType, Observation,
    Result, SegmentCompletionListener, Topology,
};

const WRITERS: usize = 4;
const SEGMENTS: usize = 4;

/// Cache contents plus how far the running iteration has got.
#[derive(Default)]
struct Store {
    entries: BTreeMap<String, i32>,
    /// Last key handed out by the iteration.
    cursor: Option<String>,
    exhausted: bool,
}

type SharedStore = Arc<Mutex<Store>>;

fn segment_of(key: &str) -> usize {
    key.split('-')
        .next()
        .and_then(|prefix| prefix.parse().ok())
        .unwrap_or(0)
}

/// Reads the store one key at a time, so writers interleave with iteration.
///
/// When segmented, keys are served in segment order and every segment is
/// reported complete once passed; keys that show up in an already reported
/// segment are not served.
struct LiveRetriever {
    store: SharedStore,
    segmented: bool,
}

impl EntryRetriever<String, i32> for LiveRetriever {
    fn retrieve_entries(
        &self,
        listener: Arc<dyn SegmentCompletionListener>,
    ) -> Result<EntryStream<String, i32>> {
        Ok(Box::new(LiveStream {
            store: Arc::clone(&self.store),
            segmented: self.segmented,
            last: None,
            floor: 0,
            listener,
        }))
    }
}

struct LiveStream {
    store: SharedStore,
    segmented: bool,
    last: Option<String>,
    /// Lowest segment not reported complete yet.
    floor: usize,
    listener: Arc<dyn SegmentCompletionListener>,
}

impl Iterator for LiveStream {
    type Item = CacheEntry<String, i32>;

    fn next(&mut self) -> Option<Self::Item> {
        thread::sleep(Duration::from_micros(200));
        let segmented = self.segmented;
        let floor = self.floor;
        let mut store = self.store.lock().unwrap();
        let lower = match &self.last {
            Some(last) => Bound::Excluded(last.clone()),
            None => Bound::Unbounded,
        };
        let found = store
            .entries
            .range((lower, Bound::Unbounded))
            .find(|(key, _)| !segmented || segment_of(key) >= floor)
            .map(|(key, value)| (key.clone(), *value));

        let mut reports = Vec::new();
        let item = match found {
            Some((key, value)) => {
                if segmented {
                    let segment = segment_of(&key);
                    reports.extend((floor..segment).map(|passed| (passed, false)));
                    self.floor = segment;
                    let last_of_segment = store
                        .entries
                        .range((Bound::Excluded(key.clone()), Bound::Unbounded))
                        .next()
                        .map_or(true, |(next, _)| segment_of(next) != segment);
                    if last_of_segment {
                        reports.push((segment, true));
                        self.floor = segment + 1;
                    }
                }
                store.cursor = Some(key.clone());
                self.last = Some(key.clone());
                Some(CacheEntry::new(key, value))
            }
            None => {
                if segmented {
                    reports.extend((floor..SEGMENTS).map(|rest| (rest, false)));
                    self.floor = SEGMENTS;
                }
                store.exhausted = true;
                None
            }
        };
        drop(store);

        for (segment, sent_last_entry) in reports {
            self.listener.segment_transferred(segment, sent_last_entry);
        }
        item
    }
}

/// Deterministic xorshift so failures can be replayed.
struct Ops(u64);

impl Ops {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }
}

/// Applies one random write to `key` and notifies while still holding the
/// store lock, like a cache that notifies inside its entry lock.
///
/// With `ahead_only`, keys the iteration already handed out are left alone
/// and `false` is returned once the iteration is over.
fn write_once(
    notifier: &Notifier,
    store: &SharedStore,
    key: String,
    ops: &mut Ops,
    ahead_only: bool,
) -> bool {
    let value = (ops.next() % 1000) as i32;
    let mut store = store.lock().unwrap();
    if ahead_only {
        if store.exhausted {
            return false;
        }
        if store.cursor.as_ref().is_some_and(|cursor| key <= *cursor) {
            return true;
        }
    }
    match store.entries.get(&key).copied() {
        None => {
            store.entries.insert(key.clone(), value);
            common::put_new(notifier, &key, value);
        }
        Some(previous) if ops.next() % 3 == 0 => {
            store.entries.remove(&key);
            common::remove(notifier, &key, previous);
        }
        Some(previous) => {
            store.entries.insert(key.clone(), value);
            common::put_existing(notifier, &key, value, previous);
        }
    }
    true
}

fn spawn_writers(
    notifier: &Arc<Notifier>,
    store: &SharedStore,
    start: &Arc<Barrier>,
    key_for: fn(usize, u64) -> String,
    ahead_only: bool,
) -> Vec<JoinHandle<()>> {
    (0..WRITERS)
        .map(|writer| {
            let notifier = Arc::clone(notifier);
            let store = Arc::clone(store);
            let start = Arc::clone(start);
            thread::spawn(move || {
                let mut ops = Ops(0x9E37_79B9_7F4A_7C15 ^ (writer as u64 + 1));
                start.wait();
                for _ in 0..400 {
                    let key = key_for(writer, ops.next());
                    if !write_once(&notifier, &store, key, &mut ops, ahead_only) {
                        break;
                    }
                    thread::sleep(Duration::from_micros(50));
                }
            })
        })
        .collect()
}

fn seeded_store(key_for: fn(usize, u64) -> String) -> SharedStore {
    let store: SharedStore = Arc::default();
    {
        let mut initial = store.lock().unwrap();
        for writer in 0..WRITERS {
            for i in (0..12).step_by(2) {
                initial.entries.insert(key_for(writer, i), i as i32);
            }
        }
    }
    store
}

fn local_key(writer: usize, random: u64) -> String {
    format!("w{writer}-{:02}", random % 12)
}

fn segmented_key(writer: usize, random: u64) -> String {
    let n = random % 12;
    format!("{}-w{writer}-{n:02}", n as usize % SEGMENTS)
}

fn shared_key(_writer: usize, random: u64) -> String {
    format!("k{:02}", random % 48)
}

async fn register_and_wait(
    notifier: &Arc<Notifier>,
    recorder: &Recorder,
    types: &[EventType],
    writers: Vec<JoinHandle<()>>,
    start: &Barrier,
) {
    start.wait();
    notifier
        .add_listener(
            recorder
                .listener(types)
                .observation(Observation::Post)
                .include_current_state(true)
                .build(),
        )
        .await
        .unwrap();
    for writer in writers {
        writer.join().unwrap();
    }
}

const ENTRY_TYPES: [EventType; 3] = [EventType::Created, EventType::Modified, EventType::Removed];

#[tokio::test]
async fn test_snapshot_with_concurrent_writers_matches_final_state() {
    let store = seeded_store(local_key);
    let notifier: Arc<Notifier> = Arc::new(
        CacheNotifier::builder(common::config(CacheMode::Local))
            .entry_retriever(Arc::new(LiveRetriever {
                store: Arc::clone(&store),
                segmented: false,
            }))
            .build()
            .unwrap(),
    );
    let recorder = Recorder::new();
    let start = Arc::new(Barrier::new(WRITERS + 1));
    let writers = spawn_writers(&notifier, &store, &start, local_key, false);

    register_and_wait(&notifier, &recorder, &ENTRY_TYPES, writers, &start).await;

    assert_eq!(recorder.materialize(), store.lock().unwrap().entries);
}

#[tokio::test]
async fn test_segmented_snapshot_with_concurrent_writers_matches_final_state() {
    let store = seeded_store(segmented_key);
    let topology: Arc<dyn Topology<String>> = Arc::new(PrefixTopology::new(SEGMENTS));
    let notifier: Arc<Notifier> = Arc::new(
        CacheNotifier::builder(common::distributed_config(SEGMENTS))
            .topology(topology)
            .entry_retriever(Arc::new(LiveRetriever {
                store: Arc::clone(&store),
                segmented: true,
            }))
            .build()
            .unwrap(),
    );
    let recorder = Recorder::new();
    let start = Arc::new(Barrier::new(WRITERS + 1));
    let writers = spawn_writers(&notifier, &store, &start, segmented_key, false);

    register_and_wait(&notifier, &recorder, &ENTRY_TYPES, writers, &start).await;

    assert_eq!(recorder.materialize(), store.lock().unwrap().entries);
}

#[tokio::test]
async fn test_created_only_listener_matches_final_state_with_writers_ahead() {
    let store = seeded_store(shared_key);
    let notifier: Arc<Notifier> = Arc::new(
        CacheNotifier::builder(common::config(CacheMode::Local))
            .entry_retriever(Arc::new(LiveRetriever {
                store: Arc::clone(&store),
                segmented: false,
            }))
            .build()
            .unwrap(),
    );
    let recorder = Recorder::new();
    let start = Arc::new(Barrier::new(WRITERS + 1));
    let writers = spawn_writers(&notifier, &store, &start, shared_key, true);

    register_and_wait(&notifier, &recorder, &[EventType::Created], writers, &start).await;

    let store = store.lock().unwrap();
    assert!(store.exhausted);
    assert_eq!(recorder.count(EventType::Created), store.entries.len());
    assert_eq!(recorder.materialize(), store.entries);
}
