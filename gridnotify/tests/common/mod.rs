//! Common test utilities for integration tests.
//!
//! Provides in-memory stand-ins for the collaborators a notifier talks to: a
//! scripted entry retriever, a prefix-based segment topology and a loopback
//! cluster transport wiring several notifiers together.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use gridnotify::{
    CacheEntry, CacheEvent, CacheListenerBuilder, CacheMode, CacheNotifier, ClusterCommand,
    ClusterTransport, EntryRetriever, EntryStream, EventType, GridError, HashTopology,
    InvocationContext, ListenerId, MemberId, NotifierConfig, Result, SegmentCompletionListener,
    Topology,
};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

pub type Notifier = CacheNotifier<String, i32>;

pub fn unique_name(prefix: &str) -> String {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}-{}", prefix, std::process::id(), id)
}

pub fn config(mode: CacheMode) -> NotifierConfig {
    NotifierConfig::builder()
        .cache_name(unique_name("cache"))
        .cache_mode(mode)
        .async_dispatch(false)
        .build()
        .expect("failed to build config")
}

pub fn distributed_config(num_segments: usize) -> NotifierConfig {
    NotifierConfig::builder()
        .cache_name(unique_name("cache"))
        .cache_mode(CacheMode::Distributed)
        .num_segments(num_segments)
        .async_dispatch(false)
        .build()
        .expect("failed to build config")
}

// ---- recording listeners ----

/// One observed event, flattened for easy assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seen {
    pub event_type: EventType,
    pub key: String,
    pub value: Option<i32>,
    pub pre: bool,
}

impl Seen {
    pub fn post(event_type: EventType, key: &str, value: Option<i32>) -> Self {
        Self {
            event_type,
            key: key.to_string(),
            value,
            pre: false,
        }
    }
}

/// Collects every event delivered to the listeners it builds.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Seen>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a listener builder with recording callbacks for `types`.
    pub fn listener(&self, types: &[EventType]) -> CacheListenerBuilder<String, i32> {
        let events = Arc::clone(&self.events);
        CacheListenerBuilder::default().on_types(
            types.iter().copied(),
            move |event: &CacheEvent<String, i32>| -> Result<()> {
                events.lock().unwrap().push(Seen {
                    event_type: event.event_type(),
                    key: event.key().cloned().unwrap_or_default(),
                    value: event.value().copied(),
                    pre: event.is_pre(),
                });
                Ok(())
            },
        )
    }

    pub fn entry_listener(&self) -> CacheListenerBuilder<String, i32> {
        self.listener(&[EventType::Created, EventType::Modified, EventType::Removed])
    }

    pub fn events(&self) -> Vec<Seen> {
        self.events.lock().unwrap().clone()
    }

    pub fn post_events(&self) -> Vec<Seen> {
        self.events().into_iter().filter(|seen| !seen.pre).collect()
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.events()
            .iter()
            .filter(|seen| seen.event_type == event_type && !seen.pre)
            .count()
    }

    pub fn keys_of(&self, event_type: EventType) -> Vec<String> {
        let mut keys: Vec<String> = self
            .post_events()
            .into_iter()
            .filter(|seen| seen.event_type == event_type)
            .map(|seen| seen.key)
            .collect();
        keys.sort();
        keys
    }

    /// Replays the post events onto an empty map.
    pub fn materialize(&self) -> BTreeMap<String, i32> {
        let mut model = BTreeMap::new();
        for seen in self.post_events() {
            match seen.event_type {
                EventType::Created | EventType::Modified => {
                    model.insert(seen.key, seen.value.unwrap_or_default());
                }
                EventType::Removed | EventType::Expired => {
                    model.remove(&seen.key);
                }
                _ => {}
            }
        }
        model
    }
}

// ---- storage layer stand-ins ----

pub fn put_new(notifier: &Notifier, key: &str, value: i32) {
    let ctx = InvocationContext::local();
    notifier
        .notify_cache_entry_created(key.to_string(), Some(value), None, true, &ctx, None)
        .unwrap();
    notifier
        .notify_cache_entry_created(key.to_string(), Some(value), None, false, &ctx, None)
        .unwrap();
}

pub fn put_existing(notifier: &Notifier, key: &str, value: i32, previous: i32) {
    let ctx = InvocationContext::local();
    for pre in [true, false] {
        notifier
            .notify_cache_entry_modified(
                key.to_string(),
                Some(value),
                None,
                Some(previous),
                None,
                pre,
                &ctx,
                None,
            )
            .unwrap();
    }
}

pub fn remove(notifier: &Notifier, key: &str, previous: i32) {
    let ctx = InvocationContext::local();
    for pre in [true, false] {
        notifier
            .notify_cache_entry_removed(key.to_string(), Some(previous), None, pre, &ctx, None)
            .unwrap();
    }
}

// ---- topology ----

/// Maps keys of the form `"<segment>-<name>"` to `<segment>`; everything is
/// owned by the local member.
pub struct PrefixTopology {
    local: MemberId,
    num_segments: usize,
}

impl PrefixTopology {
    pub fn new(num_segments: usize) -> Self {
        Self {
            local: MemberId::new(),
            num_segments,
        }
    }
}

impl Topology<String> for PrefixTopology {
    fn local_member(&self) -> MemberId {
        self.local
    }

    fn members(&self) -> Vec<MemberId> {
        vec![self.local]
    }

    fn num_segments(&self) -> usize {
        self.num_segments
    }

    fn segment_of(&self, key: &String) -> usize {
        key.split('-')
            .next()
            .and_then(|prefix| prefix.parse().ok())
            .unwrap_or(0)
    }

    fn owners(&self, _segment: usize) -> Vec<MemberId> {
        vec![self.local]
    }
}

// ---- entry retriever ----

type Hook = Box<dyn FnOnce() + Send>;

/// Serves a fixed list of entries and runs hooks just before given
/// positions are handed out, to simulate writes racing with the iteration.
///
/// With a topology, entries are served segment by segment and completion is
/// reported the way a distributed iteration does.
pub struct ScriptedRetriever {
    entries: Mutex<Vec<(String, i32)>>,
    hooks: Arc<Mutex<HashMap<usize, Hook>>>,
    topology: Option<Arc<dyn Topology<String>>>,
    completed: Arc<Mutex<Vec<usize>>>,
    fail: bool,
}

impl ScriptedRetriever {
    pub fn new(entries: &[(&str, i32)]) -> Self {
        Self {
            entries: Mutex::new(
                entries
                    .iter()
                    .map(|(key, value)| (key.to_string(), *value))
                    .collect(),
            ),
            hooks: Arc::new(Mutex::new(HashMap::new())),
            topology: None,
            completed: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        }
    }

    pub fn segmented(entries: &[(&str, i32)], topology: Arc<dyn Topology<String>>) -> Self {
        Self {
            topology: Some(topology),
            ..Self::new(entries)
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(&[])
        }
    }

    /// Runs `hook` right before the entry at `position` is returned, or at
    /// the end of the iteration if `position` is the entry count.
    pub fn before(&self, position: usize, hook: impl FnOnce() + Send + 'static) {
        self.hooks.lock().unwrap().insert(position, Box::new(hook));
    }

    /// Appends an entry to serve.
    pub fn push(&self, key: &str, value: i32) {
        self.entries.lock().unwrap().push((key.to_string(), value));
    }

    /// Returns the segments reported complete, in order.
    pub fn completed_segments(&self) -> Vec<usize> {
        self.completed.lock().unwrap().clone()
    }
}

impl EntryRetriever<String, i32> for ScriptedRetriever {
    fn retrieve_entries(
        &self,
        listener: Arc<dyn SegmentCompletionListener>,
    ) -> Result<EntryStream<String, i32>> {
        if self.fail {
            return Err(GridError::Topology("iteration failed".to_string()));
        }
        let mut entries: Vec<(usize, String, i32)> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|(key, value)| {
                let segment = self
                    .topology
                    .as_ref()
                    .map_or(0, |topology| topology.segment_of(key));
                (segment, key.clone(), *value)
            })
            .collect();
        entries.sort_by_key(|(segment, _, _)| *segment);
        Ok(Box::new(ScriptedStream {
            entries,
            position: 0,
            next_segment: 0,
            num_segments: self.topology.as_ref().map(|topology| topology.num_segments()),
            hooks: Arc::clone(&self.hooks),
            completed: Arc::clone(&self.completed),
            listener,
        }))
    }
}

struct ScriptedStream {
    entries: Vec<(usize, String, i32)>,
    position: usize,
    next_segment: usize,
    num_segments: Option<usize>,
    hooks: Arc<Mutex<HashMap<usize, Hook>>>,
    completed: Arc<Mutex<Vec<usize>>>,
    listener: Arc<dyn SegmentCompletionListener>,
}

impl ScriptedStream {
    fn report(&mut self, segment: usize, sent_last_entry: bool) {
        self.completed.lock().unwrap().push(segment);
        self.listener.segment_transferred(segment, sent_last_entry);
        self.next_segment = segment + 1;
    }

    /// Reports segments before `segment` that had no entries.
    fn report_empty_until(&mut self, segment: usize) {
        while self.next_segment < segment {
            let empty = self.next_segment;
            self.report(empty, false);
        }
    }
}

impl Iterator for ScriptedStream {
    type Item = CacheEntry<String, i32>;

    fn next(&mut self) -> Option<Self::Item> {
        let hook = self.hooks.lock().unwrap().remove(&self.position);
        if let Some(hook) = hook {
            hook();
        }
        let Some((segment, key, value)) = self.entries.get(self.position).cloned() else {
            if let Some(num_segments) = self.num_segments {
                self.report_empty_until(num_segments);
            }
            return None;
        };
        self.position += 1;
        if self.num_segments.is_some() {
            self.report_empty_until(segment);
            let last_of_segment = self
                .entries
                .get(self.position)
                .map_or(true, |(next, _, _)| *next != segment);
            if last_of_segment {
                self.report(segment, true);
            }
        }
        Some(CacheEntry::new(key, value))
    }
}

// ---- loopback cluster ----

/// Routes cluster commands and forwarded events between notifiers in the
/// same process.
#[derive(Default)]
pub struct LoopbackCluster {
    members: Mutex<HashMap<MemberId, Weak<Notifier>>>,
}

impl LoopbackCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, notifier: &Arc<Notifier>) {
        self.members
            .lock()
            .unwrap()
            .insert(notifier.local_member(), Arc::downgrade(notifier));
    }

    pub fn detach(&self, member: MemberId) {
        self.members.lock().unwrap().remove(&member);
    }

    fn lookup(&self, member: MemberId) -> Result<Arc<Notifier>> {
        self.members
            .lock()
            .unwrap()
            .get(&member)
            .and_then(Weak::upgrade)
            .ok_or_else(|| GridError::Topology(format!("{member} is not reachable")))
    }
}

#[async_trait]
impl ClusterTransport<String, i32> for LoopbackCluster {
    async fn submit(&self, target: MemberId, command: ClusterCommand<String, i32>) -> Result<()> {
        let notifier = self.lookup(target)?;
        notifier.handle_cluster_command(command)
    }

    fn send_events(
        &self,
        target: MemberId,
        listener_id: ListenerId,
        events: Vec<CacheEvent<String, i32>>,
    ) -> Result<()> {
        self.lookup(target)?
            .notify_cluster_listeners(events, listener_id)
    }
}

pub struct Node {
    pub member: MemberId,
    pub topology: Arc<HashTopology<String>>,
    pub notifier: Arc<Notifier>,
}

/// Several distributed notifiers sharing one loopback transport.
pub struct TestCluster {
    pub transport: Arc<LoopbackCluster>,
    pub nodes: Vec<Node>,
    pub num_segments: usize,
    retriever: Option<Arc<dyn EntryRetriever<String, i32>>>,
}

impl TestCluster {
    /// Starts `size` members.
    pub fn start(size: usize) -> Self {
        Self::start_members(size, None)
    }

    /// Starts `size` members that all read snapshots from `retriever`.
    pub fn with_retriever(size: usize, retriever: Arc<dyn EntryRetriever<String, i32>>) -> Self {
        Self::start_members(size, Some(retriever))
    }

    fn start_members(size: usize, retriever: Option<Arc<dyn EntryRetriever<String, i32>>>) -> Self {
        let mut cluster = Self {
            transport: Arc::new(LoopbackCluster::new()),
            nodes: Vec::new(),
            num_segments: 8,
            retriever,
        };
        for _ in 0..size {
            let index = cluster.join();
            cluster.nodes[index].notifier.start();
        }
        cluster
    }

    /// Adds a member without starting its notifier and returns its index.
    pub fn join(&mut self) -> usize {
        let member = MemberId::new();
        let mut members = self.members();
        members.push(member);
        let topology = Arc::new(HashTopology::for_member(
            member,
            members.clone(),
            self.num_segments,
            2,
        ));
        let mut builder = CacheNotifier::builder(distributed_config(self.num_segments))
            .topology(topology.clone())
            .transport(self.transport.clone());
        if let Some(retriever) = &self.retriever {
            builder = builder.entry_retriever(Arc::clone(retriever));
        }
        let notifier = Arc::new(builder.build().expect("failed to build notifier"));
        self.transport.attach(&notifier);
        for node in &self.nodes {
            node.topology.set_members(members.clone());
        }
        self.nodes.push(Node {
            member,
            topology,
            notifier,
        });
        self.nodes.len() - 1
    }

    /// Removes a member and tells the others about the new view.
    pub fn leave(&mut self, index: usize) -> Node {
        let node = self.nodes.remove(index);
        self.transport.detach(node.member);
        let members = self.members();
        for remaining in &self.nodes {
            remaining.topology.set_members(members.clone());
            remaining.notifier.on_view_changed(&members);
        }
        node
    }

    pub fn members(&self) -> Vec<MemberId> {
        self.nodes.iter().map(|node| node.member).collect()
    }

    pub fn notifier(&self, index: usize) -> &Arc<Notifier> {
        &self.nodes[index].notifier
    }

    /// Returns every member's notifier, for writes issued from hooks.
    pub fn notifiers(&self) -> Vec<Arc<Notifier>> {
        self.nodes.iter().map(|node| Arc::clone(&node.notifier)).collect()
    }

    /// Raises a created post event for `key` on every member, as a write
    /// replicated to all owners would.
    pub fn put(&self, key: &str, value: i32) {
        self.put_with(key, value, &InvocationContext::local());
    }

    pub fn put_with(&self, key: &str, value: i32, ctx: &InvocationContext) {
        for node in &self.nodes {
            node.notifier
                .notify_cache_entry_created(key.to_string(), Some(value), None, false, ctx, None)
                .unwrap();
        }
    }

    /// Raises a modified post event for `key` on every member.
    pub fn modify(&self, key: &str, value: i32, previous: i32) {
        modify_everywhere(&self.notifiers(), key, value, previous);
    }

    /// Returns the index of the primary owner of `key`.
    pub fn primary_of(&self, key: &str) -> usize {
        let topology = &self.nodes[0].topology;
        let segment = topology.segment_of(&key.to_string());
        let primary = topology.primary_owner(segment).expect("no owner");
        self.nodes
            .iter()
            .position(|node| node.member == primary)
            .expect("primary owner is not a member")
    }
}

/// Raises a created post event for `key` on every given member.
pub fn put_everywhere(notifiers: &[Arc<Notifier>], key: &str, value: i32) {
    let ctx = InvocationContext::local();
    for notifier in notifiers {
        notifier
            .notify_cache_entry_created(key.to_string(), Some(value), None, false, &ctx, None)
            .unwrap();
    }
}

/// Raises a modified post event for `key` on every given member.
pub fn modify_everywhere(notifiers: &[Arc<Notifier>], key: &str, value: i32, previous: i32) {
    let ctx = InvocationContext::local();
    for notifier in notifiers {
        notifier
            .notify_cache_entry_modified(
                key.to_string(),
                Some(value),
                None,
                Some(previous),
                None,
                false,
                &ctx,
                None,
            )
            .unwrap();
    }
}
