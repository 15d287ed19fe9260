//! In-process remote store with a realtime channel.
//!
//! [`MemoryStore`] behaves like the hosted backend as far as the synchronizer
//! can observe: the server mints ids (`tsk-000001`), stamps `updated_at`
//! monotonically, enforces owner scoping, and publishes a change event for
//! every committed write. Faults can be injected per call.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::change::{ChangeEvent, RawChange};
use crate::context::{Clock, SystemClock};
use crate::entity::{Entity, Patch, Scope, created_then_id};
use crate::error::RemoteError;
use crate::remote::{ChangeFeed, RemoteStore};

const FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Published {
    owner_id: String,
    change: RawChange,
}

struct State<E> {
    rows: BTreeMap<String, E>,
    next_id: u64,
    last_stamp: Option<DateTime<Utc>>,
    faults: VecDeque<RemoteError>,
    offline: bool,
    muted: bool,
}

struct Inner<E> {
    state: Mutex<State<E>>,
    feed: broadcast::Sender<Published>,
    gate: watch::Sender<bool>,
    clock: Arc<dyn Clock>,
}

/// Cheap to clone; clones share the same tables and channel.
pub struct MemoryStore<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for MemoryStore<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Entity> Default for MemoryStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> MemoryStore<E> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        let (gate, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    rows: BTreeMap::new(),
                    next_id: 1,
                    last_stamp: None,
                    faults: VecDeque::new(),
                    offline: false,
                    muted: false,
                }),
                feed,
                gate,
                clock,
            }),
        }
    }

    /// Seed rows without publishing events. Ids and stamps are kept as given.
    pub fn seed(&self, records: impl IntoIterator<Item = E>) {
        let mut state = self.inner.state.lock();
        for record in records {
            state.rows.insert(record.id().to_string(), record);
        }
    }

    /// Every row, ordered by creation time then id.
    #[must_use]
    pub fn records(&self) -> Vec<E> {
        let mut rows: Vec<E> = self.inner.state.lock().rows.values().cloned().collect();
        rows.sort_by(created_then_id);
        rows
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<E> {
        self.inner.state.lock().rows.get(id).cloned()
    }

    /// Fail the next `count` calls with `err`.
    pub fn fail_next(&self, count: usize, err: &RemoteError) {
        let mut state = self.inner.state.lock();
        state.faults.extend(std::iter::repeat_n(err.clone(), count));
    }

    /// While offline every call fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.inner.state.lock().offline = offline;
    }

    /// Stop (or resume) publishing change events for committed writes.
    pub fn mute_feed(&self, muted: bool) {
        self.inner.state.lock().muted = muted;
    }

    /// Hold every write until [`resume_writes`](Self::resume_writes).
    pub fn pause_writes(&self) {
        self.inner.gate.send_replace(false);
    }

    pub fn resume_writes(&self) {
        self.inner.gate.send_replace(true);
    }

    /// Publish a raw payload to `owner_id`'s subscribers, bypassing the tables.
    pub fn emit_raw(&self, owner_id: &str, change: RawChange) {
        let _ = self.inner.feed.send(Published {
            owner_id: owner_id.to_string(),
            change,
        });
    }

    /// Publish a typed event to `owner_id`'s subscribers, bypassing the tables.
    pub fn emit(&self, owner_id: &str, event: &ChangeEvent<E>) {
        match RawChange::encode(event) {
            Ok(change) => self.emit_raw(owner_id, change),
            Err(err) => warn!(kind = %E::KIND, error = %err, "failed to encode change event"),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.feed.receiver_count()
    }

    async fn wait_for_gate(&self) -> Result<(), RemoteError> {
        let mut gate = self.inner.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map(|_| ())
            .map_err(|_| RemoteError::network("store shut down"))
    }

    fn check_faults(state: &mut State<E>) -> Result<(), RemoteError> {
        if state.offline {
            return Err(RemoteError::network("remote store unreachable"));
        }
        state.faults.pop_front().map_or(Ok(()), Err)
    }

    fn stamp(&self, state: &mut State<E>) -> DateTime<Utc> {
        let now = self.inner.clock.now();
        let stamp = match state.last_stamp {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        state.last_stamp = Some(stamp);
        stamp
    }

    fn publish(&self, state: &State<E>, owner_id: &str, event: &ChangeEvent<E>) {
        if state.muted {
            return;
        }
        self.emit(owner_id, event);
    }
}

#[async_trait]
impl<E: Entity> RemoteStore<E> for MemoryStore<E> {
    async fn select(&self, owner_id: &str, scope: &E::Scope) -> Result<Vec<E>, RemoteError> {
        let mut state = self.inner.state.lock();
        Self::check_faults(&mut state)?;
        let mut rows: Vec<E> = state
            .rows
            .values()
            .filter(|row| row.owner_id() == owner_id && scope.contains(row))
            .cloned()
            .collect();
        rows.sort_by(created_then_id);
        Ok(rows)
    }

    async fn insert(&self, record: &E) -> Result<E, RemoteError> {
        self.wait_for_gate().await?;
        let mut state = self.inner.state.lock();
        Self::check_faults(&mut state)?;

        let id = format!("{}-{:06}", E::KIND.id_prefix(), state.next_id);
        state.next_id += 1;
        let mut row = record.clone();
        row.set_id(id.clone());
        let stamp = self.stamp(&mut state);
        row.set_updated_at(stamp);

        state.rows.insert(id.clone(), row.clone());
        debug!(kind = %E::KIND, id = %id, "row inserted");
        self.publish(&state, row.owner_id(), &ChangeEvent::Insert(row.clone()));
        Ok(row)
    }

    async fn update(&self, owner_id: &str, id: &str, patch: &E::Patch) -> Result<(), RemoteError> {
        self.wait_for_gate().await?;
        let mut state = self.inner.state.lock();
        Self::check_faults(&mut state)?;

        let stamp = self.stamp(&mut state);
        let row = match state.rows.get_mut(id) {
            Some(row) if row.owner_id() == owner_id => row,
            Some(_) => return Err(RemoteError::permission(format!("row {id} belongs to another owner"))),
            None => return Err(RemoteError::not_found(format!("row {id} does not exist"))),
        };
        patch.apply(row);
        row.set_updated_at(stamp);
        let row = row.clone();

        debug!(kind = %E::KIND, id, "row updated");
        self.publish(&state, owner_id, &ChangeEvent::Update(row));
        Ok(())
    }

    async fn delete(&self, owner_id: &str, id: &str) -> Result<(), RemoteError> {
        self.wait_for_gate().await?;
        let mut state = self.inner.state.lock();
        Self::check_faults(&mut state)?;

        match state.rows.get(id) {
            Some(row) if row.owner_id() != owner_id => {
                return Err(RemoteError::permission(format!("row {id} belongs to another owner")));
            }
            // Deleting a missing row matches zero rows, which is not an error.
            None => return Ok(()),
            Some(_) => {}
        }
        state.rows.remove(id);

        debug!(kind = %E::KIND, id, "row deleted");
        self.publish(&state, owner_id, &ChangeEvent::Delete { id: id.to_string() });
        Ok(())
    }
}

impl<E: Entity> ChangeFeed<E> for MemoryStore<E> {
    /// Events for `owner_id`'s rows. Scope is not applied here: an update
    /// moving a record out of the scope must still reach the subscriber.
    fn subscribe(&self, owner_id: &str, _scope: &E::Scope) -> BoxStream<'static, RawChange> {
        let owner_id = owner_id.to_string();
        BroadcastStream::new(self.inner.feed.subscribe())
            .filter_map(move |item| {
                let keep = match item {
                    Ok(published) if published.owner_id == owner_id => Some(published.change),
                    Ok(_) => None,
                    Err(err) => {
                        warn!(kind = %E::KIND, error = %err, "change feed subscriber lagged");
                        None
                    }
                };
                futures::future::ready(keep)
            })
            .boxed()
    }
}

/// Raw payload that is valid JSON but not a change event of any table.
#[must_use]
pub fn garbage_change() -> RawChange {
    RawChange {
        event_type: "UPDATE".to_string(),
        new: Some(Value::String("not a record".to_string())),
        old: None,
    }
}
