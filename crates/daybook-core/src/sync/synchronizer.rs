//! Async driver around [`SyncEngine`].
//!
//! A [`Synchronizer`] owns one engine per mount. Mounting subscribes to the
//! change feed first and then fetches, so no event committed between the two
//! is lost. Remote writes and the feed listener run as tokio tasks; each one
//! captures the mount's generation and cancellation token, and every result is
//! checked against the current generation before it touches the engine.
//!
//! The engine lives behind a `parking_lot::Mutex` that is only held for the
//! synchronous part of each step, never across an `.await`.

use std::future::IntoFuture;
use std::sync::Arc;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::change::RawChange;
use crate::collection::CollectionView;
use crate::context::{Completion, SyncContext};
use crate::entity::Entity;
use crate::error::{RemoteError, SyncError};
use crate::remote::{ChangeFeed, RemoteStore};
use crate::sync::engine::SyncEngine;
use crate::sync::pending::{MutationTicket, WriteRequest};

/// Resolves to `true` once the remote write succeeded, `false` if it failed,
/// was rejected locally, or the synchronizer was torn down first.
///
/// Dropping it does not cancel the write.
#[derive(Debug)]
pub struct PendingWrite {
    handle: Option<JoinHandle<bool>>,
}

impl PendingWrite {
    const fn rejected() -> Self {
        Self { handle: None }
    }

    /// Whether the mutation was refused before any remote call was made.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        self.handle.is_none()
    }
}

impl IntoFuture for PendingWrite {
    type Output = bool;
    type IntoFuture = BoxFuture<'static, bool>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let Some(handle) = self.handle else {
                return false;
            };
            handle.await.unwrap_or_else(|err| {
                warn!(error = %err, "write task did not complete");
                false
            })
        })
    }
}

enum Outcome<E> {
    Inserted(Result<E, RemoteError>),
    Written(Result<(), RemoteError>),
}

struct Mount<E: Entity> {
    engine: Option<SyncEngine<E>>,
    scope: E::Scope,
    generation: u64,
    cancel: CancellationToken,
}

struct Shared<E: Entity> {
    ctx: SyncContext,
    store: Arc<dyn RemoteStore<E>>,
    feed: Arc<dyn ChangeFeed<E>>,
    mount: Mutex<Mount<E>>,
    views: watch::Sender<CollectionView<E>>,
}

/// Token identifying the mount a background task belongs to.
#[derive(Clone)]
struct Lease {
    generation: u64,
    cancel: CancellationToken,
}

/// One synchronized collection of `E` records for one scope.
///
/// Must be created inside a tokio runtime. Dropping it releases the
/// subscription and suppresses every in-flight callback.
pub struct Synchronizer<E: Entity> {
    shared: Arc<Shared<E>>,
}

impl<E: Entity> Synchronizer<E> {
    /// Mount a collection for `scope` and start loading it.
    pub fn mount(
        ctx: SyncContext,
        store: Arc<dyn RemoteStore<E>>,
        feed: Arc<dyn ChangeFeed<E>>,
        scope: E::Scope,
    ) -> Self {
        let (views, _) = watch::channel(CollectionView::signed_out(None));
        let shared = Arc::new(Shared {
            ctx,
            store,
            feed,
            mount: Mutex::new(Mount {
                engine: None,
                scope,
                generation: 0,
                cancel: CancellationToken::new(),
            }),
            views,
        });
        Shared::remount(&shared, None);
        Self { shared }
    }

    /// Latest published view.
    #[must_use]
    pub fn view(&self) -> CollectionView<E> {
        self.shared.views.borrow().clone()
    }

    /// Receiver notified after every change to the collection.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CollectionView<E>> {
        self.shared.views.subscribe()
    }

    #[must_use]
    pub fn scope(&self) -> E::Scope {
        self.shared.mount.lock().scope.clone()
    }

    /// Drop the current collection and mount a fresh one for `scope`.
    ///
    /// Writes still in flight from the old mount resolve to `false`; whatever
    /// they committed arrives through the new fetch or feed.
    pub fn rescope(&self, scope: E::Scope) {
        Shared::remount(&self.shared, Some(scope));
    }

    /// Refetch the current scope. Also picks up a changed session owner.
    pub fn refresh(&self) {
        Shared::remount(&self.shared, None);
    }

    pub fn clear_error(&self) {
        self.shared.with_current(|engine| engine.clear_error());
    }

    pub fn create(&self, draft: E::Draft) -> PendingWrite {
        let now = self.shared.ctx.clock.now();
        self.dispatch(|engine| Ok(engine.begin_create(draft, now)))
    }

    pub fn update(&self, id: &str, patch: E::Patch) -> PendingWrite {
        let now = self.shared.ctx.clock.now();
        self.dispatch(|engine| engine.begin_update(id, patch, now))
    }

    pub fn toggle(&self, id: &str) -> PendingWrite {
        let now = self.shared.ctx.clock.now();
        self.dispatch(|engine| engine.begin_toggle(id, now))
    }

    pub fn delete(&self, id: &str) -> PendingWrite {
        self.dispatch(|engine| engine.begin_delete(id))
    }

    fn dispatch(
        &self,
        begin: impl FnOnce(&mut SyncEngine<E>) -> Result<MutationTicket<E>, SyncError>,
    ) -> PendingWrite {
        let (lease, ticket) = match self.shared.begin(begin) {
            Ok(begun) => begun,
            Err(err) => {
                debug!(kind = %E::KIND, error = %err, "mutation rejected locally");
                self.shared.reject(&err);
                return PendingWrite::rejected();
            }
        };

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = lease.cancel.cancelled() => {
                    debug!(kind = %E::KIND, mutation = ?ticket.mutation, "write abandoned by teardown");
                    return false;
                }
                outcome = execute(shared.store.as_ref(), &ticket) => outcome,
            };
            shared.settle(&lease, &ticket, outcome)
        });
        PendingWrite {
            handle: Some(handle),
        }
    }
}

impl<E: Entity> Drop for Synchronizer<E> {
    fn drop(&mut self) {
        let mount = self.shared.mount.lock();
        mount.cancel.cancel();
        debug!(kind = %E::KIND, generation = mount.generation, "synchronizer dropped");
    }
}

impl<E: Entity> Shared<E> {
    fn publish(&self, engine: &SyncEngine<E>) {
        self.views.send_replace(engine.view());
    }

    /// Cancel the current mount and start a new one.
    fn remount(shared: &Arc<Self>, scope: Option<E::Scope>) {
        let mut mount = shared.mount.lock();
        mount.cancel.cancel();
        mount.cancel = CancellationToken::new();
        mount.generation += 1;
        if let Some(scope) = scope {
            mount.scope = scope;
        }

        let Some(owner) = shared.ctx.session.owner_id() else {
            info!(kind = %E::KIND, "no signed-in owner; collection left empty");
            mount.engine = None;
            shared.views.send_replace(CollectionView::signed_out(None));
            return;
        };

        let engine = SyncEngine::new(owner.clone(), mount.scope.clone(), &shared.ctx.config.sync);
        shared.publish(&engine);
        mount.engine = Some(engine);

        let lease = Lease {
            generation: mount.generation,
            cancel: mount.cancel.clone(),
        };
        let scope = mount.scope.clone();
        info!(kind = %E::KIND, owner = %owner, ?scope, generation = lease.generation, "mounting collection");

        let changes = shared.feed.subscribe(&owner, &scope);
        drop(mount);

        tokio::spawn(Self::listen(Arc::clone(shared), lease.clone(), changes));
        tokio::spawn(Self::fetch(Arc::clone(shared), lease, owner, scope));
    }

    async fn listen(shared: Arc<Self>, lease: Lease, mut changes: BoxStream<'static, RawChange>) {
        loop {
            let raw = tokio::select! {
                biased;
                () = lease.cancel.cancelled() => break,
                raw = changes.next() => raw,
            };
            let Some(raw) = raw else {
                debug!(kind = %E::KIND, "change feed closed");
                break;
            };
            if shared.with_lease(&lease, |engine| engine.apply_raw(&raw)).is_none() {
                break;
            }
        }
    }

    async fn fetch(shared: Arc<Self>, lease: Lease, owner: String, scope: E::Scope) {
        let result = tokio::select! {
            biased;
            () = lease.cancel.cancelled() => return,
            result = shared.store.select(&owner, &scope) => result,
        };
        shared.with_lease(&lease, |engine| match result {
            Ok(records) => engine.load(records),
            Err(err) => engine.fail_load(&err),
        });
    }

    /// Run `f` against the engine if `lease` is still the current mount, then
    /// publish the new view.
    fn with_lease<R>(&self, lease: &Lease, f: impl FnOnce(&mut SyncEngine<E>) -> R) -> Option<R> {
        let mut mount = self.mount.lock();
        if mount.generation != lease.generation || lease.cancel.is_cancelled() {
            debug!(kind = %E::KIND, generation = lease.generation, "late callback suppressed");
            return None;
        }
        let engine = mount.engine.as_mut()?;
        let out = f(engine);
        self.publish(engine);
        Some(out)
    }

    fn with_current<R>(&self, f: impl FnOnce(&mut SyncEngine<E>) -> R) -> Option<R> {
        let mut mount = self.mount.lock();
        let engine = mount.engine.as_mut()?;
        let out = f(engine);
        self.publish(engine);
        Some(out)
    }

    fn reject(&self, err: &SyncError) {
        if self.with_current(|engine| engine.report(err)).is_none() {
            self.views
                .send_replace(CollectionView::signed_out(Some(err.display_message())));
        }
    }

    fn begin(
        &self,
        begin: impl FnOnce(&mut SyncEngine<E>) -> Result<MutationTicket<E>, SyncError>,
    ) -> Result<(Lease, MutationTicket<E>), SyncError> {
        let mut mount = self.mount.lock();
        let lease = Lease {
            generation: mount.generation,
            cancel: mount.cancel.clone(),
        };
        let engine = mount.engine.as_mut().ok_or(SyncError::NotSignedIn)?;
        let ticket = begin(engine)?;
        self.publish(engine);
        Ok((lease, ticket))
    }

    fn settle(&self, lease: &Lease, ticket: &MutationTicket<E>, outcome: Outcome<E>) -> bool {
        let settled = self.with_lease(lease, |engine| match outcome {
            Outcome::Inserted(result) => engine.settle_insert(ticket.mutation, result),
            Outcome::Written(result) => engine.settle_write(ticket.mutation, result),
        });

        match settled {
            Some(Ok(())) => {
                if ticket.completes {
                    self.reward(ticket);
                }
                true
            }
            Some(Err(err)) => {
                debug!(kind = %E::KIND, mutation = ?ticket.mutation, code = %err.code(), "write settled with failure");
                false
            }
            None => false,
        }
    }

    fn reward(&self, ticket: &MutationTicket<E>) {
        let Some(hook) = self.ctx.active_rewards() else {
            return;
        };
        let WriteRequest::Update { id, .. } = &ticket.request else {
            return;
        };
        let completion = Completion {
            kind: E::KIND,
            owner_id: ticket.owner_id.clone(),
            record_id: id.clone(),
        };
        tokio::spawn(async move {
            if let Err(err) = hook.on_completed(completion).await {
                warn!(error = %err, "rewards hook failed");
            }
        });
    }
}

async fn execute<E: Entity>(store: &dyn RemoteStore<E>, ticket: &MutationTicket<E>) -> Outcome<E> {
    match &ticket.request {
        WriteRequest::Insert(record) => Outcome::Inserted(store.insert(record).await),
        WriteRequest::Update { id, patch } => {
            Outcome::Written(store.update(&ticket.owner_id, id, patch).await)
        }
        WriteRequest::Delete { id } => Outcome::Written(store.delete(&ticket.owner_id, id).await),
    }
}
