//! Identity Registry
//!
//! Single source of truth mapping an object id to its native object, its
//! rooted script object and its type descriptor. Only this module creates or
//! destroys `BoundPair`s; pairs live until the registry is closed.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use rquickjs::{Ctx, Object, Persistent, Value as JsValue};
use tracing::{debug, info, warn};

use duplex_types::NativeRef;

use crate::descriptor::TypeDescriptor;
use crate::error::{BridgeError, BridgeResult};
use crate::sync::Channel;

/// Ids must stay exactly representable as script numbers.
pub const ID_LIMIT: u64 = (1u64 << 53) - 1 - 10;

// ─────────────────────────────────────────────────────────────────────────────
// Rooted Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Owning reference into the script heap
///
/// While the handle holds its value the engine cannot collect it. `release`
/// drops the reference exactly once; afterwards every restore fails with
/// `BridgeError::Released`.
pub struct RootedHandle {
    inner: RefCell<Option<Persistent<JsValue<'static>>>>,
}

impl RootedHandle {
    pub fn root<'js>(ctx: &Ctx<'js>, value: JsValue<'js>) -> Self {
        Self {
            inner: RefCell::new(Some(Persistent::save(ctx, value))),
        }
    }

    pub fn restore<'js>(&self, ctx: &Ctx<'js>) -> BridgeResult<JsValue<'js>> {
        let persistent = self.inner.borrow().clone().ok_or(BridgeError::Released)?;
        Ok(persistent.restore(ctx)?)
    }

    pub fn restore_object<'js>(&self, ctx: &Ctx<'js>) -> BridgeResult<Object<'js>> {
        self.restore(ctx)?
            .into_object()
            .ok_or_else(|| BridgeError::InvalidType("rooted value is not an object".into()))
    }

    /// Drop the reference. Returns false if it was already released.
    pub fn release(&self) -> bool {
        self.inner.borrow_mut().take().is_some()
    }

    pub fn is_released(&self) -> bool {
        self.inner.borrow().is_none()
    }
}

impl std::fmt::Debug for RootedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootedHandle")
            .field("released", &self.is_released())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bound Pair
// ─────────────────────────────────────────────────────────────────────────────

/// One logical object living on both sides of the boundary
pub struct BoundPair {
    id: u64,
    native: NativeRef,
    script: RootedHandle,
    descriptor: Rc<TypeDescriptor>,
    channels: RefCell<Vec<Channel>>,
}

impl BoundPair {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn native(&self) -> &NativeRef {
        &self.native
    }

    pub fn script(&self) -> &RootedHandle {
        &self.script
    }

    pub fn descriptor(&self) -> &Rc<TypeDescriptor> {
        &self.descriptor
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.channels.borrow().clone()
    }

    /// Find the channel wired for a binding name
    pub fn channel(&self, name: &str) -> Option<Channel> {
        self.channels
            .borrow()
            .iter()
            .find(|channel| channel.name() == name)
            .cloned()
    }

    pub(crate) fn attach(&self, channel: Channel) {
        self.channels.borrow_mut().push(channel);
    }
}

/// Outcome of closing the registry
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CloseReport {
    /// Native objects whose `close` succeeded
    pub closed_natives: usize,
    /// Script handles released (pairs and channels)
    pub released_handles: usize,
    /// Close failures by object id
    pub failures: Vec<(u64, String)>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity Registry
// ─────────────────────────────────────────────────────────────────────────────

pub struct IdentityRegistry {
    next_id: Cell<u64>,
    pairs: RefCell<HashMap<u64, Rc<BoundPair>>>,
    closed: Cell<bool>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub(crate) fn starting_at(first_id: u64) -> Self {
        Self {
            next_id: Cell::new(first_id),
            pairs: RefCell::new(HashMap::new()),
            closed: Cell::new(false),
        }
    }

    /// Hand out the next id. Ids are never reused.
    pub fn request_id(&self) -> BridgeResult<u64> {
        let id = self.next_id.get();
        if id >= ID_LIMIT {
            warn!(target: "duplex.registry", id, "object id space exhausted");
            return Err(BridgeError::RestartRequired);
        }
        self.next_id.set(id + 1);
        Ok(id)
    }

    /// Store a new pair. Ids are write-once.
    pub fn put(
        &self,
        id: u64,
        native: NativeRef,
        script: RootedHandle,
        descriptor: Rc<TypeDescriptor>,
    ) -> BridgeResult<Rc<BoundPair>> {
        if self.closed.get() {
            return Err(BridgeError::Closed);
        }
        let mut pairs = self.pairs.borrow_mut();
        if pairs.contains_key(&id) {
            return Err(BridgeError::DuplicateId(id));
        }
        let pair = Rc::new(BoundPair {
            id,
            native,
            script,
            descriptor,
            channels: RefCell::new(Vec::new()),
        });
        pairs.insert(id, pair.clone());
        debug!(
            target: "duplex.registry",
            id,
            module = pair.descriptor.module_path(),
            "registered pair"
        );
        Ok(pair)
    }

    pub fn pair(&self, id: u64) -> Option<Rc<BoundPair>> {
        self.pairs.borrow().get(&id).cloned()
    }

    pub fn native_of(&self, id: u64) -> BridgeResult<NativeRef> {
        self.pair(id)
            .map(|pair| pair.native.clone())
            .ok_or(BridgeError::UnknownId(id))
    }

    pub fn script_of<'js>(&self, ctx: &Ctx<'js>, id: u64) -> BridgeResult<JsValue<'js>> {
        let pair = self.pair(id).ok_or(BridgeError::UnknownId(id))?;
        pair.script.restore(ctx)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.pairs.borrow().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pairs.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.borrow().is_empty()
    }

    /// Registered ids in ascending order
    pub fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.pairs.borrow().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Tear down every pair: detach its channels, close the native object if
    /// it is closeable, release the script handle.
    ///
    /// Runs once. A failing close is recorded and does not stop the others.
    pub fn close(&self) -> BridgeResult<CloseReport> {
        if self.closed.replace(true) {
            warn!(target: "duplex.registry", "registry close requested twice");
            return Err(BridgeError::Closed);
        }

        let mut pairs: Vec<Rc<BoundPair>> =
            self.pairs.borrow_mut().drain().map(|(_, pair)| pair).collect();
        pairs.sort_unstable_by_key(|pair| pair.id);

        let mut report = CloseReport::default();
        for pair in pairs {
            for channel in pair.channels.borrow_mut().drain(..) {
                if channel.detach() {
                    report.released_handles += 1;
                }
            }

            if let Some(closer) = pair.descriptor.closer() {
                match closer(pair.native.as_any()) {
                    Ok(()) => report.closed_natives += 1,
                    Err(e) => {
                        warn!(
                            target: "duplex.registry",
                            id = pair.id,
                            error = %e,
                            "failed to close native object"
                        );
                        report.failures.push((pair.id, e.to_string()));
                    }
                }
            }

            if pair.script.release() {
                report.released_handles += 1;
            }
        }

        info!(
            target: "duplex.registry",
            closed = report.closed_natives,
            released = report.released_handles,
            failures = report.failures.len(),
            "registry closed"
        );
        Ok(report)
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
