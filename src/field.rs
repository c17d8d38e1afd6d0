use std::{
    cell::RefCell,
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
    mem::{replace, take},
    rc::{Rc, Weak},
};

use derive_ex::{derive_ex, Ex};
use parse_display::Display;
use serde_json::Value;
use tracing::{debug, trace};

use crate::{
    group::GroupNode,
    list::ListNode,
    path::{self, PathStep},
    proxy::{proxy_part, same_proxy, ValueProxy},
    FieldChange, FieldError, FieldResult, FieldState, GroupField, ListField, StateProxy,
    Subscription,
};


/// Options accepted by the `*_with` variants of mutating operations.
#[derive(Clone, Copy, Debug, Ex)]
#[derive_ex(Default)]
#[default(Self { emit: true })]
pub struct EmitOptions {
    /// Emit the resulting change to listeners (unless batching).
    pub emit: bool,
}

impl EmitOptions {
    pub const SILENT: Self = Self { emit: false };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[display(style = "snake_case")]
pub enum FieldKind {
    Scalar,
    List,
    Group,
}

/// A node of a field tree.
///
/// `Field` is a shared handle: clones refer to the same node, and equality is identity.
#[derive_ex(Clone)]
pub struct Field(pub(crate) Rc<FieldNode>);

pub(crate) struct FieldNode {
    kernel: RefCell<Kernel>,
    listeners: RefCell<Listeners>,
    parent: RefCell<Weak<FieldNode>>,
    pub(crate) kind: RawKind,
}

pub(crate) enum RawKind {
    Scalar,
    List(ListNode),
    Group(GroupNode),
}
impl RawKind {
    fn structure(&self) -> Option<&dyn FieldStructure> {
        match self {
            RawKind::Scalar => None,
            RawKind::List(node) => Some(node),
            RawKind::Group(node) => Some(node),
        }
    }
}

/// Hooks a structural field kind plugs into the kernel.
pub(crate) trait FieldStructure {
    fn children(&self) -> Vec<Field>;
    fn try_get_child(&self, step: &PathStep) -> Option<Field>;

    /// Called once when the outermost batch ends, before its emission.
    fn before_batch_end(&self, this: &Field) -> FieldResult<()>;

    /// Called whenever the composed state was replaced.
    fn after_compute_state(&self, this: &Field, prev_state: &FieldState) -> FieldResult<()>;

    fn on_child_change(&self, this: &Field, child: &Field, change: &FieldChange)
        -> FieldResult<()>;
}

struct Kernel {
    proxies: Vec<ProxySlot>,
    is_dirty: bool,
    state: Rc<FieldState>,
    prev_state: Rc<FieldState>,
    batch_depth: usize,
    // Levels of `batch_depth` pushed by the current parent.
    parent_batch_depth: usize,
}

struct ProxySlot {
    proxy: Rc<dyn StateProxy>,
    part: Option<FieldState>,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    items: BTreeMap<u64, Listener>,
}
impl Listeners {
    fn insert(&mut self, listener: Listener) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.items.insert(id, listener);
        id
    }
}

#[derive_ex(Clone)]
enum Listener {
    Fn(Rc<dyn Fn(&FieldChange)>),
    Parent(Weak<FieldNode>),
}

impl Field {
    pub(crate) fn new_cyclic(kind: impl FnOnce(&Weak<FieldNode>) -> RawKind) -> Self {
        let state = Rc::new(FieldState::new());
        Self(Rc::new_cyclic(|this| FieldNode {
            kernel: RefCell::new(Kernel {
                proxies: Vec::new(),
                is_dirty: false,
                state: state.clone(),
                prev_state: state,
                batch_depth: 0,
                parent_batch_depth: 0,
            }),
            listeners: RefCell::new(Listeners::default()),
            parent: RefCell::new(Weak::new()),
            kind: kind(this),
        }))
    }
    pub(crate) fn from_weak(node: &Weak<FieldNode>) -> Option<Self> {
        node.upgrade().map(Self)
    }
    pub(crate) fn downgrade(&self) -> Weak<FieldNode> {
        Rc::downgrade(&self.0)
    }

    /// Create a leaf field holding `value`.
    pub fn scalar(value: impl Into<Value>) -> Self {
        let field = Self::new_cyclic(|_| RawKind::Scalar);
        let proxy: Rc<dyn StateProxy> = Rc::new(ValueProxy::new(value.into()));
        let part = proxy_part(&*proxy, &field.state());
        {
            let mut k = field.0.kernel.borrow_mut();
            k.proxies.push(ProxySlot { proxy, part });
            k.is_dirty = true;
        }
        field.recompose();
        field.reset_prev_state();
        field
    }

    pub fn kind(&self) -> FieldKind {
        match &self.0.kind {
            RawKind::Scalar => FieldKind::Scalar,
            RawKind::List(_) => FieldKind::List,
            RawKind::Group(_) => FieldKind::Group,
        }
    }
    pub fn as_list(&self) -> Option<ListField> {
        ListField::from_field(self.clone())
    }
    pub fn as_group(&self) -> Option<GroupField> {
        GroupField::from_field(self.clone())
    }

    /// Current composed state.
    pub fn state(&self) -> Rc<FieldState> {
        self.0.kernel.borrow().state.clone()
    }
    pub(crate) fn owned_path(&self) -> Option<String> {
        self.state().path().map(str::to_owned)
    }

    pub fn is_batching(&self) -> bool {
        self.0.kernel.borrow().batch_depth > 0
    }
    pub(crate) fn batch_depth(&self) -> usize {
        self.0.kernel.borrow().batch_depth
    }

    /// Registers a listener called with every emitted change.
    ///
    /// The current state is not replayed. Listeners run synchronously, in subscription order.
    pub fn subscribe(&self, f: impl Fn(&FieldChange) + 'static) -> Subscription {
        self.subscribe_raw(Listener::Fn(Rc::new(f)))
    }
    pub(crate) fn subscribe_parent(&self, parent: &Field) -> Subscription {
        self.subscribe_raw(Listener::Parent(parent.downgrade()))
    }
    fn subscribe_raw(&self, listener: Listener) -> Subscription {
        let id = self.0.listeners.borrow_mut().insert(listener);
        Subscription::from_weak_fn(self.downgrade(), move |node: Rc<FieldNode>| {
            node.listeners.borrow_mut().items.remove(&id);
        })
    }

    /// Runs `f` with batching engaged for this field and all of its current descendants.
    ///
    /// Only the end of the outermost batch finalizes and emits, so every field
    /// emits at most once for the whole call.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> FieldResult<R> {
        self.begin_batch();
        let value = f();
        self.end_batch()?;
        Ok(value)
    }
    pub(crate) fn begin_batch(&self) {
        for child in self.children() {
            child.engage_batch(1);
        }
        self.0.kernel.borrow_mut().batch_depth += 1;
    }
    pub(crate) fn end_batch(&self) -> FieldResult<()> {
        let depth = self.batch_depth();
        if depth == 0 {
            return Ok(());
        }
        let mut result = Ok(());
        // Listeners may attach children while this loop runs; they are released too.
        loop {
            let engaged: Vec<Field> = self
                .children()
                .into_iter()
                .filter(|child| child.parent_batch_depth() >= depth)
                .collect();
            if engaged.is_empty() {
                break;
            }
            for child in engaged {
                if child.parent_batch_depth() >= depth {
                    keep_first_error(&mut result, child.release_batch());
                }
            }
        }
        if depth == 1 {
            if let Some(structure) = self.0.kind.structure() {
                keep_first_error(&mut result, structure.before_batch_end(self));
            }
        }
        self.0.kernel.borrow_mut().batch_depth -= 1;
        if depth == 1 {
            trace!(path = ?self.state().path(), "batch finalized");
            keep_first_error(&mut result, self.emit_next());
        }
        result
    }

    fn parent_batch_depth(&self) -> usize {
        self.0.kernel.borrow().parent_batch_depth
    }

    /// Pushes `levels` batch levels on behalf of the parent.
    pub(crate) fn engage_batch(&self, levels: usize) {
        self.0.kernel.borrow_mut().parent_batch_depth += levels;
        for _ in 0..levels {
            self.begin_batch();
        }
    }
    fn release_batch(&self) -> FieldResult<()> {
        {
            let mut k = self.0.kernel.borrow_mut();
            k.parent_batch_depth = k.parent_batch_depth.saturating_sub(1);
        }
        self.end_batch()
    }

    /// Pops every batch level the parent pushed. Called when the child is detached.
    pub(crate) fn release_all_batches(&self) -> FieldResult<()> {
        let levels = take(&mut self.0.kernel.borrow_mut().parent_batch_depth);
        for _ in 0..levels {
            self.end_batch()?;
        }
        Ok(())
    }

    /// Applies `updates` to every proxy that accepts them.
    ///
    /// Returns whether the composed state changed.
    pub fn update(&self, updates: impl Into<FieldState>) -> FieldResult<bool> {
        self.update_with(updates, EmitOptions::default())
    }
    pub fn update_with(
        &self,
        updates: impl Into<FieldState>,
        options: EmitOptions,
    ) -> FieldResult<bool> {
        let updates = updates.into();
        let state = self.state();
        let proxies: Vec<_> = self
            .proxies()
            .into_iter()
            .filter(|proxy| proxy.should_be_handled(&updates, &state))
            .collect();
        if proxies.is_empty() {
            return Ok(false);
        }
        for proxy in &proxies {
            proxy.validate(&updates, &state)?;
        }
        for proxy in &proxies {
            proxy.handle(&updates, &state)?;
            self.refresh_proxy(&**proxy)?;
        }
        self.compute_and_emit(options.emit)?;
        Ok(!Rc::ptr_eq(&state, &self.state()))
    }

    pub fn add_proxy(&self, proxy: Rc<dyn StateProxy>) -> FieldResult<()> {
        self.add_proxy_with(proxy, EmitOptions::default())
    }
    pub fn add_proxy_with(&self, proxy: Rc<dyn StateProxy>, options: EmitOptions) -> FieldResult<()> {
        if self.has_proxy(&*proxy) {
            debug!(proxy = proxy.name(), "rejected duplicate proxy");
            return Err(FieldError::DuplicateProxy {
                proxy: proxy.name(),
            });
        }
        let part = proxy_part(&*proxy, &self.state());
        {
            let mut k = self.0.kernel.borrow_mut();
            k.proxies.push(ProxySlot { proxy, part });
            k.is_dirty = true;
        }
        self.compute_and_emit(options.emit)
    }

    pub fn remove_proxy(&self, proxy: &dyn StateProxy) -> FieldResult<()> {
        self.remove_proxy_with(proxy, EmitOptions::default())
    }
    pub fn remove_proxy_with(&self, proxy: &dyn StateProxy, options: EmitOptions) -> FieldResult<()> {
        {
            let mut k = self.0.kernel.borrow_mut();
            let Some(index) = k.position(proxy) else {
                debug!(proxy = proxy.name(), "proxy not found");
                return Err(FieldError::ProxyNotFound {
                    proxy: proxy.name(),
                });
            };
            k.proxies.remove(index);
            k.is_dirty = true;
        }
        self.compute_and_emit(options.emit)
    }

    pub fn has_proxy(&self, proxy: &dyn StateProxy) -> bool {
        self.0.kernel.borrow().position(proxy).is_some()
    }
    fn proxies(&self) -> Vec<Rc<dyn StateProxy>> {
        let k = self.0.kernel.borrow();
        k.proxies.iter().map(|slot| slot.proxy.clone()).collect()
    }

    /// Re-reads the contribution of `proxy`.
    ///
    /// Returns whether the contribution changed. The composed state is not
    /// rebuilt until [`compute_state`](Self::compute_state).
    pub fn refresh_proxy(&self, proxy: &dyn StateProxy) -> FieldResult<bool> {
        let part = proxy_part(proxy, &self.state());
        let mut k = self.0.kernel.borrow_mut();
        let Some(index) = k.position(proxy) else {
            return Err(FieldError::ProxyNotFound {
                proxy: proxy.name(),
            });
        };
        if k.proxies[index].part == part {
            return Ok(false);
        }
        k.proxies[index].part = part;
        k.is_dirty = true;
        Ok(true)
    }

    /// Rebuilds the composed state if any contribution changed.
    pub fn compute_state(&self) -> FieldResult<()> {
        let Some(prev_state) = self.recompose() else {
            return Ok(());
        };
        if let Some(structure) = self.0.kind.structure() {
            structure.after_compute_state(self, &prev_state)?;
        }
        Ok(())
    }
    fn recompose(&self) -> Option<Rc<FieldState>> {
        let mut k = self.0.kernel.borrow_mut();
        if !replace(&mut k.is_dirty, false) {
            return None;
        }
        let mut next = FieldState::new();
        for part in k.proxies.iter().filter_map(|slot| slot.part.as_ref()) {
            next.merge(part);
        }
        if next == *k.state {
            return None;
        }
        Some(replace(&mut k.state, Rc::new(next)))
    }

    /// Treats the current state as already delivered.
    pub fn reset_prev_state(&self) {
        let mut k = self.0.kernel.borrow_mut();
        k.prev_state = k.state.clone();
    }

    /// Delivers the current state to listeners if it differs from the last delivered one.
    ///
    /// Does nothing while batching.
    pub fn emit_next(&self) -> FieldResult<()> {
        let change = {
            let mut k = self.0.kernel.borrow_mut();
            if k.batch_depth > 0 || Rc::ptr_eq(&k.state, &k.prev_state) {
                return Ok(());
            }
            if k.state == k.prev_state {
                // changed and changed back
                k.prev_state = k.state.clone();
                return Ok(());
            }
            let next_state = k.state.clone();
            FieldChange {
                prev_state: replace(&mut k.prev_state, next_state.clone()),
                next_state,
            }
        };
        trace!(path = ?change.next_state.path(), "emit");
        let listeners: Vec<Listener> = self.0.listeners.borrow().items.values().cloned().collect();
        for listener in listeners {
            match listener {
                Listener::Fn(f) => f(&change),
                Listener::Parent(parent) => {
                    if let Some(parent) = Field::from_weak(&parent) {
                        if let Some(structure) = parent.0.kind.structure() {
                            structure.on_child_change(&parent, self, &change)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn compute_and_emit(&self, emit: bool) -> FieldResult<()> {
        self.compute_state()?;
        if emit {
            self.emit_next()?;
        }
        Ok(())
    }

    pub(crate) fn children(&self) -> Vec<Field> {
        match self.0.kind.structure() {
            Some(structure) => structure.children(),
            None => Vec::new(),
        }
    }

    /// Resolves one step below this field.
    pub fn try_get_child(&self, step: &PathStep) -> Option<Field> {
        self.0.kind.structure()?.try_get_child(step)
    }

    /// Resolves a descendant by path such as `a.b[2].c`, or `None` if any step is missing.
    pub fn try_get_field(&self, path: &str) -> Option<Field> {
        path::resolve(self, path)
    }

    /// Resolves a descendant by path, failing with [`FieldError::FieldNotFound`].
    pub fn get_field(&self, path: &str) -> FieldResult<Field> {
        self.try_get_field(path)
            .ok_or_else(|| FieldError::FieldNotFound {
                path: path.to_owned(),
                parent_path: self.owned_path(),
            })
    }

    pub fn parent(&self) -> Option<Field> {
        Field::from_weak(&self.0.parent.borrow())
    }
    pub(crate) fn set_parent(&self, parent: Option<&Field>) {
        *self.0.parent.borrow_mut() = parent.map_or_else(Weak::new, Field::downgrade);
    }

    /// Checks that `self` may become a new child of `parent`.
    pub(crate) fn check_attachable(&self, parent: &Field) -> FieldResult<()> {
        if self.parent().is_some() {
            return Err(FieldError::AlreadyAttached {
                path: self.owned_path(),
            });
        }
        let mut ancestor = Some(parent.clone());
        while let Some(field) = ancestor {
            if field == *self {
                return Err(FieldError::CyclicMembership {
                    path: parent.owned_path(),
                });
            }
            ancestor = field.parent();
        }
        Ok(())
    }
}
impl Kernel {
    fn position(&self, proxy: &dyn StateProxy) -> Option<usize> {
        self.proxies
            .iter()
            .position(|slot| same_proxy(&*slot.proxy, proxy))
    }
}
impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Field {}
impl Hash for Field {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Rc::as_ptr(&self.0).hash(state)
    }
}
impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Field");
        d.field("kind", &self.kind());
        match self.0.kernel.try_borrow() {
            Ok(k) => d.field("state", &*k.state),
            Err(_) => d.field("state", &format_args!("<borrowed>")),
        };
        d.finish()
    }
}

fn keep_first_error(result: &mut FieldResult<()>, next: FieldResult<()>) {
    if result.is_ok() {
        *result = next;
    }
}
