use std::{
    cell::RefCell,
    collections::BTreeMap,
    ops::Deref,
    ptr,
    rc::{Rc, Weak},
};

use derive_ex::derive_ex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    field::{FieldNode, FieldStructure, RawKind},
    path::PathStep,
    proxy::{GroupChildProxy, GroupValueProxy},
    state::VALUE_KEY,
    EmitOptions, Field, FieldChange, FieldError, FieldResult, FieldState, Subscription,
};


/// A field owning child fields keyed by name.
///
/// The group's `value` is a record of its children's values. Each child gets
/// `name` and `path`; renaming a child is done through the child itself with
/// `update({"name": ...})`.
#[derive_ex(Clone)]
pub struct GroupField(Field);

pub(crate) struct GroupNode {
    children: RefCell<BTreeMap<String, GroupChild>>,
    value_proxy: Rc<GroupValueProxy>,
}

struct GroupChild {
    field: Field,
    proxy: Rc<GroupChildProxy>,
    _subscription: Subscription,
    pending: Option<FieldChange>,
}

impl GroupNode {
    fn new(this: &Weak<FieldNode>) -> Self {
        Self {
            children: RefCell::new(BTreeMap::new()),
            value_proxy: Rc::new(GroupValueProxy::new(this)),
        }
    }
    fn child_proxies(&self) -> Vec<(Field, Rc<GroupChildProxy>)> {
        let children = self.children.borrow();
        children
            .values()
            .map(|entry| (entry.field.clone(), entry.proxy.clone()))
            .collect()
    }
}

impl GroupField {
    pub fn new<N: Into<String>>(children: impl IntoIterator<Item = (N, Field)>) -> FieldResult<Self> {
        let group = Self(Field::new_cyclic(|this| RawKind::Group(GroupNode::new(this))));
        group.add_proxy_with(group.node().value_proxy.clone(), EmitOptions::SILENT)?;
        for (name, field) in children {
            group.add_field_with(name, field, EmitOptions::SILENT)?;
        }
        group.reset_prev_state();
        Ok(group)
    }
    pub fn from_field(field: Field) -> Option<Self> {
        matches!(field.0.kind, RawKind::Group(_)).then_some(Self(field))
    }
    fn node(&self) -> &GroupNode {
        match &self.0 .0.kind {
            RawKind::Group(node) => node,
            _ => unreachable!("`GroupField` always wraps a group node"),
        }
    }

    pub fn as_field(&self) -> &Field {
        &self.0
    }
    pub fn len(&self) -> usize {
        self.node().children.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of the children, as currently keyed by the group.
    pub fn names(&self) -> Vec<String> {
        self.node().children.borrow().keys().cloned().collect()
    }
    pub fn entries(&self) -> Vec<(String, Field)> {
        let children = self.node().children.borrow();
        children
            .iter()
            .map(|(name, entry)| (name.clone(), entry.field.clone()))
            .collect()
    }

    pub fn child(&self, name: &str) -> FieldResult<Field> {
        let children = self.node().children.borrow();
        match children.get(name) {
            Some(entry) => Ok(entry.field.clone()),
            None => Err(FieldError::child_name_not_found(name, self.owned_path())),
        }
    }

    pub fn add_field(&self, name: impl Into<String>, field: Field) -> FieldResult<()> {
        self.add_field_with(name, field, EmitOptions::default())
    }

    /// Adds `field` under `name`.
    ///
    /// Fails if `name` is taken, or if `field` already has a parent or contains this group.
    pub fn add_field_with(
        &self,
        name: impl Into<String>,
        field: Field,
        options: EmitOptions,
    ) -> FieldResult<()> {
        let name = name.into();
        if self.is_name_taken(&name, None) {
            let err = FieldError::duplicate_child_name(name, self.owned_path());
            debug!(%err, "rejected group child");
            return Err(err);
        }
        field.check_attachable(self)?;
        debug!(path = ?self.state().path(), name = %name, "add group child");

        let proxy = Rc::new(GroupChildProxy::new(name.clone(), self));
        field.set_parent(Some(self.as_field()));
        field.engage_batch(self.batch_depth());
        field.add_proxy(proxy.clone())?;
        let subscription = field.subscribe_parent(self);
        self.node().children.borrow_mut().insert(
            name,
            GroupChild {
                field,
                proxy,
                _subscription: subscription,
                pending: None,
            },
        );
        self.update_self_value(options.emit)
    }

    pub fn remove_field(&self, name: &str) -> FieldResult<Field> {
        self.remove_field_with(name, EmitOptions::default())
    }

    /// Removes the child keyed by `name` and returns it as a standalone field.
    pub fn remove_field_with(&self, name: &str, options: EmitOptions) -> FieldResult<Field> {
        let entry = self.node().children.borrow_mut().remove(name);
        let Some(GroupChild {
            field,
            proxy,
            _subscription: subscription,
            ..
        }) = entry
        else {
            let err = FieldError::child_name_not_found(name, self.owned_path());
            debug!(%err, "rejected group child removal");
            return Err(err);
        };
        debug!(path = ?self.state().path(), name, "remove group child");
        drop(subscription);
        field.set_parent(None);
        field.remove_proxy(&*proxy)?;
        field.release_all_batches()?;
        self.update_self_value(options.emit)?;
        Ok(field)
    }

    /// Whether a child other than the owner of `except` is currently named `name`.
    ///
    /// Without `except` (a new child), a key still held by a pending rename also counts.
    pub(crate) fn is_name_taken(&self, name: &str, except: Option<&GroupChildProxy>) -> bool {
        let children = self.node().children.borrow();
        children.iter().any(|(key, entry)| match except {
            Some(proxy) if ptr::eq(Rc::as_ptr(&entry.proxy), proxy) => false,
            Some(_) => entry.proxy.is_named(name),
            None => key == name || entry.proxy.is_named(name),
        })
    }

    /// Spreads the entries of `record` over the children with the same names.
    pub(crate) fn set_values(&self, record: &Map<String, Value>) -> FieldResult<()> {
        let targets = record
            .iter()
            .map(|(name, value)| Ok((self.child(name)?, value.clone())))
            .collect::<FieldResult<Vec<_>>>()?;
        self.batch(|| -> FieldResult<()> {
            for (child, value) in targets {
                child.update(FieldState::new().with(VALUE_KEY, value))?;
            }
            self.update_self_value(false)
        })?
    }

    /// Re-keys every child whose name no longer matches its key. Returns whether any was re-keyed.
    ///
    /// All stale entries are taken out before any is reinserted, so children may
    /// trade names within one batch.
    fn settle_names(&self) -> FieldResult<bool> {
        let mut children = self.node().children.borrow_mut();
        let stale: Vec<String> = children
            .iter()
            .filter(|(key, entry)| !entry.proxy.is_named(key))
            .map(|(key, _)| key.clone())
            .collect();
        if stale.is_empty() {
            return Ok(false);
        }
        let moved: Vec<(String, GroupChild)> = stale
            .into_iter()
            .filter_map(|key| children.remove(&key).map(|entry| (key, entry)))
            .collect();
        let mut result = Ok(true);
        for (key, entry) in moved {
            let name = entry.proxy.name();
            if children.contains_key(&name) {
                if result.is_ok() {
                    result = Err(FieldError::duplicate_child_name(name, self.owned_path()));
                }
                children.insert(key, entry);
            } else {
                debug!(path = ?self.state().path(), from = %key, to = %name, "rekey group child");
                children.insert(name, entry);
            }
        }
        result
    }

    fn update_self_value(&self, emit: bool) -> FieldResult<()> {
        self.refresh_proxy(&*self.node().value_proxy)?;
        self.compute_and_emit(emit)
    }
}
impl Deref for GroupField {
    type Target = Field;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl From<GroupField> for Field {
    fn from(value: GroupField) -> Self {
        value.0
    }
}
impl std::fmt::Debug for GroupField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl FieldStructure for GroupNode {
    fn children(&self) -> Vec<Field> {
        let children = self.children.borrow();
        children.values().map(|entry| entry.field.clone()).collect()
    }

    fn try_get_child(&self, step: &PathStep) -> Option<Field> {
        let children = self.children.borrow();
        let entry = match step {
            PathStep::Name(name) => children.get(name),
            PathStep::Index(index) => children.get(&index.to_string()),
        };
        entry.map(|entry| entry.field.clone())
    }

    fn before_batch_end(&self, this: &Field) -> FieldResult<()> {
        let group = GroupField(this.clone());
        let settled = self
            .children
            .borrow_mut()
            .values_mut()
            .filter_map(|entry| entry.pending.take())
            .count();
        if settled > 0 {
            group.settle_names()?;
        }
        group.update_self_value(false)
    }

    fn after_compute_state(&self, this: &Field, prev_state: &FieldState) -> FieldResult<()> {
        if prev_state.path() == this.state().path() {
            return Ok(());
        }
        for (child, proxy) in self.child_proxies() {
            child.refresh_proxy(&*proxy)?;
            child.compute_and_emit(true)?;
        }
        Ok(())
    }

    fn on_child_change(&self, this: &Field, child: &Field, change: &FieldChange) -> FieldResult<()> {
        if this.is_batching() {
            let mut children = self.children.borrow_mut();
            if let Some(entry) = children.values_mut().find(|entry| entry.field == *child) {
                let prev_state = match entry.pending.take() {
                    Some(pending) => pending.prev_state,
                    None => change.prev_state.clone(),
                };
                entry.pending = Some(FieldChange {
                    prev_state,
                    next_state: change.next_state.clone(),
                });
            }
            return Ok(());
        }
        let group = GroupField(this.clone());
        let renamed = group.settle_names()?;
        if renamed || change.value_changed() {
            group.update_self_value(true)?;
        }
        Ok(())
    }
}
