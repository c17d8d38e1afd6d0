use std::{
    cell::RefCell,
    ops::Deref,
    rc::{Rc, Weak},
};

use derive_ex::derive_ex;
use serde_json::Value;
use tracing::debug;

use crate::{
    field::{FieldNode, FieldStructure, RawKind},
    path::PathStep,
    proxy::{ListChildProxy, ListValueProxy},
    state::VALUE_KEY,
    utils::find_first_duplicate,
    EmitOptions, Field, FieldChange, FieldError, FieldResult, FieldState, Subscription,
};

#[cfg(test)]
mod tests;

/// A field owning an ordered sequence of distinct child fields.
///
/// The list's `value` is the array of its children's values. Each child gets
/// `index` and `path` derived from its position.
#[derive_ex(Clone)]
pub struct ListField(Field);

pub(crate) struct ListNode {
    children: RefCell<Vec<ListChild>>,
    value_proxy: Rc<ListValueProxy>,
}

struct ListChild {
    field: Field,
    proxy: Rc<ListChildProxy>,
    _subscription: Subscription,
    pending: Option<FieldChange>,
}

impl ListNode {
    fn new(this: &Weak<FieldNode>) -> Self {
        Self {
            children: RefCell::new(Vec::new()),
            value_proxy: Rc::new(ListValueProxy::new(this)),
        }
    }
    fn proxy_of(&self, child: &Field) -> Option<Rc<ListChildProxy>> {
        self.children
            .borrow()
            .iter()
            .find(|entry| entry.field == *child)
            .map(|entry| entry.proxy.clone())
    }
}

impl ListField {
    pub fn new(children: impl IntoIterator<Item = Field>) -> FieldResult<Self> {
        let list = Self(Field::new_cyclic(|this| RawKind::List(ListNode::new(this))));
        list.add_proxy_with(list.node().value_proxy.clone(), EmitOptions::SILENT)?;
        let children: Vec<Field> = children.into_iter().collect();
        list.apply(move |_| children)?;
        list.reset_prev_state();
        Ok(list)
    }
    pub fn from_field(field: Field) -> Option<Self> {
        matches!(field.0.kind, RawKind::List(_)).then_some(Self(field))
    }
    fn node(&self) -> &ListNode {
        match &self.0 .0.kind {
            RawKind::List(node) => node,
            _ => unreachable!("`ListField` always wraps a list node"),
        }
    }

    pub fn as_field(&self) -> &Field {
        &self.0
    }
    pub fn children(&self) -> Vec<Field> {
        self.node().children()
    }
    pub fn len(&self) -> usize {
        self.node().children.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn get(&self, index: usize) -> Option<Field> {
        let children = self.node().children.borrow();
        children.get(index).map(|entry| entry.field.clone())
    }
    pub fn index_of(&self, child: &Field) -> Option<usize> {
        self.node().proxy_of(child).map(|proxy| proxy.index())
    }

    /// Replaces the children with `f(current children)`.
    ///
    /// Fails without any change if the result holds the same field twice, or a
    /// field that already belongs to another parent or contains this list.
    /// Otherwise removed children are detached, retained and new ones get their
    /// `index`/`path`, and the list's `value` is re-derived, all in one batch.
    pub fn apply(&self, f: impl FnOnce(Vec<Field>) -> Vec<Field>) -> FieldResult<()> {
        let prev = self.children();
        let next = f(prev.clone());
        if let Some(duplicate) = find_first_duplicate(&next) {
            let err = FieldError::DuplicateListMember {
                index: duplicate.last_index,
                duplicate_of: duplicate.first_index,
                parent_path: self.owned_path(),
            };
            debug!(%err, "rejected list children");
            return Err(err);
        }
        for child in next.iter().filter(|child| !prev.contains(child)) {
            child.check_attachable(self)?;
        }
        debug!(path = ?self.state().path(), len = next.len(), "apply list children");
        self.batch(|| self.replace_children(&prev, &next))?
    }

    fn replace_children(&self, prev: &[Field], next: &[Field]) -> FieldResult<()> {
        for child in prev.iter().filter(|child| !next.contains(child)) {
            self.detach_child(child)?;
        }
        for (index, child) in next.iter().enumerate() {
            match self.node().proxy_of(child) {
                Some(proxy) => self.move_child(child, &proxy, index)?,
                None => self.attach_child(child, index)?,
            }
        }
        self.node()
            .children
            .borrow_mut()
            .sort_by_key(|entry| entry.proxy.index());
        self.update_self_value(false)
    }

    fn attach_child(&self, child: &Field, index: usize) -> FieldResult<()> {
        let proxy = Rc::new(ListChildProxy::new(index, self));
        child.set_parent(Some(self.as_field()));
        child.engage_batch(self.batch_depth());
        child.add_proxy(proxy.clone())?;
        let subscription = child.subscribe_parent(self);
        self.node().children.borrow_mut().push(ListChild {
            field: child.clone(),
            proxy,
            _subscription: subscription,
            pending: None,
        });
        Ok(())
    }

    fn move_child(&self, child: &Field, proxy: &ListChildProxy, index: usize) -> FieldResult<()> {
        if proxy.index() != index {
            proxy.set_index(index);
            child.refresh_proxy(proxy)?;
            child.compute_and_emit(true)?;
        }
        Ok(())
    }

    fn detach_child(&self, child: &Field) -> FieldResult<()> {
        let entry = {
            let mut children = self.node().children.borrow_mut();
            let Some(index) = children.iter().position(|entry| entry.field == *child) else {
                return Ok(());
            };
            children.remove(index)
        };
        let ListChild {
            field,
            proxy,
            _subscription: subscription,
            ..
        } = entry;
        drop(subscription);
        field.set_parent(None);
        field.remove_proxy(&*proxy)?;
        field.release_all_batches()?;
        Ok(())
    }

    /// Spreads `values` over the children, in order.
    pub(crate) fn set_values(&self, values: &[Value]) -> FieldResult<()> {
        let children = self.children();
        self.batch(|| -> FieldResult<()> {
            for (child, value) in children.iter().zip(values) {
                child.update(FieldState::new().with(VALUE_KEY, value.clone()))?;
            }
            self.update_self_value(false)
        })?
    }

    fn update_self_value(&self, emit: bool) -> FieldResult<()> {
        self.refresh_proxy(&*self.node().value_proxy)?;
        self.compute_and_emit(emit)
    }
}
impl Deref for ListField {
    type Target = Field;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl From<ListField> for Field {
    fn from(value: ListField) -> Self {
        value.0
    }
}
impl std::fmt::Debug for ListField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl FieldStructure for ListNode {
    fn children(&self) -> Vec<Field> {
        let children = self.children.borrow();
        children.iter().map(|entry| entry.field.clone()).collect()
    }

    fn try_get_child(&self, step: &PathStep) -> Option<Field> {
        let index = match step {
            PathStep::Index(index) => *index,
            PathStep::Name(name) => name.parse().ok()?,
        };
        let children = self.children.borrow();
        children.get(index).map(|entry| entry.field.clone())
    }

    fn before_batch_end(&self, this: &Field) -> FieldResult<()> {
        let value_changed = self
            .children
            .borrow_mut()
            .iter_mut()
            .filter_map(|entry| entry.pending.take())
            .fold(false, |acc, change| acc | change.value_changed());
        if value_changed {
            ListField(this.clone()).update_self_value(false)?;
        }
        Ok(())
    }

    fn after_compute_state(&self, this: &Field, prev_state: &FieldState) -> FieldResult<()> {
        if prev_state.path() == this.state().path() {
            return Ok(());
        }
        let children: Vec<_> = self
            .children
            .borrow()
            .iter()
            .map(|entry| (entry.field.clone(), entry.proxy.clone()))
            .collect();
        for (child, proxy) in children {
            child.refresh_proxy(&*proxy)?;
            child.compute_and_emit(true)?;
        }
        Ok(())
    }

    fn on_child_change(&self, this: &Field, child: &Field, change: &FieldChange) -> FieldResult<()> {
        if this.is_batching() {
            let mut children = self.children.borrow_mut();
            if let Some(entry) = children.iter_mut().find(|entry| entry.field == *child) {
                let prev_state = match entry.pending.take() {
                    Some(pending) => pending.prev_state,
                    None => change.prev_state.clone(),
                };
                entry.pending = Some(FieldChange {
                    prev_state,
                    next_state: change.next_state.clone(),
                });
            }
            Ok(())
        } else if change.value_changed() {
            ListField(this.clone()).update_self_value(true)
        } else {
            Ok(())
        }
    }
}
