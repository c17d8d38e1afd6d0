use std::{cell::Cell, rc::Weak};

use serde_json::Value;

use crate::{
    field::FieldNode,
    path::list_child_path,
    state::{INDEX_KEY, PATH_KEY, VALUE_KEY},
    Field, FieldError, FieldResult, FieldState, ListField, StateProxy,
};

/// Supplies `{index, path}` to a child of a list.
///
/// Both are owned by the list; updates from the child are never handled.
pub(crate) struct ListChildProxy {
    index: Cell<usize>,
    list: Weak<FieldNode>,
}
impl ListChildProxy {
    pub fn new(index: usize, list: &Field) -> Self {
        Self {
            index: Cell::new(index),
            list: list.downgrade(),
        }
    }
    pub fn index(&self) -> usize {
        self.index.get()
    }
    pub fn set_index(&self, index: usize) {
        self.index.set(index);
    }
}
impl StateProxy for ListChildProxy {
    fn get(&self, _state: &FieldState) -> FieldState {
        let parent_path = Field::from_weak(&self.list).and_then(|list| list.owned_path());
        FieldState::new()
            .with(INDEX_KEY, self.index())
            .with(PATH_KEY, list_child_path(self.index(), parent_path.as_deref()))
    }
}

/// Derives a list's `value` from its children and spreads value updates over them.
pub(crate) struct ListValueProxy {
    list: Weak<FieldNode>,
}
impl ListValueProxy {
    pub fn new(list: &Weak<FieldNode>) -> Self {
        Self { list: list.clone() }
    }
    fn list(&self) -> Option<ListField> {
        Field::from_weak(&self.list).and_then(ListField::from_field)
    }
}
impl StateProxy for ListValueProxy {
    fn get(&self, _state: &FieldState) -> FieldState {
        let values = self.list().map_or_else(Vec::new, |list| {
            list.children()
                .iter()
                .map(|child| child.state().value().cloned().unwrap_or_default())
                .collect()
        });
        FieldState::new().with(VALUE_KEY, values)
    }
    fn handle(&self, updates: &FieldState, _prev_state: &FieldState) -> FieldResult<()> {
        match (self.list(), updates.value()) {
            (Some(list), Some(Value::Array(values))) => list.set_values(values),
            _ => Ok(()),
        }
    }
    fn should_be_handled(&self, updates: &FieldState, prev_state: &FieldState) -> bool {
        updates
            .value()
            .is_some_and(|value| Some(value) != prev_state.value())
    }
    fn validate(&self, updates: &FieldState, prev_state: &FieldState) -> FieldResult<()> {
        let Some(Value::Array(values)) = updates.value() else {
            return Err(FieldError::type_mismatch(
                VALUE_KEY,
                "array",
                prev_state.path().map(str::to_owned),
            ));
        };
        let len = self.list().map_or(0, |list| list.len());
        if values.len() > len {
            return Err(FieldError::IndexOutOfBounds {
                index: len,
                len,
                parent_path: prev_state.path().map(str::to_owned),
            });
        }
        Ok(())
    }
}
