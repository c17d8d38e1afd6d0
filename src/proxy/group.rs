use std::{cell::RefCell, rc::Weak};

use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    field::FieldNode,
    path::group_child_path,
    state::{NAME_KEY, PATH_KEY, VALUE_KEY},
    Field, FieldError, FieldResult, FieldState, GroupField, StateProxy,
};

/// Supplies `{name, path}` to a child of a group and handles renames.
pub(crate) struct GroupChildProxy {
    name: RefCell<String>,
    group: Weak<FieldNode>,
}
impl GroupChildProxy {
    pub fn new(name: String, group: &Field) -> Self {
        Self {
            name: RefCell::new(name),
            group: group.downgrade(),
        }
    }
    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }
    pub fn is_named(&self, name: &str) -> bool {
        *self.name.borrow() == name
    }
    fn group(&self) -> Option<GroupField> {
        Field::from_weak(&self.group).and_then(GroupField::from_field)
    }
}
impl StateProxy for GroupChildProxy {
    fn get(&self, _state: &FieldState) -> FieldState {
        let parent_path = Field::from_weak(&self.group).and_then(|group| group.owned_path());
        let name = self.name();
        let path = group_child_path(&name, parent_path.as_deref());
        FieldState::new().with(NAME_KEY, name).with(PATH_KEY, path)
    }
    fn handle(&self, updates: &FieldState, _prev_state: &FieldState) -> FieldResult<()> {
        if let Some(name) = updates.name() {
            *self.name.borrow_mut() = name.to_owned();
        }
        Ok(())
    }
    fn should_be_handled(&self, updates: &FieldState, _prev_state: &FieldState) -> bool {
        updates
            .get(NAME_KEY)
            .is_some_and(|name| name.as_str() != Some(self.name.borrow().as_str()))
    }
    fn validate(&self, updates: &FieldState, prev_state: &FieldState) -> FieldResult<()> {
        let Some(name) = updates.name() else {
            return Err(FieldError::type_mismatch(
                NAME_KEY,
                "string",
                prev_state.path().map(str::to_owned),
            ));
        };
        match self.group() {
            Some(group) if group.is_name_taken(name, Some(self)) => {
                let err = FieldError::duplicate_child_name(name, group.owned_path());
                debug!(%err, "rejected rename");
                Err(err)
            }
            _ => Ok(()),
        }
    }
}

/// Derives a group's `value` record from its children and spreads value updates over them.
pub(crate) struct GroupValueProxy {
    group: Weak<FieldNode>,
}
impl GroupValueProxy {
    pub fn new(group: &Weak<FieldNode>) -> Self {
        Self {
            group: group.clone(),
        }
    }
    fn group(&self) -> Option<GroupField> {
        Field::from_weak(&self.group).and_then(GroupField::from_field)
    }
}
impl StateProxy for GroupValueProxy {
    fn get(&self, _state: &FieldState) -> FieldState {
        let record: Map<String, Value> = self.group().map_or_else(Map::new, |group| {
            group
                .entries()
                .into_iter()
                .map(|(name, child)| (name, child.state().value().cloned().unwrap_or_default()))
                .collect()
        });
        FieldState::new().with(VALUE_KEY, record)
    }
    fn handle(&self, updates: &FieldState, _prev_state: &FieldState) -> FieldResult<()> {
        match (self.group(), updates.value()) {
            (Some(group), Some(Value::Object(record))) => group.set_values(record),
            _ => Ok(()),
        }
    }
    fn should_be_handled(&self, updates: &FieldState, prev_state: &FieldState) -> bool {
        updates
            .value()
            .is_some_and(|value| Some(value) != prev_state.value())
    }
    fn validate(&self, updates: &FieldState, prev_state: &FieldState) -> FieldResult<()> {
        let Some(Value::Object(record)) = updates.value() else {
            return Err(FieldError::type_mismatch(
                VALUE_KEY,
                "object",
                prev_state.path().map(str::to_owned),
            ));
        };
        if let Some(group) = self.group() {
            for name in record.keys() {
                group.child(name)?;
            }
        }
        Ok(())
    }
}
