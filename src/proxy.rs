use std::{any::type_name, cell::RefCell, ptr};

use serde_json::Value;

use crate::{state::VALUE_KEY, FieldResult, FieldState};

mod group;
mod list;

pub(crate) use group::*;
pub(crate) use list::*;

#[cfg(test)]
mod tests;

/// A contributor of one slice of a field's composed state.
///
/// A field folds the results of [`get`](Self::get) of its proxies, in
/// registration order, into its state. An update passed to
/// [`Field::update`](crate::Field::update) reaches [`handle`](Self::handle)
/// only if [`should_be_handled`](Self::should_be_handled) accepts it.
///
/// Proxies are compared by identity: the same instance is the unit of
/// registration and removal.
pub trait StateProxy: 'static {
    /// Returns this proxy's slice of state.
    ///
    /// Must depend only on `state` and on data changed through [`handle`](Self::handle)
    /// or by the structural field owning the proxy.
    fn get(&self, state: &FieldState) -> FieldState;

    /// Applies `updates`. The only sanctioned way to change the proxy's data.
    fn handle(&self, _updates: &FieldState, _prev_state: &FieldState) -> FieldResult<()> {
        Ok(())
    }

    fn should_be_handled(&self, _updates: &FieldState, _prev_state: &FieldState) -> bool {
        false
    }

    /// Rejects `updates` before any proxy of the field handles them.
    fn validate(&self, _updates: &FieldState, _prev_state: &FieldState) -> FieldResult<()> {
        Ok(())
    }

    /// Omits this proxy's slice from the composed state.
    fn should_be_excluded(&self, _state: &FieldState) -> bool {
        false
    }

    /// Name used in error reports.
    fn name(&self) -> &'static str {
        type_name::<Self>()
    }
}

pub(crate) fn proxy_part(proxy: &dyn StateProxy, state: &FieldState) -> Option<FieldState> {
    if proxy.should_be_excluded(state) {
        None
    } else {
        Some(proxy.get(state))
    }
}

pub(crate) fn same_proxy(a: &dyn StateProxy, b: &dyn StateProxy) -> bool {
    ptr::addr_eq(a, b)
}

/// Holds the value of a scalar field.
pub(crate) struct ValueProxy {
    value: RefCell<Value>,
}
impl ValueProxy {
    pub fn new(value: Value) -> Self {
        Self {
            value: RefCell::new(value),
        }
    }
}
impl StateProxy for ValueProxy {
    fn get(&self, _state: &FieldState) -> FieldState {
        FieldState::new().with(VALUE_KEY, self.value.borrow().clone())
    }
    fn handle(&self, updates: &FieldState, _prev_state: &FieldState) -> FieldResult<()> {
        if let Some(value) = updates.value() {
            *self.value.borrow_mut() = value.clone();
        }
        Ok(())
    }
    fn should_be_handled(&self, updates: &FieldState, _prev_state: &FieldState) -> bool {
        updates
            .value()
            .is_some_and(|value| *value != *self.value.borrow())
    }
}
