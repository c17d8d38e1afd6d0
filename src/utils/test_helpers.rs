use assert_call::call;

use crate::{Field, Subscription};

/// Records every emission of `field` as `"{label}: {prev} -> {next}"`.
pub fn record(field: &Field, label: &'static str) -> Subscription {
    field.subscribe(move |change| {
        call!(
            "{label}: {} -> {}",
            change.prev_state.to_value(),
            change.next_state.to_value()
        );
    })
}

/// Records only the `value` of every emission of `field`.
pub fn record_value(field: &Field, label: &'static str) -> Subscription {
    field.subscribe(move |change| {
        let value = change.next_state.value().cloned().unwrap_or_default();
        call!("{label}: {value}");
    })
}
