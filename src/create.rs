use serde_json::Value;

use crate::{Field, FieldResult, GroupField, ListField};


/// Input of [`create_field`]: plain data, existing fields, or a mix of both.
#[derive(Debug, Clone)]
pub enum FieldInit {
    Field(Field),
    Value(Value),
    List(Vec<FieldInit>),
    Group(Vec<(String, FieldInit)>),
}

impl From<Field> for FieldInit {
    fn from(value: Field) -> Self {
        FieldInit::Field(value)
    }
}
impl From<ListField> for FieldInit {
    fn from(value: ListField) -> Self {
        FieldInit::Field(value.into())
    }
}
impl From<GroupField> for FieldInit {
    fn from(value: GroupField) -> Self {
        FieldInit::Field(value.into())
    }
}
impl From<Value> for FieldInit {
    fn from(value: Value) -> Self {
        FieldInit::Value(value)
    }
}

/// Builds a field tree from `init`.
///
/// Arrays become [`ListField`]s, objects become [`GroupField`]s and any other
/// value becomes a scalar field, recursively. A [`FieldInit::Field`] is
/// returned as is.
pub fn create_field(init: impl Into<FieldInit>) -> FieldResult<Field> {
    match init.into() {
        FieldInit::Field(field) => Ok(field),
        FieldInit::Value(Value::Array(items)) => create_list(items.into_iter().map(FieldInit::Value)),
        FieldInit::Value(Value::Object(entries)) => {
            create_group(entries.into_iter().map(|(name, value)| (name, FieldInit::Value(value))))
        }
        FieldInit::Value(value) => Ok(Field::scalar(value)),
        FieldInit::List(items) => create_list(items),
        FieldInit::Group(entries) => create_group(entries),
    }
}

fn create_list(items: impl IntoIterator<Item = FieldInit>) -> FieldResult<Field> {
    let children = items
        .into_iter()
        .map(create_field)
        .collect::<FieldResult<Vec<_>>>()?;
    Ok(ListField::new(children)?.into())
}

fn create_group(entries: impl IntoIterator<Item = (String, FieldInit)>) -> FieldResult<Field> {
    let children = entries
        .into_iter()
        .map(|(name, init)| Ok((name, create_field(init)?)))
        .collect::<FieldResult<Vec<_>>>()?;
    Ok(GroupField::new(children)?.into())
}
