//! A reactive state tree for form data.
//!
//! A tree is built from three kinds of [`Field`]: scalars, ordered lists
//! ([`ListField`]) and named groups ([`GroupField`]). The state of every field
//! is composed from [`StateProxy`] contributions, so list and group
//! bookkeeping (`index`, `name`, `path`, the aggregated `value`) and
//! user-defined extension data live side by side in one record.
//!
//! Changes are delivered synchronously to listeners registered with
//! [`Field::subscribe`]. Inside [`Field::batch`] all recomputation is
//! coalesced and each field emits at most once, when the outermost batch ends.
//!
//! ```
//! use serde_json::json;
//! use sigfield::create_field;
//!
//! let form = create_field(json!({ "foo": { "bar": [1, { "baz": "x" }] } })).unwrap();
//! let baz = form.get_field("foo.bar[1].baz").unwrap();
//! assert_eq!(baz.state().path(), Some("foo.bar[1].baz"));
//!
//! baz.update([("value", "y")]).unwrap();
//! assert_eq!(form.state().to_value(), json!({ "value": { "foo": { "bar": [1, { "baz": "y" }] } } }));
//! ```
mod create;
mod error;
mod field;
mod group;
mod list;
mod path;
mod proxy;
mod state;
mod subscription;
mod utils;

pub use create::*;
pub use error::*;
pub use field::{EmitOptions, Field, FieldKind};
pub use group::GroupField;
pub use list::ListField;
pub use path::{parse_path, PathStep};
pub use proxy::StateProxy;
pub use state::{FieldChange, FieldState, INDEX_KEY, NAME_KEY, PATH_KEY, VALUE_KEY};
pub use subscription::*;
pub use utils::{find_first_duplicate, find_first_duplicate_by_key, Duplicate};
