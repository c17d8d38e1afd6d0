use parse_display::Display;

use crate::Field;


/// One child-access step of a field path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Display)]
pub enum PathStep {
    #[display("{0}")]
    Name(String),
    #[display("[{0}]")]
    Index(usize),
}

impl PathStep {
    fn parse(part: &str) -> Self {
        match part.parse() {
            Ok(index) if is_canonical_index(part) => PathStep::Index(index),
            _ => PathStep::Name(part.to_owned()),
        }
    }

    /// Appends this step to `parent_path`.
    ///
    /// `None` and `""` both denote a root parent.
    pub fn join(&self, parent_path: Option<&str>) -> String {
        match (parent_path, self) {
            (None | Some(""), _) => self.to_string(),
            (Some(parent), PathStep::Name(_)) => format!("{parent}.{self}"),
            (Some(parent), PathStep::Index(_)) => format!("{parent}{self}"),
        }
    }
}

// `007` and `+7` stay names so that a group child named that way is reachable.
fn is_canonical_index(part: &str) -> bool {
    part.bytes().all(|b| b.is_ascii_digit()) && (part == "0" || !part.starts_with('0'))
}

/// Splits a path such as `a.b[2].c` into steps.
///
/// Separators collapse, so `a..b`, `a[.b` and `a.b.` parse like `a.b`.
/// The empty path has no steps and resolves to the field it is applied to.
pub fn parse_path(path: &str) -> Vec<PathStep> {
    path.split(['.', '[', ']'])
        .filter(|part| !part.is_empty())
        .map(PathStep::parse)
        .collect()
}

/// Walks `path` from `root`, one child lookup per step.
pub(crate) fn resolve(root: &Field, path: &str) -> Option<Field> {
    parse_path(path)
        .iter()
        .try_fold(root.clone(), |field, step| field.try_get_child(step))
}

pub(crate) fn group_child_path(name: &str, parent_path: Option<&str>) -> String {
    PathStep::Name(name.to_owned()).join(parent_path)
}

pub(crate) fn list_child_path(index: usize, parent_path: Option<&str>) -> String {
    PathStep::Index(index).join(parent_path)
}
