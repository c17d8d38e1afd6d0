use std::{cell::Cell, rc::Rc};

use assert_call::{call, CallRecorder};
use serde_json::json;

use crate::{
    utils::test_helpers::{record, record_value},
    Field, FieldError, GroupField, ListField,
};

struct Models {
    foo: Field,
    bar: Field,
    group: GroupField,
    list: ListField,
}

fn models() -> Models {
    let foo = Field::scalar(1);
    let bar = Field::scalar(2);
    let group = GroupField::new([("first", Field::scalar(3)), ("second", Field::scalar(4))]).unwrap();
    let list = ListField::new([foo.clone(), bar.clone(), group.clone().into()]).unwrap();
    Models {
        foo,
        bar,
        group,
        list,
    }
}

#[test]
fn initial_value() {
    let Models { list, .. } = models();
    assert_eq!(
        list.state().to_value(),
        json!({ "value": [1, 2, { "first": 3, "second": 4 }] })
    );
    assert_eq!(list.len(), 3);
}

#[test]
fn children_get_index_and_path() {
    let Models {
        foo, bar, group, ..
    } = models();
    assert_eq!(foo.state().to_value(), json!({ "index": 0, "path": "[0]", "value": 1 }));
    assert_eq!(bar.state().to_value(), json!({ "index": 1, "path": "[1]", "value": 2 }));
    assert_eq!(
        group.state().to_value(),
        json!({ "index": 2, "path": "[2]", "value": { "first": 3, "second": 4 } })
    );
    assert_eq!(
        group.get_field("first").unwrap().state().to_value(),
        json!({ "name": "first", "path": "[2].first", "value": 3 })
    );
}

#[test]
fn apply_replaces_children() {
    let mut cr = CallRecorder::new();
    let Models {
        foo,
        bar,
        group,
        list,
    } = models();
    let _s = record_value(&list, "list");

    list.apply(|_| vec![bar.clone(), group.clone().into()]).unwrap();
    cr.verify(r#"list: [2,{"first":3,"second":4}]"#);
    assert_eq!(list.children(), vec![bar.clone(), Field::from(group.clone())]);

    assert_eq!(foo.state().to_value(), json!({ "value": 1 }));
    assert_eq!(foo.parent(), None);
    assert_eq!(bar.state().to_value(), json!({ "index": 0, "path": "[0]", "value": 2 }));
    assert_eq!(bar.parent(), Some(list.as_field().clone()));

    // a detached child no longer drives the list
    foo.update([("value", 100)]).unwrap();
    cr.verify(());
}

#[test]
fn duplicate_member_is_rejected() {
    let mut cr = CallRecorder::new();
    let Models {
        foo, group, list, ..
    } = models();
    let _s = record(&list, "list");

    let err = list
        .apply(|_| vec![Field::from(group.clone()), foo.clone(), foo.clone(), foo.clone()])
        .unwrap_err();
    assert_eq!(
        err,
        FieldError::DuplicateListMember {
            index: 2,
            duplicate_of: 1,
            parent_path: None,
        }
    );
    assert_eq!(
        list.state().to_value(),
        json!({ "value": [1, 2, { "first": 3, "second": 4 }] })
    );
    assert_eq!(foo.state().index(), Some(0));
    cr.verify(());
}

#[test]
fn duplicate_of_first_member_is_rejected() {
    let foo = Field::scalar(1);
    assert_eq!(
        ListField::new([foo.clone(), Field::scalar(2), foo.clone()]).unwrap_err(),
        FieldError::DuplicateListMember {
            index: 2,
            duplicate_of: 0,
            parent_path: None,
        }
    );
    assert_eq!(foo.parent(), None);
}

#[test]
fn update_value_propagates_to_children() {
    let mut cr = CallRecorder::new();
    let Models {
        foo,
        bar,
        group,
        list,
    } = models();
    let _s = record_value(&list, "list");

    list.update([("value", json!([10, 20, { "first": -1, "second": -2 }]))])
        .unwrap();
    cr.verify(r#"list: [10,20,{"first":-1,"second":-2}]"#);
    assert_eq!(foo.state().value(), Some(&json!(10)));
    assert_eq!(bar.state().value(), Some(&json!(20)));
    assert_eq!(
        group.state().value(),
        Some(&json!({ "first": -1, "second": -2 }))
    );
}

#[test]
fn shorter_value_updates_prefix() {
    let Models { foo, bar, list, .. } = models();
    list.update([("value", json!([5]))]).unwrap();
    assert_eq!(foo.state().value(), Some(&json!(5)));
    assert_eq!(bar.state().value(), Some(&json!(2)));
    assert_eq!(
        list.state().value(),
        Some(&json!([5, 2, { "first": 3, "second": 4 }]))
    );
}

#[test]
fn invalid_value_is_rejected() {
    let Models { foo, list, .. } = models();
    assert_eq!(
        list.update([("value", json!([7, 8, {}, 9]))]),
        Err(FieldError::IndexOutOfBounds {
            index: 3,
            len: 3,
            parent_path: None,
        })
    );
    assert!(matches!(
        list.update([("value", json!({ "a": 1 }))]),
        Err(FieldError::TypeMismatch { .. })
    ));
    assert_eq!(foo.state().value(), Some(&json!(1)));
}

#[test]
fn child_update_emits_list() {
    let mut cr = CallRecorder::new();
    let Models { foo, group, list, .. } = models();
    let _s = record_value(&list, "list");

    foo.update([("value", 5)]).unwrap();
    cr.verify(r#"list: [5,2,{"first":3,"second":4}]"#);

    group
        .get_field("second")
        .unwrap()
        .update([("value", 0)])
        .unwrap();
    cr.verify(r#"list: [5,2,{"first":3,"second":0}]"#);
}

#[test]
fn batch_emits_once() {
    let mut cr = CallRecorder::new();
    let Models {
        foo,
        bar,
        group,
        list,
    } = models();
    let first = group.get_field("first").unwrap();
    let _s0 = record(&list, "list");
    let _s1 = record(&first, "first");

    list.batch(|| {
        list.apply(|children| {
            let mut children = children;
            children.reverse();
            children
        })
        .unwrap();
        list.update([("value", json!([{ "first": 0, "second": 1 }, 100, 200]))])
            .unwrap();
        foo.update([("value", 20)]).unwrap();
        cr.verify(());
    })
    .unwrap();

    cr.verify([
        r#"first: {"name":"first","path":"[2].first","value":3} -> {"name":"first","path":"[0].first","value":0}"#,
        r#"list: {"value":[1,2,{"first":3,"second":4}]} -> {"value":[{"first":0,"second":1},100,20]}"#,
    ]);
    assert_eq!(bar.state().to_value(), json!({ "index": 1, "path": "[1]", "value": 100 }));
    assert_eq!(list.index_of(&foo), Some(2));
}

#[test]
fn attach_from_listener_during_batch_end() {
    let mut cr = CallRecorder::new();
    let a = Field::scalar(0);
    let b = Field::scalar(10);
    let list = ListField::new([a.clone()]).unwrap();
    let pushed = Rc::new(Cell::new(false));
    let _s0 = a.subscribe({
        let list = list.clone();
        let b = b.clone();
        move |_| {
            if !pushed.replace(true) {
                list.apply(|mut children| {
                    children.push(b.clone());
                    children
                })
                .unwrap();
            }
        }
    });

    list.batch(|| a.update([("value", 1)]).unwrap()).unwrap();
    assert!(!b.is_batching());
    assert!(!a.is_batching());
    assert_eq!(list.state().value(), Some(&json!([1, 10])));
    assert_eq!(b.state().index(), Some(1));

    let _s1 = record_value(&list, "list");
    let _s2 = record_value(&b, "b");
    b.update([("value", 11)]).unwrap();
    cr.verify(["list: [1,11]", "b: 11"]);
}

#[test]
fn removing_first_child_reindexes_the_rest() {
    let mut cr = CallRecorder::new();
    let a = Field::scalar("a");
    let b = Field::scalar("b");
    let c = Field::scalar("c");
    let list = ListField::new([a.clone(), b.clone(), c.clone()]).unwrap();
    let _s0 = record(&a, "a");
    let _s1 = record(&b, "b");
    let _s2 = record(&c, "c");

    list.apply(|mut children| {
        children.remove(0);
        children
    })
    .unwrap();
    cr.verify([
        r#"a: {"index":0,"path":"[0]","value":"a"} -> {"value":"a"}"#,
        r#"b: {"index":1,"path":"[1]","value":"b"} -> {"index":0,"path":"[0]","value":"b"}"#,
        r#"c: {"index":2,"path":"[2]","value":"c"} -> {"index":1,"path":"[1]","value":"c"}"#,
    ]);
    assert_eq!(list.state().value(), Some(&json!(["b", "c"])));
    assert_eq!(list.get(0), Some(b));
    assert_eq!(list.index_of(&a), None);
}

#[test]
fn attached_field_is_rejected() {
    let Models { foo, list, .. } = models();
    let other = ListField::new([]).unwrap();
    assert_eq!(
        other.apply(|_| vec![foo.clone()]),
        Err(FieldError::AlreadyAttached {
            path: Some("[0]".into())
        })
    );
    assert!(other.is_empty());
    assert_eq!(foo.parent(), Some(list.as_field().clone()));
}

#[test]
fn cyclic_membership_is_rejected() {
    let Models { group, list, .. } = models();
    assert!(matches!(
        list.apply(|mut children| {
            children.push(list.as_field().clone());
            children
        }),
        Err(FieldError::CyclicMembership { .. })
    ));
    assert!(matches!(
        group.add_field("list", list.as_field().clone()),
        Err(FieldError::CyclicMembership { .. })
    ));
    assert_eq!(list.len(), 3);
}

#[test]
fn path_lookup() {
    let Models { bar, group, list, .. } = models();
    assert_eq!(list.try_get_field("[1]"), Some(bar.clone()));
    assert_eq!(list.try_get_field("1"), Some(bar));
    assert_eq!(
        list.try_get_field("[2].second"),
        group.get_field("second").ok()
    );
    assert_eq!(list.try_get_field("[3]"), None);
    assert_eq!(list.try_get_field("first"), None);
}

#[test]
fn nested_paths_follow_parent_path() {
    let mut cr = CallRecorder::new();
    let leaf = Field::scalar(1);
    let inner = ListField::new([leaf.clone()]).unwrap();
    let outer = ListField::new([Field::scalar(0), inner.clone().into()]).unwrap();
    assert_eq!(leaf.state().path(), Some("[1][0]"));
    let _s = leaf.subscribe(|change| call!("{}", change.next_state.path().unwrap_or_default()));

    outer
        .apply(|mut children| {
            children.remove(0);
            children
        })
        .unwrap();
    cr.verify("[0][0]");
}
