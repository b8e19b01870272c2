//! Property tests for conflict detection and resolution
//!
//! For any pair of records:
//! - whether they conflict does not depend on which side is local
//! - the reported fields do not depend on key insertion order
//! - `Remote` and `Local` return their side unchanged
//! - `Merge` keeps every remote field and adds local-only ones

use mixtape_core::SystemClock;
use mixtape_sync::{deep_equal, detect, ConflictResolver, Strategy as Resolve};
use proptest::prelude::*;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        (0u64..4).prop_map(|n| Value::from(u64::MAX - n)),
        "[a-c]{0,3}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-c]", inner, 0..3)
                .prop_map(|fields| Value::Object(fields.into_iter().collect())),
        ]
    })
}

/// Fields over a small key set so both sides overlap often
fn arb_fields() -> impl Strategy<Value = BTreeMap<String, Value>> {
    prop::collection::btree_map("[a-e]", arb_value(), 0..5)
}

fn object<'a>(fields: impl Iterator<Item = (&'a String, &'a Value)>) -> Value {
    let mut map = Map::new();
    for (key, value) in fields {
        map.insert(key.clone(), value.clone());
    }
    Value::Object(map)
}

/// Two records where some local fields are copied verbatim into remote
fn arb_pair() -> impl Strategy<Value = (BTreeMap<String, Value>, BTreeMap<String, Value>)> {
    (arb_fields(), arb_fields(), prop::collection::vec(any::<bool>(), 5)).prop_map(
        |(local, mut remote, copy)| {
            for ((key, value), copy) in local.iter().zip(copy) {
                if copy {
                    remote.insert(key.clone(), value.clone());
                }
            }
            (local, remote)
        },
    )
}

proptest! {
    #[test]
    fn conflict_is_symmetric((local, remote) in arb_pair()) {
        let local = object(local.iter());
        let remote = object(remote.iter());

        let forward = detect(&local, &remote);
        let backward = detect(&remote, &local);

        prop_assert_eq!(forward.has_conflict, backward.has_conflict);
        prop_assert_eq!(&forward.conflicting_fields, &backward.conflicting_fields);
        prop_assert_eq!(&forward.local_only, &backward.remote_only);
        prop_assert_eq!(&forward.remote_only, &backward.local_only);
    }

    #[test]
    fn fields_do_not_depend_on_insertion_order((local, remote) in arb_pair()) {
        let report = detect(&object(local.iter()), &object(remote.iter()));
        let reversed = detect(&object(local.iter().rev()), &object(remote.iter().rev()));

        prop_assert_eq!(report, reversed);
    }

    #[test]
    fn a_record_never_conflicts_with_itself(fields in arb_fields()) {
        let record = object(fields.iter());
        let report = detect(&record, &record.clone());

        prop_assert!(!report.has_conflict);
        prop_assert!(report.conflicting_fields.is_empty());
    }

    #[test]
    fn one_sided_strategies_return_that_side((local, remote) in arb_pair()) {
        let resolver = ConflictResolver::new(Arc::new(SystemClock));
        let local = object(local.iter());
        let remote = object(remote.iter());

        let from_remote = resolver.resolve("record", &local, &remote, Resolve::Remote);
        let from_local = resolver.resolve("record", &local, &remote, Resolve::Local);

        prop_assert!(from_remote.value().is_some_and(|v| deep_equal(v, &remote)));
        prop_assert!(from_local.value().is_some_and(|v| deep_equal(v, &local)));
    }

    #[test]
    fn merge_keeps_remote_and_adds_local_only((local, remote) in arb_pair()) {
        let resolver = ConflictResolver::new(Arc::new(SystemClock));
        let report = detect(&object(local.iter()), &object(remote.iter()));
        let resolution = resolver.resolve(
            "record",
            &object(local.iter()),
            &object(remote.iter()),
            Resolve::Merge,
        );

        let Some(Value::Object(merged)) = resolution.value() else {
            return Err(TestCaseError::fail("merge of two objects must be an object"));
        };
        for (key, value) in &remote {
            prop_assert!(merged.get(key).is_some_and(|m| deep_equal(m, value)));
        }
        for key in &report.local_only {
            prop_assert!(merged.get(key).is_some_and(|m| deep_equal(m, &local[key])));
        }
        prop_assert_eq!(merged.len(), remote.len() + report.local_only.len());
    }
}
