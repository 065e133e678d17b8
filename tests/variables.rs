//! Variable registry (§4.5.3): lazy child expansion and per-frame teardown.

use ansibug::debuggee::variables::VariableRegistry;
use serde_json::json;

#[test]
fn children_are_recomputed_each_call_not_cached() {
    let registry = VariableRegistry::new();
    let counter = std::sync::Arc::new(std::sync::atomic::AtomicI64::new(0));
    let counter_clone = counter.clone();

    let reference = registry.register(
        1,
        Box::new(move || {
            let n = counter_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            vec![ansibug::debuggee::variables::Child {
                name: "calls".to_string(),
                value: json!(n),
                type_name: "int".to_string(),
            }]
        }),
        None,
    );

    let first = registry.children(reference).unwrap();
    let second = registry.children(reference).unwrap();
    assert_eq!(first[0].value, json!(0));
    assert_eq!(second[0].value, json!(1));
}

#[test]
fn unknown_reference_is_an_error() {
    let registry = VariableRegistry::new();
    assert!(registry.children(999).is_err());
}

#[test]
fn setter_mutates_and_missing_setter_errors() {
    let registry = VariableRegistry::new();
    let store = std::sync::Arc::new(std::sync::Mutex::new(json!(null)));
    let store_clone = store.clone();

    let with_setter = registry.register(
        1,
        Box::new(|| Vec::new()),
        Some(Box::new(move |_name, value| {
            *store_clone.lock().unwrap() = value;
            Ok(())
        })),
    );
    registry.set(with_setter, "x", json!(42)).unwrap();
    assert_eq!(*store.lock().unwrap(), json!(42));

    let without_setter = registry.register(1, Box::new(|| Vec::new()), None);
    assert!(registry.set(without_setter, "x", json!(1)).is_err());
}

#[test]
fn clear_frame_drops_its_variables() {
    let registry = VariableRegistry::new();
    let reference = registry.register(7, Box::new(|| Vec::new()), None);
    registry.clear_frame(7);
    assert!(registry.children(reference).is_err());
}

#[test]
fn meta_commands_are_parsed() {
    use ansibug::debuggee::variables::{parse_meta_command, MetaCommand};

    assert_eq!(
        parse_meta_command("!so ansible_become_user root").unwrap(),
        Some(MetaCommand::SetOption {
            name: "ansible_become_user".to_string(),
            expr: "root".to_string(),
        })
    );
    assert_eq!(
        parse_meta_command("!t 1 + 1").unwrap(),
        Some(MetaCommand::Template {
            expr: "1 + 1".to_string(),
        })
    );
    assert_eq!(parse_meta_command("regular_expr").unwrap(), None);
    assert!(parse_meta_command("!unknown_verb foo").is_err());
}
