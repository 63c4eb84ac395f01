use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;

use super::*;
use crate::diff::ConfigValue;
use crate::diff::FieldChange;
use crate::diff::ListenerRegistry;
use crate::store::Event;
use crate::Error;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Student {
    #[serde(default)]
    name: String,
    #[serde(default)]
    age: u32,
}

fn student_target() -> TargetFn<Student> {
    Arc::new(|| Student {
        name: String::new(),
        age: 18,
    })
}

fn run_event<T>(
    pipeline: &Pipeline<T>,
    target: &TargetFn<T>,
    result: &mut ResultMap<T>,
    event: Event,
) -> crate::Result<()> {
    let mut ctx = BindContext {
        binding_key: "/root/",
        event: &event,
        target,
        result,
    };
    pipeline.run(&mut ctx)
}

#[test]
fn test_json_handler_decodes_put_over_seed() {
    let pipeline = Pipeline::new().then(json_handler());
    let target = student_target();
    let mut result = ResultMap::new();

    run_event(&pipeline, &target, &mut result, Event::put("/root/a", r#"{"name":"x"}"#, 1)).unwrap();

    let student = result.get("/root/a").unwrap();
    assert_eq!(student.name, "x");
    // Absent field keeps the constructor's value
    assert_eq!(student.age, 18);
}

#[test]
fn test_json_handler_replaces_existing_entry() {
    let pipeline = Pipeline::new().then(json_handler());
    let target = student_target();
    let mut result = ResultMap::new();

    run_event(&pipeline, &target, &mut result, Event::put("/root/a", r#"{"name":"x","age":30}"#, 1)).unwrap();
    run_event(&pipeline, &target, &mut result, Event::put("/root/a", r#"{"name":"y"}"#, 2)).unwrap();

    assert_eq!(result.len(), 1);
    // Each PUT starts from a fresh target, not the previous value
    assert_eq!(
        *result["/root/a"],
        Student {
            name: "y".into(),
            age: 18
        }
    );
}

#[test]
fn test_delete_removes_entry_and_reports_deleted_key() {
    let pipeline = Pipeline::new().then(json_handler());
    let target = student_target();
    let mut result = ResultMap::new();
    run_event(&pipeline, &target, &mut result, Event::put("/root/a", "{}", 1)).unwrap();
    run_event(&pipeline, &target, &mut result, Event::put("/root/b", "{}", 2)).unwrap();

    let outcome = run_event(&pipeline, &target, &mut result, Event::delete("/root/a", 3));

    assert!(matches!(outcome, Err(Error::DeletedKey { ref key }) if key == "/root/a"));
    assert!(!result.contains_key("/root/a"));
    assert!(result.contains_key("/root/b"));
}

#[test]
fn test_decode_failure_leaves_result_unchanged() {
    let pipeline = Pipeline::new().then(json_handler());
    let target = student_target();
    let mut result = ResultMap::new();
    run_event(&pipeline, &target, &mut result, Event::put("/root/a", r#"{"name":"x"}"#, 1)).unwrap();

    let outcome = run_event(&pipeline, &target, &mut result, Event::put("/root/a", "not json", 2));

    assert!(matches!(outcome, Err(Error::Decode { ref key, .. }) if key == "/root/a"));
    assert_eq!(result["/root/a"].name, "x");
}

#[test]
fn test_pipeline_stops_at_first_failure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let pipeline: Pipeline<Student> = Pipeline::new()
        .then(json_handler())
        .then(from_fn(move |_ctx: &mut BindContext<'_, Student>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
    let target = student_target();
    let mut result = ResultMap::new();

    run_event(&pipeline, &target, &mut result, Event::put("/root/a", "{}", 1)).unwrap();
    let _ = run_event(&pipeline, &target, &mut result, Event::put("/root/a", "{", 2));
    let _ = run_event(&pipeline, &target, &mut result, Event::delete("/root/a", 3));

    assert_eq!(pipeline.len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_fn_handler_can_rewrite_result() {
    let pipeline: Pipeline<Student> = Pipeline::new()
        .then(json_handler())
        .then(from_fn(|ctx: &mut BindContext<'_, Student>| {
            let key = ctx.event.key.clone();
            if let Some(current) = ctx.result.get(&key) {
                let mut upper = (**current).clone();
                upper.name = upper.name.to_uppercase();
                ctx.result.insert(key, Arc::new(upper));
            }
            Ok(())
        }));
    let target = student_target();
    let mut result = ResultMap::new();

    run_event(&pipeline, &target, &mut result, Event::put("/root/a", r#"{"name":"ada"}"#, 1)).unwrap();

    assert_eq!(result["/root/a"].name, "ADA");
}

#[test]
fn test_fatal_stage_error_is_propagated() {
    let pipeline: Pipeline<Student> =
        Pipeline::new().then(from_fn(|_ctx: &mut BindContext<'_, Student>| Err(Error::Fatal("boom".into()))));
    let target = student_target();
    let mut result = ResultMap::new();

    let outcome = run_event(&pipeline, &target, &mut result, Event::put("/root/a", "{}", 1));

    assert!(outcome.unwrap_err().is_fatal());
}

#[test]
fn test_text_handler_stores_utf8() {
    let pipeline = Pipeline::new().then(text_handler());
    let target: TargetFn<String> = Arc::new(String::new);
    let mut result = ResultMap::new();

    run_event(&pipeline, &target, &mut result, Event::put("/root/motd", "hello", 1)).unwrap();
    assert_eq!(result["/root/motd"].as_str(), "hello");

    let invalid = Event::put("/root/motd", vec![0xff, 0xfe], 2);
    assert!(matches!(
        run_event(&pipeline, &target, &mut result, invalid),
        Err(Error::Decode { .. })
    ));
    assert_eq!(result["/root/motd"].as_str(), "hello");
}

fn recording_registry(path: &str) -> (Arc<ListenerRegistry>, Arc<Mutex<Vec<FieldChange>>>) {
    let registry = Arc::new(ListenerRegistry::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    registry
        .register(path, move |change: &FieldChange| sink.lock().push(change.clone()))
        .unwrap();
    (registry, seen)
}

#[test]
fn test_field_diff_reports_changed_fields() {
    let (registry, seen) = recording_registry("name");
    let pipeline = Pipeline::new().then(FieldDiff::new(json_handler(), registry));
    let target = student_target();
    let mut result = ResultMap::new();

    run_event(&pipeline, &target, &mut result, Event::put("/root/a", r#"{"name":"x"}"#, 1)).unwrap();
    run_event(&pipeline, &target, &mut result, Event::put("/root/a", r#"{"name":"x"}"#, 2)).unwrap();
    run_event(&pipeline, &target, &mut result, Event::put("/root/a", r#"{"name":"y"}"#, 3)).unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].old, ConfigValue::Null);
    assert_eq!(seen[0].new, ConfigValue::from("x"));
    assert_eq!(seen[1].old, ConfigValue::from("x"));
    assert_eq!(seen[1].new, ConfigValue::from("y"));
}

#[test]
fn test_field_diff_reports_deletion_towards_null() {
    let (registry, seen) = recording_registry("age");
    let pipeline = Pipeline::new().then(FieldDiff::new(json_handler(), registry));
    let target = student_target();
    let mut result = ResultMap::new();
    run_event(&pipeline, &target, &mut result, Event::put("/root/a", "{}", 1)).unwrap();

    let outcome = run_event(&pipeline, &target, &mut result, Event::delete("/root/a", 2));

    assert!(matches!(outcome, Err(Error::DeletedKey { .. })));
    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].old, ConfigValue::from(18i64));
    assert_eq!(seen[1].new, ConfigValue::Null);
}

#[test]
fn test_field_diff_skips_failed_decodes() {
    let (registry, seen) = recording_registry("name");
    let pipeline = Pipeline::new().then(FieldDiff::new(json_handler(), registry));
    let target = student_target();
    let mut result = ResultMap::new();
    run_event(&pipeline, &target, &mut result, Event::put("/root/a", r#"{"name":"x"}"#, 1)).unwrap();

    let _ = run_event(&pipeline, &target, &mut result, Event::put("/root/a", "garbage", 2));

    assert_eq!(seen.lock().len(), 1);
}
