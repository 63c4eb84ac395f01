mod common;

use bindwatch::json_handler;
use bindwatch::BindState;
use bindwatch::Error;
use bindwatch::Pipeline;
use bindwatch::QueryOptions;
use bindwatch::MemoryStore;
use common::connect;
use common::wait_until;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Student {
    #[serde(default)]
    name: String,
    #[serde(default)]
    age: u32,
}

#[tokio::test]
async fn prefix_binding_follows_snapshot_put_and_delete() {
    let store = MemoryStore::default();
    store.put("/root/a", r#"{"name":"x"}"#);
    let client = connect(&store, "etcd://127.0.0.1:2379/root").await;

    let students = client
        .bind_multi(Student::default, "/root/", QueryOptions::prefix(), Pipeline::new().then(json_handler()))
        .unwrap();
    assert_eq!(students.handle().wait_watching().await, BindState::Watching);
    assert_eq!(students.keys(), vec!["/root/a"]);
    assert_eq!(students.get("/root/a").unwrap().name, "x");

    store.put("/root/b", r#"{"name":"y","age":20}"#);
    wait_until("/root/b to appear", || students.contains_key("/root/b")).await;
    assert_eq!(students.keys(), vec!["/root/a", "/root/b"]);

    store.delete("/root/a");
    wait_until("/root/a to disappear", || !students.contains_key("/root/a")).await;
    assert_eq!(students.keys(), vec!["/root/b"]);
    assert_eq!(
        *students.get("/root/b").unwrap(),
        Student {
            name: "y".into(),
            age: 20
        }
    );

    client.shutdown().await;
    assert_eq!(students.handle().state(), BindState::Closed);
}

#[tokio::test]
async fn repeated_puts_keep_one_entry_with_latest_value() {
    let store = MemoryStore::default();
    let client = connect(&store, "etcd://127.0.0.1:2379/pub/pjoc/").await;
    let students = client
        .bind_multi(Student::default, "go_test/", QueryOptions::prefix(), Pipeline::new().then(json_handler()))
        .unwrap();
    students.handle().wait_watching().await;

    for age in 1..=5u32 {
        store.put("/pub/pjoc/go_test/ada", format!(r#"{{"name":"ada","age":{age}}}"#));
    }

    wait_until("latest age", || {
        students.get("/pub/pjoc/go_test/ada").map(|s| s.age == 5).unwrap_or(false)
    })
    .await;
    assert_eq!(students.len(), 1);
}

#[tokio::test]
async fn single_target_binding_reflects_latest_value() {
    let store = MemoryStore::default();
    store.put("/com/test/demo/student", r#"{"name":"before"}"#);
    let client = connect(&store, "etcd://127.0.0.1:2379/com/test/demo/").await;

    let student = client
        .bind(Student::default, "student", QueryOptions::exact(), Pipeline::new().then(json_handler()))
        .unwrap();
    student.wait_watching().await;
    assert_eq!(student.current().unwrap().name, "before");

    store.put("/com/test/demo/student", r#"{"name":"after"}"#);
    wait_until("updated name", || student.current().map(|s| s.name == "after").unwrap_or(false)).await;

    store.delete("/com/test/demo/student");
    wait_until("deleted value", || student.current().is_none()).await;
    assert_eq!(student.state(), BindState::Watching);
}

#[tokio::test]
async fn bindings_are_independent() {
    let store = MemoryStore::default();
    let client = connect(&store, "etcd://127.0.0.1:2379/").await;
    let first = client
        .bind(Student::default, "a", QueryOptions::exact(), Pipeline::new().then(json_handler()))
        .unwrap();
    let second = client
        .bind(Student::default, "b", QueryOptions::exact(), Pipeline::new().then(json_handler()))
        .unwrap();
    first.wait_watching().await;
    second.wait_watching().await;

    client.close(first.id()).await.unwrap();
    store.put("/b", r#"{"name":"still watching"}"#);

    wait_until("second binding update", || second.current().is_some()).await;
    assert_eq!(first.state(), BindState::Closed);
    assert!(first.current().is_none());
}

#[tokio::test]
async fn connection_loss_terminates_and_rebinding_resumes() {
    let store = MemoryStore::default();
    store.put("/cfg", r#"{"name":"v1"}"#);
    let client = connect(&store, "etcd://127.0.0.1:2379/").await;
    let handle = client
        .bind(Student::default, "cfg", QueryOptions::exact(), Pipeline::new().then(json_handler()))
        .unwrap();
    handle.wait_watching().await;

    store.disconnect();
    let state = handle.wait_stopped().await;
    assert!(matches!(state, BindState::Terminated(Error::Connection(_))));
    client.close(handle.id()).await.unwrap();

    store.reconnect();
    store.put("/cfg", r#"{"name":"v2"}"#);
    let resumed = client
        .bind(Student::default, "cfg", QueryOptions::exact(), Pipeline::new().then(json_handler()))
        .unwrap();
    resumed.wait_watching().await;
    assert_eq!(resumed.current().unwrap().name, "v2");
    // The terminated binding kept its last value
    assert_eq!(handle.current().unwrap().name, "v1");
}
