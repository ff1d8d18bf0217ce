use std::{collections::HashMap, fs, sync::Arc, time::Duration};

use chrono::Duration as TtlDuration;
use driftkv::{Action, Engine, EngineConfig, Event, Record, Result, Storage};
use proptest::prelude::*;
use tempfile::TempDir;

async fn open(tmp: &TempDir) -> Result<Engine> {
    Engine::open(EngineConfig::new(tmp.path())).await
}

fn read_events(engine: &Engine) -> Vec<Event> {
    fs::read_to_string(engine.wal_path())
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn set_then_get() -> Result<()> {
    let tmp = TempDir::new().unwrap();
    let engine = open(&tmp).await?;

    engine.set(Record::new("key1", "value1")).await?;

    let record = engine.get("key1").await.expect("key1 should be present");
    assert_eq!(record.value, "value1");
    engine.close().await
}

#[tokio::test]
async fn past_expiration_never_lands() -> Result<()> {
    let tmp = TempDir::new().unwrap();
    let engine = open(&tmp).await?;

    engine
        .set(Record::new("key1", "v").expiring_in(TtlDuration::seconds(-5)))
        .await?;

    assert!(engine.get_all().await.is_empty());
    assert!(read_events(&engine).is_empty());
    engine.close().await
}

#[tokio::test]
async fn wildcard_filter_over_values() -> Result<()> {
    let tmp = TempDir::new().unwrap();
    let engine = open(&tmp).await?;

    engine.set(Record::new("key1", "word")).await?;
    engine.set(Record::new("key2", "world")).await?;

    let keys = |records: Vec<Record>| records.into_iter().map(|r| r.key).collect::<Vec<_>>();
    assert_eq!(keys(engine.filter("wo$d").await?), vec!["key1", "key2"]);
    assert_eq!(keys(engine.filter("word").await?), vec!["key1"]);
    engine.close().await
}

#[tokio::test]
async fn sweeper_logs_expiration() -> Result<()> {
    let tmp = TempDir::new().unwrap();
    let config = EngineConfig::new(tmp.path()).with_sweep_interval(Duration::from_millis(100));
    let engine = Engine::open(config).await?;

    engine
        .set(Record::new("key1", "v").expiring_in(TtlDuration::seconds(1)))
        .await?;
    assert!(engine.exists("key1").await);

    tokio::time::sleep(Duration::from_millis(1300)).await;

    assert!(engine.get("key1").await.is_none());
    let last = read_events(&engine).pop().expect("log should not be empty");
    assert_eq!(last.action, Action::Delete);
    assert_eq!(last.record.key, "key1");
    engine.close().await
}

#[tokio::test]
async fn concurrent_disjoint_writes() -> Result<()> {
    let tmp = TempDir::new().unwrap();
    let engine = Arc::new(open(&tmp).await?);

    let handles: Vec<_> = (0..64)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.set(Record::new(format!("key{:02}", i), "v")).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap()?;
    }

    assert_eq!(engine.get_all().await.len(), 64);
    assert_eq!(read_events(&engine).len(), 64);
    engine.close().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_set_and_delete_on_one_key() -> Result<()> {
    let tmp = TempDir::new().unwrap();
    let engine = Arc::new(open(&tmp).await?);

    let mut handles = Vec::new();
    for i in 0..32 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                engine.set(Record::new("shared", format!("v{}", i))).await
            } else {
                engine.delete("shared").await
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap()?;
    }

    // memory must agree with the last logged event for the key
    let expected = match read_events(&engine).pop() {
        Some(Event { action: Action::Set, record }) => Some(record),
        _ => None,
    };
    assert_eq!(engine.get("shared").await, expected);
    engine.close().await
}

#[tokio::test]
async fn usable_through_storage_trait() -> Result<()> {
    async fn roundtrip(storage: &impl Storage) -> Result<Vec<Record>> {
        storage.set(Record::new("a", "alpha")).await?;
        storage.set(Record::new("b", "beta")).await?;
        storage.delete("a").await?;
        Ok(storage.get_all().await)
    }

    let tmp = TempDir::new().unwrap();
    let engine = open(&tmp).await?;

    assert_eq!(roundtrip(&engine).await?, vec![Record::new("b", "beta")]);
    engine.close().await
}

#[derive(Debug, Clone)]
enum Op {
    Set(String, String),
    Delete(String),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        ("[a-d]", "[a-z]{0,8}").prop_map(|(k, v)| Op::Set(k, v)),
        "[a-e]".prop_map(Op::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn reopen_equals_functional_fold(ops in prop::collection::vec(op(), 0..40)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let tmp = TempDir::new().unwrap();

        let mut expected: HashMap<String, Record> = HashMap::new();
        for op in &ops {
            match op {
                Op::Set(k, v) => {
                    expected.insert(k.clone(), Record::new(k.clone(), v.clone()));
                }
                Op::Delete(k) => {
                    expected.remove(k);
                }
            }
        }
        let mut expected: Vec<Record> = expected.into_values().collect();
        expected.sort_by(|a, b| a.key.cmp(&b.key));

        let recovered = runtime.block_on(async {
            let engine = open(&tmp).await?;
            for op in &ops {
                match op {
                    Op::Set(k, v) => engine.set(Record::new(k.clone(), v.clone())).await?,
                    Op::Delete(k) => engine.delete(k).await?,
                }
            }
            engine.close().await?;

            let engine = open(&tmp).await?;
            let all = engine.get_all().await;
            engine.close().await?;
            Result::Ok(all)
        }).unwrap();

        prop_assert_eq!(recovered, expected);
    }
}
