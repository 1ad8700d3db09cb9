//! End-to-end behaviour of the document store over an in-memory engine.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use dstore_core::document::data;
use dstore_core::{
    Context, DocumentsOptions, EncryptionKey, SetOptions, Store, StoreConfig, StoreError,
    StoreOptions, TestClock, Values,
};
use dstore_storage::{Entry, MemoryBackend, StorageBackend, StorageError};
use serde_json::json;

fn values(value: serde_json::Value) -> Values {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

/// Route store events to the test harness; `RUST_LOG=debug` shows them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn new_store() -> Store {
    init_tracing();
    Store::new(StoreOptions::default().with_clock(Arc::new(TestClock::new())))
}

async fn open_over(backend: &MemoryBackend, key: &EncryptionKey) -> Store {
    let store = new_store();
    store
        .open_with_backend(&Context::background(), Arc::new(backend.clone()), key.clone())
        .await
        .unwrap();
    store
}

async fn open_store() -> (Store, MemoryBackend) {
    let backend = MemoryBackend::new();
    let store = open_over(&backend, &EncryptionKey::generate()).await;
    (store, backend)
}

/// Memory engine whose deletes of one key always fail.
struct FailingDelete {
    inner: MemoryBackend,
    key: String,
}

#[async_trait::async_trait]
impl StorageBackend for FailingDelete {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        if key == self.key {
            return Err(StorageError::Delete {
                key: key.to_owned(),
                reason: "disk detached".to_owned(),
            });
        }
        self.inner.delete(key).await
    }

    async fn scan(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Entry>, StorageError> {
        self.inner.scan(prefix, after, limit).await
    }

    async fn last(&self, prefix: &str) -> Result<Option<Entry>, StorageError> {
        self.inner.last(prefix).await
    }
}

#[tokio::test]
async fn end_to_end_scenario() {
    let (store, _) = open_store().await;
    let ctx = Context::background();

    store.create(&ctx, "/test0/key10", data("value10")).await.unwrap();
    store.create(&ctx, "/test0/key20", data("value20")).await.unwrap();
    store
        .set(&ctx, "/test0/key10", data("overwrite"), SetOptions::default())
        .await
        .unwrap();

    let docs = store
        .documents(&ctx, "test0", DocumentsOptions::default())
        .await
        .unwrap();
    let listed: Vec<_> = docs
        .iter()
        .map(|d| (d.path.as_str(), d.data().unwrap().as_str().unwrap()))
        .collect();
    assert_eq!(
        listed,
        [("/test0/key10", "overwrite"), ("/test0/key20", "value20")]
    );

    assert!(store.delete(&ctx, "/test0/key10").await.unwrap());
    assert!(store.get(&ctx, "/test0/key10").await.unwrap().is_none());
    assert!(!store.delete(&ctx, "/test0/key10").await.unwrap());
}

#[tokio::test]
async fn set_keeps_created_at() {
    let (store, _) = open_store().await;
    let ctx = Context::background();

    store
        .set(&ctx, "/p/doc", data(1), SetOptions::default())
        .await
        .unwrap();
    let first = store.get(&ctx, "/p/doc").await.unwrap().unwrap();

    for i in 2..5 {
        store
            .set(&ctx, "/p/doc", data(i), SetOptions::default())
            .await
            .unwrap();
    }
    let last = store.get(&ctx, "/p/doc").await.unwrap().unwrap();

    assert_eq!(last.data(), Some(&json!(4)));
    assert_eq!(last.created_at, first.created_at);
    assert!(last.updated_at > first.updated_at);
    assert!(last.created_at <= last.updated_at);
}

#[tokio::test]
async fn create_refuses_existing_path() {
    let (store, _) = open_store().await;
    let ctx = Context::background();

    store.create(&ctx, "/p/doc", data("v")).await.unwrap();
    let err = store.create(&ctx, "p/doc/", data("v2")).await.unwrap_err();
    assert!(matches!(err, StoreError::PathExists { ref path } if path == "/p/doc"));

    store
        .set(&ctx, "/p/doc", data("v2"), SetOptions::default())
        .await
        .unwrap();
    let doc = store.get(&ctx, "/p/doc").await.unwrap().unwrap();
    assert_eq!(doc.data(), Some(&json!("v2")));
}

#[tokio::test]
async fn concurrent_creates_admit_one_writer() {
    let (store, _) = open_store().await;

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .create(&Context::background(), "/race/doc", data(i))
                    .await
            })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => created += 1,
            Err(StoreError::PathExists { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(created, 1);
}

#[tokio::test]
async fn merge_versus_replace() {
    let (store, _) = open_store().await;
    let ctx = Context::background();

    store
        .create(&ctx, "/m/merge", values(json!({"a": 1, "b": 2})))
        .await
        .unwrap();
    store
        .create(&ctx, "/m/replace", values(json!({"a": 1, "b": 2})))
        .await
        .unwrap();

    store
        .set(&ctx, "/m/merge", values(json!({"b": 3, "c": 4})), SetOptions::merge_all())
        .await
        .unwrap();
    store
        .set(&ctx, "/m/replace", values(json!({"b": 3, "c": 4})), SetOptions::replace())
        .await
        .unwrap();

    let merged = store.get(&ctx, "/m/merge").await.unwrap().unwrap();
    assert_eq!(merged.values, values(json!({"a": 1, "b": 3, "c": 4})));
    let replaced = store.get(&ctx, "/m/replace").await.unwrap().unwrap();
    assert_eq!(replaced.values, values(json!({"b": 3, "c": 4})));
}

#[tokio::test]
async fn listing_is_lexicographic() {
    let (store, _) = open_store().await;
    let ctx = Context::background();

    for path in ["/t/3", "/t/1", "/t/2"] {
        store.create(&ctx, path, data(path)).await.unwrap();
    }
    store.create(&ctx, "/tt/1", data("other")).await.unwrap();

    let docs = store
        .documents(&ctx, "t", DocumentsOptions::default())
        .await
        .unwrap();
    let paths: Vec<_> = docs.iter().map(|d| d.path.as_str()).collect();
    assert_eq!(paths, ["/t/1", "/t/2", "/t/3"]);
}

#[tokio::test]
async fn prefix_isolates_listing() {
    let (store, _) = open_store().await;
    let ctx = Context::background();

    for path in ["/b/eb1", "/b/eb2", "/b/ea1"] {
        store.create(&ctx, path, data(path)).await.unwrap();
    }

    let docs = store
        .documents(&ctx, "b", DocumentsOptions::default().prefix("eb"))
        .await
        .unwrap();
    let paths: Vec<_> = docs.iter().map(|d| d.path.as_str()).collect();
    assert_eq!(paths, ["/b/eb1", "/b/eb2"]);
    assert_eq!(store.count(&ctx, "b", "eb").await.unwrap(), 2);
    assert_eq!(store.count(&ctx, "b", "").await.unwrap(), 3);
}

#[tokio::test]
async fn root_listing_uses_prefix_verbatim() {
    let (store, _) = open_store().await;
    let ctx = Context::background();

    store.create(&ctx, "/keys/a", data(1)).await.unwrap();
    store.create(&ctx, "/keyring/b", data(2)).await.unwrap();
    store.create(&ctx, "/other/c", data(3)).await.unwrap();

    let docs = store
        .documents(&ctx, "/", DocumentsOptions::default().prefix("key"))
        .await
        .unwrap();
    let paths: Vec<_> = docs.iter().map(|d| d.path.as_str()).collect();
    assert_eq!(paths, ["/keyring/b", "/keys/a"]);
}

#[tokio::test]
async fn increments_survive_restart() {
    let backend = MemoryBackend::new();
    let key = EncryptionKey::generate();
    let ctx = Context::background();

    let store = open_over(&backend, &key).await;
    let mut issued = Vec::new();
    for _ in 0..1005 {
        issued.push(store.increment(&ctx, "/seq/orders").await.unwrap());
    }
    assert_eq!(issued[0], "000000000000001");
    assert!(issued.iter().all(|id| id.len() == 15));
    assert!(issued.windows(2).all(|w| w[0] < w[1]));
    store.close().await.unwrap();

    let store = open_over(&backend, &key).await;
    let next = store.increment(&ctx, "/seq/orders").await.unwrap();
    assert!(issued.iter().all(|id| *id < next));
    assert_eq!(next, "000000000002001");
}

#[tokio::test]
async fn increment_counters_are_independent() {
    let (store, _) = open_store().await;
    let ctx = Context::background();

    assert_eq!(store.increment(&ctx, "/seq/a").await.unwrap(), "000000000000001");
    assert_eq!(store.increment(&ctx, "/seq/a").await.unwrap(), "000000000000002");
    assert_eq!(store.increment(&ctx, "/seq/b").await.unwrap(), "000000000000001");
}

#[tokio::test]
async fn root_is_rejected() {
    let (store, _) = open_store().await;
    let ctx = Context::background();

    let err = store.create(&ctx, "/", data("v")).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidPath { .. }));
    let err = store
        .set(&ctx, "", data("v"), SetOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidPath { .. }));
    let err = store.delete(&ctx, "/").await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidPath { .. }));
    let err = store.increment(&ctx, "/").await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidPath { .. }));

    let err = store.collections(&ctx, "/x").await.unwrap_err();
    assert!(matches!(err, StoreError::NestedCollections { .. }));
}

#[tokio::test]
async fn tampered_ciphertext_fails_decryption() {
    let (store, backend) = open_store().await;
    let ctx = Context::background();

    store.create(&ctx, "/t/doc", data("secret")).await.unwrap();
    assert!(backend.corrupt("/t/doc", |v| v[12] ^= 0x01).await);

    let err = store.get(&ctx, "/t/doc").await.unwrap_err();
    assert!(matches!(err, StoreError::Decryption { ref path, .. } if path == "/t/doc"));
    assert!(!err.to_string().contains("secret"));
}

#[tokio::test]
async fn tampered_entry_aborts_iteration_without_skipping() {
    let (store, backend) = open_store().await;
    let ctx = Context::background();

    for path in ["/t/1", "/t/2", "/t/3"] {
        store.create(&ctx, path, data(path)).await.unwrap();
    }
    assert!(backend.corrupt("/t/2", |v| v[12] ^= 0x01).await);

    let mut iter = store
        .document_iterator(&ctx, "t", DocumentsOptions::default())
        .await
        .unwrap();
    assert_eq!(iter.next(&ctx).await.unwrap().unwrap().path, "/t/1");
    assert!(matches!(
        iter.next(&ctx).await,
        Err(StoreError::Decryption { .. })
    ));
    // The failing entry is retried, not silently passed over.
    assert!(matches!(
        iter.next(&ctx).await,
        Err(StoreError::Decryption { .. })
    ));
    iter.release();

    let err = store
        .documents(&ctx, "t", DocumentsOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Decryption { .. }));
}

#[tokio::test]
async fn moved_record_is_a_path_mismatch() {
    let (store, backend) = open_store().await;
    let ctx = Context::background();

    store.create(&ctx, "/a/1", data("one")).await.unwrap();
    let sealed = backend.get("/a/1").await.unwrap().unwrap();
    backend.put("/a/2", &sealed).await.unwrap();

    let err = store.get(&ctx, "/a/2").await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::PathMismatch { ref expected, ref actual }
            if expected == "/a/2" && actual == "/a/1"
    ));
}

#[tokio::test]
async fn wrong_key_cannot_read() {
    let backend = MemoryBackend::new();
    let ctx = Context::background();

    let store = open_over(&backend, &EncryptionKey::generate()).await;
    store.create(&ctx, "/a/1", data("one")).await.unwrap();
    store.close().await.unwrap();

    let store = open_over(&backend, &EncryptionKey::generate()).await;
    assert!(store.exists(&ctx, "/a/1").await.unwrap());
    let err = store.get(&ctx, "/a/1").await.unwrap_err();
    assert!(matches!(err, StoreError::Decryption { .. }));
}

#[tokio::test]
async fn get_all_skips_missing() {
    let (store, _) = open_store().await;
    let ctx = Context::background();

    store.create(&ctx, "/g/1", data(1)).await.unwrap();
    store.create(&ctx, "/g/3", data(3)).await.unwrap();

    let docs = store
        .get_all(&ctx, ["/g/3", "/g/2", "/g/1"])
        .await
        .unwrap();
    let paths: Vec<_> = docs.iter().map(|d| d.path.as_str()).collect();
    assert_eq!(paths, ["/g/3", "/g/1"]);
}

#[tokio::test]
async fn delete_all_stops_at_first_failure() {
    let (store, _) = open_store().await;
    let ctx = Context::background();

    for path in ["/d/1", "/d/2", "/d/3"] {
        store.create(&ctx, path, data(path)).await.unwrap();
    }
    store.delete_all(&ctx, ["/d/1", "/d/404"]).await.unwrap();
    assert!(!store.exists(&ctx, "/d/1").await.unwrap());

    let err = store.delete_all(&ctx, ["/d/2", "/", "/d/3"]).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidPath { .. }));
    assert!(!store.exists(&ctx, "/d/2").await.unwrap());
    assert!(store.exists(&ctx, "/d/3").await.unwrap());
}

#[tokio::test]
async fn delete_all_aborts_on_engine_failure() {
    init_tracing();
    let ctx = Context::background();
    let store = Store::new(StoreOptions::default().with_clock(Arc::new(TestClock::new())));
    let engine = FailingDelete {
        inner: MemoryBackend::new(),
        key: "/d/2".to_owned(),
    };
    store
        .open_with_backend(&ctx, Arc::new(engine), EncryptionKey::generate())
        .await
        .unwrap();

    for path in ["/d/1", "/d/2", "/d/3"] {
        store.create(&ctx, path, data(path)).await.unwrap();
    }
    let err = store
        .delete_all(&ctx, ["/d/1", "/d/2", "/d/3"])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::Storage(StorageError::Delete { ref key, .. }) if key == "/d/2"
    ));
    assert!(!store.exists(&ctx, "/d/1").await.unwrap());
    assert!(store.exists(&ctx, "/d/2").await.unwrap());
    assert!(store.exists(&ctx, "/d/3").await.unwrap());
}

#[tokio::test]
async fn last_returns_greatest_match() {
    let (store, _) = open_store().await;
    let ctx = Context::background();

    for path in ["/log/001", "/log/003", "/log/002", "/logs/999"] {
        store.create(&ctx, path, data(path)).await.unwrap();
    }
    let last = store.last(&ctx, "/log/").await.unwrap().unwrap();
    assert_eq!(last.path, "/log/003");
    assert_eq!(last.data(), Some(&json!("/log/003")));
    assert!(store.last(&ctx, "/nothing/").await.unwrap().is_none());
}

#[tokio::test]
async fn collections_with_zero_page_size_terminates() {
    init_tracing();
    let ctx = Context::background();
    let config = StoreConfig {
        page_size: 0,
        ..StoreConfig::default()
    };
    let store = Store::new(
        StoreOptions::default()
            .with_clock(Arc::new(TestClock::new()))
            .with_config(config),
    );
    store
        .open_with_backend(&ctx, Arc::new(MemoryBackend::new()), EncryptionKey::generate())
        .await
        .unwrap();
    store.create(&ctx, "/a/1", data("one")).await.unwrap();
    store.create(&ctx, "/b/1", data("two")).await.unwrap();

    let collections = tokio::time::timeout(Duration::from_secs(3), store.collections(&ctx, "/"))
        .await
        .expect("listing collections hung")
        .unwrap();
    let names: Vec<_> = collections.into_iter().map(|c| c.path).collect();
    assert_eq!(names, ["/a", "/b"]);

    let docs = store
        .documents(&ctx, "a", DocumentsOptions::default())
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
}

#[tokio::test]
async fn collections_in_first_seen_order() {
    let (store, _) = open_store().await;
    let ctx = Context::background();

    for path in ["/zeta/1", "/alpha/1", "/alpha/2", "/mid/x/y"] {
        store.create(&ctx, path, data(path)).await.unwrap();
    }
    let names: Vec<_> = store
        .collections(&ctx, "/")
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.path)
        .collect();
    assert_eq!(names, ["/alpha", "/mid", "/zeta"]);

    store.delete_all(&ctx, ["/alpha/1", "/alpha/2"]).await.unwrap();
    let names: Vec<_> = store
        .collections(&ctx, "")
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name().to_owned())
        .collect();
    assert_eq!(names, ["mid", "zeta"]);
}

#[tokio::test]
async fn lifecycle_errors() {
    let store = new_store();
    let ctx = Context::background();

    assert!(!store.is_open().await);
    assert!(matches!(
        store.get(&ctx, "/a/1").await,
        Err(StoreError::NotOpen)
    ));
    assert!(matches!(store.close().await, Err(StoreError::NotOpen)));

    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    store
        .open_with_backend(&ctx, Arc::clone(&backend), EncryptionKey::generate())
        .await
        .unwrap();
    assert!(store.is_open().await);
    let err = store
        .open_with_backend(&ctx, backend, EncryptionKey::generate())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyOpen));

    store.close().await.unwrap();
    assert!(matches!(
        store.create(&ctx, "/a/1", data(1)).await,
        Err(StoreError::NotOpen)
    ));
}

#[tokio::test]
async fn cancelled_context_stops_operations() {
    let (store, _) = open_store().await;
    let (ctx, canceller) = Context::cancellable();

    store.create(&ctx, "/c/1", data(1)).await.unwrap();
    canceller.cancel();
    assert!(matches!(
        store.get(&ctx, "/c/1").await,
        Err(StoreError::Cancelled)
    ));
    assert!(matches!(
        store.create(&ctx, "/c/2", data(2)).await,
        Err(StoreError::Cancelled)
    ));
    assert!(
        !store
            .exists(&Context::background(), "/c/2")
            .await
            .unwrap()
    );
}

#[cfg(feature = "rocksdb-backend")]
#[tokio::test]
async fn rocksdb_store_reopens_from_disk() {
    use dstore_core::BackendKind;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let path = path.to_str().unwrap();
    let key = EncryptionKey::generate();
    let ctx = Context::background();
    let config = StoreConfig {
        backend: BackendKind::RocksDb,
        ..StoreConfig::default()
    };

    let store = Store::new(StoreOptions::default().with_config(config));
    store.open_at_path(&ctx, path, key.clone()).await.unwrap();
    store.create(&ctx, "/disk/doc", data("persisted")).await.unwrap();
    let id = store.increment(&ctx, "/disk/seq").await.unwrap();
    store.close().await.unwrap();

    store.open_at_path(&ctx, path, key).await.unwrap();
    let doc = store.get(&ctx, "/disk/doc").await.unwrap().unwrap();
    assert_eq!(doc.data(), Some(&json!("persisted")));
    assert!(store.increment(&ctx, "/disk/seq").await.unwrap() > id);
}
