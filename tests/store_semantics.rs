//! Store concurrency and persistence behavior.

use control_plane::config::schema::ConfigKey;
use control_plane::error::Error;
use control_plane::store::persist::FilePersistence;
use control_plane::store::ConfigStore;

mod common;

#[tokio::test]
async fn commit_bumps_version_and_becomes_visible() {
    let store = common::new_store();
    let doc = store.get(ConfigKey::Socks5).unwrap();
    assert_eq!(doc.version, 1);

    let version = store
        .commit(
            ConfigKey::Socks5,
            common::socks5_payload("127.0.0.1:1080"),
            doc.version,
        )
        .await
        .unwrap();
    assert_eq!(version, 2);

    let doc = store.get(ConfigKey::Socks5).unwrap();
    assert_eq!(doc.version, 2);
    assert_eq!(doc.payload, common::socks5_payload("127.0.0.1:1080"));
}

#[tokio::test]
async fn stale_commit_is_rejected_without_side_effects() {
    let store = common::new_store();
    store
        .commit(
            ConfigKey::Socks5,
            common::socks5_payload("127.0.0.1:1080"),
            1,
        )
        .await
        .unwrap();

    // A writer still holding version 1 must lose.
    let err = store
        .commit(
            ConfigKey::Socks5,
            common::socks5_payload("127.0.0.1:9999"),
            1,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::VersionConflict {
            key: ConfigKey::Socks5,
            expected: 1,
            actual: 2,
        }
    ));

    let doc = store.get(ConfigKey::Socks5).unwrap();
    assert_eq!(doc.version, 2);
    assert_eq!(doc.payload, common::socks5_payload("127.0.0.1:1080"));
}

#[tokio::test]
async fn batch_commit_is_all_or_nothing() {
    let store = common::new_store();
    store
        .commit(
            ConfigKey::Hysteria2Node1,
            common::hysteria2_payload("0.0.0.0:443"),
            1,
        )
        .await
        .unwrap();

    // Node1 entry is stale; the socks5 entry must not land either.
    let err = store
        .batch_commit(&[
            (
                ConfigKey::Hysteria2Node1,
                common::hysteria2_payload("0.0.0.0:8443"),
                1,
            ),
            (
                ConfigKey::Socks5,
                common::socks5_payload("127.0.0.1:1080"),
                1,
            ),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::VersionConflict { .. }));

    assert_eq!(store.get(ConfigKey::Hysteria2Node1).unwrap().version, 2);
    assert_eq!(store.get(ConfigKey::Socks5).unwrap().version, 1);

    // With fresh versions the same batch commits atomically.
    let versions = store
        .batch_commit(&[
            (
                ConfigKey::Hysteria2Node1,
                common::hysteria2_payload("0.0.0.0:8443"),
                2,
            ),
            (
                ConfigKey::Socks5,
                common::socks5_payload("127.0.0.1:1080"),
                1,
            ),
        ])
        .await
        .unwrap();
    assert_eq!(versions, vec![3, 2]);
}

#[tokio::test]
async fn batch_rejects_duplicate_keys() {
    let store = common::new_store();
    let err = store
        .batch_commit(&[
            (
                ConfigKey::Socks5,
                common::socks5_payload("127.0.0.1:1080"),
                1,
            ),
            (
                ConfigKey::Socks5,
                common::socks5_payload("127.0.0.1:1081"),
                1,
            ),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
    assert_eq!(store.get(ConfigKey::Socks5).unwrap().version, 1);
}

#[tokio::test]
async fn subscribers_see_one_notice_per_committed_document() {
    let store = common::new_store();
    let mut changes = store.subscribe();

    store
        .batch_commit(&[
            (
                ConfigKey::Hysteria2Node1,
                common::hysteria2_payload("0.0.0.0:443"),
                1,
            ),
            (
                ConfigKey::Socks5,
                common::socks5_payload("127.0.0.1:1080"),
                1,
            ),
        ])
        .await
        .unwrap();

    let first = changes.recv().await.unwrap();
    assert_eq!(first.key, ConfigKey::Hysteria2Node1);
    assert_eq!(first.version, 2);

    let second = changes.recv().await.unwrap();
    assert_eq!(second.key, ConfigKey::Socks5);
    assert_eq!(second.version, 2);
}

#[tokio::test]
async fn file_persistence_survives_reopen() {
    let dir = common::temp_dir("store");
    let path = dir.join("store.json");

    {
        let store = ConfigStore::open(Box::new(FilePersistence::new(&path))).unwrap();
        store
            .commit(
                ConfigKey::Socks5,
                common::socks5_payload("127.0.0.1:1080"),
                1,
            )
            .await
            .unwrap();
    }

    let store = ConfigStore::open(Box::new(FilePersistence::new(&path))).unwrap();
    let doc = store.get(ConfigKey::Socks5).unwrap();
    assert_eq!(doc.version, 2);
    assert_eq!(doc.payload, common::socks5_payload("127.0.0.1:1080"));
    // Untouched keys stay at their seeded version.
    assert_eq!(store.get(ConfigKey::Hysteria2Node2).unwrap().version, 1);

    std::fs::remove_dir_all(dir).unwrap();
}
