//! End-to-end tests over a live HTTP server.

use std::sync::Arc;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::{json, Value};

use control_plane::api::{self, AppState};
use control_plane::bundle;
use control_plane::certs::CertificateManager;
use control_plane::config::schema::ConfigKey;
use control_plane::orchestrator::{NodeId, NodeRecord};
use control_plane::store::ConfigDocument;

mod common;

const API_KEY: &str = "test-key";

async fn spawn_api() -> String {
    let store = common::new_store();
    let (orchestrator, _, _) = common::new_orchestrator(&store);
    orchestrator.spawn_change_listener(store.subscribe());
    let certs = Arc::new(CertificateManager::new(common::temp_dir("certs")).unwrap());

    let state = AppState {
        store,
        certs,
        orchestrator,
        api_key: API_KEY.to_string(),
    };
    let app = api::router(state, Duration::from_secs(5));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

#[tokio::test]
async fn api_requires_a_bearer_key_but_healthz_stays_open() {
    let base = spawn_api().await;
    let client = client();

    let res = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(format!("{base}/api/nodes"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(format!("{base}/api/nodes"))
        .bearer_auth("wrong-key")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(format!("{base}/api/nodes"))
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn socks5_reads_mask_the_stored_password() {
    let base = spawn_api().await;
    let client = client();

    let res = client
        .put(format!("{base}/api/socks5"))
        .bearer_auth(API_KEY)
        .json(&json!({
            "listen": "127.0.0.1:1080",
            "username": "user",
            "password": "hunter2",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = client
        .get(format!("{base}/api/socks5"))
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["payload"]["username"], "user");
    assert_eq!(body["payload"]["password"], "******");
}

#[tokio::test]
async fn stale_batch_update_gets_a_conflict_status() {
    let base = spawn_api().await;
    let client = client();

    let update = json!([{
        "key": "socks5",
        "payload": { "type": "socks5", "listen": "127.0.0.1:1080" },
        "expected_version": 1,
    }]);

    let res = client
        .put(format!("{base}/api/config"))
        .bearer_auth(API_KEY)
        .json(&update)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Same expected_version again: somebody else already won.
    let res = client
        .put(format!("{base}/api/config"))
        .bearer_auth(API_KEY)
        .json(&update)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn invalid_payload_is_rejected_with_the_field_named() {
    let base = spawn_api().await;
    let client = client();

    let res = client
        .put(format!("{base}/api/socks5"))
        .bearer_auth(API_KEY)
        .json(&json!({ "listen": "no-port-here" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = res.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("listen"));
}

#[tokio::test]
async fn unknown_config_keys_are_not_found() {
    let base = spawn_api().await;
    let client = client();

    let res = client
        .get(format!("{base}/api/config/bogus"))
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("bogus"));

    let res = client
        .get(format!("{base}/api/export/bogus"))
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn export_then_import_bumps_the_version() {
    let base = spawn_api().await;
    let client = client();

    let res = client
        .get(format!("{base}/api/export/socks5"))
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .contains("socks5"));

    // Default socks5 has an empty listen, which fails import validation;
    // commit a real one first and export again.
    client
        .put(format!("{base}/api/socks5"))
        .bearer_auth(API_KEY)
        .json(&json!({ "listen": "127.0.0.1:1080" }))
        .send()
        .await
        .unwrap();
    let bundle_bytes = client
        .get(format!("{base}/api/export/socks5"))
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_ne!(bundle_bytes.len(), 0);

    let form = Form::new().part(
        "file",
        Part::bytes(bundle_bytes.to_vec()).file_name("socks5.bin"),
    );
    let res = client
        .post(format!("{base}/api/import"))
        .bearer_auth(API_KEY)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["key"], "socks5");
    assert_eq!(body["version"], 3);
}

#[tokio::test]
async fn full_import_with_one_invalid_document_commits_nothing() {
    let base = spawn_api().await;
    let client = client();

    // The socks5 listen has no port, so validation must fail the whole
    // import before any document lands.
    let documents = vec![
        ConfigDocument {
            key: ConfigKey::Hysteria2Node1,
            payload: common::hysteria2_payload("0.0.0.0:443"),
            version: 9,
        },
        ConfigDocument {
            key: ConfigKey::Socks5,
            payload: common::socks5_payload("nonsense"),
            version: 9,
        },
    ];
    let bytes = bundle::encode_full(&documents, &[], &[]).unwrap();

    let form = Form::new().part("file", Part::bytes(bytes.to_vec()).file_name("full.bin"));
    let res = client
        .post(format!("{base}/api/import/full"))
        .bearer_auth(API_KEY)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body: Value = client
        .get(format!("{base}/api/config"))
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    for doc in body.as_array().unwrap() {
        assert_eq!(doc["version"], 1, "document {} changed", doc["key"]);
    }
}

#[tokio::test]
async fn full_import_commits_documents_and_reconciles_nodes() {
    let base = spawn_api().await;
    let client = client();

    let documents = vec![
        ConfigDocument {
            key: ConfigKey::Hysteria2Node1,
            payload: common::hysteria2_payload("0.0.0.0:443"),
            version: 42,
        },
        ConfigDocument {
            key: ConfigKey::Socks5,
            payload: common::socks5_payload("127.0.0.1:1080"),
            version: 42,
        },
    ];
    let nodes = vec![NodeRecord {
        node: NodeId::Node2,
        enabled: true,
        remark: "imported".into(),
    }];
    let bytes = bundle::encode_full(&documents, &nodes, &[]).unwrap();

    let form = Form::new().part("file", Part::bytes(bytes.to_vec()).file_name("full.bin"));
    let res = client
        .post(format!("{base}/api/import/full"))
        .bearer_auth(API_KEY)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body[0]["key"], "hysteria2_node1");
    assert_eq!(body[1]["key"], "socks5");
    assert_eq!(body[1]["version"], 2);

    let body: Value = client
        .get(format!("{base}/api/nodes/node2"))
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["enabled"], true);
    assert_eq!(body["remark"], "imported");
    assert_eq!(body["port"], 444);
}

#[tokio::test]
async fn import_rejects_garbage_uploads() {
    let base = spawn_api().await;
    let client = client();

    let form = Form::new().part("file", Part::bytes(vec![0u8; 32]).file_name("junk.bin"));
    let res = client
        .post(format!("{base}/api/import"))
        .bearer_auth(API_KEY)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cert_upload_checks_extension_and_pem_structure() {
    let base = spawn_api().await;
    let client = client();

    let pem = b"-----BEGIN CERTIFICATE-----\nMIIBszCCAVmgAwIBAgIUfQ==\n-----END CERTIFICATE-----\n";
    let form = Form::new().part("file", Part::bytes(pem.to_vec()).file_name("proxy.crt"));
    let res = client
        .post(format!("{base}/api/certs"))
        .bearer_auth(API_KEY)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert!(body["path"].as_str().unwrap().ends_with("proxy.crt"));

    let form = Form::new().part("file", Part::bytes(pem.to_vec()).file_name("notes.txt"));
    let res = client
        .post(format!("{base}/api/certs"))
        .bearer_auth(API_KEY)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let form = Form::new().part(
        "file",
        Part::bytes(b"not pem at all".to_vec()).file_name("bad.crt"),
    );
    let res = client
        .post(format!("{base}/api/certs"))
        .bearer_auth(API_KEY)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn node2_toggle_without_socks5_fails_and_succeeds_after_configuring() {
    let base = spawn_api().await;
    let client = client();

    let res = client
        .post(format!("{base}/api/nodes/node2/toggle"))
        .bearer_auth(API_KEY)
        .json(&json!({ "enable": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    client
        .put(format!("{base}/api/socks5"))
        .bearer_auth(API_KEY)
        .json(&json!({ "listen": "127.0.0.1:1080" }))
        .send()
        .await
        .unwrap();

    let res = client
        .post(format!("{base}/api/nodes/node2/toggle"))
        .bearer_auth(API_KEY)
        .json(&json!({ "enable": true, "remark": "backup exit" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["enabled"], true);
    assert_eq!(body["remark"], "backup exit");

    let body: Value = client
        .get(format!("{base}/api/nodes/node2"))
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "enabled");
}

#[tokio::test]
async fn restart_is_reported_per_node() {
    let base = spawn_api().await;
    let client = client();

    // Only node1 is enabled by default and the mock restarts cleanly.
    let res = client
        .post(format!("{base}/api/server/restart"))
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = client
        .get(format!("{base}/api/nodes"))
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let nodes = body.as_array().unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0]["node_id"], "node1");
    assert_eq!(nodes[0]["running"], true);
}
