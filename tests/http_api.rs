//! Public and internal HTTP routes, driven without a socket

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chunkmesh::cluster::{CoordinationStore, Discovery, DistributedCache, HttpCache};
use chunkmesh::node::http::{create_router, AppState};
use chunkmesh::rpc::http::{AddressBook, Announcement, HttpDiscovery, HttpTransport};
use chunkmesh::rpc::{Event, MetadataRequest, NodeInfo, Reply, Transport};
use chunkmesh::store::NewFile;
use chunkmesh::{Error, UploadReceipt};
use common::{id, TestCluster};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const LIMIT: usize = 16 * 1024 * 1024;

fn router(cluster: &TestCluster, raw: &str, book: Arc<AddressBook>) -> Router {
    create_router(
        AppState {
            node: cluster.node(raw).clone(),
            book,
            address: format!("http://{}.test:3000", raw),
        },
        LIMIT as u64,
    )
}

/// Serve `raw`'s router on a loopback port, returning its base URL
async fn serve(cluster: &TestCluster, raw: &str, book: Arc<AddressBook>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    let app = create_router(
        AppState {
            node: cluster.node(raw).clone(),
            book,
            address: address.clone(),
        },
        LIMIT as u64,
    );
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    address
}

async fn body_bytes(resp: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), LIMIT).await.unwrap().to_vec()
}

#[tokio::test]
async fn test_health_and_info() {
    let cluster = TestCluster::start(&["alpha-5", "bravo-12"]).await;
    let app = router(&cluster, "alpha-5", Arc::new(AddressBook::default()));

    let resp = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(health["node_id"], "alpha-5");
    assert_eq!(health["is_coordinator"], true);

    let resp = app
        .oneshot(Request::get("/api/node/info").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let info: NodeInfo = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(info.coordinator.unwrap().as_str(), "alpha-5");
}

#[tokio::test]
async fn test_upload_then_fetch_content() {
    let cluster = TestCluster::start(&["alpha-5", "bravo-12", "charlie-7"]).await;
    let app = router(&cluster, "charlie-7", Arc::new(AddressBook::default()));
    let payload = b"the quick brown fox jumps over the lazy dog".repeat(100);

    let resp = app
        .clone()
        .oneshot(
            Request::post("/api/file/upload?filename=fox.txt")
                .header("content-type", "text/plain")
                .body(Body::from(payload.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let receipt: UploadReceipt = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(receipt.file.content_type, "text/plain");

    let uri = format!("/api/file/{}/content", receipt.file.id);
    let resp = app
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "text/plain");
    assert_eq!(body_bytes(resp).await, payload);

    // nothing of the download stays on disk
    let store = cluster.node("charlie-7").replication().chunk_store();
    let leftovers = std::fs::read_dir(store.downloads_root()).unwrap().count();
    assert_eq!(leftovers, 0);

    let resp = app
        .oneshot(Request::get("/api/files").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let files: Vec<serde_json::Value> = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(files.len(), 1);
}

#[tokio::test]
async fn test_missing_file_is_404() {
    let cluster = TestCluster::start(&["alpha-5"]).await;
    let app = router(&cluster, "alpha-5", Arc::new(AddressBook::default()));
    let resp = app
        .oneshot(Request::get("/api/file/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_internal_rpc_speaks_bincode() {
    let cluster = TestCluster::start(&["alpha-5"]).await;
    let app = router(&cluster, "alpha-5", Arc::new(AddressBook::default()));

    let body = bincode::serialize(&chunkmesh::rpc::Request::NodeStatus).unwrap();
    let resp = app
        .oneshot(Request::post("/internal/rpc").body(Body::from(body)).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    match bincode::deserialize::<Reply>(&body_bytes(resp).await).unwrap() {
        Reply::NodeStatus(snapshot) => assert!(snapshot.self_coordinator_state),
        other => panic!("unexpected reply {:?}", other),
    }
}

#[tokio::test]
async fn test_announce_registers_caller() {
    let cluster = TestCluster::start(&["alpha-5"]).await;
    let book = Arc::new(AddressBook::default());
    let app = router(&cluster, "alpha-5", book.clone());

    let resp = app
        .oneshot(
            Request::get("/internal/announce?from=http:%2F%2Fbravo.test:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let ann: Announcement = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(ann.node_id.as_str(), "alpha-5");
    assert_eq!(ann.services, vec!["file"]);
    assert_eq!(book.addresses(), vec!["http://bravo.test:3000"]);
}

#[tokio::test]
async fn test_hosted_cache_routes() {
    let cluster = TestCluster::start(&["alpha-5"]).await;
    let app = router(&cluster, "alpha-5", Arc::new(AddressBook::default()));
    let key = "/internal/cache/FILE_SERVICE.SERVICE_CURRENT_MASTER";

    let resp = app
        .clone()
        .oneshot(Request::get(key).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .clone()
        .oneshot(Request::put(key).body(Body::from("bravo-12")).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = app
        .oneshot(Request::get(key).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_bytes(resp).await, b"bravo-12");
}

#[tokio::test]
async fn test_http_transport_over_loopback() {
    let cluster = TestCluster::start(&["alpha-5", "bravo-12"]).await;
    let book = Arc::new(AddressBook::default());
    for raw in ["alpha-5", "bravo-12"] {
        let address = serve(&cluster, raw, Arc::new(AddressBook::default())).await;
        book.record(id(raw), address);
    }
    let transport = HttpTransport::new(book, Duration::from_secs(5)).unwrap();

    match transport
        .call(&id("alpha-5"), chunkmesh::rpc::Request::NodeStatus)
        .await
        .unwrap()
    {
        Reply::NodeStatus(snapshot) => {
            assert_eq!(snapshot.node_id, id("alpha-5"));
            assert!(snapshot.self_coordinator_state);
        }
        other => panic!("unexpected reply {:?}", other),
    }

    let write = chunkmesh::rpc::Request::Metadata(MetadataRequest::CreateFile(NewFile {
        name: "x".into(),
        original_name: "x".into(),
        content_type: "text/plain".into(),
        checksum: "c".into(),
        size: 1,
    }));
    let err = transport.call(&id("bravo-12"), write).await.unwrap_err();
    assert!(matches!(err, Error::NotCoordinator(_)), "got {:?}", err);

    let missing = chunkmesh::rpc::Request::RetrieveChunk {
        name: "missing.part1".into(),
    };
    let err = transport.call(&id("alpha-5"), missing).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {:?}", err);

    transport
        .emit(
            &id("alpha-5"),
            Event::Victory {
                sender: id("bravo-12"),
            },
        )
        .await
        .unwrap();
    assert_eq!(cluster.node("alpha-5").coordinator(), Some(id("bravo-12")));
}

#[tokio::test]
async fn test_http_discovery_marks_dead_peers() {
    let cluster = TestCluster::start(&["alpha-5"]).await;
    let served_book = Arc::new(AddressBook::default());
    let alpha = serve(&cluster, "alpha-5", served_book.clone()).await;

    let dead = "http://127.0.0.1:1".to_string();
    let book = Arc::new(AddressBook::new(vec![alpha.clone()]));
    book.record(id("ghost-9"), dead);
    let me = Announcement {
        node_id: id("scout-3"),
        services: vec!["file".into()],
        address: "http://scout.test:3000".into(),
    };
    let discovery = HttpDiscovery::new(me, book.clone(), Duration::from_secs(2)).unwrap();

    let mut nodes = discovery.nodes().await.unwrap();
    nodes.sort_by(|a, b| a.node_id.as_str().cmp(b.node_id.as_str()));
    let seen: Vec<(&str, bool)> = nodes
        .iter()
        .map(|n| (n.node_id.as_str(), n.available))
        .collect();
    assert_eq!(
        seen,
        vec![("alpha-5", true), ("ghost-9", false), ("scout-3", true)]
    );

    assert_eq!(book.address_of(&id("alpha-5")), Some(alpha));
    // the probe told alpha where to find us
    assert_eq!(served_book.addresses(), vec!["http://scout.test:3000"]);
}

#[tokio::test]
async fn test_http_cache_against_hosting_node() {
    let cluster = TestCluster::start(&["alpha-5"]).await;
    let address = serve(&cluster, "alpha-5", Arc::new(AddressBook::default())).await;
    let cache = Arc::new(HttpCache::new(format!("{}/", address), Duration::from_secs(5)).unwrap());

    assert_eq!(cache.get("missing").await.unwrap(), None);
    cache.set("greeting", "hello").await.unwrap();
    assert_eq!(cache.get("greeting").await.unwrap().as_deref(), Some("hello"));

    let store = CoordinationStore::new("file", cache);
    store.set_master(&id("bravo-12")).await.unwrap();
    assert_eq!(store.current_master().await.unwrap(), Some(id("bravo-12")));
    let hosted = cluster.node("alpha-5").hosted_cache();
    assert_eq!(
        hosted
            .get("FILE_SERVICE.SERVICE_CURRENT_MASTER")
            .await
            .unwrap()
            .as_deref(),
        Some("bravo-12")
    );
}
