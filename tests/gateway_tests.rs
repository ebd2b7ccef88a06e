//! End-to-end tests: S3 client → gateway → fake primary + in-memory clouds

mod common;

use chrono::{Duration, Utc};
use common::{error_code, random_payload, TestGateway, ALICE, BOB, PRIMARY};
use http::{HeaderMap, HeaderValue, Method};
use jcs_core::{cloud_bucket_name, Bucket, MetadataStore, SyncMode};

const EC_CLOUDS: [&str; 6] = ["c1", "c2", "c3", "c4", "c5", "c6"];
const REPLICA_CLOUDS: [&str; 3] = ["r1", "r2", "r3"];

fn erasure_bucket() -> Bucket {
    Bucket::erasure(
        "b1",
        "alice",
        4,
        2,
        EC_CLOUDS.iter().map(|c| c.to_string()).collect(),
    )
}

fn replica_bucket(name: &str) -> Bucket {
    Bucket::replica(
        name,
        "alice",
        REPLICA_CLOUDS.iter().map(|c| c.to_string()).collect(),
    )
}

async fn erasure_gateway() -> TestGateway {
    let gateway = TestGateway::start(&EC_CLOUDS, SyncMode::Synchronous).await;
    gateway.metadata.insert_bucket(erasure_bucket());
    gateway
}

#[tokio::test]
async fn test_erasure_write_lose_primary_and_read_back() {
    let gateway = erasure_gateway().await;
    let payload = random_payload(10 * 1024 * 1024);

    let response = gateway
        .send(ALICE, Method::PUT, "/b1/big.bin", Some(payload.clone()))
        .await;
    assert_eq!(response.status(), 200);

    // one shard per location, under the per-cloud bucket name
    for cloud in EC_CLOUDS {
        let shard = gateway
            .cloud(cloud)
            .get(&cloud_bucket_name(PRIMARY, cloud, "b1"), "big.bin")
            .expect("shard stored");
        assert_eq!(shard.len(), payload.len() / 4);
    }
    let record = gateway.metadata.get_file_info("b1", "big.bin").await.unwrap();
    assert_eq!(record.size, payload.len() as u64);

    // the primary loses the object; a read rebuilds it from the shards
    gateway.primary.remove("b1", "big.bin");
    let response = gateway.send(ALICE, Method::GET, "/b1/big.bin", None).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.bytes().await.unwrap().as_ref(), payload.as_slice());
    assert!(gateway.primary.contains("b1", "big.bin"));

    assert_eq!(gateway.staging_entries(), 0);
}

#[tokio::test]
async fn test_erasure_read_tolerates_lost_shards() {
    let gateway = erasure_gateway().await;
    let payload = random_payload(300_001);

    let response = gateway
        .send(ALICE, Method::PUT, "/b1/k", Some(payload.clone()))
        .await;
    assert_eq!(response.status(), 200);

    gateway.primary.remove("b1", "k");
    gateway.cloud("c1").set_offline(true);
    gateway
        .cloud("c5")
        .remove(&cloud_bucket_name(PRIMARY, "c5", "b1"), "k");

    let response = gateway.send(ALICE, Method::GET, "/b1/k", None).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.bytes().await.unwrap().as_ref(), payload.as_slice());
}

#[tokio::test]
async fn test_non_owner_denied_without_backend_call() {
    let gateway = erasure_gateway().await;
    let response = gateway
        .send(ALICE, Method::PUT, "/b1/k", Some(b"alice's data".to_vec()))
        .await;
    assert_eq!(response.status(), 200);
    let before = gateway.backend_requests();

    let response = gateway.send(BOB, Method::GET, "/b1/k", None).await;
    assert_eq!(response.status(), 403);
    assert_eq!(error_code(&response).as_deref(), Some("AccessDenied"));

    let response = gateway
        .send(BOB, Method::PUT, "/b1/k", Some(b"overwrite".to_vec()))
        .await;
    assert_eq!(error_code(&response).as_deref(), Some("AccessDenied"));

    assert_eq!(gateway.backend_requests(), before);
    assert_eq!(gateway.primary.get("b1", "k").unwrap().as_ref(), b"alice's data");
}

#[tokio::test]
async fn test_copy_from_foreign_bucket_denied() {
    let gateway = erasure_gateway().await;
    gateway.metadata.insert_bucket(Bucket::replica("bobbkt", "bob", vec![]));
    let response = gateway
        .send(BOB, Method::PUT, "/bobbkt/secret.txt", Some(b"bob only".to_vec()))
        .await;
    assert_eq!(response.status(), 200);
    let before = gateway.backend_requests();

    let mut headers = HeaderMap::new();
    headers.insert("x-amz-copy-source", HeaderValue::from_static("/bobbkt/secret.txt"));
    let response = gateway
        .send_with_headers(ALICE, Method::PUT, "/b1/stolen.txt", headers, None)
        .await;
    assert_eq!(response.status(), 403);
    assert_eq!(error_code(&response).as_deref(), Some("AccessDenied"));

    assert_eq!(gateway.backend_requests(), before);
    assert!(!gateway.primary.contains("b1", "stolen.txt"));
}

#[tokio::test]
async fn test_batch_delete_propagates_to_clouds() {
    let gateway = TestGateway::start(&REPLICA_CLOUDS, SyncMode::Synchronous).await;
    gateway.metadata.insert_bucket(replica_bucket("b2"));
    for key in ["one", "dir/two"] {
        let path = format!("/b2/{}", key);
        let response = gateway
            .send(ALICE, Method::PUT, &path, Some(b"batch".to_vec()))
            .await;
        assert_eq!(response.status(), 200);
    }

    let body = "<Delete><Object><Key>one</Key></Object><Object><Key>dir/two</Key></Object></Delete>";
    let response = gateway
        .send(ALICE, Method::POST, "/b2?delete", Some(body.as_bytes().to_vec()))
        .await;
    assert_eq!(response.status(), 200);
    assert!(response.text().await.unwrap().contains("<Deleted><Key>one</Key></Deleted>"));

    for cloud in REPLICA_CLOUDS {
        assert!(gateway.cloud(cloud).is_empty());
    }
    for key in ["one", "dir/two"] {
        assert!(gateway.metadata.get_file_info("b2", key).await.is_err());
        let path = format!("/b2/{}", key);
        let response = gateway.send(ALICE, Method::GET, &path, None).await;
        assert_eq!(response.status(), 404);
    }
}

#[tokio::test]
async fn test_replica_partial_failure_still_succeeds() {
    let gateway = TestGateway::start(&REPLICA_CLOUDS, SyncMode::Synchronous).await;
    gateway.metadata.insert_bucket(replica_bucket("b2"));
    gateway.cloud("r2").set_offline(true);

    let response = gateway
        .send(ALICE, Method::PUT, "/b2/doc.txt", Some(b"replicated".to_vec()))
        .await;
    assert_eq!(response.status(), 200);

    for cloud in ["r1", "r3"] {
        let copy = gateway
            .cloud(cloud)
            .get(&cloud_bucket_name(PRIMARY, cloud, "b2"), "doc.txt")
            .unwrap();
        assert_eq!(copy.as_ref(), b"replicated");
    }
    assert!(gateway.cloud("r2").is_empty());
    assert_eq!(gateway.staging_entries(), 0);
}

#[tokio::test]
async fn test_replica_total_failure_is_internal_error() {
    let gateway = TestGateway::start(&REPLICA_CLOUDS, SyncMode::Synchronous).await;
    gateway.metadata.insert_bucket(replica_bucket("b2"));
    for cloud in REPLICA_CLOUDS {
        gateway.cloud(cloud).set_offline(true);
    }

    let response = gateway
        .send(ALICE, Method::PUT, "/b2/doc.txt", Some(b"nowhere".to_vec()))
        .await;
    assert_eq!(response.status(), 500);
    assert_eq!(error_code(&response).as_deref(), Some("InternalError"));
    // the primary write itself went through
    assert!(gateway.primary.contains("b2", "doc.txt"));
    assert_eq!(gateway.staging_entries(), 0);
}

#[tokio::test]
async fn test_replica_restore_from_first_available() {
    let gateway = TestGateway::start(&REPLICA_CLOUDS, SyncMode::Synchronous).await;
    gateway.metadata.insert_bucket(replica_bucket("b2"));

    let response = gateway
        .send(ALICE, Method::PUT, "/b2/doc.txt", Some(b"copy me".to_vec()))
        .await;
    assert_eq!(response.status(), 200);

    gateway.primary.remove("b2", "doc.txt");
    gateway.cloud("r1").set_offline(true);

    let response = gateway.send(ALICE, Method::GET, "/b2/doc.txt", None).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"copy me");
}

#[tokio::test]
async fn test_delete_propagates_to_clouds() {
    let gateway = TestGateway::start(&REPLICA_CLOUDS, SyncMode::Synchronous).await;
    gateway.metadata.insert_bucket(replica_bucket("b2"));

    gateway
        .send(ALICE, Method::PUT, "/b2/gone", Some(b"short lived".to_vec()))
        .await;
    let response = gateway.send(ALICE, Method::DELETE, "/b2/gone", None).await;
    assert_eq!(response.status(), 204);

    assert!(!gateway.primary.contains("b2", "gone"));
    for cloud in REPLICA_CLOUDS {
        assert!(gateway.cloud(cloud).is_empty());
    }
    assert!(gateway.metadata.get_file_info("b2", "gone").await.is_err());
}

#[tokio::test]
async fn test_asynchronous_sync_completes_in_background() {
    let gateway = TestGateway::start(&REPLICA_CLOUDS, SyncMode::Asynchronous).await;
    gateway.metadata.insert_bucket(replica_bucket("b2"));

    let response = gateway
        .send(ALICE, Method::PUT, "/b2/later", Some(b"eventually".to_vec()))
        .await;
    assert_eq!(response.status(), 200);

    let bucket = cloud_bucket_name(PRIMARY, "r3", "b2");
    let replicated = gateway
        .eventually(|| gateway.cloud("r3").contains(&bucket, "later"))
        .await;
    assert!(replicated);
}

#[tokio::test]
async fn test_clock_skew_boundary() {
    let gateway = erasure_gateway().await;
    gateway
        .send(ALICE, Method::PUT, "/b1/k", Some(b"data".to_vec()))
        .await;

    let ahead = Utc::now() + Duration::minutes(14);
    let response = gateway.send_at(ALICE, Method::GET, "/b1/k", None, ahead).await;
    assert_eq!(response.status(), 200);

    let too_far = Utc::now() + Duration::minutes(16);
    let response = gateway.send_at(ALICE, Method::GET, "/b1/k", None, too_far).await;
    assert_eq!(response.status(), 403);
    assert_eq!(error_code(&response).as_deref(), Some("InvalidAccessKeyId"));
}

#[tokio::test]
async fn test_presigned_expiry_boundary() {
    let gateway = erasure_gateway().await;
    gateway
        .send(ALICE, Method::PUT, "/b1/k", Some(b"shared".to_vec()))
        .await;

    let response = gateway
        .presigned_get(ALICE, "/b1/k", 60, Utc::now() - Duration::seconds(59))
        .await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"shared");

    let response = gateway
        .presigned_get(ALICE, "/b1/k", 60, Utc::now() - Duration::seconds(61))
        .await;
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn test_not_implemented_short_circuits() {
    let gateway = erasure_gateway().await;
    let response = gateway.send(ALICE, Method::PUT, "/", None).await;
    assert_eq!(response.status(), 501);
    assert_eq!(error_code(&response).as_deref(), Some("NotImplemented"));
    assert_eq!(gateway.backend_requests(), 0);
}

#[tokio::test]
async fn test_list_buckets_scoped_to_caller() {
    let gateway = erasure_gateway().await;
    gateway.metadata.insert_bucket(Bucket::replica("b3", "bob", vec![]));

    let response = gateway.send(ALICE, Method::GET, "/", None).await;
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("<Name>b1</Name>"));
    assert!(!body.contains("<Name>b3</Name>"));

    let body = gateway.send(BOB, Method::GET, "/", None).await.text().await.unwrap();
    assert!(body.contains("<Name>b3</Name>"));
    assert!(!body.contains("<Name>b1</Name>"));
    assert_eq!(gateway.backend_requests(), 0);
}

#[tokio::test]
async fn test_error_responses_carry_request_id() {
    let gateway = erasure_gateway().await;
    let response = gateway.send(BOB, Method::GET, "/missing/k", None).await;
    assert_eq!(response.status(), 404);
    assert_eq!(error_code(&response).as_deref(), Some("NotFound"));
    assert!(response.headers().contains_key("x-amz-request-id"));
    assert_eq!(response.headers()["content-type"], "application/xml");
}
