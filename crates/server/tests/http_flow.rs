use pretty_assertions::assert_eq;
use semindex_indexer::{EngineConfig, IndexOrchestrator};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

async fn spawn_server(dir: &Path, max_vectors: usize) -> String {
    let mut config = EngineConfig::default();
    config.store.data_dir = dir.to_path_buf();
    config.store.max_vectors = max_vectors;
    config.embedding.workers = 2;
    config.indexing.persist_interval_secs = 0;
    let orchestrator = Arc::new(IndexOrchestrator::open(config).await.expect("open"));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, semindex_server::router(orchestrator))
            .await
            .expect("serve");
    });
    format!("http://{addr}")
}

fn consultation() -> Value {
    json!({
        "document_id": "doc-1",
        "chunks": [
            {
                "chunk_index": 0,
                "content": "Patient has hypertension.",
                "sentences": ["Patient has hypertension."],
                "metadata": {"page": 1, "ward": "cardiology"}
            },
            {
                "chunk_index": 1,
                "content": "Treatment: ACE inhibitor 10mg daily.",
                "sentences": ["Treatment: ACE inhibitor 10mg daily."],
                "metadata": {"page": 1}
            }
        ],
        "metadata": {
            "document_type": "consultation",
            "patient_id": "P-001",
            "document_date": "2024-01-10"
        }
    })
}

#[tokio::test]
async fn index_search_status_delete_round() {
    let temp = TempDir::new().expect("tempdir");
    let base = spawn_server(temp.path(), 1_000).await;
    let client = reqwest::Client::new();

    let indexed: Value = client
        .post(format!("{base}/index"))
        .json(&consultation())
        .send()
        .await
        .expect("index request")
        .json()
        .await
        .expect("index body");
    assert_eq!(indexed["status"], "COMPLETE");
    assert_eq!(indexed["vectors_added"], 2);

    let status = client
        .get(format!("{base}/index/status/doc-1"))
        .send()
        .await
        .expect("status request");
    assert_eq!(status.status().as_u16(), 200);
    let status: Value = status.json().await.expect("status body");
    assert_eq!(status["indexed_count"], 2);
    assert_eq!(status["expected_count"], 2);

    let found: Value = client
        .post(format!("{base}/search"))
        .json(&json!({
            "query": "traitement hypertension",
            "filters": {"patient_id": "P-001", "date_from": "2024-01-01"},
            "limit": 5,
            "threshold": 0.3
        }))
        .send()
        .await
        .expect("search request")
        .json()
        .await
        .expect("search body");
    let results = found["results"].as_array().expect("results array");
    assert!(!results.is_empty());
    assert_eq!(found["total_results"], results.len());
    assert_eq!(found["filters_applied"]["patient_id"], "P-001");
    let first = &results[0];
    assert_eq!(first["document_id"], "doc-1");
    assert!(first["score"].as_f64().expect("score") >= 0.3);
    assert_eq!(first["metadata"]["document_type"], "consultation");
    assert_eq!(first["metadata"]["document_date"], "2024-01-10");
    let with_extra = results
        .iter()
        .find(|r| r["chunk_index"] == 0)
        .expect("chunk 0 in results");
    assert_eq!(with_extra["chunk_id"], "doc-1_chunk_0");
    assert_eq!(with_extra["metadata"]["ward"], "cardiology");

    let deleted: Value = client
        .delete(format!("{base}/index/doc-1"))
        .send()
        .await
        .expect("delete request")
        .json()
        .await
        .expect("delete body");
    assert_eq!(deleted["vectors_deleted"], 2);
    assert_eq!(deleted["status"], "deleted");

    let missing = client
        .get(format!("{base}/index/status/doc-1"))
        .send()
        .await
        .expect("status request");
    assert_eq!(missing.status().as_u16(), 404);
    let missing: Value = missing.json().await.expect("status body");
    assert_eq!(missing["status"], "NOT_FOUND");

    let again = client
        .delete(format!("{base}/index/doc-1"))
        .send()
        .await
        .expect("delete request");
    assert_eq!(again.status().as_u16(), 404);
    let envelope: Value = again.json().await.expect("error body");
    assert_eq!(envelope["code"], "not_found");
}

#[tokio::test]
async fn bad_requests_get_error_envelopes() {
    let temp = TempDir::new().expect("tempdir");
    let base = spawn_server(temp.path(), 1_000).await;
    let client = reqwest::Client::new();

    let malformed = client
        .post(format!("{base}/index"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("index request");
    assert_eq!(malformed.status().as_u16(), 400);
    let envelope: Value = malformed.json().await.expect("error body");
    assert_eq!(envelope["code"], "validation_error");
    assert!(envelope["hint"].is_string());

    let bad_filter = client
        .post(format!("{base}/search"))
        .json(&json!({"query": "hypertension", "filters": {"date_to": "last week"}}))
        .send()
        .await
        .expect("search request");
    assert_eq!(bad_filter.status().as_u16(), 400);
    let envelope: Value = bad_filter.json().await.expect("error body");
    assert_eq!(envelope["code"], "invalid_query");
    assert!(envelope["message"]
        .as_str()
        .expect("message")
        .contains("date_to"));
}

#[tokio::test]
async fn full_store_answers_insufficient_storage() {
    let temp = TempDir::new().expect("tempdir");
    let base = spawn_server(temp.path(), 2).await;
    let client = reqwest::Client::new();

    let first = client
        .post(format!("{base}/index"))
        .json(&consultation())
        .send()
        .await
        .expect("index request");
    assert_eq!(first.status().as_u16(), 200);

    let overflow = client
        .post(format!("{base}/index"))
        .json(&json!({
            "document_id": "doc-2",
            "chunks": [{"chunk_index": 0, "content": "One more note."}]
        }))
        .send()
        .await
        .expect("index request");
    assert_eq!(overflow.status().as_u16(), 507);
    let envelope: Value = overflow.json().await.expect("error body");
    assert_eq!(envelope["code"], "capacity_exceeded");
}

#[tokio::test]
async fn operational_endpoints_report_state() {
    let temp = TempDir::new().expect("tempdir");
    let base = spawn_server(temp.path(), 1_000).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/index"))
        .json(&consultation())
        .send()
        .await
        .expect("index request");

    let health = client
        .get(format!("{base}/health"))
        .send()
        .await
        .expect("health request");
    assert_eq!(health.status().as_u16(), 200);
    let health: Value = health.json().await.expect("health body");
    assert_eq!(health["status"], "ok");
    assert_eq!(health["total_vectors"], 2);

    let stats: Value = client
        .get(format!("{base}/stats"))
        .send()
        .await
        .expect("stats request")
        .json()
        .await
        .expect("stats body");
    assert_eq!(stats["total_vectors"], 2);
    assert_eq!(stats["total_documents"], 1);
    assert_eq!(stats["dimension"], 384);
    assert_eq!(stats["model"]["backend"], "hashing");

    let rebuilt: Value = client
        .post(format!("{base}/admin/rebuild"))
        .send()
        .await
        .expect("rebuild request")
        .json()
        .await
        .expect("rebuild body");
    assert_eq!(rebuilt["documents_rebuilt"], 1);
    assert_eq!(rebuilt["vectors_added"], 2);
}
