use std::net::TcpListener;
use std::thread;

use kbsync_core::{ApiErrorClass, KbError, KnowledgeBaseClient, KnowledgeBaseRef, RagIndexStatus};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn list_documents_includes_api_key_header() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/convai/knowledge-base"))
        .and(query_param("page_size", "100"))
        .and(query_param("page", "0"))
        .and(header("xi-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "documents": [
                {
                    "id": "doc-a",
                    "name": "A",
                    "metadata": {"created_at_unix_secs": 1_700_000_000, "size_bytes": 12}
                },
                {"id": "doc-b", "name": "B"}
            ],
            "has_more": false
        })))
        .mount(&server)
        .await;

    let client = KnowledgeBaseClient::with_base_url(&server.uri(), "test-key").unwrap();
    let page = client.list_documents(0, 100).await.unwrap();

    assert!(!page.has_more);
    assert_eq!(page.documents.len(), 2);
    assert_eq!(page.documents[0].metadata.size_bytes, Some(12));
    assert_eq!(page.documents[1].metadata.size_bytes, None);
}

#[tokio::test]
async fn list_documents_accepts_knowledge_bases_field() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/convai/knowledge-base"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "knowledge_bases": [{"id": "doc-b", "name": "B"}],
            "has_more": false
        })))
        .mount(&server)
        .await;

    let client = KnowledgeBaseClient::with_base_url(&server.uri(), "test-key").unwrap();
    let page = client.list_documents(1, 100).await.unwrap();

    let ids: Vec<_> = page.documents.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["doc-b"]);
}

#[tokio::test]
async fn get_document_returns_size_metadata() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/convai/knowledge-base/doc-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "doc-a",
            "name": "A",
            "metadata": {"created_at_unix_secs": 5, "size_bytes": 42}
        })))
        .mount(&server)
        .await;

    let client = KnowledgeBaseClient::with_base_url(&server.uri(), "test-key").unwrap();
    let doc = client.get_document("doc-a").await.unwrap();

    assert_eq!(doc.name, "A");
    assert_eq!(doc.metadata.size_bytes, Some(42));
    assert_eq!(doc.metadata.created_at_unix_secs, Some(5));
}

#[tokio::test]
async fn get_document_content_returns_raw_text() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/convai/knowledge-base/doc-a/content"))
        .respond_with(ResponseTemplate::new(200).set_body_string("# Квартал A\n"))
        .mount(&server)
        .await;

    let client = KnowledgeBaseClient::with_base_url(&server.uri(), "test-key").unwrap();
    let text = client.get_document_content("doc-a").await.unwrap();

    assert_eq!(text, "# Квартал A\n");
}

#[tokio::test]
async fn create_text_document_posts_name_and_text() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/convai/knowledge-base/text"))
        .and(header("xi-api-key", "test-key"))
        .and(body_json(json!({"text": "hello", "name": "A"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "new-a", "name": "A"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = KnowledgeBaseClient::with_base_url(&server.uri(), "test-key").unwrap();
    let id = client.create_text_document("A", "hello").await.unwrap();

    assert_eq!(id, "new-a");
}

#[tokio::test]
async fn request_indexing_sends_model() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/convai/knowledge-base/new-a/rag-index"))
        .and(body_json(json!({"model": "e5_mistral_7b_instruct"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "idx-1",
            "model": "e5_mistral_7b_instruct",
            "status": "created",
            "progress_percentage": 0.0
        })))
        .mount(&server)
        .await;

    let client = KnowledgeBaseClient::with_base_url(&server.uri(), "test-key").unwrap();
    let entry = client
        .request_indexing("new-a", "e5_mistral_7b_instruct")
        .await
        .unwrap();

    assert_eq!(entry.status, RagIndexStatus::Created);
}

#[tokio::test]
async fn get_indexing_status_reads_first_index() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/convai/knowledge-base/new-a/rag-index"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "indexes": [
                {"status": "document_too_small", "progress_percentage": 100.0}
            ]
        })))
        .mount(&server)
        .await;

    let client = KnowledgeBaseClient::with_base_url(&server.uri(), "test-key").unwrap();
    let list = client.get_indexing_status("new-a").await.unwrap();

    assert_eq!(
        list.current().map(|entry| entry.status),
        Some(RagIndexStatus::DocumentTooSmall)
    );
}

#[tokio::test]
async fn delete_document_accepts_no_content() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/convai/knowledge-base/old-b"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = KnowledgeBaseClient::with_base_url(&server.uri(), "test-key").unwrap();
    client.delete_document("old-b").await.unwrap();
}

#[tokio::test]
async fn get_agent_knowledge_base_reads_prompt_path() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/convai/agents/agent-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "agent_id": "agent-1",
            "conversation_config": {
                "agent": {
                    "prompt": {
                        "prompt": "You are helpful",
                        "knowledge_base": [
                            {"type": "text", "name": "A", "id": "a1", "usage_mode": "prompt"},
                            {"name": "B", "id": "b1"}
                        ]
                    }
                }
            }
        })))
        .mount(&server)
        .await;

    let client = KnowledgeBaseClient::with_base_url(&server.uri(), "test-key").unwrap();
    let refs = client.get_agent_knowledge_base("agent-1").await.unwrap();

    assert_eq!(refs.len(), 2);
    assert_eq!(refs[0].usage_mode, "prompt");
    assert_eq!(refs[1], KnowledgeBaseRef::text("B", "b1"));
}

#[tokio::test]
async fn replace_agent_knowledge_base_patches_whole_list() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/v1/convai/agents/agent-1"))
        .and(body_json(json!({
            "conversation_config": {
                "agent": {
                    "prompt": {
                        "knowledge_base": [
                            {"type": "text", "name": "A", "id": "a1", "usage_mode": "auto"},
                            {"type": "text", "name": "B", "id": "b2", "usage_mode": "auto"}
                        ]
                    }
                }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"agent_id": "agent-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = KnowledgeBaseClient::with_base_url(&server.uri(), "test-key").unwrap();
    client
        .replace_agent_knowledge_base(
            "agent-1",
            &[KnowledgeBaseRef::text("A", "a1"), KnowledgeBaseRef::text("B", "b2")],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn rate_limit_is_retryable_and_reads_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/convai/knowledge-base/doc-a"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "3")
                .set_body_string("slow down"),
        )
        .mount(&server)
        .await;

    let client = KnowledgeBaseClient::with_base_url(&server.uri(), "test-key").unwrap();
    let err = client.get_document("doc-a").await.unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(err.classification(), Some(ApiErrorClass::RateLimit));
    assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(3)));
}

#[tokio::test]
async fn rejected_content_is_permanent() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/convai/knowledge-base/text"))
        .respond_with(ResponseTemplate::new(422).set_body_string("text is too short"))
        .mount(&server)
        .await;

    let client = KnowledgeBaseClient::with_base_url(&server.uri(), "test-key").unwrap();
    let err = client.create_text_document("A", "").await.unwrap_err();

    assert!(!err.is_retryable());
    assert_eq!(err.classification(), Some(ApiErrorClass::Permanent));
    assert!(matches!(err, KbError::Api { body, .. } if body == "text is too short"));
}

#[tokio::test]
async fn missing_document_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/convai/knowledge-base/gone/rag-index"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = KnowledgeBaseClient::with_base_url(&server.uri(), "test-key").unwrap();
    let err = client.get_indexing_status("gone").await.unwrap_err();

    assert_eq!(err.classification(), Some(ApiErrorClass::NotFound));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn dropped_connection_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = thread::spawn(move || {
        // accept and hang up without answering
        let (stream, _) = listener.accept().unwrap();
        drop(stream);
    });

    let client = KnowledgeBaseClient::with_base_url(&format!("http://{addr}"), "test-key").unwrap();
    let err = client.get_document("doc-a").await.unwrap_err();
    acceptor.join().unwrap();

    assert!(matches!(err, KbError::Request(_)), "{err:?}");
    assert_eq!(err.classification(), Some(ApiErrorClass::Transient));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn malformed_body_is_not_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/convai/knowledge-base/doc-a"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&server)
        .await;

    let client = KnowledgeBaseClient::with_base_url(&server.uri(), "test-key").unwrap();
    let err = client.get_document("doc-a").await.unwrap_err();

    assert!(matches!(err, KbError::Request(_)), "{err:?}");
    assert_eq!(err.classification(), None);
    assert!(!err.is_retryable());
}
