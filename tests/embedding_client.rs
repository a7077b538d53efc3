use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use docent::config::EmbeddingConfig;
use docent::embedding::{create_provider, embed_batched, Embedder};

/// Read headers plus a `Content-Length` body.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|l| {
                    l.to_ascii_lowercase()
                        .strip_prefix("content-length:")
                        .map(|v| v.trim().parse::<usize>().unwrap())
                })
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return text;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// Answer successive connections with `responses` in order, counting hits.
async fn serve(responses: Vec<(&'static str, &'static str)>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    tokio::spawn(async move {
        for (status, body) in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            assert!(request.starts_with("POST /api/embed"));
            counter.fetch_add(1, Ordering::SeqCst);
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
    });
    (format!("http://{}", addr), hits)
}

fn provider(url: &str, max_retries: u32) -> Arc<dyn Embedder> {
    let config = EmbeddingConfig {
        provider: "ollama".to_string(),
        model: Some("all-minilm".to_string()),
        url: Some(url.to_string()),
        max_retries,
        timeout_secs: 2,
        ..Default::default()
    };
    create_provider(&config, 2).unwrap()
}

fn texts() -> Vec<String> {
    vec!["one".to_string(), "two".to_string()]
}

#[tokio::test]
async fn test_embed_success() {
    let (url, hits) = serve(vec![("200 OK", r#"{"embeddings":[[0.5,1.0],[2.0,-1.0]]}"#)]).await;
    let vectors = embed_batched(provider(&url, 0).as_ref(), &texts(), 8)
        .await
        .unwrap();
    assert_eq!(vectors, vec![vec![0.5, 1.0], vec![2.0, -1.0]]);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let (url, hits) = serve(vec![
        ("503 Service Unavailable", r#"{"error":"loading"}"#),
        ("200 OK", r#"{"embeddings":[[1.0,0.0],[0.0,1.0]]}"#),
    ])
    .await;
    let vectors = provider(&url, 1).embed(&texts()).await.unwrap();
    assert_eq!(vectors.len(), 2);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_client_error_fails_without_retry() {
    let (url, hits) = serve(vec![
        ("404 Not Found", r#"{"error":"model not found"}"#),
        ("200 OK", r#"{"embeddings":[[1.0,0.0],[0.0,1.0]]}"#),
    ])
    .await;
    let err = provider(&url, 3).embed(&texts()).await.unwrap_err();
    assert!(err.to_string().contains("404"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let (url, hits) = serve(vec![
        ("500 Internal Server Error", r#"{"error":"boom"}"#),
        ("500 Internal Server Error", r#"{"error":"boom"}"#),
    ])
    .await;
    let err = provider(&url, 1).embed(&texts()).await.unwrap_err();
    assert!(format!("{:#}", err).contains("after 2 attempts"));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_wrong_width_rejected() {
    let (url, _hits) = serve(vec![("200 OK", r#"{"embeddings":[[1.0],[2.0]]}"#)]).await;
    let err = embed_batched(provider(&url, 0).as_ref(), &texts(), 8)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("expected 2"));
}
