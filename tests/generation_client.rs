use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use docent::config::GenerationConfig;
use docent::generation::{
    GenerateRequest, GenerationErrorKind, OllamaClient, PullProgress, SamplingOptions,
    TextGenerator,
};

/// Read one HTTP request: headers, then `Content-Length` bytes of body.
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
                    let lower = l.to_ascii_lowercase();
                    lower
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

/// Serve exactly one canned response, returning the base URL and a handle
/// that yields the raw request text.
async fn respond_once(
    status: &'static str,
    body: &'static str,
) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        request
    });
    (format!("http://{}", addr), handle)
}

fn client(url: &str) -> OllamaClient {
    let config = GenerationConfig {
        url: url.to_string(),
        generate_timeout_secs: 1,
        status_timeout_secs: 1,
        ..Default::default()
    };
    OllamaClient::new(&config).unwrap()
}

fn request() -> GenerateRequest {
    GenerateRequest {
        model: "llama3.2:1b".to_string(),
        prompt: "Say hi".to_string(),
        system: Some("Be brief.".to_string()),
        options: SamplingOptions {
            temperature: 0.7,
            context_length: 4096,
            top_p: 0.9,
            top_k: 40,
        },
    }
}

#[tokio::test]
async fn test_generate_success() {
    let (url, handle) = respond_once("200 OK", r#"{"response":"hi there","done":true}"#).await;
    let text = client(&url).generate(&request()).await.unwrap();
    assert_eq!(text, "hi there");

    let raw = handle.await.unwrap();
    assert!(raw.starts_with("POST /api/generate"));
    let body = &raw[raw.find("\r\n\r\n").unwrap() + 4..];
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(json["stream"], false);
    assert_eq!(json["system"], "Be brief.");
    assert_eq!(json["options"]["num_ctx"], 4096);
    assert_eq!(json["options"]["top_k"], 40);
}

#[tokio::test]
async fn test_generate_server_error_is_retryable_status() {
    let (url, _handle) = respond_once("500 Internal Server Error", r#"{"error":"boom"}"#).await;
    let err = client(&url).generate(&request()).await.unwrap_err();
    assert_eq!(err.kind, GenerationErrorKind::Status(500));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_generate_not_found_is_not_retryable() {
    let (url, _handle) = respond_once("404 Not Found", r#"{"error":"model not found"}"#).await;
    let err = client(&url).generate(&request()).await.unwrap_err();
    assert_eq!(err.kind, GenerationErrorKind::Status(404));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_generate_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(socket);
    });

    let err = client(&format!("http://{}", addr))
        .generate(&request())
        .await
        .unwrap_err();
    assert_eq!(err.kind, GenerationErrorKind::Timeout);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_generate_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{}", addr))
        .generate(&request())
        .await
        .unwrap_err();
    assert_eq!(err.kind, GenerationErrorKind::Connect);
}

#[tokio::test]
async fn test_check_connection() {
    let (url, _handle) = respond_once("200 OK", r#"{"models":[]}"#).await;
    let status = client(&url).check_connection().await;
    assert!(status.connected);
    assert_eq!(status.message, "Ollama is running");
}

#[tokio::test]
async fn test_list_models() {
    let body = r#"{"models":[{"name":"llama3.2:1b","size":1321098329,"modified_at":"2024-10-01T12:00:00Z","digest":"baf6a787fdffd633537aa2eb51cfd54cb93ff08e28040095462bb63daf552878","details":{"family":"llama"}}]}"#;
    let (url, _handle) = respond_once("200 OK", body).await;
    let models = client(&url).list_models().await.unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].name, "llama3.2:1b");
    assert_eq!(models[0].digest, "baf6a787fdff");
    assert_eq!(models[0].size_formatted, "1.2 GB");
    assert_eq!(models[0].details["family"], "llama");
}

#[tokio::test]
async fn test_pull_reports_progress() {
    let body = "{\"status\":\"pulling manifest\"}\n{\"status\":\"downloading\",\"total\":100,\"completed\":50}\n{\"status\":\"success\"}\n";
    let (url, _handle) = respond_once("200 OK", body).await;
    let mut seen = Vec::new();
    client(&url)
        .pull_model("llama3.2:1b", |p: &PullProgress| {
            seen.push((p.status.clone(), p.completed))
        })
        .await
        .unwrap();
    assert_eq!(
        seen,
        vec![
            ("pulling manifest".to_string(), None),
            ("downloading".to_string(), Some(50)),
            ("success".to_string(), None),
        ]
    );
}
