//! REST row store integration tests
//!
//! A one-shot HTTP endpoint on a local TCP port answers each request with a
//! canned status and body and hands the raw request back to the test.

use std::sync::Arc;

use shared::{TableKey, TableRecord};
use table_client::{ClientConfig, FailureKind, HttpClient, SnapshotFetcher, TableSource};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const ROW_7: &str = r#"[{"id":7,"code":"7","name":"Mesa 7","description":null,"needs_attention":true}]"#;

/// Raw request as received, header names lowercased
#[derive(Debug)]
struct Captured {
    request_line: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl Captured {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Serve `responses` in order, one connection each
async fn serve(responses: Vec<(u16, &'static str)>) -> (String, mpsc::UnboundedReceiver<Captured>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for (status, body) in responses {
            let (mut stream, _) = listener.accept().await.unwrap();
            let captured = read_request(&mut stream).await;
            let _ = tx.send(captured);

            let reply = format!(
                "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = stream.write_all(reply.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    (base_url, rx)
}

async fn read_request(stream: &mut TcpStream) -> Captured {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before headers");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n").filter(|l| !l.is_empty());
    let request_line = lines.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(n, v)| (n.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(n, _)| n == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Captured {
        request_line,
        headers,
        body: String::from_utf8_lossy(&buf[header_end..]).to_string(),
    }
}

fn client(base_url: &str) -> HttpClient {
    HttpClient::new(&ClientConfig::new(base_url).with_api_key("anon-key")).unwrap()
}

// ========== Read ==========

#[tokio::test]
async fn test_read_sends_select_filter_and_auth_headers() {
    let (base_url, mut requests) = serve(vec![(200, ROW_7)]).await;

    let row = client(&base_url)
        .read_table(&TableKey::Id(7))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.name.as_deref(), Some("Mesa 7"));
    assert!(row.needs_attention);

    let request = requests.recv().await.unwrap();
    assert!(request.request_line.starts_with("GET /rest/v1/dining_tables?"));
    assert!(request.request_line.contains("select=id,code,name,description,needs_attention"));
    assert!(request.request_line.contains("id=eq.7"));
    assert_eq!(request.header("apikey"), Some("anon-key"));
    assert_eq!(request.header("authorization"), Some("Bearer anon-key"));
}

#[tokio::test]
async fn test_read_without_key_sends_no_auth() {
    let (base_url, mut requests) = serve(vec![(200, ROW_7)]).await;
    let client = HttpClient::new(&ClientConfig::new(&base_url)).unwrap();

    client
        .read_table(&TableKey::Code("7".into()))
        .await
        .unwrap();

    let request = requests.recv().await.unwrap();
    assert!(request.request_line.contains("code=eq.7"));
    assert_eq!(request.header("apikey"), None);
    assert_eq!(request.header("authorization"), None);
}

#[tokio::test]
async fn test_read_empty_array_is_no_row() {
    let (base_url, _requests) = serve(vec![(200, "[]"), (200, "[]")]).await;
    let client = client(&base_url);

    assert_eq!(client.read_table(&TableKey::Id(99)).await.unwrap(), None);

    let fetcher = SnapshotFetcher::new(Arc::new(client));
    let err = fetcher.fetch(&TableKey::Id(99)).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::NotFound);
}

#[tokio::test]
async fn test_read_status_mapping() {
    let (base_url, _requests) = serve(vec![
        (404, r#"{"message":"relation not found"}"#),
        (400, r#"{"message":"bad filter"}"#),
        (500, r#"{"message":"boom"}"#),
        (503, ""),
    ])
    .await;
    let client = client(&base_url);
    let key = TableKey::Id(7);

    let kinds = [
        client.read_table(&key).await.unwrap_err().kind(),
        client.read_table(&key).await.unwrap_err().kind(),
        client.read_table(&key).await.unwrap_err().kind(),
        client.read_table(&key).await.unwrap_err().kind(),
    ];
    assert_eq!(
        kinds,
        [
            FailureKind::NotFound,
            FailureKind::Transient,
            FailureKind::Transient,
            FailureKind::Transient,
        ]
    );
}

#[tokio::test]
async fn test_unreachable_store_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let err = client(&base_url)
        .read_table(&TableKey::Id(1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Transient);
}

// ========== Write ==========

#[tokio::test]
async fn test_write_patches_flag_and_returns_row() {
    let (base_url, mut requests) = serve(vec![(200, ROW_7)]).await;

    let row = client(&base_url).write_attention(7, true).await.unwrap();
    assert_eq!(row, Some(TableRecord::new(7, "7").with_name("Mesa 7").with_attention(true)));

    let request = requests.recv().await.unwrap();
    assert!(request.request_line.starts_with("PATCH /rest/v1/dining_tables?"));
    assert!(request.request_line.contains("id=eq.7"));
    assert_eq!(request.header("prefer"), Some("return=representation"));
    assert_eq!(request.header("apikey"), Some("anon-key"));
    let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(body, serde_json::json!({ "needs_attention": true }));
}

#[tokio::test]
async fn test_write_matching_nothing_is_write_failure() {
    let (base_url, _requests) = serve(vec![(200, "[]")]).await;

    let err = client(&base_url).write_attention(42, true).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::WriteFailure);
    assert!(err.to_string().contains("#42"));
}

#[tokio::test]
async fn test_write_error_statuses_are_write_failures() {
    let (base_url, _requests) = serve(vec![(404, ""), (401, ""), (500, "")]).await;
    let client = client(&base_url);

    for _ in 0..3 {
        let err = client.write_attention(7, true).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::WriteFailure);
    }
}
