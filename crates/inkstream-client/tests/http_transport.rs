//! `HttpTransport` against raw HTTP responders on a local socket.

use inkstream_client::{
    CONNECTION_LOST_MESSAGE, CONNECT_FAILED_MESSAGE, ConsumerState, EventSource, HttpTransport,
    StreamConsumer, Transport, TransportEvent,
};
use inkstream_models::Message;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use url::Url;

const SSE_HEAD: &str = "HTTP/1.1 200 OK\r\n\
    content-type: text/event-stream\r\n\
    cache-control: no-cache\r\n\
    connection: close\r\n\r\n";

fn transport() -> HttpTransport {
    HttpTransport::with_client(reqwest::Client::builder().no_proxy().build().unwrap())
}

fn frames(payloads: &[&str]) -> Vec<u8> {
    payloads
        .iter()
        .map(|payload| format!("data: {payload}\n\n"))
        .collect::<String>()
        .into_bytes()
}

fn json_head(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        body.len()
    )
}

async fn read_request(socket: &mut TcpStream) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|window| window == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
}

/// Answer one request with `head`, then `body` in `chunk_size` pieces, then hang up.
async fn serve_once(head: String, body: Vec<u8>, chunk_size: usize) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        let _ = socket.write_all(head.as_bytes()).await;
        for piece in body.chunks(chunk_size) {
            if socket.write_all(piece).await.is_err() {
                return;
            }
            let _ = socket.flush().await;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let _ = socket.shutdown().await;
    });

    Url::parse(&format!("http://{addr}/")).unwrap()
}

async fn run_to_end(consumer: &mut StreamConsumer<HttpTransport>) -> ConsumerState {
    tokio::time::timeout(Duration::from_secs(10), consumer.run(|_| {}))
        .await
        .expect("stream reaches a terminal state")
}

async fn next(source: &mut impl EventSource) -> Option<TransportEvent> {
    tokio::time::timeout(Duration::from_secs(10), source.next_event())
        .await
        .expect("event arrives")
}

#[tokio::test]
async fn split_frames_and_multibyte_text_reach_consumer() {
    let body = frames(&[
        r#"{"content":"Hello"}"#,
        r#"{"content":" wörld"}"#,
        "[DONE]",
    ]);
    let url = serve_once(SSE_HEAD.to_string(), body, 3).await;

    let mut consumer = StreamConsumer::new(transport(), url);
    consumer.submit("hi", Vec::new()).unwrap();

    assert_eq!(run_to_end(&mut consumer).await, ConsumerState::Done);
    assert_eq!(
        consumer.history(),
        &[Message::user("hi"), Message::assistant("Hello wörld")]
    );
}

#[tokio::test]
async fn event_stream_response_opens_before_frames() {
    let body = frames(&[r#"{"content":"a"}"#, "[DONE]"]);
    let url = serve_once(SSE_HEAD.to_string(), body, 64).await;

    let mut source = transport().open(url);
    assert_eq!(next(&mut source).await, Some(TransportEvent::Open));
    assert_eq!(
        next(&mut source).await,
        Some(TransportEvent::Message(r#"{"content":"a"}"#.to_string()))
    );
    assert_eq!(
        next(&mut source).await,
        Some(TransportEvent::Message("[DONE]".to_string()))
    );
}

#[tokio::test]
async fn error_status_is_a_connect_failure() {
    let body = r#"{"success":false,"error":"Message is required"}"#;
    let url = serve_once(
        json_head("400 Bad Request", body),
        body.as_bytes().to_vec(),
        body.len(),
    )
    .await;

    let mut source = transport().open(url);
    match next(&mut source).await {
        Some(TransportEvent::Error(detail)) => assert!(detail.contains("400"), "{detail}"),
        other => panic!("expected error event, got {other:?}"),
    }

    let url = serve_once(
        json_head("500 Internal Server Error", body),
        body.as_bytes().to_vec(),
        body.len(),
    )
    .await;
    let mut consumer = StreamConsumer::new(transport(), url);
    consumer.submit("hi", Vec::new()).unwrap();

    assert_eq!(run_to_end(&mut consumer).await, ConsumerState::Errored);
    assert_eq!(
        consumer.history(),
        &[Message::user("hi"), Message::assistant(CONNECT_FAILED_MESSAGE)]
    );
}

#[tokio::test]
async fn success_without_event_stream_is_a_connect_failure() {
    let body = r#"{"content":"not a stream"}"#;
    let url = serve_once(json_head("200 OK", body), body.as_bytes().to_vec(), 8).await;

    let mut consumer = StreamConsumer::new(transport(), url);
    consumer.submit("hi", Vec::new()).unwrap();

    assert_eq!(run_to_end(&mut consumer).await, ConsumerState::Errored);
    assert_eq!(
        consumer.history().last().unwrap().text(),
        CONNECT_FAILED_MESSAGE
    );
}

#[tokio::test]
async fn refused_connection_is_a_connect_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = Url::parse(&format!("http://{addr}/")).unwrap();
    let mut consumer = StreamConsumer::new(transport(), url);
    consumer.submit("hi", Vec::new()).unwrap();

    assert_eq!(run_to_end(&mut consumer).await, ConsumerState::Errored);
    assert_eq!(
        consumer.history().last().unwrap().text(),
        CONNECT_FAILED_MESSAGE
    );
}

#[tokio::test]
async fn body_ending_without_terminal_frame_is_connection_lost() {
    let body = frames(&[r#"{"content":"cut"}"#]);
    let url = serve_once(SSE_HEAD.to_string(), body, 5).await;

    let mut consumer = StreamConsumer::new(transport(), url);
    consumer.submit("hi", Vec::new()).unwrap();

    assert_eq!(run_to_end(&mut consumer).await, ConsumerState::Errored);
    assert_eq!(
        consumer.history(),
        &[
            Message::user("hi"),
            Message::assistant("cut"),
            Message::assistant(CONNECTION_LOST_MESSAGE),
        ]
    );
}

#[tokio::test]
async fn close_drops_the_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (hung_up_tx, hung_up_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        let _ = socket.write_all(SSE_HEAD.as_bytes()).await;
        let _ = socket.write_all(&frames(&[r#"{"content":"a"}"#])).await;
        // Keep the stream open with comments until the client goes away.
        loop {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if socket.write_all(b": keep-alive\n\n").await.is_err() {
                let _ = hung_up_tx.send(());
                return;
            }
        }
    });

    let url = Url::parse(&format!("http://{addr}/")).unwrap();
    let mut source = transport().open(url);
    assert_eq!(next(&mut source).await, Some(TransportEvent::Open));
    assert_eq!(
        next(&mut source).await,
        Some(TransportEvent::Message(r#"{"content":"a"}"#.to_string()))
    );

    source.close();
    assert_eq!(next(&mut source).await, None);

    tokio::time::timeout(Duration::from_secs(10), hung_up_rx)
        .await
        .expect("server sees the connection close")
        .unwrap();
}
