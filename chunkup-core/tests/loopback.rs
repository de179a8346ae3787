use chunkup_core::{
    http1::Http1Factory, TransferError, UploadError, UploadRequestBuilder,
};
use rand::{rngs::SmallRng, RngCore, SeedableRng};
use std::{sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

/// What the server saw of one request.
struct Received {
    head: String,
    body: Vec<u8>,
}

/// How the server answers once it has read the whole body.
#[derive(Clone, Copy)]
enum Answer {
    /// 100 Continue, then 201 with the body length as a content-length payload.
    Created,
    /// 200 with a chunked payload echoing the body length.
    ChunkedOk,
    /// Close the connection without answering.
    Hangup,
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

async fn serve(answer: Answer) -> (String, JoinHandle<anyhow::Result<Received>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        receive(stream, answer).await
    });
    (format!("http://{address}"), server)
}

async fn receive(stream: TcpStream, answer: Answer) -> anyhow::Result<Received> {
    let mut reader = BufReader::new(stream);
    let mut head = String::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        head.push_str(&line);
        if line == "\r\n" {
            break;
        }
    }

    let mut body = Vec::new();
    loop {
        let mut size = String::new();
        reader.read_line(&mut size).await?;
        let size = usize::from_str_radix(size.trim_end(), 16)?;
        if size == 0 {
            let mut trailer = String::new();
            reader.read_line(&mut trailer).await?;
            anyhow::ensure!(trailer == "\r\n", "unexpected trailer {trailer:?}");
            break;
        }
        let mut chunk = vec![0; size + 2];
        reader.read_exact(&mut chunk).await?;
        anyhow::ensure!(chunk.ends_with(b"\r\n"), "chunk is not terminated");
        body.extend_from_slice(&chunk[..size]);
    }

    let mut stream = reader.into_inner();
    let length = body.len().to_string();
    match answer {
        Answer::Created => {
            let response = format!(
                "HTTP/1.1 100 Continue\r\n\r\n\
                 HTTP/1.1 201 Created\r\ncontent-length: {}\r\nx-server: loopback\r\n\r\n{}",
                length.len(),
                length
            );
            stream.write_all(response.as_bytes()).await?;
        }
        Answer::ChunkedOk => {
            let response = format!(
                "HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n{:x}\r\n{}\r\n0\r\n\r\n",
                length.len(),
                length
            );
            stream.write_all(response.as_bytes()).await?;
        }
        Answer::Hangup => {}
    }
    stream.shutdown().await?;
    Ok(Received { head, body })
}

#[test]
#[ntest::timeout(10000)]
fn hello_world_over_tcp() {
    runtime().block_on(async {
        let (base, server) = serve(Answer::Created).await;
        let mut session = UploadRequestBuilder::new(
            Arc::new(Http1Factory::default()),
            format!("{base}/upload"),
        )
        .query_parameter("name", "greeting")
        .header("content-type", "text/plain")
        .user_agent("loopback/1")
        .open()
        .unwrap();

        session.push(b"hello ".to_vec()).await.unwrap();
        session.push(b"world".to_vec()).await.unwrap();
        let response = session.close().await.unwrap();

        assert_eq!(response.status(), 201);
        assert_eq!(response.header("x-server"), Some("loopback"));
        assert_eq!(response.text(), "11");

        let received = server.await.unwrap().unwrap();
        assert_eq!(received.body, b"hello world");
        assert!(received.head.starts_with("POST /upload?name=greeting HTTP/1.1\r\n"));
        assert!(received.head.contains("user-agent: loopback/1\r\n"));
        assert!(received.head.contains("content-type: text/plain\r\n"));
        assert!(received.head.contains("transfer-encoding: chunked\r\n"));
    });
}

#[test]
#[ntest::timeout(10000)]
fn immediate_close_over_tcp() {
    runtime().block_on(async {
        let (base, server) = serve(Answer::ChunkedOk).await;
        let mut session = UploadRequestBuilder::new(Arc::new(Http1Factory::default()), base)
            .open()
            .unwrap();
        let response = session.close().await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text(), "0");

        let received = server.await.unwrap().unwrap();
        assert!(received.body.is_empty());
        assert!(received.head.starts_with("POST / HTTP/1.1\r\n"));
    });
}

#[test]
#[ntest::timeout(20000)]
fn large_body_over_tcp() {
    runtime().block_on(async {
        let (base, server) = serve(Answer::ChunkedOk).await;
        let factory = Http1Factory {
            max_chunk: 8 * 1024,
            ..Default::default()
        };
        let mut session = UploadRequestBuilder::new(Arc::new(factory), base)
            .initial_buffer_size(64 * 1024)
            .open()
            .unwrap();

        let mut rng = SmallRng::seed_from_u64(7);
        let mut expected = Vec::new();
        let mut spare = Vec::new();
        for _ in 0..32 {
            spare.resize(64 * 1024, 0);
            rng.fill_bytes(&mut spare);
            expected.extend_from_slice(&spare);
            spare = session.push(spare).await.unwrap();
        }
        let response = session.close().await.unwrap();
        assert_eq!(response.text(), expected.len().to_string());

        let received = server.await.unwrap().unwrap();
        assert!(received.body == expected);
    });
}

#[test]
#[ntest::timeout(10000)]
fn hangup_is_a_transport_error() {
    runtime().block_on(async {
        let (base, server) = serve(Answer::Hangup).await;
        let mut session = UploadRequestBuilder::new(Arc::new(Http1Factory::default()), base)
            .open()
            .unwrap();
        session.push(b"abc".to_vec()).await.unwrap();

        let error = session.close().await.unwrap_err();
        assert!(matches!(
            error,
            UploadError::Transport(TransferError::ConnectionClosed)
        ));
        assert!(!session.is_open());
        assert_eq!(server.await.unwrap().unwrap().body, b"abc");
    });
}

#[test]
#[ntest::timeout(10000)]
fn refused_connection_is_a_transport_error() {
    runtime().block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let factory = Http1Factory {
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let mut session = UploadRequestBuilder::new(Arc::new(factory), format!("http://{address}/"))
            .open()
            .unwrap();
        let error = session.close().await.unwrap_err();
        assert!(matches!(
            error,
            UploadError::Transport(TransferError::Connect { .. })
        ));
        assert!(error.is_transient());
    });
}

#[test]
fn https_is_rejected_at_open() {
    let error = UploadRequestBuilder::new(Arc::new(Http1Factory::default()), "https://example.com/")
        .open()
        .unwrap_err();
    assert!(matches!(error, UploadError::Configuration(_)));
}
