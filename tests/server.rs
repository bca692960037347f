use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use microhttp::middleware::layer;
use microhttp::{BoxError, IntoReply, Next, Reply, Request, Server, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

type Trace = Arc<Mutex<Vec<&'static str>>>;

fn marker(name: &'static str, trace: &Trace) -> microhttp::middleware::BoxMiddleware {
    let trace = Arc::clone(trace);
    layer(move |req: Request, next: Next| {
        let trace = Arc::clone(&trace);
        async move {
            trace.lock().unwrap().push(name);
            next.run(req).await
        }
    })
}

async fn spawn_app(trace: Trace) -> SocketAddr {
    let mut app = Server::builder();
    app.before_all(marker("global", &trace));

    app.route("GET /ping", |_req: Request| async {
        serde_json::json!({ "resp": "pong" })
    })
    .unwrap()
    .route("GET /todos/:id", |req: Request| async move {
        format!("todo {}", req.param("id").unwrap_or_default())
    })
    .unwrap()
    .route("GET /search", |req: Request| async move {
        let q = req.query_param("q").unwrap_or("none").to_owned();
        Reply::new(q).content_type("text/plain")
    })
    .unwrap()
    .route("DELETE /todos/:id", |_req: Request| async { ("", 204) })
    .unwrap()
    .route("POST /login", |req: Request| async move {
        match req.headers().get("username") {
            Some(_) => ("", 200, [("Authorization", "token")]).into_reply(),
            None => ("username can not be found", 422).into_reply(),
        }
    })
    .unwrap()
    .route("GET /fails", |_req: Request| async {
        Err::<Reply, BoxError>("storage offline".into())
    })
    .unwrap()
    .route_with(
        "GET /guarded",
        [marker("first", &trace), marker("second", &trace)],
        |_req: Request| async { "guarded" },
    )
    .unwrap();

    let server = app
        .bind(ServerConfig::new("127.0.0.1", 0))
        .await
        .expect("bind test server");
    let addr = server.local_addr();
    tokio::spawn(server.run());
    addr
}

/// Reads one response: the head, then exactly `Content-Length` body bytes.
async fn read_response(stream: &mut TcpStream) -> String {
    let mut raw = Vec::new();
    let mut byte = [0u8; 1];
    while !raw.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        assert_eq!(n, 1, "connection closed mid-response");
        raw.push(byte[0]);
    }

    let head = String::from_utf8(raw.clone()).unwrap();
    let length: usize = head
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length: "))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);

    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await.unwrap();
    raw.extend_from_slice(&body);
    String::from_utf8(raw).unwrap()
}

async fn exchange(stream: &mut TcpStream, request: &str) -> String {
    stream.write_all(request.as_bytes()).await.unwrap();
    read_response(stream).await
}

#[tokio::test]
async fn ping_returns_spaced_json() {
    let addr = spawn_app(Trace::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let response = exchange(&mut stream, "GET /ping HTTP/1.1\r\nHost: test\r\n\r\n").await;
    assert_eq!(
        response,
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 16\r\n\r\n{\"resp\": \"pong\"}"
    );
}

#[tokio::test]
async fn connection_survives_400_and_404() {
    let addr = spawn_app(Trace::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let bad = exchange(&mut stream, "GET /ping HTTP/1.1\r\nHost: test\r\n").await;
    assert!(bad.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{bad}");

    let missing = exchange(&mut stream, "DELETE /nope HTTP/1.1\r\n\r\n").await;
    assert!(missing.starts_with("HTTP/1.1 404 Not Found\r\n"), "{missing}");
    assert!(missing.ends_with("Content-Length: 0\r\n\r\n"));

    let ok = exchange(&mut stream, "GET /todos/7 HTTP/1.1\r\n\r\n").await;
    assert!(ok.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(ok.ends_with("\r\n\r\ntodo 7"));
}

#[tokio::test]
async fn statuses_headers_and_content_types() {
    let addr = spawn_app(Trace::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let deleted = exchange(&mut stream, "DELETE /todos/3 HTTP/1.1\r\n\r\n").await;
    assert_eq!(
        deleted,
        "HTTP/1.1 204 No Content\r\nContent-Type: application/json\r\nContent-Length: 0\r\n\r\n"
    );

    let login = exchange(&mut stream, "POST /login HTTP/1.1\r\nusername: ada\r\n\r\n").await;
    assert_eq!(
        login,
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 0\r\nAuthorization: token\r\n\r\n"
    );

    let rejected = exchange(&mut stream, "POST /login HTTP/1.1\r\n\r\n").await;
    assert!(rejected.starts_with("HTTP/1.1 422 Unprocessable Entity\r\n"));
    assert!(rejected.ends_with("\r\n\r\nusername can not be found"));

    let search = exchange(&mut stream, "GET /search?q=milk&x HTTP/1.1\r\n\r\n").await;
    assert!(search.contains("Content-Type: text/plain\r\n"));
    assert!(search.ends_with("\r\n\r\nmilk"));
}

#[tokio::test]
async fn global_then_route_middleware() {
    let trace = Trace::default();
    let addr = spawn_app(Arc::clone(&trace)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let response = exchange(&mut stream, "GET /guarded HTTP/1.1\r\n\r\n").await;
    assert!(response.ends_with("\r\n\r\nguarded"));
    assert_eq!(*trace.lock().unwrap(), vec!["global", "first", "second"]);
}

#[tokio::test]
async fn handler_error_answers_500_then_closes() {
    let addr = spawn_app(Trace::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let response = exchange(&mut stream, "GET /fails HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));

    let mut rest = Vec::new();
    let n = stream.read_to_end(&mut rest).await.unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn serves_connections_concurrently() {
    let addr = spawn_app(Trace::default()).await;

    // Hold one connection open without sending anything.
    let _idle = TcpStream::connect(addr).await.unwrap();

    let clients = (0..8).map(|i| {
        tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let request = format!("GET /todos/{i} HTTP/1.1\r\n\r\n");
            let response = exchange(&mut stream, &request).await;
            assert!(response.ends_with(&format!("todo {i}")));
        })
    });

    for client in clients.collect::<Vec<_>>() {
        client.await.unwrap();
    }
}
