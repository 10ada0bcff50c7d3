//! Shared utilities for the gateway integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use bridge_gateway::bridge::{spawn_curl_bridge, BridgeHandle, CurlGlobal};
use bridge_gateway::config::GatewayConfig;
use bridge_gateway::http::HttpServer;
use bridge_gateway::lifecycle::Shutdown;

/// Read one request head and return its request target.
async fn read_request_target(socket: &mut TcpStream) -> Option<String> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        head.extend_from_slice(&buf[..n]);
    }
    let line = String::from_utf8_lossy(&head);
    line.split_whitespace().nth(1).map(str::to_owned)
}

async fn write_response(socket: &mut TcpStream, status: u16, body: &str) {
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Start a mock backend on an ephemeral port. `respond` maps the request
/// target to a status and body.
pub async fn start_backend<F>(respond: F) -> SocketAddr
where
    F: Fn(&str) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let respond = std::sync::Arc::new(respond);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let respond = respond.clone();
            tokio::spawn(async move {
                if let Some(target) = read_request_target(&mut socket).await {
                    let (status, body) = respond(&target);
                    write_response(&mut socket, status, &body).await;
                }
            });
        }
    });
    addr
}

/// Backend answering `200 OK:{path}`.
pub async fn start_echo_backend() -> SocketAddr {
    start_backend(|target| (200, format!("OK:{target}"))).await
}

/// Backend that accepts connections and never answers.
pub async fn start_silent_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

/// A port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Gateway configuration pointed at `127.0.0.1:{target_port}`.
pub fn gateway_config(target_port: u16) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.address = "127.0.0.1".to_string();
    config.listener.port = 0;
    config.target.address = "127.0.0.1".to_string();
    config.target.port = target_port;
    config.response.server_name = "test-gateway".to_string();
    config
}

/// A gateway running inside the caller's `LocalSet`.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub bridge: BridgeHandle,
    pub shutdown: Shutdown,
    pub server: JoinHandle<Result<(), std::io::Error>>,
    pub bridge_task: JoinHandle<()>,
    _curl: CurlGlobal,
}

impl TestGateway {
    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }

    /// Trigger shutdown and wait for both tasks.
    pub async fn stop(self) {
        self.shutdown.trigger();
        self.server.await.unwrap().unwrap();
        self.bridge_task.await.unwrap();
    }
}

/// Start the gateway. Must be called from within a `LocalSet`.
pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let curl = CurlGlobal::acquire().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let (bridge, bridge_task) = spawn_curl_bridge(
        config.engine.clone(),
        &config.response.server_name,
        shutdown.subscribe(),
    )
    .unwrap();
    let server = HttpServer::new(&config, bridge.clone());
    let server = tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestGateway {
        addr,
        bridge,
        shutdown,
        server,
        bridge_task,
        _curl: curl,
    }
}

/// HTTP client that ignores proxy environment variables.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(20))
        .build()
        .unwrap()
}
