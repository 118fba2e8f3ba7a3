// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for black-box integration tests against the real
//! `outrig-server` binary, driven the way an SDK-instrumented process and a
//! UI tab would: a newline-delimited JSON packet connection over a Unix
//! socket, and a WebSocket RPC connection to `/ws`.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Once;
use std::time::Duration;

use serde_json::{json, Value};
use uuid::Uuid;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Resolve the path to the compiled `outrig-server` binary.
pub fn server_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs -> tests -> workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("outrig-server")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A running `outrig-server` process, killed on drop.
pub struct ServerProcess {
    child: Child,
    port: u16,
    domain_socket: PathBuf,
    _socket_dir: tempfile::TempDir,
}

impl ServerProcess {
    /// Spawn `outrig-server` with a fresh HTTP port and domain socket.
    pub fn start() -> anyhow::Result<Self> {
        ensure_crypto();
        let binary = server_binary();
        anyhow::ensure!(binary.exists(), "outrig-server binary not found at {}", binary.display());

        let port = free_port()?;
        let dir = tempfile::tempdir()?;
        let domain_socket = dir.path().join("outrig.sock");

        let child = Command::new(&binary)
            .args([
                "--host",
                "127.0.0.1",
                "--port",
                &port.to_string(),
                "--domain-socket-path",
                &domain_socket.to_string_lossy(),
                "--tcp-addr",
                "-",
                "--log-format",
                "text",
                "--log-level",
                "warn",
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, port, domain_socket, _socket_dir: dir })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn domain_socket(&self) -> &Path {
        &self.domain_socket
    }

    pub fn health_url(&self) -> String {
        format!("http://127.0.0.1:{}/healthz", self.port)
    }

    pub fn ws_url(&self, route_id: &str) -> String {
        format!("ws://127.0.0.1:{}/ws?routeId={route_id}", self.port)
    }

    /// Poll `/healthz` until it responds successfully.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = reqwest::Client::new();
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("outrig-server did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(self.health_url()).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Minimal SDK-style packet connection: dials the server's domain socket,
/// sends the `packet` mode header, an `appinfo` packet, and lets the caller
/// push further lines in the same newline-delimited JSON wire format.
pub struct PacketClient {
    stream: tokio::net::UnixStream,
    pub apprun_id: Uuid,
}

impl PacketClient {
    pub async fn connect(domain_socket: &Path) -> anyhow::Result<Self> {
        use tokio::io::AsyncWriteExt;

        let apprun_id = Uuid::new_v4();
        let mut stream = tokio::net::UnixStream::connect(domain_socket).await?;

        let header = json!({ "mode": "packet", "apprunid": apprun_id }).to_string() + "\n";
        stream.write_all(header.as_bytes()).await?;

        let appinfo = json!({
            "type": "appinfo",
            "data": {
                "apprunid": apprun_id,
                "appname": "specs-harness",
                "modulename": "specs-harness",
                "executable": "specs-harness",
                "args": [],
                "env": [],
                "starttime": 0,
                "pid": 1,
                "user": "",
                "hostname": "",
                "buildinfo": { "goversion": "", "path": "", "version": "", "settings": {} },
                "outrigsdkversion": "0.0.0",
            }
        })
        .to_string()
            + "\n";
        stream.write_all(appinfo.as_bytes()).await?;

        Ok(Self { stream, apprun_id })
    }

    pub async fn send_log(&mut self, linenum: i64, msg: &str) -> anyhow::Result<()> {
        use tokio::io::AsyncWriteExt;
        let line = json!({
            "type": "log",
            "data": { "linenum": linenum, "ts": 0, "msg": msg, "source": "/dev/stdout" }
        })
        .to_string()
            + "\n";
        self.stream.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

/// Minimal WebSocket RPC client against `/ws`.
pub struct WsClient {
    socket: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    next_req_id: u64,
}

impl WsClient {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let (socket, _) = tokio_tungstenite::connect_async(url).await?;
        Ok(Self { socket, next_req_id: 0 })
    }

    /// Send a request and wait for its matching response.
    pub async fn call(&mut self, command: &str, data: Value) -> anyhow::Result<Value> {
        use futures_util::{SinkExt, StreamExt};

        self.next_req_id += 1;
        let req_id = self.next_req_id.to_string();
        let request = json!({ "command": command, "reqid": req_id, "data": data }).to_string();
        self.socket.send(tokio_tungstenite::tungstenite::Message::Text(request.into())).await?;

        loop {
            let Some(msg) = self.socket.next().await else {
                anyhow::bail!("ws connection closed before response arrived");
            };
            let msg = msg?;
            let tokio_tungstenite::tungstenite::Message::Text(text) = msg else { continue };
            let parsed: Value = serde_json::from_str(&text)?;
            if parsed.get("resid").and_then(Value::as_str) == Some(req_id.as_str()) {
                if let Some(err) = parsed.get("error") {
                    anyhow::bail!("rpc error: {err}");
                }
                return Ok(parsed.get("data").cloned().unwrap_or(Value::Null));
            }
        }
    }

    /// Read the next unsolicited push (e.g. `logstreamupdate`, `eventupdate`).
    pub async fn next_push(&mut self, timeout: Duration) -> anyhow::Result<Value> {
        use futures_util::StreamExt;

        let msg = tokio::time::timeout(timeout, self.socket.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("ws connection closed"))??;
        let tokio_tungstenite::tungstenite::Message::Text(text) = msg else {
            anyhow::bail!("expected text frame");
        };
        Ok(serde_json::from_str(&text)?)
    }
}
