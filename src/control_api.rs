// SPDX-License-Identifier: GPL-2.0
//
// coregov: control API
//
// Small local HTTP server exposing the governor's attribute surface and
// metrics as JSON. It plays the role a sysfs attribute group would play
// in-kernel: GET reads an attribute, POST stores it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{info, warn};

use crate::governor::Governor;
use crate::lifecycle::Command;
use crate::settings::{AttrSnapshot, Settings};
use crate::stats::StatusStore;

pub struct ApiContext {
    pub settings: Arc<Settings>,
    pub governor: Arc<Governor>,
    pub status: Arc<StatusStore>,
    pub lifecycle_tx: crossbeam::channel::Sender<Command>,
}

pub fn start(
    port: u16,
    ctx: Arc<ApiContext>,
    shutdown: Arc<AtomicBool>,
) -> Result<std::thread::JoinHandle<()>> {
    let bind_addr = format!("127.0.0.1:{}", port);
    info!("control API starting on http://{}", bind_addr);

    let handle = std::thread::Builder::new()
        .name("coregov-api".into())
        .spawn(move || {
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    warn!("failed to create runtime for control API: {}", e);
                    return;
                }
            };

            rt.block_on(async {
                let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
                    Ok(l) => l,
                    Err(e) => {
                        warn!("failed to bind control API to {}: {}", bind_addr, e);
                        return;
                    }
                };

                loop {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }

                    match tokio::time::timeout(Duration::from_millis(100), listener.accept()).await
                    {
                        Ok(Ok((stream, addr))) => {
                            let ctx = Arc::clone(&ctx);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, ctx).await {
                                    log::debug!("connection from {}: {}", addr, e);
                                }
                            });
                        }
                        Ok(Err(e)) => {
                            log::debug!("accept error: {}", e);
                        }
                        Err(_) => {
                            // Timeout; re-check shutdown.
                            continue;
                        }
                    }
                }
            });
        })?;

    Ok(handle)
}

async fn handle_connection(mut stream: tokio::net::TcpStream, ctx: Arc<ApiContext>) -> Result<()> {
    use tokio::io::AsyncReadExt;

    let mut buffer = [0; 4096];
    let n = match stream.read(&mut buffer).await {
        Ok(0) => return Ok(()),
        Ok(n) => n,
        Err(_) => return Ok(()),
    };

    let request = String::from_utf8_lossy(&buffer[..n]).into_owned();
    let Some(request_line) = request.lines().next() else {
        return Ok(());
    };
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return respond(&mut stream, 400, r#"{"error": "invalid request"}"#).await;
    }
    let method = parts[0];
    let path = parts[1].split('?').next().unwrap_or(parts[1]);
    let body = request
        .split_once("\r\n\r\n")
        .map(|(_, b)| b)
        .unwrap_or("");

    match (method, path) {
        ("GET", "/") => {
            let index = r#"{
  "api": "coregov control API",
  "endpoints": {
    "/attrs": "GET current attributes; POST a partial JSON update",
    "/status": "GET latest governor metrics",
    "/suspend": "POST - park the governor and offline non-boot cores",
    "/resume": "POST - restore non-boot cores and restart ticks"
  }
}"#;
            respond(&mut stream, 200, index).await
        }
        ("GET", "/attrs") => {
            let json = serde_json::to_string_pretty(&ctx.settings.snapshot())?;
            respond(&mut stream, 200, &json).await
        }
        ("POST", "/attrs") => match serde_json::from_str::<AttrSnapshot>(body) {
            Ok(attrs) => {
                // The enabled flag routes through the governor so the state
                // machine transition happens under the governor lock.
                if let Some(enabled) = attrs.enabled {
                    ctx.governor.set_enabled(enabled);
                }
                ctx.settings.apply(&attrs);
                let json = serde_json::to_string_pretty(&ctx.settings.snapshot())?;
                respond(&mut stream, 200, &json).await
            }
            Err(e) => {
                let msg = format!(r#"{{"error": "bad attribute update: {}"}}"#, e);
                respond(&mut stream, 400, &msg).await
            }
        },
        ("GET", "/status") => {
            let json = match ctx.status.latest() {
                Some(m) => serde_json::to_string_pretty(&*m)?,
                None => r#"{"status": "no ticks yet"}"#.to_string(),
            };
            respond(&mut stream, 200, &json).await
        }
        ("POST", "/suspend") => {
            let _ = ctx.lifecycle_tx.send(Command::Suspend);
            respond(&mut stream, 200, r#"{"ok": true}"#).await
        }
        ("POST", "/resume") => {
            let _ = ctx.lifecycle_tx.send(Command::Resume);
            respond(&mut stream, 200, r#"{"ok": true}"#).await
        }
        _ => {
            let msg = format!(r#"{{"error": "not found", "path": "{}"}}"#, path);
            respond(&mut stream, 404, &msg).await
        }
    }
}

async fn respond(stream: &mut tokio::net::TcpStream, status: u16, body: &str) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Internal Server Error",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status, status_text, body.len(), body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
