//! Docker volume plugin protocol
//!
//! Docker talks to volume plugins with JSON-over-HTTP POSTs on a Unix socket
//! (`/Plugin.Activate`, `/VolumeDriver.Create`, ...). Failures are reported
//! in-band: the HTTP status stays 200 and the `Err` field carries the message.

use std::collections::HashMap;
use std::convert::Infallible;
use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::driver::Driver;
use crate::error::VolumeError;
use crate::registry::VolumeRecord;

/// Content type Docker expects from plugins
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.2+json";

/// Plugin subsystem advertised on activation
pub const VOLUME_DRIVER: &str = "VolumeDriver";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Activate,
    Create,
    Remove,
    Mount,
    Unmount,
    Path,
    Get,
    List,
    Capabilities,
}

impl Endpoint {
    pub fn from_path(path: &str) -> Option<Self> {
        let endpoint = match path {
            "/Plugin.Activate" => Endpoint::Activate,
            "/VolumeDriver.Create" => Endpoint::Create,
            "/VolumeDriver.Remove" => Endpoint::Remove,
            "/VolumeDriver.Mount" => Endpoint::Mount,
            "/VolumeDriver.Unmount" => Endpoint::Unmount,
            "/VolumeDriver.Path" => Endpoint::Path,
            "/VolumeDriver.Get" => Endpoint::Get,
            "/VolumeDriver.List" => Endpoint::List,
            "/VolumeDriver.Capabilities" => Endpoint::Capabilities,
            _ => return None,
        };
        Some(endpoint)
    }
}

/// Request body shared by all volume endpoints
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeRequest {
    #[serde(default)]
    pub name: String,

    /// `docker volume create -o key=value` options (Create only)
    #[serde(default)]
    pub opts: Option<HashMap<String, String>>,

    /// Caller identifier (Mount/Unmount only)
    #[serde(default, rename = "ID")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Volume {
    pub name: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub mountpoint: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Capabilities {
    pub scope: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implements: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Volume>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<Volume>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,

    /// Empty on success
    pub err: String,
}

impl PluginResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            err: message.into(),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        !self.err.is_empty()
    }
}

fn mountpoint_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn volume_entry(record: VolumeRecord) -> Volume {
    Volume {
        name: record.name,
        mountpoint: mountpoint_string(&record.mountpoint),
        status: None,
    }
}

fn volume_detail(record: VolumeRecord) -> Volume {
    let status = HashMap::from([
        ("bucket".to_string(), serde_json::Value::from(record.bucket.clone())),
        (
            "connections".to_string(),
            serde_json::Value::from(record.connections),
        ),
    ]);
    Volume {
        status: Some(status),
        ..volume_entry(record)
    }
}

fn failed(endpoint: Endpoint, name: &str, err: VolumeError) -> PluginResponse {
    warn!("{:?} {:?} failed ({}): {}", endpoint, name, err.code(), err);
    PluginResponse::error(err.to_string())
}

/// Run one plugin call against the driver
pub async fn dispatch(driver: &Driver, endpoint: Endpoint, body: &[u8]) -> PluginResponse {
    let request: VolumeRequest = if body.iter().all(u8::is_ascii_whitespace) {
        VolumeRequest::default()
    } else {
        match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(e) => return PluginResponse::error(format!("invalid request body: {}", e)),
        }
    };
    let name = request.name.as_str();
    debug!("{:?} name={:?} id={:?}", endpoint, name, request.id);

    match endpoint {
        Endpoint::Activate => PluginResponse {
            implements: Some(vec![VOLUME_DRIVER.to_string()]),
            ..Default::default()
        },
        Endpoint::Create => {
            let options = request.opts.clone().unwrap_or_default();
            match driver.create(name, &options).await {
                Ok(()) => PluginResponse::default(),
                Err(e) => failed(endpoint, name, e),
            }
        }
        Endpoint::Remove => match driver.remove(name).await {
            Ok(()) => PluginResponse::default(),
            Err(e) => failed(endpoint, name, e),
        },
        Endpoint::Mount => match driver.mount(name).await {
            Ok(path) => PluginResponse {
                mountpoint: Some(mountpoint_string(&path)),
                ..Default::default()
            },
            Err(e) => failed(endpoint, name, e),
        },
        Endpoint::Unmount => match driver.unmount(name).await {
            Ok(()) => PluginResponse::default(),
            Err(e) => failed(endpoint, name, e),
        },
        Endpoint::Path => match driver.path(name).await {
            Ok(path) => PluginResponse {
                mountpoint: Some(mountpoint_string(&path)),
                ..Default::default()
            },
            Err(e) => failed(endpoint, name, e),
        },
        Endpoint::Get => match driver.get(name).await {
            Ok(record) => PluginResponse {
                volume: Some(volume_detail(record)),
                ..Default::default()
            },
            Err(e) => failed(endpoint, name, e),
        },
        Endpoint::List => PluginResponse {
            volumes: Some(driver.list().await.into_iter().map(volume_entry).collect()),
            ..Default::default()
        },
        Endpoint::Capabilities => PluginResponse {
            capabilities: Some(Capabilities {
                scope: driver.capabilities().scope.as_str().to_string(),
            }),
            ..Default::default()
        },
    }
}

fn json_response(status: StatusCode, body: &PluginResponse) -> Response<Full<Bytes>> {
    let payload = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    let mut response = Response::new(Full::new(Bytes::from(payload)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(PLUGIN_CONTENT_TYPE));
    response
}

async fn route(driver: &Driver, request: Request<Incoming>) -> Response<Full<Bytes>> {
    let path = request.uri().path().to_string();

    let Some(endpoint) = Endpoint::from_path(&path) else {
        debug!("Unknown endpoint {}", path);
        return json_response(
            StatusCode::NOT_FOUND,
            &PluginResponse::error(format!("unknown endpoint {}", path)),
        );
    };

    if request.method() != Method::POST {
        return json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            &PluginResponse::error(format!("{} requires POST", path)),
        );
    }

    let body = match request.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                &PluginResponse::error(format!("failed to read request body: {}", e)),
            )
        }
    };

    json_response(StatusCode::OK, &dispatch(driver, endpoint, &body).await)
}

/// Bind the plugin socket, replacing a stale one left by a previous run
pub fn bind(path: &Path) -> io::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed stale socket {:?}", path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    UnixListener::bind(path)
}

/// Resolves once `shutdown` flips to true or its sender is dropped
async fn stopped(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Drive one connection, finishing the in-flight request on shutdown
async fn serve_connection(stream: UnixStream, driver: Arc<Driver>, shutdown: watch::Receiver<bool>) {
    let service = service_fn(move |request| {
        let driver = driver.clone();
        async move { Ok::<_, Infallible>(route(&driver, request).await) }
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);
    let stop = stopped(shutdown);
    tokio::pin!(stop);
    let mut draining = false;

    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!("Plugin connection closed with error: {}", e);
                }
                break;
            }
            _ = &mut stop, if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

/// Serve plugin requests until `shutdown` flips to true or its sender is dropped.
///
/// Returns only after every accepted connection has been closed, so no
/// request reaches the driver once this resolves.
pub async fn serve(listener: UnixListener, driver: Arc<Driver>, shutdown: watch::Receiver<bool>) {
    info!("Serving volume plugin requests");

    let mut connections = JoinSet::new();
    let stop = stopped(shutdown.clone());
    tokio::pin!(stop);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        connections.spawn(serve_connection(stream, driver.clone(), shutdown.clone()));
                    }
                    Err(e) => warn!("Failed to accept plugin connection: {}", e),
                }
            }
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    warn!("Plugin connection task failed: {}", e);
                }
            }
            _ = &mut stop => break,
        }
    }

    drop(listener);
    if !connections.is_empty() {
        debug!("Draining {} plugin connection(s)", connections.len());
    }
    while let Some(joined) = connections.join_next().await {
        if let Err(e) = joined {
            warn!("Plugin connection task failed: {}", e);
        }
    }

    info!("Stopped serving plugin requests");
}
