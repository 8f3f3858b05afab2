//! Lockbox daemon entrypoint.
//!
//! A small, single-writer service that owns the lock session coordinator: a
//! socket listener, strict request validation, and a SQLite-backed session
//! store. Clients (the web UI among them) talk newline-delimited JSON over a
//! Unix socket; every state transition funnels through the coordinator.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lockbox_core::{
    load_config, Actuator, ActuatorConfig, Coordinator, DeferredTimer, HardwareActuator,
    KeywordClassifier, LockboxError, SessionStore, SimulatedActuator,
};
use lockboxd_protocol::{
    parse_override, parse_start_lock, ErrorInfo, Method, Request, Response, MAX_REQUEST_BYTES,
    PROTOCOL_VERSION,
};
use serde_json::Value;

const SOCKET_NAME: &str = "daemon.sock";
const DB_NAME: &str = "lockbox.db";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

fn main() {
    init_logging();

    let socket_path = match daemon_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    let config = match load_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load lockbox config; using defaults");
            lockbox_core::LockboxConfig::default()
        }
    };

    let actuator: Arc<dyn Actuator> = match &config.actuator {
        ActuatorConfig::Simulated => {
            info!("Using simulated actuator");
            Arc::new(SimulatedActuator::new())
        }
        ActuatorConfig::Hardware { pin, active_low } => {
            info!(pin, active_low, "Using hardware actuator");
            match HardwareActuator::new(*pin, *active_low) {
                Ok(actuator) => Arc::new(actuator),
                Err(err) => {
                    // A box that cannot be actuated must not accept lock
                    // requests at all.
                    error!(error = %err, "Failed to initialize hardware actuator");
                    std::process::exit(1);
                }
            }
        }
    };

    let db_path = match daemon_db_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon database path");
            std::process::exit(1);
        }
    };

    let store = match SessionStore::new(db_path) {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "Failed to initialize session store");
            std::process::exit(1);
        }
    };

    let classifier = Arc::new(KeywordClassifier::new(
        config.classifier.emergency_keywords.clone(),
        config.classifier.routine_phrases.clone(),
    ));
    let timer = DeferredTimer::new(Duration::from_secs(config.timer.misfire_grace_secs));
    let coordinator = Arc::new(Coordinator::new(store, actuator, classifier, timer));

    coordinator.recover_startup_state();

    info!(path = %socket_path.display(), "Lockbox daemon started");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let coordinator = Arc::clone(&coordinator);
                thread::spawn(|| handle_connection(stream, coordinator));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("LOCKBOX_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn daemon_socket_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".lockbox").join(SOCKET_NAME))
}

fn daemon_db_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".lockbox").join(DB_NAME))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, coordinator: Arc<Coordinator>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, coordinator);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let request_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, coordinator: Arc<Coordinator>) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => {
            let locked_sessions = coordinator.store().locked_count().unwrap_or(-1);
            Response::ok(
                request.id,
                serde_json::json!({
                    "status": "ok",
                    "pid": std::process::id(),
                    "version": env!("CARGO_PKG_VERSION"),
                    "protocol_version": PROTOCOL_VERSION,
                    "locked_sessions": locked_sessions,
                }),
            )
        }
        Method::GetStatus => match coordinator.current_status() {
            Ok(Some(snapshot)) => match serde_json::to_value(&snapshot) {
                Ok(mut value) => {
                    value["active"] = Value::Bool(true);
                    Response::ok(request.id, value)
                }
                Err(err) => Response::error(
                    request.id,
                    "serialization_error",
                    format!("Failed to serialize status: {}", err),
                ),
            },
            Ok(None) => Response::ok(request.id, serde_json::json!({ "active": false })),
            Err(err) => lockbox_error_response(request.id, &err),
        },
        Method::StartLock => {
            let params = match request.params {
                Some(params) => params,
                None => {
                    return Response::error(request.id, "invalid_params", "params are required")
                }
            };
            let parsed = match parse_start_lock(params) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(request.id, err),
            };

            match coordinator.start_lock(parsed.duration_minutes) {
                Ok(started) => {
                    info!(
                        session_id = started.session_id,
                        duration_minutes = parsed.duration_minutes,
                        "Lock started via IPC"
                    );
                    Response::ok(
                        request.id,
                        serde_json::json!({
                            "session_id": started.session_id,
                            "end_time": lockbox_core::session::format_instant(started.end_time),
                        }),
                    )
                }
                Err(err) => lockbox_error_response(request.id, &err),
            }
        }
        Method::RequestOverride => {
            let params = match request.params {
                Some(params) => params,
                None => {
                    return Response::error(request.id, "invalid_params", "params are required")
                }
            };
            let parsed = match parse_override(params) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(request.id, err),
            };

            match coordinator.request_override(&parsed.reason) {
                Ok(outcome) => Response::ok(
                    request.id,
                    serde_json::json!({ "granted": outcome.granted }),
                ),
                Err(err) => lockbox_error_response(request.id, &err),
            }
        }
    }
}

fn lockbox_error_response(id: Option<String>, err: &LockboxError) -> Response {
    let code = match err {
        LockboxError::InvalidInput(_) => "invalid_input",
        LockboxError::Conflict { .. } => "conflict",
        LockboxError::NotLocked => "not_locked",
        LockboxError::Storage { .. } => "storage_error",
        LockboxError::Actuator { .. } => "actuator_error",
        LockboxError::Timer(_) => "timer_error",
        LockboxError::Io { .. } => "io_error",
    };
    Response::error(id, code, err.to_string())
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
