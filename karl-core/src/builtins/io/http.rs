//! HTTP client and server builtins (spec §4.6 "io.http").
//!
//! The client side is a thin wrapper over `reqwest`. The server side
//! reimplements `bpmn-lite-server`'s request/response plumbing directly
//! over `hyper`/`hyper-util` rather than a higher-level framework,
//! since the wire contract here is the spec's own "handler is a Karl
//! function taking/returning a plain Object" protocol (spec §6), not a
//! protobuf service.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use crate::builtins::{arity_error, expect_integer, expect_string, Registry};
use crate::error::{EvalError, RecoverableError};
use crate::eval::Evaluator;
use crate::value::Value;

pub fn register(reg: &mut Registry) {
    reg.insert("httpGet", http_get);
    reg.insert("httpPost", http_post);
    reg.insert("httpServe", http_serve);
    reg.insert("httpServerStop", http_server_stop);
}

async fn http_get(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let url = expect_string("httpGet", args.first().ok_or_else(|| arity_error("httpGet", "1", 0))?)?;
    let resp = reqwest::get(&url)
        .await
        .map_err(|e| RecoverableError::new("http", format!("GET {url}: {e}")))?;
    response_to_value(resp).await
}

async fn http_post(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(arity_error("httpPost", "2", args.len()));
    }
    let url = expect_string("httpPost", &args[0])?;
    let body = expect_string("httpPost", &args[1])?;
    let client = reqwest::Client::new();
    let resp = client
        .post(&url)
        .body(body)
        .send()
        .await
        .map_err(|e| RecoverableError::new("http", format!("POST {url}: {e}")))?;
    response_to_value(resp).await
}

async fn response_to_value(resp: reqwest::Response) -> Result<Value, EvalError> {
    let status = resp.status().as_u16() as i64;
    let body = resp
        .text()
        .await
        .map_err(|e| RecoverableError::new("http", format!("reading response body: {e}")))?;
    let mut fields = HashMap::new();
    fields.insert("status".to_string(), Value::Integer(status));
    fields.insert("body".to_string(), Value::string(body));
    Ok(Value::object(fields))
}

/// Opaque handle to a running server (`Value::HttpServer`). Holding it
/// keeps the listener alive; dropping the last clone without calling
/// `httpServerStop` leaves the accept loop running until the process
/// exits, matching a bare `tokio::spawn`'d listener's normal lifetime.
pub struct HttpServerHandle {
    pub addr: SocketAddr,
    shutdown: AsyncMutex<Option<oneshot::Sender<()>>>,
    join: AsyncMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HttpServerHandle {
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().await.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.join.lock().await.take() {
            let _ = handle.await;
        }
    }
}

async fn http_serve(ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(arity_error("httpServe", "2", args.len()));
    }
    let port = expect_integer("httpServe", &args[0])?;
    if !(0..=65535).contains(&port) {
        return Err(RecoverableError::new("range", "httpServe: port out of range").into());
    }
    let handler = args[1].clone();

    let listener = TcpListener::bind(("0.0.0.0", port as u16))
        .await
        .map_err(|e| RecoverableError::new("http", format!("binding port {port}: {e}")))?;
    let addr = listener
        .local_addr()
        .map_err(|e| RecoverableError::new("http", format!("reading bound address: {e}")))?;

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let ev_for_loop = ev.clone();

    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => return,
                accepted = listener.accept() => {
                    let Ok((stream, _peer)) = accepted else { continue };
                    let io = TokioIo::new(stream);
                    let ev = ev_for_loop.clone();
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let ev = ev.clone();
                            let handler = handler.clone();
                            async move { handle_request(ev, handler, req).await }
                        });
                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            tracing::debug!("httpServe: connection error: {e}");
                        }
                    });
                }
            }
        }
    });

    Ok(Value::HttpServer(Arc::new(HttpServerHandle {
        addr,
        shutdown: AsyncMutex::new(Some(shutdown_tx)),
        join: AsyncMutex::new(Some(join)),
    })))
}

async fn handle_request(
    ev: Evaluator,
    handler: Value,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let body_bytes = match req.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };
    let body = String::from_utf8_lossy(&body_bytes).to_string();

    let mut request_fields = HashMap::new();
    request_fields.insert("method".to_string(), Value::string(method));
    request_fields.insert("path".to_string(), Value::string(path));
    request_fields.insert("body".to_string(), Value::string(body));
    let request_value = Value::object(request_fields);

    let outcome = ev.apply_callable(handler, vec![request_value]).await;
    let (status, body) = match outcome {
        Ok(Value::Object(o)) => {
            let fields = o.read().unwrap();
            let status = match fields.get("status") {
                Some(Value::Integer(n)) => *n as u16,
                _ => 200,
            };
            let body = match fields.get("body") {
                Some(Value::String(s)) => s.as_ref().clone(),
                Some(other) => other.inspect(),
                None => String::new(),
            };
            (status, body)
        }
        Ok(other) => (200, other.inspect()),
        Err(e) => (500, e.message()),
    };

    Ok(Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new()))))
}

async fn http_server_stop(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let server = args.first().ok_or_else(|| arity_error("httpServerStop", "1", 0))?;
    match server {
        Value::HttpServer(handle) => {
            handle.stop().await;
            Ok(Value::Unit)
        }
        other => Err(crate::builtins::type_error("httpServerStop", "http server handle", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serving_on_port_zero_picks_an_ephemeral_port_and_stops_cleanly() {
        let ev = crate::eval::test_support::test_evaluator();
        let handler = Value::Builtin("__echo_handler_not_registered");
        let server = http_serve(&ev, vec![Value::Integer(0), handler]).await.unwrap();
        let Value::HttpServer(handle) = &server else { panic!() };
        assert!(handle.addr.port() > 0);
        http_server_stop(&ev, vec![server]).await.unwrap();
    }
}
