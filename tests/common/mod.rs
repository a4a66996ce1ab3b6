#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use toolhub::{
    api::{self, AppState},
    connection::DispatcherConnection,
    dispatcher::{RegistrationState, RemoteDispatcher},
    registry::{Capability, CapabilityError, CapabilityRegistry},
    tools::Echo,
};

/// Bind an ephemeral port and serve the full router on it.
pub async fn start_server() -> (SocketAddr, AppState) {
    let state = AppState::new(api::DEFAULT_CALL_TIMEOUT);
    let addr = serve_state(state.clone()).await;
    (addr, state)
}

/// Serve `state` on an ephemeral port.
pub async fn serve_state(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    serve_on(listener, state).await
}

/// Serve `state` on an already bound listener.
pub async fn serve_on(listener: TcpListener, state: AppState) -> SocketAddr {
    let addr = listener.local_addr().unwrap();
    let app = api::router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

pub fn hub_url(addr: SocketAddr) -> String {
    format!("ws://{}/toolhub", addr)
}

/// Returns a fixed label, so tests can tell which client served a call.
#[derive(Debug)]
pub struct Whoami(pub &'static str);

#[async_trait]
impl Capability for Whoami {
    fn name(&self) -> &str {
        "whoami"
    }

    fn description(&self) -> &str {
        "returns the client label"
    }

    async fn execute(&self, _arguments: Value) -> Result<Value, CapabilityError> {
        Ok(json!(self.0))
    }
}

/// Sleeps for `ms` milliseconds from the arguments, then echoes them.
#[derive(Debug)]
pub struct SlowEcho;

#[async_trait]
impl Capability for SlowEcho {
    fn name(&self) -> &str {
        "slow_echo"
    }

    fn description(&self) -> &str {
        "sleeps, then echoes"
    }

    async fn execute(&self, arguments: Value) -> Result<Value, CapabilityError> {
        let ms = arguments["ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(arguments)
    }
}

/// Dispatcher with `echo`, `slow_echo` and a `whoami` that answers `label`.
pub fn test_dispatcher(session: &str, label: &'static str) -> Arc<RemoteDispatcher> {
    let registry = CapabilityRegistry::builder()
        .register(Arc::new(Echo))
        .register(Arc::new(SlowEcho))
        .register(Arc::new(Whoami(label)))
        .build();
    Arc::new(RemoteDispatcher::new(session, Some(label.to_string()), Arc::new(registry)))
}

/// Connect a dispatcher to the hub at `addr` and wait for the hub's ack.
pub async fn connect_dispatcher(
    addr: SocketAddr,
    dispatcher: Arc<RemoteDispatcher>,
) -> DispatcherConnection {
    let connection = DispatcherConnection::spawn(hub_url(addr), dispatcher.clone());
    wait_registered(&dispatcher).await;
    connection
}

pub async fn wait_registered(dispatcher: &RemoteDispatcher) {
    tokio::time::timeout(Duration::from_secs(5), dispatcher.wait_registered())
        .await
        .expect("timeout waiting for registration");
}

pub async fn wait_unregistered(dispatcher: &RemoteDispatcher) {
    let mut rx = dispatcher.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|state| *state == RegistrationState::Unregistered),
    )
    .await
    .expect("timeout waiting for unregistration")
    .expect("dispatcher state channel closed");
}
