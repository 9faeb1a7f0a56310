use std::{io, net::SocketAddr};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

mod rest;
pub use rest::{rest_router, start_rest_server, DEFAULT_SHUTDOWN_GRACE_PERIOD};

mod rpc;
pub use rpc::{start_rpc_server, DasApiClient, DasApiServer, DasRpc, StoreResult};

/// Path of the REST health check.
pub const HEALTH_PATH: &str = "/health";

/// Path of the REST expiration policy query.
pub const EXPIRATION_POLICY_PATH: &str = "/expiration-policy/";

/// Path prefix of REST lookups, followed by the hex encoded hash.
pub const GET_BY_HASH_PATH: &str = "/get-by-hash/";

/// `Cache-Control` of successful lookups. Content-addressed data never changes, so it may be
/// cached for up to 28 days.
pub const CACHE_CONTROL_VALUE: &str = "public, max-age=2419200, immutable";

/// Body of REST responses. Unset fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestResponse {
    /// Base64 (standard alphabet, padded) encoded data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// See [`ExpirationPolicy`](crate::ExpirationPolicy).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_policy: Option<String>,
}

/// A server running in the background until its cancellation token fires.
#[derive(Debug)]
pub struct RunningServer {
    local_addr: SocketAddr,
    task: JoinHandle<io::Result<()>>,
}

impl RunningServer {
    pub(crate) fn new(local_addr: SocketAddr, task: JoinHandle<io::Result<()>>) -> Self {
        Self { local_addr, task }
    }

    /// The address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits for the server to shut down. Returns the error that stopped it, if any.
    pub async fn stopped(self) -> io::Result<()> {
        self.task.await.map_err(io::Error::other)?
    }
}
