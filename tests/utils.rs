use std::{net::SocketAddr, sync::Arc};

use alloy::primitives::B256;
use tokio_util::sync::CancellationToken;
use url::Url;

use das_node::{
    bls::random_bls_secret,
    server::{start_rest_server, start_rpc_server, RunningServer, DEFAULT_SHUTDOWN_GRACE_PERIOD},
    SignAfterStoreDas, StorageService,
};

/// A node serving RPC and REST on ephemeral ports.
#[derive(Debug)]
pub struct TestNode {
    pub rpc: RunningServer,
    pub rest: RunningServer,
    pub keyset_hash: B256,
    pub cancel: CancellationToken,
}

impl TestNode {
    pub fn rpc_url(&self) -> String {
        format!("http://{}", self.rpc.local_addr())
    }

    pub fn rest_url(&self) -> Url {
        Url::parse(&format!("http://{}", self.rest.local_addr())).expect("valid url")
    }
}

/// Starts a single-member node over `storage`.
pub async fn spin_up_node<S: StorageService + 'static>(storage: S) -> eyre::Result<TestNode> {
    let das = SignAfterStoreDas::single_member(storage, random_bls_secret())?;
    das.publish_keyset().await?;
    let keyset_hash = das.keyset_hash();

    let das = Arc::new(das);
    let cancel = CancellationToken::new();
    let localhost: SocketAddr = "127.0.0.1:0".parse()?;

    let rpc =
        start_rpc_server(localhost, das.clone(), cancel.clone(), DEFAULT_SHUTDOWN_GRACE_PERIOD)
            .await?;
    let rest =
        start_rest_server(localhost, das, cancel.clone(), DEFAULT_SHUTDOWN_GRACE_PERIOD).await?;

    Ok(TestNode { rpc, rest, keyset_hash, cancel })
}
