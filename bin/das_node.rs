use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use alloy::primitives::Address;
use blst::min_pk::SecretKey as BlsSecretKey;
use clap::{ArgAction, Parser};
use eyre::{bail, eyre, WrapErr};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use das_node::{
    new_syncing_fallback_storage_service,
    server::{start_rest_server, start_rpc_server},
    FallbackConfig, FallbackStorageService, InMemoryStorageService, Keyset, RestfulDasClient,
    SequencerInbox, SignAfterStoreDas, StorageService, StoreRequestVerifier, SyncToStorageConfig,
};

#[derive(Debug, Parser)]
#[clap(name = "das_node", about = "Data availability committee member")]
struct CliOpts {
    /// Address of the JSON-RPC server.
    #[clap(long, env = "DAS_RPC_ADDR", default_value = "127.0.0.1:9876")]
    rpc_addr: SocketAddr,
    /// Address of the REST server.
    #[clap(long, env = "DAS_REST_ADDR", default_value = "127.0.0.1:9877")]
    rest_addr: SocketAddr,
    /// File holding the hex encoded BLS secret key.
    #[clap(long, env = "DAS_SECRET_KEY_FILE")]
    secret_key_file: PathBuf,
    /// File holding the hex encoded keyset. Defaults to a keyset with only this member.
    #[clap(long, env = "DAS_KEYSET_FILE")]
    keyset_file: Option<PathBuf>,
    /// Only accept store requests signed by this batch poster.
    #[clap(long, env = "DAS_BATCH_POSTER")]
    batch_poster: Option<Address>,
    /// REST endpoint of another node to read missing data from.
    #[clap(long, env = "DAS_BACKUP_URL")]
    backup_url: Option<Url>,
    /// Seconds to retain data copied in from the backup. Defaults to forever.
    #[clap(
        long = "fallback.retention-period",
        env = "DAS_FALLBACK_RETENTION_PERIOD",
        default_value_t = u64::MAX
    )]
    fallback_retention_period: u64,
    /// Only log failures to write data copied in from the backup.
    #[clap(
        long = "fallback.ignore-write-errors",
        env = "DAS_FALLBACK_IGNORE_WRITE_ERRORS",
        default_value_t = true,
        action = ArgAction::Set
    )]
    fallback_ignore_write_errors: bool,
    /// L1 execution client URL, used to sync from the sequencer inbox.
    #[clap(long, env = "DAS_L1_URL")]
    l1_url: Option<Url>,
    /// Address of the sequencer inbox contract.
    #[clap(long, env = "DAS_SEQUENCER_INBOX")]
    sequencer_inbox: Option<Address>,
    #[clap(flatten)]
    sync: SyncToStorageConfig,
    /// Seconds in-flight RPC and REST requests may take to complete on shutdown.
    #[clap(long, env = "DAS_SHUTDOWN_GRACE_PERIOD", default_value_t = 5)]
    shutdown_grace_period: u64,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).try_init();

    let opts = CliOpts::parse();
    let cancel = CancellationToken::new();

    let secret_key = read_secret_key(&opts.secret_key_file)?;
    let keyset = match &opts.keyset_file {
        Some(path) => Keyset::deserialize(&read_hex_file(path)?)?,
        None => Keyset::new(1, vec![secret_key.sk_to_pk()])?,
    };

    let storage = build_storage(&opts, cancel.clone())?;

    let mut das = SignAfterStoreDas::new(storage, secret_key, keyset)?;
    if let Some(batch_poster) = opts.batch_poster {
        info!(%batch_poster, "Verifying store requests");
        das = das.with_verifier(StoreRequestVerifier::new(batch_poster));
    }
    das.publish_keyset().await?;
    info!(keyset_hash = ?das.keyset_hash(), "DAS ready");

    let das = Arc::new(das);
    let grace_period = Duration::from_secs(opts.shutdown_grace_period);
    let rpc = start_rpc_server(opts.rpc_addr, das.clone(), cancel.clone(), grace_period).await?;
    let rest = start_rest_server(opts.rest_addr, das, cancel.clone(), grace_period).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    cancel.cancel();

    if let Err(err) = rpc.stopped().await {
        warn!(?err, "RPC server exited with error");
    }
    rest.stopped().await?;

    Ok(())
}

/// Builds the storage stack: in-memory primary, optionally backed by a REST mirror that is
/// eagerly synced from L1.
fn build_storage(
    opts: &CliOpts,
    cancel: CancellationToken,
) -> eyre::Result<Arc<dyn StorageService>> {
    let primary = Arc::new(InMemoryStorageService::with_capacity(4096));

    let Some(backup_url) = opts.backup_url.clone() else {
        if opts.sync.eager {
            bail!("eager sync requires a backup URL");
        }
        return Ok(primary as Arc<dyn StorageService>);
    };

    let backup = Arc::new(RestfulDasClient::new(backup_url));
    let fallback = FallbackConfig {
        backup_retention_seconds: opts.fallback_retention_period,
        ignore_retention_write_errors: opts.fallback_ignore_write_errors,
        prevent_recursive_gets: true,
    };

    if !opts.sync.eager {
        return Ok(Arc::new(FallbackStorageService::new(primary, backup, fallback)));
    }

    let (Some(l1_url), Some(inbox)) = (opts.l1_url.clone(), opts.sequencer_inbox) else {
        bail!("eager sync requires --l1-url and --sequencer-inbox");
    };
    let bridge = Arc::new(SequencerInbox::new(l1_url, inbox));

    Ok(Arc::new(new_syncing_fallback_storage_service(
        primary, backup, fallback, bridge, &opts.sync, cancel,
    )))
}

fn read_hex_file(path: &Path) -> eyre::Result<Vec<u8>> {
    let contents =
        fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    Ok(das_node::decode_storage_key(contents.trim())?)
}

fn read_secret_key(path: &Path) -> eyre::Result<BlsSecretKey> {
    BlsSecretKey::from_bytes(&read_hex_file(path)?)
        .map_err(|e| eyre!("Invalid secret key: {:?}", e))
}
