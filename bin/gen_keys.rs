use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

use alloy::hex::encode_prefixed;
use clap::Parser;
use das_node::{bls::random_bls_secret, Keyset};

#[derive(Debug, Parser)]
#[clap(name = "gen_keys", about = "Generate a BLS key pair and a single-member keyset")]
struct CliOpts {
    /// Directory to write `das_bls`, `das_bls.pub` and `keyset` into.
    #[clap(long, default_value = ".")]
    out_dir: PathBuf,
}

fn main() -> eyre::Result<()> {
    let opts = CliOpts::parse();

    let privkey = random_bls_secret();
    let pubkey = privkey.sk_to_pk();
    let keyset = Keyset::new(1, vec![pubkey])?;

    write_file(&opts.out_dir.join("das_bls"), &encode_prefixed(privkey.to_bytes()))?;
    write_file(&opts.out_dir.join("das_bls.pub"), &encode_prefixed(pubkey.to_bytes()))?;
    write_file(&opts.out_dir.join("keyset"), &encode_prefixed(keyset.serialize()))?;

    println!("keyset hash: {}", keyset.hash());

    Ok(())
}

fn write_file(path: &Path, contents: &str) -> eyre::Result<()> {
    let mut f = File::create(path)?;
    f.write_all(contents.as_bytes())?;
    f.write_all(b"\n")?;
    f.sync_all()?;
    Ok(())
}
