//! `volctl`: a thin JSON-RPC client for the control surface -- one
//! subcommand per RPC method, plus a raw passthrough for anything not yet
//! given its own flags.

use clap::{Parser, Subcommand};
use mirrorvol::rpc::RpcClient;
use serde_json::{json, Value};
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
enum CliError {
    #[snafu(display("call failed: {}", message))]
    Call { message: String },
    #[snafu(display("invalid --params JSON: {}", source))]
    Params { source: serde_json::Error },
}

type Result<T, E = CliError> = std::result::Result<T, E>;

#[derive(Parser)]
#[command(name = "volctl", about = "Control-surface client for mirrorvold")]
struct Cli {
    /// address:port of the mirrorvold control surface.
    #[arg(long, default_value = "127.0.0.1:10124")]
    address: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a volume from a set of replicas.
    VolumeCreate {
        name: String,
        #[arg(long)]
        address: Option<String>,
        /// One `lvs[@remote_addr:nvmf_port:control_port]` per replica.
        #[arg(long = "replica", required = true)]
        replicas: Vec<String>,
    },
    VolumeDelete { name: String },
    VolumeList {
        #[arg(default_value = "all")]
        category: String,
    },
    VolumeAddReplica {
        name: String,
        /// `lvs[@remote_addr:nvmf_port:control_port]`
        replica: String,
    },
    VolumeRemoveReplica { name: String, lvs: String },
    VolumeSnapshot { name: String, snapshot_name: String },
    ReplicaSnapshot { name: String, snapshot: String, lvs: String },
    RebuildStatus { name: String },
    RebuildRemote {
        address: String,
        port: u16,
        name: String,
        prefix: String,
        lvs: String,
    },
    LinkLvols { child: String, parent: String },
    SetExternalAddress { addr: String },
    /// Calls an arbitrary method with a raw JSON params object.
    Jsonrpc { method: String, params: String },
}

/// Parses `lvs[@addr:nvmf_port:control_port]` into a `{lvs, addr?,
/// nvmf_port?, control_port?}` params fragment.
fn replica_spec(spec: &str) -> Value {
    match spec.split_once('@') {
        None => json!({"lvs": spec}),
        Some((lvs, remote)) => {
            let mut parts = remote.split(':');
            let addr = parts.next().unwrap_or_default();
            let nvmf_port: Option<u16> = parts.next().and_then(|p| p.parse().ok());
            let control_port: Option<u16> = parts.next().and_then(|p| p.parse().ok());
            json!({"lvs": lvs, "addr": addr, "nvmf_port": nvmf_port, "control_port": control_port})
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (address, port) = cli
        .address
        .rsplit_once(':')
        .unwrap_or((cli.address.as_str(), "10124"));
    let port: u16 = port.parse().unwrap_or(10124);

    let (method, params) = match &cli.command {
        Command::VolumeCreate { name, address, replicas } => (
            "volume_create",
            json!({
                "name": name,
                "address": address,
                "replicas": replicas.iter().map(|r| replica_spec(r)).collect::<Vec<_>>(),
            }),
        ),
        Command::VolumeDelete { name } => ("volume_delete", json!({"name": name})),
        Command::VolumeList { category } => ("volume_list", json!({"category": category})),
        Command::VolumeAddReplica { name, replica } => (
            "volume_add_replica",
            json!({"name": name, "replica": replica_spec(replica)}),
        ),
        Command::VolumeRemoveReplica { name, lvs } => {
            ("volume_remove_replica", json!({"name": name, "lvs": lvs}))
        }
        Command::VolumeSnapshot { name, snapshot_name } => (
            "volume_snapshot",
            json!({"name": name, "snapshot_name": snapshot_name}),
        ),
        Command::ReplicaSnapshot { name, snapshot, lvs } => (
            "replica_snapshot",
            json!({"name": name, "snapshot": snapshot, "lvs": lvs}),
        ),
        Command::RebuildStatus { name } => ("rebuild_status", json!({"name": name})),
        Command::RebuildRemote { address, port, name, prefix, lvs } => (
            "rebuild_remote",
            json!({"address": address, "port": port, "name": name, "prefix": prefix, "lvs": lvs}),
        ),
        Command::LinkLvols { child, parent } => {
            ("link_lvols", json!({"child": child, "parent": parent}))
        }
        Command::SetExternalAddress { addr } => ("set_external_address", json!({"addr": addr})),
        Command::Jsonrpc { method, params } => {
            let value: Value = serde_json::from_str(params).context(Params)?;
            return call_and_print(&address, port, method, value).await;
        }
    };

    call_and_print(&address, port, method, params).await
}

async fn call_and_print(address: &str, port: u16, method: &str, params: Value) -> Result<()> {
    let client = RpcClient::new();
    let result = client
        .call(address, port, method, params)
        .await
        .map_err(|message| CliError::Call { message })?;
    println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
    Ok(())
}
