//! Command handlers for the control surface.
//! Each function is a stateless translation from parsed parameters to one
//! or more core operations; [`dispatch`] is the single entry point the
//! TCP server calls per request line.

use super::types::{code_for_volume_error, RpcErrorCode, RpcRequest, RpcResponse};
use crate::{
    core::{DeviceCatalog, Reactors},
    lvs::LogicalVolumeStore,
    nvmf::{self, NvmfTarget},
    rebuild::{self, RebuildJob},
    volume::{lifecycle, snapshot, ListCategory, VolumeRegistry},
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc};

/// The collaborators a running daemon wires together; handlers borrow
/// from this rather than taking a dozen separate parameters.
pub struct RpcContext {
    pub registry: Arc<VolumeRegistry>,
    pub catalog: Arc<dyn DeviceCatalog>,
    pub nvmf: Arc<dyn NvmfTarget>,
    pub lvs: Arc<dyn LogicalVolumeStore>,
    pub remote_snapshot: Arc<dyn snapshot::RemoteSnapshotClient>,
    pub org: String,
    pub date: String,
    external_address: Mutex<String>,
    rebuild_jobs: Mutex<HashMap<String, Arc<RebuildJob>>>,
}

impl RpcContext {
    pub fn new(
        registry: Arc<VolumeRegistry>,
        catalog: Arc<dyn DeviceCatalog>,
        nvmf: Arc<dyn NvmfTarget>,
        lvs: Arc<dyn LogicalVolumeStore>,
        remote_snapshot: Arc<dyn snapshot::RemoteSnapshotClient>,
        org: impl Into<String>,
        date: impl Into<String>,
        default_address: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            catalog,
            nvmf,
            lvs,
            remote_snapshot,
            org: org.into(),
            date: date.into(),
            external_address: Mutex::new(default_address.into()),
            rebuild_jobs: Mutex::new(HashMap::new()),
        }
    }

    fn external_address(&self) -> String {
        self.external_address.lock().clone()
    }
}

#[derive(Deserialize)]
struct ReplicaSpec {
    lvs: String,
    addr: Option<String>,
    nvmf_port: Option<u16>,
    control_port: Option<u16>,
}

#[derive(Deserialize)]
struct VolumeCreateParams {
    name: String,
    address: Option<String>,
    replicas: Vec<ReplicaSpec>,
}

#[derive(Deserialize)]
struct NameParam {
    name: String,
}

#[derive(Deserialize)]
struct VolumeListParams {
    #[serde(default = "default_category")]
    category: String,
}

fn default_category() -> String {
    "all".to_string()
}

#[derive(Deserialize)]
struct VolumeAddReplicaParams {
    name: String,
    replica: ReplicaSpec,
}

#[derive(Deserialize)]
struct VolumeRemoveReplicaParams {
    name: String,
    lvs: String,
}

#[derive(Deserialize)]
struct VolumeSnapshotParams {
    name: String,
    snapshot_name: String,
}

#[derive(Deserialize)]
struct ReplicaSnapshotParams {
    name: String,
    snapshot: String,
    lvs: String,
}

#[derive(Deserialize)]
struct RebuildRemoteParams {
    address: String,
    port: u16,
    name: String,
    prefix: String,
    lvs: String,
}

#[derive(Deserialize)]
struct LinkLvolsParams {
    child: String,
    parent: String,
}

#[derive(Deserialize)]
struct SetExternalAddressParams {
    addr: String,
}

/// Parses `params` into `T`, mapping a shape mismatch to InvalidArgument.
fn parse<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, (i32, String)> {
    serde_json::from_value(params).map_err(|e| (RpcErrorCode::INVALID_ARGUMENT, e.to_string()))
}

/// Dispatches one parsed request to its handler and builds the response.
pub async fn dispatch(ctx: &RpcContext, req: RpcRequest) -> RpcResponse {
    let id = req.id.clone();
    match handle(ctx, req).await {
        Ok(result) => RpcResponse::ok(id, result),
        Err((code, message)) => RpcResponse::err(id, code, message),
    }
}

async fn handle(ctx: &RpcContext, req: RpcRequest) -> Result<Value, (i32, String)> {
    match req.method.as_str() {
        "volume_create" => volume_create(ctx, parse(req.params)?).await,
        "volume_delete" => volume_delete(ctx, parse(req.params)?).await,
        "volume_list" => volume_list(ctx, parse(req.params)?),
        "volume_add_replica" => volume_add_replica(ctx, parse(req.params)?).await,
        "volume_remove_replica" => volume_remove_replica(ctx, parse(req.params)?).await,
        "volume_snapshot" => volume_snapshot(ctx, parse(req.params)?).await,
        "replica_snapshot" => replica_snapshot(ctx, parse(req.params)?).await,
        "rebuild_remote" => rebuild_remote(ctx, parse(req.params)?).await,
        "rebuild_status" => rebuild_status(ctx, parse(req.params)?),
        "link_lvols" => link_lvols(ctx, parse(req.params)?).await,
        "set_external_address" => set_external_address(ctx, parse(req.params)?),
        other => Err((RpcErrorCode::INVALID_ARGUMENT, format!("unknown method '{other}'"))),
    }
}

async fn volume_create(ctx: &RpcContext, p: VolumeCreateParams) -> Result<Value, (i32, String)> {
    let volume = ctx
        .registry
        .create(&p.name, p.replicas.len())
        .map_err(|e| (code_for_volume_error(&e), e.to_string()))?;
    let thread = Reactors::control_thread();

    for spec in &p.replicas {
        let outcome = if let Some(addr) = &spec.addr {
            let remote_nqn = nvmf::replica_nqn(&ctx.org, &ctx.date, &spec.lvs, &p.name);
            lifecycle::add_remote_replica(
                &volume,
                &thread,
                ctx.nvmf.as_ref(),
                addr,
                spec.nvmf_port.unwrap_or(nvmf::DEFAULT_NVMF_PORT),
                spec.control_port.unwrap_or(nvmf::DEFAULT_NVMF_PORT),
                &remote_nqn,
                &format!("remote-{}-{}", spec.lvs, p.name),
            )
            .await
        } else {
            lifecycle::add_local_replica(&volume, &thread, ctx.catalog.as_ref(), &spec.lvs, &p.name).await
        }
        .map_err(|e| (code_for_volume_error(&e), e.to_string()))?;

        if outcome.became_online {
            ctx.registry.resync(&volume);
            let address = p.address.clone().unwrap_or_else(|| ctx.external_address());
            let nqn = nvmf::volume_nqn(&ctx.org, &ctx.date, &p.name);
            ctx.nvmf.publish(&nqn, &address, nvmf::DEFAULT_NVMF_PORT);
        }
    }
    Ok(json!({"result": true}))
}

async fn volume_delete(ctx: &RpcContext, p: NameParam) -> Result<Value, (i32, String)> {
    let volume = ctx
        .registry
        .lookup(&p.name)
        .map_err(|e| (code_for_volume_error(&e), e.to_string()))?;
    volume.set_state(crate::volume::VolumeState::Offline);
    ctx.registry.resync(&volume);
    let nqn = nvmf::volume_nqn(&ctx.org, &ctx.date, &p.name);
    ctx.nvmf.unpublish(&nqn);
    ctx.registry
        .forget(&p.name)
        .map_err(|e| (code_for_volume_error(&e), e.to_string()))?;
    Ok(json!({"result": true}))
}

fn volume_list(ctx: &RpcContext, p: VolumeListParams) -> Result<Value, (i32, String)> {
    let category: ListCategory = p
        .category
        .parse()
        .map_err(|e: strum::ParseError| (RpcErrorCode::INVALID_ARGUMENT, e.to_string()))?;
    let volumes = ctx.registry.list(category);
    let names: Vec<Value> = volumes
        .iter()
        .map(|v| json!({"name": v.name, "uuid": v.uuid.to_string(), "state": format!("{:?}", v.state())}))
        .collect();
    Ok(Value::Array(names))
}

async fn volume_add_replica(ctx: &RpcContext, p: VolumeAddReplicaParams) -> Result<Value, (i32, String)> {
    let volume = ctx
        .registry
        .lookup(&p.name)
        .map_err(|e| (code_for_volume_error(&e), e.to_string()))?;
    let thread = Reactors::control_thread();
    let outcome = if let Some(addr) = &p.replica.addr {
        let remote_nqn = nvmf::replica_nqn(&ctx.org, &ctx.date, &p.replica.lvs, &p.name);
        lifecycle::add_remote_replica(
            &volume,
            &thread,
            ctx.nvmf.as_ref(),
            addr,
            p.replica.nvmf_port.unwrap_or(nvmf::DEFAULT_NVMF_PORT),
            p.replica.control_port.unwrap_or(nvmf::DEFAULT_NVMF_PORT),
            &remote_nqn,
            &format!("remote-{}-{}", p.replica.lvs, p.name),
        )
        .await
    } else {
        lifecycle::add_local_replica(&volume, &thread, ctx.catalog.as_ref(), &p.replica.lvs, &p.name).await
    }
    .map_err(|e| (code_for_volume_error(&e), e.to_string()))?;

    if outcome.became_online {
        ctx.registry.resync(&volume);
    }
    if volume.state() == crate::volume::VolumeState::Online {
        let snapshot_name = format!("{}-online-add-{}", p.name, outcome.replica.id);
        let job = lifecycle::online_add(volume, outcome.replica.id, &snapshot_name, ctx.lvs.as_ref())
            .await
            .map_err(|e| (code_for_volume_error(&e), e.to_string()))?;
        ctx.rebuild_jobs
            .lock()
            .insert(outcome.replica.device_name.clone(), Arc::new(job));
    }
    Ok(json!({"result": true}))
}

async fn volume_remove_replica(
    ctx: &RpcContext,
    p: VolumeRemoveReplicaParams,
) -> Result<Value, (i32, String)> {
    let volume = ctx
        .registry
        .lookup(&p.name)
        .map_err(|e| (code_for_volume_error(&e), e.to_string()))?;
    lifecycle::remove_replica(&volume, &p.lvs)
        .await
        .map_err(|e| (code_for_volume_error(&e), e.to_string()))?;
    Ok(json!({"result": true}))
}

async fn volume_snapshot(ctx: &RpcContext, p: VolumeSnapshotParams) -> Result<Value, (i32, String)> {
    let volume = ctx
        .registry
        .lookup(&p.name)
        .map_err(|e| (code_for_volume_error(&e), e.to_string()))?;
    let outcome = snapshot::snapshot(
        volume,
        &p.snapshot_name,
        ctx.lvs.as_ref(),
        ctx.remote_snapshot.as_ref(),
    )
    .await;
    if outcome.is_success() {
        Ok(json!({"result": true}))
    } else {
        Err((
            RpcErrorCode::PARTIAL,
            format!("snapshot partially failed: {:?}", outcome.failed),
        ))
    }
}

async fn replica_snapshot(ctx: &RpcContext, p: ReplicaSnapshotParams) -> Result<Value, (i32, String)> {
    let device_name = format!("{}/{}", p.lvs, p.name);
    ctx.lvs
        .snapshot(&device_name, &p.snapshot)
        .await
        .map_err(|e| (RpcErrorCode::DEVICE_FAILED, e.to_string()))?;
    Ok(json!({"result": true}))
}

async fn rebuild_remote(ctx: &RpcContext, p: RebuildRemoteParams) -> Result<Value, (i32, String)> {
    let mut stream = tokio::net::TcpStream::connect((p.address.as_str(), p.port))
        .await
        .map_err(|e| (RpcErrorCode::DEVICE_FAILED, e.to_string()))?;
    rebuild::wire::write_blob_request(&mut stream, 0)
        .await
        .map_err(|e| (RpcErrorCode::DEVICE_FAILED, e.to_string()))?;
    let _ = p.name;
    let (target, job) = rebuild::fetch_into(&mut stream, &p.prefix, ctx.lvs.as_ref())
        .await
        .map_err(|e| (RpcErrorCode::DEVICE_FAILED, e.to_string()))?;
    ctx.rebuild_jobs.lock().insert(target, Arc::new(job));
    Ok(json!({"result": true}))
}

fn rebuild_status(ctx: &RpcContext, p: NameParam) -> Result<Value, (i32, String)> {
    let jobs = ctx.rebuild_jobs.lock();
    let job = jobs
        .get(&p.name)
        .ok_or_else(|| (RpcErrorCode::NOT_FOUND, format!("no rebuild job for '{}'", p.name)))?;
    let (done, total) = job.progress();
    let copied = byte_unit::Byte::from_bytes(job.bytes_copied() as u128)
        .get_appropriate_unit(false)
        .to_string();
    Ok(json!({
        "donor": job.donor,
        "target": job.target,
        "done": done,
        "total": total,
        "copied": copied,
        "elapsed": job.elapsed(),
    }))
}

async fn link_lvols(ctx: &RpcContext, p: LinkLvolsParams) -> Result<Value, (i32, String)> {
    rebuild::link(&p.child, &p.parent, ctx.lvs.as_ref())
        .await
        .map_err(|e| (RpcErrorCode::DEVICE_FAILED, e.to_string()))?;
    Ok(json!({"result": true}))
}

fn set_external_address(ctx: &RpcContext, p: SetExternalAddressParams) -> Result<Value, (i32, String)> {
    *ctx.external_address.lock() = p.addr;
    Ok(json!({"result": true}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{MemDeviceCatalog, Reactors},
        lvs::NullLogicalVolumeStore,
        nvmf::NullNvmfTarget,
        rpc::client::RpcClient,
    };
    use std::sync::Once;

    fn ctx_with_catalog(catalog: Arc<MemDeviceCatalog>) -> RpcContext {
        static INIT: Once = Once::new();
        INIT.call_once(|| Reactors::init(1));
        RpcContext::new(
            Arc::new(VolumeRegistry::new()),
            catalog,
            Arc::new(NullNvmfTarget),
            Arc::new(NullLogicalVolumeStore::new()),
            Arc::new(RpcClient::new()),
            "mirrorvol",
            "2024-01",
            "127.0.0.1",
        )
    }

    fn ctx() -> RpcContext {
        ctx_with_catalog(Arc::new(MemDeviceCatalog::new()))
    }

    fn req(method: &str, params: Value) -> RpcRequest {
        RpcRequest { method: method.to_string(), params, id: Some(json!(1)) }
    }

    #[tokio::test]
    async fn volume_create_then_delete_removes_it_from_volume_list() {
        let catalog = Arc::new(MemDeviceCatalog::new());
        catalog.create("lvs1/v1", 512, 64);
        let ctx = ctx_with_catalog(catalog);
        let response = dispatch(
            &ctx,
            req("volume_create", json!({"name": "v1", "replicas": [{"lvs": "lvs1"}]})),
        )
        .await;
        assert!(response.error.is_none(), "{:?}", response.error);

        let listed = dispatch(&ctx, req("volume_list", json!({"category": "all"}))).await;
        assert_eq!(listed.result.unwrap().as_array().unwrap().len(), 1);

        let deleted = dispatch(&ctx, req("volume_delete", json!({"name": "v1"}))).await;
        assert!(deleted.error.is_none());
        let listed = dispatch(&ctx, req("volume_list", json!({"category": "all"}))).await;
        assert_eq!(listed.result.unwrap().as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn volume_list_rejects_unknown_category() {
        let ctx = ctx();
        let response = dispatch(&ctx, req("volume_list", json!({"category": "bogus"}))).await;
        assert_eq!(response.error.unwrap().code, RpcErrorCode::INVALID_ARGUMENT);
    }

    #[tokio::test]
    async fn rebuild_status_for_unknown_target_is_not_found() {
        let ctx = ctx();
        let response = dispatch(&ctx, req("rebuild_status", json!({"name": "ghost"}))).await;
        assert_eq!(response.error.unwrap().code, RpcErrorCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_method_is_invalid_argument() {
        let ctx = ctx();
        let response = dispatch(&ctx, req("not_a_real_method", json!({}))).await;
        assert_eq!(response.error.unwrap().code, RpcErrorCode::INVALID_ARGUMENT);
    }
}
