//! 客户端装配器。
//!
//! # 教案式概览
//! - **意图（Why）**：把 [`ClientPlan`] 落地为一条可用的 tonic [`Channel`]，并让每次调用自动带上
//!   该调用形态对应的拦截器、访问令牌与压缩偏好。
//! - **结构（How）**：
//!   - [`GrpcClient::connect`]：翻译选项、装载 CA、配置端点并拨号（或惰性连接）；
//!   - [`GrpcClient::unary`] / [`GrpcClient::server_streaming`]：不依赖生成代码的通用调用入口；
//!   - [`GrpcClient::spawn_unary`] 与 [`PendingCall`]：把一次一元调用放到后台任务执行。
//! - **契约（What）**：生成代码的客户端可以直接基于 [`GrpcClient::channel`] 与
//!   [`GrpcClient::interceptor`] 构造，行为与通用入口一致。

use std::fmt;

use http::uri::PathAndQuery;
use prost::Message;
use tokio::{runtime::Handle, task::JoinHandle};
use tonic::{
    IntoRequest, Request, Response, Status, Streaming,
    codec::{CompressionEncoding, ProstCodec},
    codegen::{InterceptedService, StdError},
    transport::{Channel, Endpoint},
};
use tracing::{debug, error, info};

use crate::{
    compression::Compressor,
    credentials,
    error::BuildError,
    interceptor::{CallKind, ClientInterceptor},
    options::RpcOptions,
    plan::{ClientPlan, TransportSecurity, plan_client},
};

/// 已安装拦截器与压缩偏好的底层 gRPC 客户端。
pub type InterceptedGrpc = tonic::client::Grpc<InterceptedService<Channel, ClientInterceptor>>;

/// 已建立（或惰性建立）连接的 gRPC 客户端。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `connect` 成功即表示端点配置合法；非惰性模式下同时表示 TCP/TLS 连接已经建立；
/// - 克隆是廉价的，克隆体共享同一条底层连接；
/// - `connect` 时记录所在的 Tokio 运行时，后台调用（[`GrpcClient::spawn_unary`]）总是投递到该运行时，
///   因此客户端句柄可以被移交给运行时之外的线程使用；
/// - 每次调用都会重新组装拦截器，因此选项中的拦截器与令牌对所有调用一致生效。
#[derive(Clone)]
pub struct GrpcClient {
    plan: ClientPlan,
    channel: Channel,
    runtime: Handle,
}

impl fmt::Debug for GrpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrpcClient")
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}

impl GrpcClient {
    /// 按选项装配客户端并建立连接。
    ///
    /// # 教案级注释
    ///
    /// ## 逻辑（How）
    /// 1. [`plan_client`] 得出端点 URI、传输安全方式与令牌；
    /// 2. TLS 时读取 CA 并以主机名覆盖作为校验名称；
    /// 3. `lazy_dial` 为真时返回惰性通道，首次调用才真正建连；否则立即拨号，
    ///    不可达时返回 [`BuildError::Dial`]。
    pub async fn connect(options: &RpcOptions) -> Result<Self, BuildError> {
        let plan = plan_client(options).inspect_err(|err| {
            error!(target: "spark.rpc.client", code = err.code(), error = %err, "invalid client options");
        })?;
        let runtime = Handle::try_current().map_err(|_| BuildError::MissingRuntime)?;

        let mut endpoint = Endpoint::from_shared(plan.endpoint_uri.clone()).map_err(|err| {
            BuildError::InvalidAddress {
                address: plan.address.clone(),
                reason: err.to_string(),
            }
        })?;

        if let TransportSecurity::Tls(source) = &plan.security {
            let tls = credentials::load_client_tls(source)?;
            endpoint = endpoint.tls_config(tls).map_err(|source| {
                error!(target: "spark.rpc.client", error = %source, "client TLS credentials rejected");
                BuildError::CredentialRejected {
                    side: "client",
                    source,
                }
            })?;
        }

        let channel = if plan.lazy_dial {
            endpoint.connect_lazy()
        } else {
            endpoint.connect().await.map_err(|source| {
                error!(
                    target: "spark.rpc.client",
                    address = %plan.address,
                    error = %source,
                    "failed to dial gRPC endpoint"
                );
                BuildError::Dial {
                    address: plan.address.clone(),
                    source,
                }
            })?
        };

        info!(
            target: "spark.rpc.client",
            endpoint = %plan.endpoint_uri,
            tls = plan.security.is_tls(),
            token = plan.token.is_some(),
            compressor = plan.compressor.map(Compressor::name),
            lazy = plan.lazy_dial,
            "gRPC client assembled"
        );

        Ok(Self {
            plan,
            channel,
            runtime,
        })
    }

    pub fn plan(&self) -> &ClientPlan {
        &self.plan
    }

    pub fn is_tls(&self) -> bool {
        self.plan.security.is_tls()
    }

    /// 底层通道，供生成代码的客户端使用。
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    /// 给定调用形态应安装的拦截器，已包含令牌注入。
    pub fn interceptor(&self, kind: CallKind) -> ClientInterceptor {
        self.plan.interceptor(kind)
    }

    pub fn compression(&self) -> Option<CompressionEncoding> {
        self.plan.compressor.map(Compressor::encoding)
    }

    /// 为给定调用形态组装底层 gRPC 客户端：拦截器在外，压缩偏好同时作用于发送与接收。
    pub fn grpc(&self, kind: CallKind) -> InterceptedGrpc {
        let service = InterceptedService::new(self.channel(), self.interceptor(kind));
        let mut grpc = tonic::client::Grpc::new(service);
        if let Some(encoding) = self.compression() {
            grpc = grpc.send_compressed(encoding).accept_compressed(encoding);
        }
        grpc
    }

    /// 发起一次一元调用。`path` 形如 `/package.Service/Method`。
    pub async fn unary<Req, Resp>(
        &self,
        path: &'static str,
        request: impl IntoRequest<Req>,
    ) -> Result<Response<Resp>, Status>
    where
        Req: Message + Send + Sync + 'static,
        Resp: Message + Default + Send + Sync + 'static,
    {
        let request = request.into_request();
        unary_call(self.grpc(CallKind::Unary), path, request).await
    }

    /// 发起一次服务端流式调用，使用流式拦截器。
    pub async fn server_streaming<Req, Resp>(
        &self,
        path: &'static str,
        request: impl IntoRequest<Req>,
    ) -> Result<Response<Streaming<Resp>>, Status>
    where
        Req: Message + Send + Sync + 'static,
        Resp: Message + Default + Send + Sync + 'static,
    {
        let request = request.into_request();
        let mut grpc = self.grpc(CallKind::Streaming);
        grpc.ready().await.map_err(not_ready)?;
        debug!(target: "spark.rpc.client", path, kind = "streaming", "issuing call");
        grpc.server_streaming(request, PathAndQuery::from_static(path), ProstCodec::default())
            .await
    }

    /// 在后台任务中发起一元调用，立即返回 [`PendingCall`]。
    ///
    /// 任务投递到 `connect` 时所在的运行时，调用线程本身无需处于运行时之内。
    pub fn spawn_unary<Req, Resp>(&self, path: &'static str, request: Request<Req>) -> PendingCall<Resp>
    where
        Req: Message + Send + Sync + 'static,
        Resp: Message + Default + Send + Sync + 'static,
    {
        let grpc = self.grpc(CallKind::Unary);
        PendingCall {
            path,
            handle: self.runtime.spawn(unary_call(grpc, path, request)),
        }
    }
}

pub(crate) async fn unary_call<Req, Resp>(
    mut grpc: InterceptedGrpc,
    path: &'static str,
    request: Request<Req>,
) -> Result<Response<Resp>, Status>
where
    Req: Message + Send + Sync + 'static,
    Resp: Message + Default + Send + Sync + 'static,
{
    grpc.ready().await.map_err(not_ready)?;
    debug!(target: "spark.rpc.client", path, kind = "unary", "issuing call");
    grpc.unary(request, PathAndQuery::from_static(path), ProstCodec::default())
        .await
}

fn not_ready(err: impl Into<StdError>) -> Status {
    let err: StdError = err.into();
    Status::unavailable(format!("service was not ready: {err}"))
}

/// 已在后台发起、尚未取回结果的一元调用。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - 丢弃 `PendingCall` 不会取消调用，调用在后台继续执行直至完成；
/// - [`PendingCall::wait`] 取回调用结果；后台任务被取消时返回 `Cancelled`，
///   任务恐慌时返回 `Internal`。
pub struct PendingCall<Resp> {
    path: &'static str,
    handle: JoinHandle<Result<Response<Resp>, Status>>,
}

impl<Resp> PendingCall<Resp> {
    pub fn path(&self) -> &'static str {
        self.path
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// 主动取消后台调用。
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub async fn wait(self) -> Result<Response<Resp>, Status> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Err(Status::cancelled(format!("call to {} was cancelled", self.path))),
            Err(err) => {
                error!(target: "spark.rpc.client", path = self.path, error = %err, "background call panicked");
                Err(Status::internal(format!("call to {} panicked", self.path)))
            }
        }
    }
}

impl<Resp> fmt::Debug for PendingCall<Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("path", &self.path)
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}
