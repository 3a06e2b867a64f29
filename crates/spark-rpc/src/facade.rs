//! 面向调用方的统一入口：`Builder` 产出客户端与服务端，二者各自以 trait 暴露最小操作集。
//!
//! # 教案式概览
//! - **意图（Why）**：业务代码只依赖 [`RpcServer`] / [`RpcClient`] / [`Builder`] 三个抽象，
//!   测试中可以替换为内存实现，而生产路径使用 [`GrpcBuilder`]。
//! - **契约（What）**：
//!   - `RpcServer::prepare` 登记服务，`RpcServer::start` 进入监听循环；
//!   - `RpcClient::call` 等待调用完成，`RpcClient::go` 在后台发起调用并立即返回句柄；
//!   - 同一个 `Builder` 可以反复构建，每次得到一个独立的实例。

use std::future::Future;

use prost::Message;
use tonic::{Request, Response, Status};

use crate::{
    client::{GrpcClient, PendingCall, unary_call},
    error::{BuildError, ServeError},
    interceptor::CallKind,
    options::RpcOptions,
    server::{GrpcServer, ServiceDescriptor, ServiceRegistrar},
};

/// 服务端的最小操作集。
pub trait RpcServer {
    /// 登记服务描述符，并通过回调向路由表注册服务实现。
    fn prepare<F>(&mut self, descriptor: ServiceDescriptor, register: F) -> &mut Self
    where
        F: FnOnce(&mut ServiceRegistrar<'_>);

    /// 开始监听，直到服务端失败为止。
    fn start(self) -> impl Future<Output = Result<(), ServeError>> + Send
    where
        Self: Sized;
}

/// 客户端的最小操作集。
pub trait RpcClient {
    /// 发起一元调用并等待结果。
    fn call<Req, Resp>(
        &self,
        path: &'static str,
        request: Request<Req>,
    ) -> impl Future<Output = Result<Response<Resp>, Status>> + Send
    where
        Req: Message + Send + Sync + 'static,
        Resp: Message + Default + Send + Sync + 'static;

    /// 在后台发起一元调用，返回可等待的句柄。
    fn go<Req, Resp>(&self, path: &'static str, request: Request<Req>) -> PendingCall<Resp>
    where
        Req: Message + Send + Sync + 'static,
        Resp: Message + Default + Send + Sync + 'static;
}

impl RpcServer for GrpcServer {
    fn prepare<F>(&mut self, descriptor: ServiceDescriptor, register: F) -> &mut Self
    where
        F: FnOnce(&mut ServiceRegistrar<'_>),
    {
        GrpcServer::prepare(self, descriptor, register)
    }

    fn start(self) -> impl Future<Output = Result<(), ServeError>> + Send {
        GrpcServer::start(self)
    }
}

impl RpcClient for GrpcClient {
    fn call<Req, Resp>(
        &self,
        path: &'static str,
        request: Request<Req>,
    ) -> impl Future<Output = Result<Response<Resp>, Status>> + Send
    where
        Req: Message + Send + Sync + 'static,
        Resp: Message + Default + Send + Sync + 'static,
    {
        unary_call(self.grpc(CallKind::Unary), path, request)
    }

    fn go<Req, Resp>(&self, path: &'static str, request: Request<Req>) -> PendingCall<Resp>
    where
        Req: Message + Send + Sync + 'static,
        Resp: Message + Default + Send + Sync + 'static,
    {
        self.spawn_unary(path, request)
    }
}

/// 客户端与服务端的构建器。
pub trait Builder {
    type Client: RpcClient;
    type Server: RpcServer;

    fn client(&self) -> impl Future<Output = Result<Self::Client, BuildError>> + Send;

    fn server(&self) -> Result<Self::Server, BuildError>;
}

/// 基于 tonic 的默认构建器，持有一份不可变的 [`RpcOptions`]。
#[derive(Clone, Debug, Default)]
pub struct GrpcBuilder {
    options: RpcOptions,
}

impl GrpcBuilder {
    pub fn new(options: RpcOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RpcOptions {
        &self.options
    }
}

impl From<RpcOptions> for GrpcBuilder {
    fn from(options: RpcOptions) -> Self {
        Self::new(options)
    }
}

impl Builder for GrpcBuilder {
    type Client = GrpcClient;
    type Server = GrpcServer;

    fn client(&self) -> impl Future<Output = Result<GrpcClient, BuildError>> + Send {
        GrpcClient::connect(&self.options)
    }

    fn server(&self) -> Result<GrpcServer, BuildError> {
        GrpcServer::build(&self.options)
    }
}

/// 由构建器产出客户端。
pub async fn build_client<B: Builder>(builder: &B) -> Result<B::Client, BuildError> {
    builder.client().await
}

/// 由构建器产出服务端。
pub fn build_server<B: Builder>(builder: &B) -> Result<B::Server, BuildError> {
    builder.server()
}
