//! 服务端装配器。
//!
//! # 教案式概览
//! - **意图（Why）**：根据 [`ServerPlan`] 生成一个已配置好 TLS、拦截链与压缩偏好的 gRPC 服务端，
//!   调用方只需通过 [`GrpcServer::prepare`] 注册服务，再调用 `start*` 进入监听循环。
//! - **结构（How）**：
//!   - [`GrpcServer::build`]：翻译选项、装载证书，证书失败立即返回错误，不进入监听；
//!   - [`ServiceDescriptor`]：声明服务名与各方法的调用形态，决定请求走一元链还是流式链；
//!   - [`InterceptLayer`] / [`InterceptService`]：`tower` 中间件，在路由之前执行拦截链；
//!   - [`ServiceRegistrar`]：`prepare` 回调拿到的注册入口，包装 tonic 的 `RoutesBuilder`。
//! - **风险提示（Trade-offs）**：gRPC 请求本身不标注调用形态，只能依靠描述符里声明的方法表判断；
//!   未声明的方法一律按一元调用处理。

use std::{
    cell::Cell,
    collections::HashMap,
    convert::Infallible,
    fmt,
    future::Future,
    net::SocketAddr,
    sync::Arc,
    task::{Context, Poll},
};

use futures_util::future::BoxFuture;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{
    body::BoxBody,
    codec::CompressionEncoding,
    metadata::MetadataMap,
    server::NamedService,
    service::RoutesBuilder,
    transport::{Server, server::Router},
};
use tower::{
    Layer, Service,
    layer::util::{Identity, Stack},
};
use tracing::{debug, error, info, warn};

use crate::{
    compression::Compressor,
    credentials,
    error::{BuildError, ServeError},
    interceptor::{CallKind, InterceptorChain},
    options::RpcOptions,
    plan::{ServerPlan, plan_server},
};

/// gRPC 方法的调用形态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Unary,
    ClientStreaming,
    ServerStreaming,
    Bidirectional,
}

impl MethodKind {
    /// 任意方向的流式方法都归入流式拦截链。
    pub fn call_kind(self) -> CallKind {
        match self {
            MethodKind::Unary => CallKind::Unary,
            MethodKind::ClientStreaming
            | MethodKind::ServerStreaming
            | MethodKind::Bidirectional => CallKind::Streaming,
        }
    }
}

/// 服务描述符：完整服务名（含 package）与方法列表。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceDescriptor {
    name: String,
    methods: Vec<(String, MethodKind)>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn method(mut self, name: impl Into<String>, kind: MethodKind) -> Self {
        self.methods.push((name.into(), kind));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> impl Iterator<Item = (&str, MethodKind)> {
        self.methods
            .iter()
            .map(|(name, kind)| (name.as_str(), *kind))
    }

    /// 方法在 HTTP/2 上的请求路径，形如 `/package.Service/Method`。
    pub fn path(&self, method: &str) -> String {
        format!("/{}/{}", self.name, method)
    }
}

/// 请求路径到调用形态的映射。
#[derive(Clone, Debug, Default)]
struct MethodTable {
    kinds: HashMap<String, CallKind>,
}

impl MethodTable {
    fn register(&mut self, descriptor: &ServiceDescriptor) {
        for (method, kind) in descriptor.methods() {
            self.kinds.insert(descriptor.path(method), kind.call_kind());
        }
    }

    fn kind_of(&self, path: &str) -> CallKind {
        self.kinds.get(path).copied().unwrap_or(CallKind::Unary)
    }
}

#[derive(Debug)]
struct InterceptState {
    methods: MethodTable,
    unary: Option<InterceptorChain>,
    stream: Option<InterceptorChain>,
}

impl InterceptState {
    fn chain(&self, kind: CallKind) -> Option<&InterceptorChain> {
        match kind {
            CallKind::Unary => self.unary.as_ref(),
            CallKind::Streaming => self.stream.as_ref(),
        }
    }
}

/// 在路由前执行拦截链的 `tower` Layer。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - tonic 的 `Interceptor` 看不到请求路径，无法区分一元与流式调用；
///   因此在 HTTP 层实现一个 Layer，先按路径查出调用形态，再选择对应拦截链。
///
/// ## 逻辑（How）
/// 1. 根据 `uri().path()` 查询方法表；
/// 2. 对应拦截链未安装时直接透传；
/// 3. 否则把 HTTP 头转换为 [`MetadataMap`]，构造 `Request<()>` 交给拦截链；
/// 4. 成功则把（可能被修改的）元数据写回请求头并继续路由；失败则把 `Status`
///    直接编码为 gRPC 响应返回，内部服务不会被调用。
///
/// ## 契约（What）
/// - 拦截器写入的扩展（extensions）不会带回 HTTP 请求，只有元数据会。
#[derive(Clone, Debug)]
pub struct InterceptLayer {
    state: Arc<InterceptState>,
}

impl InterceptLayer {
    fn new(
        methods: MethodTable,
        unary: Option<InterceptorChain>,
        stream: Option<InterceptorChain>,
    ) -> Self {
        Self {
            state: Arc::new(InterceptState {
                methods,
                unary,
                stream,
            }),
        }
    }
}

impl<S> Layer<S> for InterceptLayer {
    type Service = InterceptService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InterceptService {
            inner,
            state: Arc::clone(&self.state),
        }
    }
}

/// [`InterceptLayer`] 产出的服务。
#[derive(Clone, Debug)]
pub struct InterceptService<S> {
    inner: S,
    state: Arc<InterceptState>,
}

impl<S, B> Service<http::Request<B>> for InterceptService<S>
where
    S: Service<http::Request<B>, Response = http::Response<BoxBody>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        let kind = self.state.methods.kind_of(request.uri().path());
        let Some(chain) = self.state.chain(kind) else {
            return Box::pin(self.inner.call(request));
        };

        let (mut parts, body) = request.into_parts();
        let mut intercepted = tonic::Request::new(());
        *intercepted.metadata_mut() = MetadataMap::from_headers(std::mem::take(&mut parts.headers));

        match chain.apply(intercepted) {
            Ok(intercepted) => {
                let (metadata, _, ()) = intercepted.into_parts();
                parts.headers = metadata.into_headers();
                Box::pin(self.inner.call(http::Request::from_parts(parts, body)))
            }
            Err(status) => {
                debug!(
                    target: "spark.rpc.server",
                    path = %parts.uri.path(),
                    kind = kind.as_str(),
                    code = ?status.code(),
                    "request rejected by interceptor chain"
                );
                Box::pin(std::future::ready(Ok(status.into_http())))
            }
        }
    }
}

/// `prepare` 回调中使用的服务注册入口。
///
/// 通过 [`ServiceRegistrar::compression`] 可取得服务端选定的压缩算法，
/// 在包装生成的服务时调用其 `send_compressed` / `accept_compressed`。
/// 配置了压缩算法、注册了服务却从未读取该算法时，`prepare` 会输出一条 `warn` 日志。
pub struct ServiceRegistrar<'a> {
    routes: &'a mut RoutesBuilder,
    compressor: Option<Compressor>,
    added: usize,
    compression_read: Cell<bool>,
}

impl fmt::Debug for ServiceRegistrar<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistrar")
            .field("compressor", &self.compressor)
            .finish_non_exhaustive()
    }
}

impl ServiceRegistrar<'_> {
    pub fn add_service<S>(&mut self, service: S) -> &mut Self
    where
        S: Service<http::Request<BoxBody>, Response = http::Response<BoxBody>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        debug!(target: "spark.rpc.server", service = S::NAME, "service registered");
        self.routes.add_service(service);
        self.added += 1;
        self
    }

    pub fn compression(&self) -> Option<CompressionEncoding> {
        self.compression_read.set(true);
        self.compressor.map(Compressor::encoding)
    }

    fn compression_ignored(&self) -> bool {
        self.compressor.is_some() && self.added > 0 && !self.compression_read.get()
    }
}

type InterceptedRouter = Router<Stack<InterceptLayer, Identity>>;

/// 装配完成、尚未开始监听的 gRPC 服务端。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `build` 是一次性、非阻塞的构造调用：证书在此读取并交给 tonic 校验；
/// - `prepare` 可多次调用，每次登记一个服务描述符并立即执行注册回调；
/// - `start*` 消费自身，阻塞当前任务直到服务端停止或失败。
pub struct GrpcServer {
    plan: ServerPlan,
    server: Server,
    routes: RoutesBuilder,
    methods: MethodTable,
    services: Vec<String>,
}

impl fmt::Debug for GrpcServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrpcServer")
            .field("plan", &self.plan)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

impl GrpcServer {
    pub fn build(options: &RpcOptions) -> Result<Self, BuildError> {
        let plan = plan_server(options).inspect_err(|err| {
            error!(target: "spark.rpc.server", code = err.code(), error = %err, "invalid server options");
        })?;

        let mut server = Server::builder();
        if let Some(source) = &plan.tls {
            let tls = credentials::load_server_tls(source)?;
            server = server.tls_config(tls).map_err(|source| {
                error!(target: "spark.rpc.server", error = %source, "server TLS credentials rejected");
                BuildError::CredentialRejected {
                    side: "server",
                    source,
                }
            })?;
        }

        info!(
            target: "spark.rpc.server",
            address = %plan.address,
            tls = plan.tls.is_some(),
            unary_interceptors = plan.unary_chain.as_ref().map_or(0, InterceptorChain::len),
            stream_interceptors = plan.stream_chain.as_ref().map_or(0, InterceptorChain::len),
            compressor = plan.compressor.map(Compressor::name),
            "gRPC server assembled"
        );

        Ok(Self {
            plan,
            server,
            routes: RoutesBuilder::default(),
            methods: MethodTable::default(),
            services: Vec::new(),
        })
    }

    pub fn plan(&self) -> &ServerPlan {
        &self.plan
    }

    pub fn is_tls(&self) -> bool {
        self.plan.tls.is_some()
    }

    pub fn compression(&self) -> Option<CompressionEncoding> {
        self.plan.compressor.map(Compressor::encoding)
    }

    /// 已通过 `prepare` 登记的服务名，按登记顺序排列。
    pub fn services(&self) -> &[String] {
        &self.services
    }

    /// 登记服务描述符并执行注册回调。
    pub fn prepare<F>(&mut self, descriptor: ServiceDescriptor, register: F) -> &mut Self
    where
        F: FnOnce(&mut ServiceRegistrar<'_>),
    {
        self.methods.register(&descriptor);
        let mut registrar = ServiceRegistrar {
            routes: &mut self.routes,
            compressor: self.plan.compressor,
            added: 0,
            compression_read: Cell::new(false),
        };
        register(&mut registrar);
        if registrar.compression_ignored() {
            warn!(
                target: "spark.rpc.server",
                service = descriptor.name(),
                compressor = self.plan.compressor.map(Compressor::name),
                "compressor configured but never applied to the registered service; \
                 call send_compressed/accept_compressed with ServiceRegistrar::compression"
            );
        }
        self.services.push(descriptor.name().to_string());
        self
    }

    /// 当前配置对应的拦截 Layer，可用于在其它 `tower` 栈中复用同一套拦截规则。
    pub fn intercept_layer(&self) -> InterceptLayer {
        InterceptLayer::new(
            self.methods.clone(),
            self.plan.unary_chain.clone(),
            self.plan.stream_chain.clone(),
        )
    }

    /// 绑定配置的地址并开始服务，直到服务端失败为止。
    pub async fn start(self) -> Result<(), ServeError> {
        self.start_with_shutdown(std::future::pending()).await
    }

    /// 绑定配置的地址并开始服务，`signal` 完成时优雅退出。
    pub async fn start_with_shutdown<F>(self, signal: F) -> Result<(), ServeError>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = resolve_listen_address(&self.plan.address)
            .await
            .inspect_err(|err| {
                error!(target: "spark.rpc.server", code = err.code(), error = %err, "cannot resolve listen address");
            })?;
        info!(target: "spark.rpc.server", %addr, services = ?self.services, "gRPC server listening");
        self.into_router()
            .serve_with_shutdown(addr, signal)
            .await
            .map_err(log_serve_error)
    }

    /// 在调用方已绑定的监听器上服务，配置中的地址将被忽略。
    pub async fn start_with_listener<F>(self, listener: TcpListener, signal: F) -> Result<(), ServeError>
    where
        F: Future<Output = ()> + Send,
    {
        if let Ok(addr) = listener.local_addr() {
            info!(target: "spark.rpc.server", %addr, services = ?self.services, "gRPC server listening");
        }
        self.into_router()
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
            .await
            .map_err(log_serve_error)
    }

    fn into_router(self) -> InterceptedRouter {
        let layer = self.intercept_layer();
        let mut server = self.server.layer(layer);
        server.add_routes(self.routes.routes())
    }
}

fn log_serve_error(err: tonic::transport::Error) -> ServeError {
    let err = ServeError::from(err);
    error!(target: "spark.rpc.server", code = err.code(), error = %err, "gRPC server failed");
    err
}

async fn resolve_listen_address(address: &str) -> Result<SocketAddr, ServeError> {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let invalid = |reason: String| ServeError::InvalidAddress {
        address: address.to_string(),
        reason,
    };
    tokio::net::lookup_host(address)
        .await
        .map_err(|err| invalid(err.to_string()))?
        .next()
        .ok_or_else(|| invalid("address resolved to nothing".to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tower::ServiceExt;
    use tracing_test::traced_test;

    use super::*;
    use crate::interceptor::Interceptor;

    #[derive(Clone)]
    struct Echo {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Service<http::Request<()>> for Echo {
        type Response = http::Response<BoxBody>;
        type Error = Infallible;
        type Future = std::future::Ready<Result<Self::Response, Infallible>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, request: http::Request<()>) -> Self::Future {
            let tag = request
                .headers()
                .get("x-trace")
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            self.seen.lock().unwrap().push(tag);
            std::future::ready(Ok(http::Response::new(tonic::body::empty_body())))
        }
    }

    fn tagging(name: &'static str) -> Interceptor {
        Interceptor::new(name, move |mut request: tonic::Request<()>| {
            let previous = request
                .metadata()
                .get("x-trace")
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let next = if previous.is_empty() {
                name.to_string()
            } else {
                format!("{previous},{name}")
            };
            request.metadata_mut().insert("x-trace", next.parse().unwrap());
            Ok(request)
        })
    }

    fn layer(unary: &[&'static str], stream: &[&'static str]) -> InterceptLayer {
        let mut methods = MethodTable::default();
        methods.register(
            &ServiceDescriptor::new("demo.Echo")
                .method("Say", MethodKind::Unary)
                .method("Follow", MethodKind::ServerStreaming),
        );
        let chain = |names: &[&'static str]| -> Option<InterceptorChain> {
            (!names.is_empty()).then(|| names.iter().copied().map(tagging).collect())
        };
        InterceptLayer::new(methods, chain(unary), chain(stream))
    }

    fn request(path: &str) -> http::Request<()> {
        http::Request::builder().uri(path).body(()).unwrap()
    }

    #[tokio::test]
    async fn chains_run_in_declared_order_per_call_kind() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let service = layer(&["u1", "u2", "u3"], &["s1"]).layer(Echo {
            seen: Arc::clone(&seen),
        });

        service.clone().oneshot(request("/demo.Echo/Say")).await.unwrap();
        service.clone().oneshot(request("/demo.Echo/Follow")).await.unwrap();
        // 未声明的方法按一元调用处理。
        service.oneshot(request("/demo.Echo/Unknown")).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["u1,u2,u3", "s1", "u1,u2,u3"]);
    }

    #[tokio::test]
    async fn missing_chain_passes_requests_through() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let service = layer(&["u1"], &[]).layer(Echo {
            seen: Arc::clone(&seen),
        });

        service.oneshot(request("/demo.Echo/Follow")).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![""]);
    }

    #[tokio::test]
    async fn rejection_short_circuits_with_grpc_status() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut methods = MethodTable::default();
        methods.register(&ServiceDescriptor::new("demo.Echo").method("Say", MethodKind::Unary));
        let deny: InterceptorChain = [Interceptor::new("deny", |_| {
            Err(tonic::Status::unauthenticated("missing token"))
        })]
        .into_iter()
        .collect();
        let service = InterceptLayer::new(methods, Some(deny), None).layer(Echo {
            seen: Arc::clone(&seen),
        });

        let response = service.oneshot(request("/demo.Echo/Say")).await.unwrap();
        let status = tonic::Status::from_header_map(response.headers()).unwrap();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn descriptor_paths_and_kinds() {
        let descriptor = ServiceDescriptor::new("grpc.health.v1.Health")
            .method("Check", MethodKind::Unary)
            .method("Watch", MethodKind::ServerStreaming);
        assert_eq!(descriptor.path("Check"), "/grpc.health.v1.Health/Check");
        assert_eq!(MethodKind::Bidirectional.call_kind(), CallKind::Streaming);

        let mut table = MethodTable::default();
        table.register(&descriptor);
        assert_eq!(table.kind_of("/grpc.health.v1.Health/Watch"), CallKind::Streaming);
        assert_eq!(table.kind_of("/grpc.health.v1.Health/Check"), CallKind::Unary);
    }

    #[test]
    fn build_rejects_half_configured_tls_without_touching_files() {
        let options = RpcOptions::builder().server_cert("/missing/server.pem").build();
        let err = GrpcServer::build(&options).unwrap_err();
        assert!(matches!(err, BuildError::IncompleteServerTls { missing: "key" }));
    }

    #[test]
    fn prepare_records_services_in_order() {
        let mut server = GrpcServer::build(&RpcOptions::default()).unwrap();
        server
            .prepare(ServiceDescriptor::new("demo.A"), |_| {})
            .prepare(ServiceDescriptor::new("demo.B"), |registrar| {
                assert!(registrar.compression().is_none());
            });
        assert_eq!(server.services(), ["demo.A", "demo.B"]);
        assert!(!server.is_tls());
    }

    #[cfg(feature = "gzip")]
    #[test]
    #[traced_test]
    fn unapplied_compressor_is_reported() {
        let mut server =
            GrpcServer::build(&RpcOptions::builder().compressor("gzip").build()).unwrap();
        let (_reporter, health) = tonic_health::server::health_reporter();
        server.prepare(ServiceDescriptor::new("grpc.health.v1.Health"), |registrar| {
            registrar.add_service(health);
        });
        assert!(logs_contain("compressor configured but never applied"));
    }

    #[cfg(feature = "gzip")]
    #[test]
    #[traced_test]
    fn applied_compressor_is_silent() {
        let mut server =
            GrpcServer::build(&RpcOptions::builder().compressor("gzip").build()).unwrap();
        let (_reporter, health) = tonic_health::server::health_reporter();
        server.prepare(ServiceDescriptor::new("grpc.health.v1.Health"), |registrar| {
            let encoding = registrar.compression().unwrap();
            registrar.add_service(health.send_compressed(encoding).accept_compressed(encoding));
        });
        assert!(!logs_contain("compressor configured but never applied"));
    }
}
