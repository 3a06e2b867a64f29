//! 集成测试共用的夹具：健康检查服务、令牌守卫与自签名证书。
//!
//! - 以 `tonic-health` 作为现成的 gRPC 服务，避免在测试中引入 protobuf 代码生成；
//! - 服务端一律绑定 `127.0.0.1:0`，由操作系统分配端口，测试之间互不干扰。

#![allow(dead_code)]

use std::{
    fs,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex, Once},
};

use spark_rpc::{
    GrpcServer, Interceptor, MethodKind, RpcOptions, ServeError, ServiceDescriptor,
    interceptor::AUTHORIZATION_METADATA_KEY,
};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tonic::Status;

pub const CHECK: &str = "/grpc.health.v1.Health/Check";
pub const WATCH: &str = "/grpc.health.v1.Health/Watch";

pub fn health_descriptor() -> ServiceDescriptor {
    ServiceDescriptor::new("grpc.health.v1.Health")
        .method("Check", MethodKind::Unary)
        .method("Watch", MethodKind::ServerStreaming)
}

/// 后台运行中的服务端。
pub struct RunningServer {
    pub addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), ServeError>>,
}

impl RunningServer {
    pub async fn stop(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(());
        self.handle.await??;
        Ok(())
    }
}

/// 按给定选项装配服务端、注册健康检查服务并在随机端口上启动。
pub async fn serve_health(options: &RpcOptions) -> anyhow::Result<RunningServer> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let mut server = GrpcServer::build(options)?;
    let (_reporter, health) = tonic_health::server::health_reporter();
    server.prepare(health_descriptor(), |registrar| {
        let health = match registrar.compression() {
            Some(encoding) => health.send_compressed(encoding).accept_compressed(encoding),
            None => health,
        };
        registrar.add_service(health);
    });

    let (shutdown, signal) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.start_with_listener(listener, async move {
        let _ = signal.await;
    }));

    Ok(RunningServer {
        addr,
        shutdown,
        handle,
    })
}

/// 只放行携带 `Bearer <token>` 的请求。
pub fn require_token(token: &'static str) -> Interceptor {
    let expected = format!("Bearer {token}");
    Interceptor::new("require-token", move |request| {
        let presented = request
            .metadata()
            .get(AUTHORIZATION_METADATA_KEY)
            .and_then(|value| value.to_str().ok());
        match presented {
            Some(value) if value == expected => Ok(request),
            _ => Err(Status::unauthenticated("missing or invalid token")),
        }
    })
}

/// 记录拦截器名称以及请求元数据中 `key` 对应的值，格式为 `name:value`。
pub fn recording(
    name: &'static str,
    key: &'static str,
    log: &Arc<Mutex<Vec<String>>>,
) -> Interceptor {
    let log = Arc::clone(log);
    Interceptor::new(name, move |request| {
        let value = request
            .metadata()
            .get(key)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("-")
            .to_string();
        log.lock().unwrap().push(format!("{name}:{value}"));
        Ok(request)
    })
}

/// 在请求元数据中写入固定键值的客户端拦截器。
pub fn tagging(name: &'static str, key: &'static str, value: &'static str) -> Interceptor {
    Interceptor::new(name, move |mut request| {
        request.metadata_mut().insert(key, value.parse().unwrap());
        Ok(request)
    })
}

/// 写入磁盘的自签名证书与私钥，证书签发给 `localhost`。
pub struct TlsFixture {
    pub cert: PathBuf,
    pub key: PathBuf,
}

pub fn tls_fixture(name: &str) -> anyhow::Result<TlsFixture> {
    ensure_crypto_provider();

    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])?;
    let dir = std::env::temp_dir().join(format!("spark-rpc-{name}-{}", std::process::id()));
    fs::create_dir_all(&dir)?;

    let cert = dir.join("server.pem");
    let key = dir.join("server.key");
    fs::write(&cert, certified.cert.pem())?;
    fs::write(&key, certified.key_pair.serialize_pem())?;
    Ok(TlsFixture { cert, key })
}

pub fn scratch_file(name: &str, contents: &str) -> anyhow::Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("spark-rpc-scratch-{}", std::process::id()));
    fs::create_dir_all(&dir)?;
    let path = dir.join(name);
    fs::write(&path, contents)?;
    Ok(path)
}

/// 进程内只注册一次 rustls 加密后端；已被其它组件注册时忽略。
fn ensure_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
