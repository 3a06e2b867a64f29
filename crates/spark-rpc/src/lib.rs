#![doc = r#"
# spark-rpc

## 设计动机（Why）
- **定位**：以一小组具名选项（地址、压缩算法、访问令牌、TLS 证书路径、主机名覆盖、拦截器）
  装配 gRPC 客户端与服务端，调用方无需手工拼接 tonic 的 `Server` / `Endpoint` 配置。
- **架构角色**：纯配置翻译层。gRPC 协议、连接管理、流复用全部交给 tonic，
  本 crate 只负责“选项 → 传输配置”的映射与它们之间的优先级规则。
- **设计理念**：选项是不可变值，翻译是纯函数，网络资源只在最后一步创建；
  因此优先级规则可以在没有证书、没有端口的情况下被完整测试。

## 核心契约（What）
- **选项**：[`RpcOptions`] 由 [`RpcOptionsBuilder`] 或 [`RpcConfig`] 产生，构建后不可变；
- **服务端**：[`GrpcServer::build`] 装载证书、安装拦截链与压缩偏好；证书或私钥只配置其一时立即报错；
- **客户端**：[`GrpcClient::connect`] 依据决策表选择传输安全方式，
  TLS 与访问令牌可以叠加，二者皆无时显式使用明文连接；
- **错误**：所有失败都以 [`BuildError`] / [`ServeError`] / [`ConfigError`] 返回，
  并通过 [`ErrorKind`] 区分“本地输入错误”与“环境故障”，库代码从不终止进程。

## 实现策略（How）
- [`plan_server`] / [`plan_client`]：选项到装配计划的纯翻译；
- [`GrpcServer`] / [`GrpcClient`]：把计划落地为 tonic 对象；
- [`RpcServer`] / [`RpcClient`] / [`Builder`]：面向调用方的抽象，[`GrpcBuilder`] 是其默认实现。

## 风险与考量（Trade-offs）
- tonic 的请求拦截器只能观察元数据，服务端拦截链因此是“按序执行”而非真正的环绕；
- 服务端依据 [`ServiceDescriptor`] 声明的方法表区分一元与流式调用，未声明的方法按一元处理；
- 服务端压缩只能作用于具体服务：注册回调需以 [`ServiceRegistrar::compression`] 调用生成服务的
  `send_compressed` / `accept_compressed`，否则对端的压缩请求会被拒绝（此时输出 `warn` 日志）；
- 地址中显式写出的协议前缀必须与传输安全方式一致（TLS 为 `https`，明文为 `http`），不一致时构建失败。
"#]

pub mod client;
pub mod compression;
pub mod config;
mod credentials;
pub mod error;
pub mod facade;
pub mod interceptor;
pub mod observability;
pub mod options;
pub mod plan;
pub mod server;

pub use client::{GrpcClient, PendingCall};
pub use compression::Compressor;
pub use config::RpcConfig;
pub use error::{BuildError, ConfigError, ErrorKind, ServeError};
pub use facade::{Builder, GrpcBuilder, RpcClient, RpcServer, build_client, build_server};
pub use interceptor::{AccessToken, CallKind, ClientInterceptor, Interceptor, InterceptorChain};
pub use observability::install_tracing;
pub use options::{DEFAULT_ADDRESS, RpcOption, RpcOptions, RpcOptionsBuilder};
pub use plan::{ClientPlan, ServerPlan, TransportSecurity, plan_client, plan_server};
pub use server::{GrpcServer, MethodKind, ServiceDescriptor, ServiceRegistrar};
