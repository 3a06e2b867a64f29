//! 选项到传输配置的纯翻译层。
//!
//! # 教案式概览
//! - **意图（Why）**：把“哪些选项会生效、彼此如何影响”的判定逻辑从网络资源的创建中剥离出来。
//!   这里的函数不读文件、不拨号，只根据 [`RpcOptions`] 计算出 [`ServerPlan`] / [`ClientPlan`]，
//!   因此优先级规则可以在没有证书、没有端口的情况下被完整测试。
//! - **结构（How）**：
//!   - [`plan_server`]：校验地址、强制证书/私钥成对出现、解析压缩算法、决定是否安装拦截链；
//!   - [`plan_client`]：校验地址并推导端点 URI，再通过 [`resolve_client_security`] 决策表
//!     选出传输安全方式与每次调用的令牌凭据；
//! - **契约（What）**：同一份 `RpcOptions` 多次翻译得到相等的计划（翻译是幂等的）。

use std::path::PathBuf;

use http::Uri;
use tracing::warn;

use crate::{
    compression::Compressor,
    error::BuildError,
    interceptor::{AccessToken, CallKind, ClientInterceptor, Interceptor, InterceptorChain},
    options::RpcOptions,
};

/// 服务端证书与私钥的文件位置。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerTlsSource {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// 客户端 TLS 材料：用于校验服务端的 CA 证书，以及握手时使用的服务端名称。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientTlsSource {
    pub ca_cert: PathBuf,
    pub host_override: String,
}

/// 客户端连接的传输层安全方式。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportSecurity {
    /// 以给定主机名校验服务端证书的 TLS 连接。
    Tls(ClientTlsSource),
    /// 显式声明的明文连接，不协商任何传输层加密。
    Insecure,
}

impl TransportSecurity {
    pub fn is_tls(&self) -> bool {
        matches!(self, TransportSecurity::Tls(_))
    }

    fn scheme(&self) -> &'static str {
        match self {
            TransportSecurity::Tls(_) => "https",
            TransportSecurity::Insecure => "http",
        }
    }
}

/// 服务端装配计划。
#[derive(Clone, Debug, PartialEq)]
pub struct ServerPlan {
    pub address: String,
    pub tls: Option<ServerTlsSource>,
    /// 仅当配置了至少一个一元拦截器时为 `Some`。
    pub unary_chain: Option<InterceptorChain>,
    /// 仅当配置了至少一个流式拦截器时为 `Some`。
    pub stream_chain: Option<InterceptorChain>,
    pub compressor: Option<Compressor>,
}

impl ServerPlan {
    pub fn has_interceptors(&self) -> bool {
        self.unary_chain.is_some() || self.stream_chain.is_some()
    }
}

/// 客户端装配计划。
#[derive(Clone, Debug, PartialEq)]
pub struct ClientPlan {
    pub address: String,
    /// 带协议前缀的端点 URI，TLS 时为 `https://`，否则为 `http://`。
    pub endpoint_uri: String,
    pub security: TransportSecurity,
    pub token: Option<AccessToken>,
    pub compressor: Option<Compressor>,
    pub unary_interceptor: Option<Interceptor>,
    pub stream_interceptor: Option<Interceptor>,
    pub lazy_dial: bool,
}

impl ClientPlan {
    /// 为给定调用形态组装实际安装的拦截器。
    pub fn interceptor(&self, kind: CallKind) -> ClientInterceptor {
        let interceptor = match kind {
            CallKind::Unary => self.unary_interceptor.clone(),
            CallKind::Streaming => self.stream_interceptor.clone(),
        };
        ClientInterceptor::new(interceptor, self.token.clone())
    }
}

/// 将选项翻译为服务端装配计划。
///
/// # 教案级注释
///
/// ## 逻辑（How）
/// 1. 地址为空直接拒绝；
/// 2. 证书与私钥都设置时生成 [`ServerTlsSource`]；只设置其中之一视为配置错误，
///    返回 [`BuildError::IncompleteServerTls`]，绝不静默降级为明文；
/// 3. 拦截链非空时才安装，声明顺序保持不变；
/// 4. 压缩算法名称在此解析，未知名称立即报错。
pub fn plan_server(options: &RpcOptions) -> Result<ServerPlan, BuildError> {
    let address = validate_address(&options.address)?;

    let tls = match (&options.server_cert, &options.server_key) {
        (Some(cert), Some(key)) => Some(ServerTlsSource {
            cert: cert.clone(),
            key: key.clone(),
        }),
        (Some(_), None) => return Err(BuildError::IncompleteServerTls { missing: "key" }),
        (None, Some(_)) => {
            return Err(BuildError::IncompleteServerTls {
                missing: "certificate",
            });
        }
        (None, None) => None,
    };

    Ok(ServerPlan {
        address,
        tls,
        unary_chain: installed_chain(&options.unary_server_interceptors),
        stream_chain: installed_chain(&options.stream_server_interceptors),
        compressor: resolve_compressor(options)?,
    })
}

/// 将选项翻译为客户端装配计划。
///
/// # 教案级注释
///
/// ## 逻辑（How）
/// 1. 校验地址；
/// 2. CA 证书与主机名覆盖同时存在才构成 TLS 配置；只有其中之一时按“未配置 TLS”处理，
///    并输出一条 `warn` 日志提示配置不完整；
/// 3. 令牌在此完成元数据合法性校验；
/// 4. 交给 [`resolve_client_security`] 决策表得出传输安全方式与令牌凭据；
///    地址若自带协议前缀，必须与该方式一致（TLS 为 `https`，明文为 `http`），否则返回
///    [`BuildError::InvalidAddress`]，绝不让 TLS 配置被一个 `http://` 前缀悄悄绕过；
/// 5. 客户端拦截器只取自客户端自己的槽位，与服务端拦截链互不相干：
///    服务端拦截链是否为空不影响客户端拦截器的安装。
pub fn plan_client(options: &RpcOptions) -> Result<ClientPlan, BuildError> {
    let address = validate_address(&options.address)?;

    let tls = match (&options.client_cert, &options.host_override) {
        (Some(ca_cert), Some(host_override)) => Some(ClientTlsSource {
            ca_cert: ca_cert.clone(),
            host_override: host_override.clone(),
        }),
        (Some(_), None) => {
            warn!(
                target: "spark.rpc.client",
                "client certificate set without host override; TLS not applied"
            );
            None
        }
        (None, Some(_)) => {
            warn!(
                target: "spark.rpc.client",
                "host override set without client certificate; TLS not applied"
            );
            None
        }
        (None, None) => None,
    };

    let token = options
        .token
        .as_deref()
        .map(AccessToken::new)
        .transpose()?;

    let (security, token) = resolve_client_security(tls, token);
    let endpoint_uri = endpoint_uri(&address, security.scheme())?;

    Ok(ClientPlan {
        address,
        endpoint_uri,
        security,
        token,
        compressor: resolve_compressor(options)?,
        unary_interceptor: options.unary_client_interceptor.clone(),
        stream_interceptor: options.stream_client_interceptor.clone(),
        lazy_dial: options.lazy_dial,
    })
}

/// 客户端传输安全与令牌凭据的决策表。
///
/// | TLS 已配置 | 令牌已配置 | 传输层 | 每次调用凭据 |
/// |:---:|:---:|---|---|
/// | 是 | 是 | TLS（按主机名覆盖校验） | 令牌 |
/// | 是 | 否 | TLS（按主机名覆盖校验） | 无 |
/// | 否 | 是 | 明文 | 令牌 |
/// | 否 | 否 | 明文 | 无 |
///
/// TLS 与令牌可以叠加：令牌不会因为存在 TLS 而被丢弃。
pub fn resolve_client_security(
    tls: Option<ClientTlsSource>,
    token: Option<AccessToken>,
) -> (TransportSecurity, Option<AccessToken>) {
    match (tls, token) {
        (Some(tls), Some(token)) => (TransportSecurity::Tls(tls), Some(token)),
        (Some(tls), None) => (TransportSecurity::Tls(tls), None),
        (None, Some(token)) => (TransportSecurity::Insecure, Some(token)),
        (None, None) => (TransportSecurity::Insecure, None),
    }
}

fn validate_address(address: &str) -> Result<String, BuildError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(BuildError::EmptyAddress);
    }
    Ok(address.to_string())
}

fn endpoint_uri(address: &str, scheme: &str) -> Result<String, BuildError> {
    let uri = match address.split_once("://") {
        Some((given, _)) if !given.eq_ignore_ascii_case(scheme) => {
            return Err(BuildError::InvalidAddress {
                address: address.to_string(),
                reason: format!(
                    "scheme `{given}` conflicts with TLS configuration (expected `{scheme}`)"
                ),
            });
        }
        Some(_) => address.to_string(),
        None => format!("{scheme}://{address}"),
    };
    let parsed: Uri = uri.parse().map_err(|err: http::uri::InvalidUri| {
        BuildError::InvalidAddress {
            address: address.to_string(),
            reason: err.to_string(),
        }
    })?;
    if parsed.authority().is_none() {
        return Err(BuildError::InvalidAddress {
            address: address.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(uri)
}

fn installed_chain(chain: &InterceptorChain) -> Option<InterceptorChain> {
    (!chain.is_empty()).then(|| chain.clone())
}

fn resolve_compressor(options: &RpcOptions) -> Result<Option<Compressor>, BuildError> {
    options
        .compressor
        .as_deref()
        .map(Compressor::from_name)
        .transpose()
}
