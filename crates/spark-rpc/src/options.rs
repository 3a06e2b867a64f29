//! 选项存储：调用方提供的原始配置值。
//!
//! # 教案式概览
//! - **意图（Why）**：把“地址、压缩算法、令牌、证书路径、拦截器”这些零散参数收拢到一个
//!   不可变的值 [`RpcOptions`] 中，再交给纯函数完成服务端/客户端的翻译，避免隐藏的全局可变状态。
//! - **结构（How）**：[`RpcOptionsBuilder`] 负责累积；标量字段“后写覆盖”，服务端拦截链“追加”，
//!   客户端拦截器每种调用形态只有一个槽位，同样“后写覆盖”。
//! - **契约（What）**：写入阶段不做任何校验；所有校验都推迟到 [`crate::plan`] 的翻译阶段。

use std::{fmt, path::PathBuf, str::FromStr};

use crate::{
    error::ConfigError,
    interceptor::{Interceptor, InterceptorChain},
};

/// 未显式设置地址时使用的默认端点。
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:50051";

/// 不可变的构建选项快照。
///
/// 通过 [`RpcOptions::builder`] 构造；字段只读，装配器以引用方式消费。
#[derive(Clone, PartialEq)]
pub struct RpcOptions {
    pub(crate) address: String,
    pub(crate) compressor: Option<String>,
    pub(crate) token: Option<String>,
    pub(crate) server_cert: Option<PathBuf>,
    pub(crate) server_key: Option<PathBuf>,
    pub(crate) client_cert: Option<PathBuf>,
    pub(crate) host_override: Option<String>,
    pub(crate) unary_server_interceptors: InterceptorChain,
    pub(crate) stream_server_interceptors: InterceptorChain,
    pub(crate) unary_client_interceptor: Option<Interceptor>,
    pub(crate) stream_client_interceptor: Option<Interceptor>,
    pub(crate) lazy_dial: bool,
}

impl Default for RpcOptions {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            compressor: None,
            token: None,
            server_cert: None,
            server_key: None,
            client_cert: None,
            host_override: None,
            unary_server_interceptors: InterceptorChain::new(),
            stream_server_interceptors: InterceptorChain::new(),
            unary_client_interceptor: None,
            stream_client_interceptor: None,
            lazy_dial: false,
        }
    }
}

impl fmt::Debug for RpcOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcOptions")
            .field("address", &self.address)
            .field("compressor", &self.compressor)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("server_cert", &self.server_cert)
            .field("server_key", &self.server_key)
            .field("client_cert", &self.client_cert)
            .field("host_override", &self.host_override)
            .field("unary_server_interceptors", &self.unary_server_interceptors)
            .field("stream_server_interceptors", &self.stream_server_interceptors)
            .field("unary_client_interceptor", &self.unary_client_interceptor)
            .field("stream_client_interceptor", &self.stream_client_interceptor)
            .field("lazy_dial", &self.lazy_dial)
            .finish()
    }
}

impl RpcOptions {
    pub fn builder() -> RpcOptionsBuilder {
        RpcOptionsBuilder::new()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn compressor(&self) -> Option<&str> {
        self.compressor.as_deref()
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    pub fn server_cert(&self) -> Option<&PathBuf> {
        self.server_cert.as_ref()
    }

    pub fn server_key(&self) -> Option<&PathBuf> {
        self.server_key.as_ref()
    }

    pub fn client_cert(&self) -> Option<&PathBuf> {
        self.client_cert.as_ref()
    }

    pub fn host_override(&self) -> Option<&str> {
        self.host_override.as_deref()
    }

    pub fn unary_server_interceptors(&self) -> &InterceptorChain {
        &self.unary_server_interceptors
    }

    pub fn stream_server_interceptors(&self) -> &InterceptorChain {
        &self.stream_server_interceptors
    }

    pub fn unary_client_interceptor(&self) -> Option<&Interceptor> {
        self.unary_client_interceptor.as_ref()
    }

    pub fn stream_client_interceptor(&self) -> Option<&Interceptor> {
        self.stream_client_interceptor.as_ref()
    }

    pub fn lazy_dial(&self) -> bool {
        self.lazy_dial
    }
}

/// 选项累积器。
///
/// # 教案级注释
/// - **设计目标 (Why)**：沿用宿主 Builder 的链式 `&mut Self` 风格，调用方可以分多处逐步填充，
///   最后用 [`RpcOptionsBuilder::build`] 冻结为 [`RpcOptions`]。
/// - **契约说明 (What)**
///   - 标量 setter 覆盖旧值；传入空字符串等价于“未设置”；
///   - `unary_server_interceptor` / `stream_server_interceptor` 追加到对应拦截链末尾；
///   - `build` 只复制当前状态，Builder 之后仍可继续修改，已产出的快照不受影响。
/// - **风险提示 (Trade-offs)**：Builder 不是线程安全的共享对象，跨线程配置需外部同步。
#[derive(Clone, Debug, Default)]
pub struct RpcOptionsBuilder {
    options: RpcOptions,
}

fn non_empty(value: impl Into<String>) -> Option<String> {
    let value = value.into();
    (!value.is_empty()).then_some(value)
}

fn non_empty_path(value: impl Into<PathBuf>) -> Option<PathBuf> {
    let value = value.into();
    (!value.as_os_str().is_empty()).then_some(value)
}

impl RpcOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address(&mut self, address: impl Into<String>) -> &mut Self {
        self.options.address = address.into();
        self
    }

    pub fn compressor(&mut self, name: impl Into<String>) -> &mut Self {
        self.options.compressor = non_empty(name);
        self
    }

    pub fn token(&mut self, token: impl Into<String>) -> &mut Self {
        self.options.token = non_empty(token);
        self
    }

    pub fn server_cert(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.options.server_cert = non_empty_path(path);
        self
    }

    pub fn server_key(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.options.server_key = non_empty_path(path);
        self
    }

    /// 一次性设置服务端证书与私钥路径。
    pub fn server_tls(&mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> &mut Self {
        self.server_cert(cert).server_key(key)
    }

    /// 客户端用于校验服务端证书的 CA 证书路径。
    pub fn client_cert(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.options.client_cert = non_empty_path(path);
        self
    }

    /// 握手时用于校验证书的服务端名称，取代从地址推导出的主机名。
    pub fn host_override(&mut self, host: impl Into<String>) -> &mut Self {
        self.options.host_override = non_empty(host);
        self
    }

    /// 一次性设置客户端 CA 证书路径与主机名覆盖。
    pub fn client_tls(
        &mut self,
        cert: impl Into<PathBuf>,
        host_override: impl Into<String>,
    ) -> &mut Self {
        self.client_cert(cert).host_override(host_override)
    }

    pub fn unary_server_interceptor(&mut self, interceptor: Interceptor) -> &mut Self {
        self.options.unary_server_interceptors.push(interceptor);
        self
    }

    pub fn stream_server_interceptor(&mut self, interceptor: Interceptor) -> &mut Self {
        self.options.stream_server_interceptors.push(interceptor);
        self
    }

    pub fn unary_client_interceptor(&mut self, interceptor: Interceptor) -> &mut Self {
        self.options.unary_client_interceptor = Some(interceptor);
        self
    }

    pub fn stream_client_interceptor(&mut self, interceptor: Interceptor) -> &mut Self {
        self.options.stream_client_interceptor = Some(interceptor);
        self
    }

    /// 为 `true` 时客户端不在构建阶段拨号，首个请求到达时才建立连接。
    pub fn lazy_dial(&mut self, lazy: bool) -> &mut Self {
        self.options.lazy_dial = lazy;
        self
    }

    /// 应用一个具名选项。
    pub fn apply(&mut self, option: RpcOption) -> &mut Self {
        match option {
            RpcOption::Address(value) => self.address(value),
            RpcOption::Compressor(value) => self.compressor(value),
            RpcOption::Token(value) => self.token(value),
            RpcOption::ServerCert(value) => self.server_cert(value),
            RpcOption::ServerKey(value) => self.server_key(value),
            RpcOption::ClientCert(value) => self.client_cert(value),
            RpcOption::HostOverride(value) => self.host_override(value),
            RpcOption::LazyDial(value) => self.lazy_dial(value),
            RpcOption::UnaryServerInterceptor(value) => self.unary_server_interceptor(value),
            RpcOption::StreamServerInterceptor(value) => self.stream_server_interceptor(value),
            RpcOption::UnaryClientInterceptor(value) => self.unary_client_interceptor(value),
            RpcOption::StreamClientInterceptor(value) => self.stream_client_interceptor(value),
        }
    }

    pub fn apply_all<I>(&mut self, options: I) -> &mut Self
    where
        I: IntoIterator<Item = RpcOption>,
    {
        for option in options {
            self.apply(option);
        }
        self
    }

    pub fn build(&self) -> RpcOptions {
        self.options.clone()
    }
}

/// 可枚举的具名选项集合。
///
/// # 教案级注释
/// - **意图 (Why)**：为“按名字配置”提供一个封闭的选项集合，既能在代码中以枚举值传递，
///   也能通过 `key=value` 文本（[`FromStr`]）从外部输入解析；
/// - **契约 (What)**：文本形式只覆盖标量选项，拦截器只能以代码方式提供；
///   未知键返回 [`ConfigError::UnknownOption`]，值不合法返回 [`ConfigError::InvalidOptionValue`]。
#[derive(Clone, PartialEq)]
pub enum RpcOption {
    Address(String),
    Compressor(String),
    Token(String),
    ServerCert(PathBuf),
    ServerKey(PathBuf),
    ClientCert(PathBuf),
    HostOverride(String),
    LazyDial(bool),
    UnaryServerInterceptor(Interceptor),
    StreamServerInterceptor(Interceptor),
    UnaryClientInterceptor(Interceptor),
    StreamClientInterceptor(Interceptor),
}

impl RpcOption {
    pub fn key(&self) -> &'static str {
        match self {
            RpcOption::Address(_) => "address",
            RpcOption::Compressor(_) => "compressor",
            RpcOption::Token(_) => "token",
            RpcOption::ServerCert(_) => "server_cert",
            RpcOption::ServerKey(_) => "server_key",
            RpcOption::ClientCert(_) => "client_cert",
            RpcOption::HostOverride(_) => "host_override",
            RpcOption::LazyDial(_) => "lazy_dial",
            RpcOption::UnaryServerInterceptor(_) => "unary_server_interceptor",
            RpcOption::StreamServerInterceptor(_) => "stream_server_interceptor",
            RpcOption::UnaryClientInterceptor(_) => "unary_client_interceptor",
            RpcOption::StreamClientInterceptor(_) => "stream_client_interceptor",
        }
    }
}

impl fmt::Debug for RpcOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 令牌不进日志。
        match self {
            RpcOption::Token(_) => f.write_str("Token(***)"),
            RpcOption::Address(v) => f.debug_tuple("Address").field(v).finish(),
            RpcOption::Compressor(v) => f.debug_tuple("Compressor").field(v).finish(),
            RpcOption::ServerCert(v) => f.debug_tuple("ServerCert").field(v).finish(),
            RpcOption::ServerKey(v) => f.debug_tuple("ServerKey").field(v).finish(),
            RpcOption::ClientCert(v) => f.debug_tuple("ClientCert").field(v).finish(),
            RpcOption::HostOverride(v) => f.debug_tuple("HostOverride").field(v).finish(),
            RpcOption::LazyDial(v) => f.debug_tuple("LazyDial").field(v).finish(),
            RpcOption::UnaryServerInterceptor(v)
            | RpcOption::StreamServerInterceptor(v)
            | RpcOption::UnaryClientInterceptor(v)
            | RpcOption::StreamClientInterceptor(v) => {
                f.debug_tuple(self.key()).field(v).finish()
            }
        }
    }
}

impl FromStr for RpcOption {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidOptionValue {
                key: s.trim().to_string(),
                reason: "expected `key=value`".to_string(),
            })?;
        let key = key.trim();
        let value = value.trim();
        let option = match key {
            "address" => RpcOption::Address(value.to_string()),
            "compressor" => RpcOption::Compressor(value.to_string()),
            "token" => RpcOption::Token(value.to_string()),
            "server_cert" => RpcOption::ServerCert(PathBuf::from(value)),
            "server_key" => RpcOption::ServerKey(PathBuf::from(value)),
            "client_cert" => RpcOption::ClientCert(PathBuf::from(value)),
            "host_override" => RpcOption::HostOverride(value.to_string()),
            "lazy_dial" => {
                let lazy = value
                    .parse::<bool>()
                    .map_err(|err| ConfigError::InvalidOptionValue {
                        key: key.to_string(),
                        reason: err.to_string(),
                    })?;
                RpcOption::LazyDial(lazy)
            }
            other => return Err(ConfigError::UnknownOption(other.to_string())),
        };
        Ok(option)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_setters_are_last_write_wins() {
        let options = RpcOptions::builder()
            .address("10.0.0.1:1")
            .address("10.0.0.5:9000")
            .compressor("zstd")
            .compressor("gzip")
            .token("old")
            .token("abc123")
            .build();

        assert_eq!(options.address(), "10.0.0.5:9000");
        assert_eq!(options.compressor(), Some("gzip"));
        assert_eq!(options.token.as_deref(), Some("abc123"));
    }

    #[test]
    fn server_chains_append_while_client_slots_overwrite() {
        let a = Interceptor::new("a", Ok);
        let b = Interceptor::new("b", Ok);
        let options = RpcOptions::builder()
            .unary_server_interceptor(a.clone())
            .unary_server_interceptor(b.clone())
            .stream_server_interceptor(b.clone())
            .unary_client_interceptor(a)
            .unary_client_interceptor(b)
            .build();

        assert_eq!(options.unary_server_interceptors().names(), vec!["a", "b"]);
        assert_eq!(options.stream_server_interceptors().names(), vec!["b"]);
        assert_eq!(options.unary_client_interceptor().unwrap().name(), "b");
        assert!(options.stream_client_interceptor().is_none());
    }

    #[test]
    fn empty_values_clear_optional_fields() {
        let options = RpcOptions::builder()
            .token("abc123")
            .token("")
            .server_cert("cert.pem")
            .server_cert("")
            .build();
        assert!(!options.has_token());
        assert!(options.server_cert().is_none());
    }

    #[test]
    fn defaults_to_loopback_address() {
        let options = RpcOptions::default();
        assert_eq!(options.address(), DEFAULT_ADDRESS);
        assert!(!options.lazy_dial());
    }

    #[test]
    fn textual_options_parse_and_apply() {
        let parsed: Vec<RpcOption> = [
            "address = 10.0.0.5:9000",
            "token=abc123",
            "compressor=gzip",
            "lazy_dial=true",
        ]
        .into_iter()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .unwrap();

        let options = RpcOptions::builder().apply_all(parsed).build();
        assert_eq!(options.address(), "10.0.0.5:9000");
        assert_eq!(options.compressor(), Some("gzip"));
        assert!(options.has_token());
        assert!(options.lazy_dial());
    }

    #[test]
    fn textual_options_report_unknown_keys_and_bad_values() {
        assert!(matches!(
            "retries=3".parse::<RpcOption>(),
            Err(ConfigError::UnknownOption(key)) if key == "retries"
        ));
        assert!(matches!(
            "lazy_dial=maybe".parse::<RpcOption>(),
            Err(ConfigError::InvalidOptionValue { key, .. }) if key == "lazy_dial"
        ));
        assert!(matches!(
            "address".parse::<RpcOption>(),
            Err(ConfigError::InvalidOptionValue { .. })
        ));
    }

    #[test]
    fn token_is_redacted_in_debug_output() {
        let option = RpcOption::Token("abc123".into());
        assert_eq!(format!("{option:?}"), "Token(***)");
        assert_eq!(option.key(), "token");

        let options = RpcOptions::builder().token("abc123").build();
        assert!(!format!("{options:?}").contains("abc123"));
    }
}
