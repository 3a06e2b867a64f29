//! 拦截器、拦截链与每次调用的访问令牌。
//!
//! # 教案式概览
//! - **意图（Why）**：鉴权、打点、请求染色等横切逻辑需要“包裹”在每一次 RPC 外侧。
//!   本模块给出与传输无关的拦截器值类型，服务端与客户端装配器只负责把它们挂到 tonic 上。
//! - **结构（How）**：
//!   - [`Interceptor`]：具名、可克隆的 `Fn(Request<()>) -> Result<Request<()>, Status>`；
//!   - [`InterceptorChain`]：有序拦截链，首个条目位于最外层，即在请求路径上最先执行；
//!   - [`AccessToken`]：校验过的 Bearer 令牌，以 `authorization` 元数据随每次调用发送；
//!   - [`ClientInterceptor`]：客户端单次调用实际使用的拦截器（用户拦截器 + 令牌注入）。
//! - **契约（What）**：任一拦截器返回 `Err(Status)` 时链路立即短路，后续条目不再执行，
//!   该 `Status` 原样返回给调用方。
//! - **风险提示（Trade-offs）**：tonic 的拦截器只能观察请求头与扩展，无法看到消息体与响应，
//!   因此“包裹”在这里退化为“按声明顺序依次执行”。

use std::{borrow::Cow, fmt, sync::Arc};

use tonic::{
    Request, Status,
    metadata::{AsciiMetadataValue, MetadataValue},
};

use crate::error::BuildError;

/// 元数据中承载访问令牌的键。
pub const AUTHORIZATION_METADATA_KEY: &str = "authorization";

type InterceptFn = dyn Fn(Request<()>) -> Result<Request<()>, Status> + Send + Sync;

/// 一次调用的形态：一元调用或任意方向的流式调用。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallKind {
    Unary,
    Streaming,
}

impl CallKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CallKind::Unary => "unary",
            CallKind::Streaming => "streaming",
        }
    }
}

/// 具名拦截器。
///
/// 名称只用于日志与调试输出；两个拦截器相等当且仅当名称相同且指向同一个闭包实例。
#[derive(Clone)]
pub struct Interceptor {
    name: Cow<'static, str>,
    func: Arc<InterceptFn>,
}

impl Interceptor {
    pub fn new<F>(name: impl Into<Cow<'static, str>>, func: F) -> Self
    where
        F: Fn(Request<()>) -> Result<Request<()>, Status> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn intercept(&self, request: Request<()>) -> Result<Request<()>, Status> {
        (self.func)(request)
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Interceptor").field(&self.name).finish()
    }
}

impl PartialEq for Interceptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.func, &other.func)
    }
}

/// 有序拦截链。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 服务端允许为一元调用与流式调用各自配置一条拦截链；把链本身做成值类型，
///   服务端装配时只需安装“一个”串联好的拦截器，而不是逐个叠加 Layer。
///
/// ## 契约（What）
/// - `push` 追加到链尾，声明顺序即执行顺序；
/// - `apply` 依次执行所有条目，遇到第一个错误即返回；
/// - 空链是恒等变换。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InterceptorChain {
    entries: Vec<Interceptor>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, interceptor: Interceptor) {
        self.entries.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interceptor> {
        self.entries.iter()
    }

    /// 按执行顺序列出拦截器名称，便于日志输出。
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(Interceptor::name).collect()
    }

    pub fn apply(&self, request: Request<()>) -> Result<Request<()>, Status> {
        self.entries
            .iter()
            .try_fold(request, |request, interceptor| interceptor.intercept(request))
    }
}

impl FromIterator<Interceptor> for InterceptorChain {
    fn from_iter<T: IntoIterator<Item = Interceptor>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl tonic::service::Interceptor for InterceptorChain {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        self.apply(request)
    }
}

/// 校验过的 Bearer 访问令牌。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 令牌属于“每次调用”的凭据，而不是连接级凭据：它在每个请求的元数据里出现一次，
///   与底层连接是否加密无关；
/// - 构造时就完成 ASCII 合法性校验，避免把非法令牌带到第一次调用才暴露。
///
/// ## 契约（What）
/// - 元数据值形如 `Bearer <token>`；
/// - `Debug` 输出做脱敏处理，令牌原文不会出现在日志中。
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    header: AsciiMetadataValue,
}

impl AccessToken {
    pub fn new(token: &str) -> Result<Self, BuildError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(BuildError::InvalidToken);
        }
        let header: AsciiMetadataValue = format!("Bearer {token}")
            .parse()
            .map_err(|_| BuildError::InvalidToken)?;
        Ok(Self { header })
    }

    /// 写入 `authorization` 元数据，已存在的同名条目会被覆盖。
    pub fn attach<T>(&self, request: &mut Request<T>) {
        request
            .metadata_mut()
            .insert(AUTHORIZATION_METADATA_KEY, self.header.clone());
    }

    pub fn header_value(&self) -> &MetadataValue<tonic::metadata::Ascii> {
        &self.header
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(Bearer ***)")
    }
}

/// 客户端单次调用实际安装的拦截器。
///
/// 先执行为该调用形态配置的用户拦截器，再注入访问令牌；令牌总是最后写入，
/// 因此用户拦截器无法意外覆盖它。
#[derive(Clone, Debug, Default)]
pub struct ClientInterceptor {
    interceptor: Option<Interceptor>,
    token: Option<AccessToken>,
}

impl ClientInterceptor {
    pub fn new(interceptor: Option<Interceptor>, token: Option<AccessToken>) -> Self {
        Self { interceptor, token }
    }

    pub fn intercept(&self, request: Request<()>) -> Result<Request<()>, Status> {
        let mut request = match &self.interceptor {
            Some(interceptor) => interceptor.intercept(request)?,
            None => request,
        };
        if let Some(token) = &self.token {
            token.attach(&mut request);
        }
        Ok(request)
    }
}

impl tonic::service::Interceptor for ClientInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        self.intercept(request)
    }
}
