//! 基于 TOML 文件的声明式配置。
//!
//! # 教案式概览
//! - **意图（Why）**：部署时往往希望把地址、证书路径、压缩算法放进配置文件，而不是写死在代码里；
//!   本模块只负责“文件 → [`RpcOptionsBuilder`]”这一步，拦截器仍需在代码中追加。
//! - **契约（What）**：
//!   - 未知字段直接报错，避免拼写错误被静默忽略；
//!   - 标量字段先于 `options` 列表应用，列表中的 `key=value` 条目按顺序覆盖前者；
//!   - 文件中不出现的字段保持 Builder 的默认值。
//!
//! ```toml
//! address = "10.0.0.5:9000"
//! compressor = "gzip"
//! token = "abc123"
//!
//! [server_tls]
//! cert = "/etc/spark/server.pem"
//! key = "/etc/spark/server.key"
//!
//! [client_tls]
//! cert = "/etc/spark/ca.pem"
//! host_override = "spark.internal"
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{
    error::ConfigError,
    options::{RpcOption, RpcOptions, RpcOptionsBuilder},
};

/// 配置文件的顶层结构。
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RpcConfig {
    pub address: Option<String>,
    pub compressor: Option<String>,
    pub token: Option<String>,
    pub lazy_dial: Option<bool>,
    pub server_tls: Option<ServerTlsSection>,
    pub client_tls: Option<ClientTlsSection>,
    /// 以 `key=value` 形式追加的具名选项。
    #[serde(default)]
    pub options: Vec<String>,
}

/// `[server_tls]` 段。两个字段都可以单独出现，成对校验推迟到构建服务端时进行。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerTlsSection {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

/// `[client_tls]` 段。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientTlsSection {
    pub cert: Option<PathBuf>,
    pub host_override: Option<String>,
}

impl RpcConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// 把配置写入已有的 Builder，便于与代码中追加的拦截器组合。
    pub fn apply_to(&self, builder: &mut RpcOptionsBuilder) -> Result<(), ConfigError> {
        let options = self
            .options
            .iter()
            .map(|entry| entry.parse::<RpcOption>())
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(address) = &self.address {
            builder.address(address.as_str());
        }
        if let Some(compressor) = &self.compressor {
            builder.compressor(compressor.as_str());
        }
        if let Some(token) = &self.token {
            builder.token(token.as_str());
        }
        if let Some(lazy) = self.lazy_dial {
            builder.lazy_dial(lazy);
        }
        if let Some(server_tls) = &self.server_tls {
            if let Some(cert) = &server_tls.cert {
                builder.server_cert(cert.as_path());
            }
            if let Some(key) = &server_tls.key {
                builder.server_key(key.as_path());
            }
        }
        if let Some(client_tls) = &self.client_tls {
            if let Some(cert) = &client_tls.cert {
                builder.client_cert(cert.as_path());
            }
            if let Some(host) = &client_tls.host_override {
                builder.host_override(host.as_str());
            }
        }
        builder.apply_all(options);
        Ok(())
    }

    pub fn into_builder(self) -> Result<RpcOptionsBuilder, ConfigError> {
        let mut builder = RpcOptions::builder();
        self.apply_to(&mut builder)?;
        Ok(builder)
    }
}
