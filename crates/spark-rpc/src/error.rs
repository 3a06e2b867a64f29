use std::{io, path::PathBuf};

use thiserror::Error;

/// 错误的粗粒度分类。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 构建阶段的失败来源差异很大：有的是调用方给错了配置，有的是证书文件读不出来，
///   有的是对端根本不可达。上层需要据此决定“修配置”“换证书”还是“稍后重试”。
/// - 因此把“本地输入错误”（配置、证书路径）与“环境故障”（拨号失败）明确拆开。
///
/// ## 契约（What）
/// - `Configuration`：选项组合非法，重试无意义；
/// - `Credential`：证书/私钥文件缺失、格式错误或被 TLS 栈拒绝；
/// - `Environment`：网络或对端导致的失败，可由调用方自行决定是否重试。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Credential,
    Environment,
}

/// 装配 gRPC 客户端或服务端时的错误。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 替代“记录一行致命日志然后退出进程”的做法，让嵌入方可以自行恢复、记录或重试；
/// - 每个变体都携带稳定错误码（[`BuildError::code`]），运维脚本无需解析文案即可定位问题。
///
/// ## 契约（What）
/// - 配置类变体在任何 I/O 之前即被发现；
/// - `Credential*` 变体保留出错的文件路径；
/// - `Dial` 仅在主动拨号（非惰性连接）时出现。
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("endpoint address must not be empty")]
    EmptyAddress,

    #[error("invalid endpoint address `{address}`: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("incomplete server TLS configuration: {missing} is not set")]
    IncompleteServerTls { missing: &'static str },

    #[error("unknown compressor `{0}` (supported: gzip, zstd)")]
    UnknownCompressor(String),

    #[error("access token cannot be carried as gRPC metadata")]
    InvalidToken,

    #[error("failed to read credential file `{}`: {source}", .path.display())]
    CredentialRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed credential file `{}`: {reason}", .path.display())]
    CredentialMalformed { path: PathBuf, reason: String },

    #[error("{side} TLS credentials rejected: {source}")]
    CredentialRejected {
        side: &'static str,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("failed to dial `{address}`: {source}")]
    Dial {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("gRPC client must be built inside a Tokio runtime")]
    MissingRuntime,
}

impl BuildError {
    /// 稳定错误码，遵循 `spark.rpc.<阶段>.<原因>` 命名。
    pub fn code(&self) -> &'static str {
        match self {
            BuildError::EmptyAddress => "spark.rpc.config.empty_address",
            BuildError::InvalidAddress { .. } => "spark.rpc.config.invalid_address",
            BuildError::IncompleteServerTls { .. } => "spark.rpc.config.incomplete_server_tls",
            BuildError::UnknownCompressor(_) => "spark.rpc.config.unknown_compressor",
            BuildError::InvalidToken => "spark.rpc.config.invalid_token",
            BuildError::CredentialRead { .. } => "spark.rpc.credential.read_failed",
            BuildError::CredentialMalformed { .. } => "spark.rpc.credential.malformed",
            BuildError::CredentialRejected { .. } => "spark.rpc.credential.rejected",
            BuildError::Dial { .. } => "spark.rpc.client.dial_failed",
            BuildError::MissingRuntime => "spark.rpc.client.missing_runtime",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::EmptyAddress
            | BuildError::InvalidAddress { .. }
            | BuildError::IncompleteServerTls { .. }
            | BuildError::UnknownCompressor(_)
            | BuildError::InvalidToken => ErrorKind::Configuration,
            BuildError::CredentialRead { .. }
            | BuildError::CredentialMalformed { .. }
            | BuildError::CredentialRejected { .. } => ErrorKind::Credential,
            BuildError::Dial { .. } | BuildError::MissingRuntime => ErrorKind::Environment,
        }
    }
}

/// 服务端进入监听循环后的错误。
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("cannot listen on `{address}`: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("gRPC server terminated: {0}")]
    Transport(#[from] tonic::transport::Error),
}

impl ServeError {
    pub fn code(&self) -> &'static str {
        match self {
            ServeError::InvalidAddress { .. } => "spark.rpc.server.invalid_address",
            ServeError::Transport(_) => "spark.rpc.server.transport_failed",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServeError::InvalidAddress { .. } => ErrorKind::Configuration,
            ServeError::Transport(_) => ErrorKind::Environment,
        }
    }
}

/// 配置文件与文本选项的解析错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file `{}`: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown option `{0}`")]
    UnknownOption(String),

    #[error("invalid value for option `{key}`: {reason}")]
    InvalidOptionValue { key: String, reason: String },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "spark.rpc.config.read_failed",
            ConfigError::Parse(_) => "spark.rpc.config.parse_failed",
            ConfigError::UnknownOption(_) => "spark.rpc.config.unknown_option",
            ConfigError::InvalidOptionValue { .. } => "spark.rpc.config.invalid_option_value",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_input_and_environment_failures_are_distinct_kinds() {
        let missing_file = BuildError::CredentialRead {
            path: PathBuf::from("/nonexistent/server.pem"),
            source: io::Error::new(io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(missing_file.kind(), ErrorKind::Credential);
        assert_eq!(missing_file.code(), "spark.rpc.credential.read_failed");
        assert!(missing_file.to_string().contains("/nonexistent/server.pem"));

        let half_pair = BuildError::IncompleteServerTls { missing: "key" };
        assert_eq!(half_pair.kind(), ErrorKind::Configuration);
        assert_eq!(
            half_pair.to_string(),
            "incomplete server TLS configuration: key is not set"
        );
    }

    #[test]
    fn config_error_codes_are_stable() {
        let err = ConfigError::UnknownOption("retries".into());
        assert_eq!(err.code(), "spark.rpc.config.unknown_option");
        assert_eq!(err.to_string(), "unknown option `retries`");
    }
}
