//! 具名压缩算法选择。
//!
//! # 教案式说明
//! - **意图（Why）**：调用方只给出一个名字（如 `"gzip"`），这里负责把它映射到 tonic 的
//!   [`CompressionEncoding`]，并在构建阶段就拒绝不认识的名字，而不是等到第一次调用才失败。
//! - **契约（What）**：名称大小写不敏感；支持的集合由 crate feature（`gzip`、`zstd`）决定。

use std::{fmt, str::FromStr};

use tonic::codec::CompressionEncoding;

use crate::error::BuildError;

/// 已注册的压缩算法。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Compressor {
    #[cfg(feature = "gzip")]
    Gzip,
    #[cfg(feature = "zstd")]
    Zstd,
}

impl Compressor {
    /// 按名称查找已注册的压缩算法。
    pub fn from_name(name: &str) -> Result<Self, BuildError> {
        match name.trim().to_ascii_lowercase().as_str() {
            #[cfg(feature = "gzip")]
            "gzip" => Ok(Compressor::Gzip),
            #[cfg(feature = "zstd")]
            "zstd" => Ok(Compressor::Zstd),
            _ => Err(BuildError::UnknownCompressor(name.to_string())),
        }
    }

    /// 在 `grpc-encoding` 头中出现的规范名称。
    pub fn name(self) -> &'static str {
        match self {
            #[cfg(feature = "gzip")]
            Compressor::Gzip => "gzip",
            #[cfg(feature = "zstd")]
            Compressor::Zstd => "zstd",
        }
    }

    pub fn encoding(self) -> CompressionEncoding {
        match self {
            #[cfg(feature = "gzip")]
            Compressor::Gzip => CompressionEncoding::Gzip,
            #[cfg(feature = "zstd")]
            Compressor::Zstd => CompressionEncoding::Zstd,
        }
    }
}

impl FromStr for Compressor {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

impl fmt::Display for Compressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
