use std::{fs, path::Path};

use rustls_pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject};
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};
use tracing::{debug, error};

use crate::{
    error::BuildError,
    plan::{ClientTlsSource, ServerTlsSource},
};

/// 证书与私钥装载。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 证书文件只在构建时读取一次，不做缓存；
/// - 在交给 tonic 之前先用 `rustls-pki-types` 做一次 PEM 结构校验，
///   这样“文件不存在”“文件不是 PEM”“PEM 里没有证书/私钥”都能以带路径的
///   [`BuildError`] 报告，而不是等握手时才以模糊的 TLS 错误暴露。
///
/// ## 契约（What）
/// - `load_server_tls`：证书链至少包含一张证书，私钥文件必须能解析出一把私钥；
/// - `load_client_tls`：CA 文件至少包含一张证书，握手时以 `host_override` 作为服务端名称校验。
pub(crate) fn load_server_tls(source: &ServerTlsSource) -> Result<ServerTlsConfig, BuildError> {
    let cert = read_pem(&source.cert)?;
    let count = validate_certificates(&source.cert, &cert)?;
    let key = read_pem(&source.key)?;
    validate_private_key(&source.key, &key)?;
    debug!(
        target: "spark.rpc.credentials",
        cert = %source.cert.display(),
        certificates = count,
        "loaded server identity"
    );
    Ok(ServerTlsConfig::new().identity(Identity::from_pem(cert, key)))
}

pub(crate) fn load_client_tls(source: &ClientTlsSource) -> Result<ClientTlsConfig, BuildError> {
    let ca = read_pem(&source.ca_cert)?;
    let count = validate_certificates(&source.ca_cert, &ca)?;
    debug!(
        target: "spark.rpc.credentials",
        ca = %source.ca_cert.display(),
        certificates = count,
        host_override = %source.host_override,
        "loaded client trust anchors"
    );
    Ok(ClientTlsConfig::new()
        .ca_certificate(Certificate::from_pem(ca))
        .domain_name(source.host_override.clone()))
}

fn read_pem(path: &Path) -> Result<Vec<u8>, BuildError> {
    fs::read(path).map_err(|source| {
        error!(
            target: "spark.rpc.credentials",
            path = %path.display(),
            error = %source,
            "failed to read credential file"
        );
        BuildError::CredentialRead {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn validate_certificates(path: &Path, pem: &[u8]) -> Result<usize, BuildError> {
    let certificates = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| malformed(path, err.to_string()))?;
    if certificates.is_empty() {
        return Err(malformed(path, "no certificate found".to_string()));
    }
    Ok(certificates.len())
}

fn validate_private_key(path: &Path, pem: &[u8]) -> Result<(), BuildError> {
    PrivateKeyDer::from_pem_slice(pem)
        .map(|_| ())
        .map_err(|err| malformed(path, err.to_string()))
}

fn malformed(path: &Path, reason: String) -> BuildError {
    error!(
        target: "spark.rpc.credentials",
        path = %path.display(),
        %reason,
        "malformed credential file"
    );
    BuildError::CredentialMalformed {
        path: path.to_path_buf(),
        reason,
    }
}
