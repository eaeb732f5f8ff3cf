use std::{
    iter,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
};

use diameter_cnx_core::{CnxError, CredentialSet, RejectionReasons, Result};
use rustls::{
    CertificateError, DigitallySignedStruct, DistinguishedName, Error as RustlsError,
    RootCertStore, SignatureScheme,
    client::{
        WebPkiServerVerifier,
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    },
    crypto::CryptoProvider,
    server::{
        WebPkiClientVerifier,
        danger::{ClientCertVerified, ClientCertVerifier},
    },
};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use x509_parser::prelude::*;

/// 一条连接上证书校验结论的累积记录。
///
/// 校验器在握手过程中写入，握手结束后由会话读取；派生会话共享主会话的记录，
/// 任何一次拒绝都会保留在位图中。
#[derive(Debug, Default)]
pub(crate) struct VerificationRecord {
    flags: AtomicU8,
    seen: AtomicBool,
}

impl VerificationRecord {
    pub(crate) fn record(&self, reasons: RejectionReasons) {
        self.flags.fetch_or(reasons.bits(), Ordering::AcqRel);
        self.seen.store(true, Ordering::Release);
    }

    /// 校验器从未运行时为 `None`。
    pub(crate) fn outcome(&self) -> Option<RejectionReasons> {
        if !self.seen.load(Ordering::Acquire) {
            return None;
        }
        Some(RejectionReasons::from_bits(
            self.flags.load(Ordering::Acquire),
        ))
    }
}

/// 把 webpki 的校验错误归入拒绝子原因。
///
/// 任何拒绝都带 `UNTRUSTED`，能识别的具体问题再叠加对应子原因。
/// 签名本身不成立（`BadSignature`）只说明链不可信，不代表算法不安全。
#[allow(deprecated)]
pub(crate) fn rejection_reasons(error: &RustlsError) -> RejectionReasons {
    let RustlsError::InvalidCertificate(certificate) = error else {
        return RejectionReasons::UNTRUSTED;
    };

    let specific = match certificate {
        CertificateError::UnknownIssuer => RejectionReasons::ISSUER_UNKNOWN,
        CertificateError::Revoked => RejectionReasons::REVOKED,
        CertificateError::UnsupportedSignatureAlgorithm
        | CertificateError::UnsupportedSignatureAlgorithmContext { .. }
        | CertificateError::UnsupportedSignatureAlgorithmForPublicKeyContext { .. } => {
            RejectionReasons::INSECURE_ALGORITHM
        }
        CertificateError::Other(other) => match other.0.downcast_ref::<webpki::Error>() {
            Some(webpki::Error::CaUsedAsEndEntity | webpki::Error::EndEntityUsedAsCa) => {
                RejectionReasons::ISSUER_NOT_CA
            }
            _ => RejectionReasons::empty(),
        },
        _ => RejectionReasons::empty(),
    };
    RejectionReasons::UNTRUSTED | specific
}

/// 对端出示的链中是否有充当签发者、却不是 CA 的中间证书。
///
/// webpki 构建路径失败时只报告最后一次尝试的错误，非 CA 签发者通常表现为签名错误，
/// 因此按名称找出实际被引用为签发者的中间证书，再检查其 basicConstraints：
/// 缺少该扩展或 `cA = false` 都不能签发证书。无法解析的证书不参与判断。
pub(crate) fn presents_non_ca_issuer(
    end_entity: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
) -> bool {
    let Ok((_, leaf)) = X509Certificate::from_der(end_entity.as_ref()) else {
        return false;
    };
    let presented: Vec<X509Certificate<'_>> = intermediates
        .iter()
        .filter_map(|der| X509Certificate::from_der(der.as_ref()).ok())
        .map(|(_, cert)| cert)
        .collect();
    let issuers: Vec<&[u8]> = iter::once(&leaf)
        .chain(presented.iter())
        .map(|cert| cert.issuer().as_raw())
        .collect();

    presented.iter().any(|cert| {
        let named_as_issuer = issuers.contains(&cert.subject().as_raw());
        let is_ca = matches!(cert.basic_constraints(), Ok(Some(ext)) if ext.value.ca);
        named_as_issuer && !is_ca
    })
}

/// 一次证书校验结论对应的拒绝子原因；通过时为空。
fn assess(
    verdict: &core::result::Result<(), RustlsError>,
    end_entity: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
) -> RejectionReasons {
    let Err(err) = verdict else {
        return RejectionReasons::empty();
    };
    let mut reasons = rejection_reasons(err);
    if presents_non_ca_issuer(end_entity, intermediates) {
        reasons = reasons | RejectionReasons::ISSUER_NOT_CA;
    }
    reasons
}

fn root_store(credentials: &CredentialSet) -> Result<Arc<RootCertStore>> {
    let mut roots = RootCertStore::empty();
    for anchor in credentials.trust_anchors() {
        roots
            .add(anchor.clone())
            .map_err(|err| CnxError::invalid_config(format!("trust anchor: {err}")))?;
    }
    Ok(Arc::new(roots))
}

/// 记录而不中断的服务端证书校验器（客户端角色使用）。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 证书问题需要在协商完成后以完整的子原因位图报告，而不是在握手中途变成一条告警；
///   因此校验结论写入 [`VerificationRecord`]，握手照常继续，由引擎在 `Negotiated`
///   之后读取并决定 `Verified` 或 `Rejected`。
///
/// ## 契约（What）
/// - 证书链、吊销与名称校验全部委托 `WebPkiServerVerifier`；
/// - 握手签名校验**不**放行：签名不成立说明对端不持有私钥，属于协商失败。
#[derive(Debug)]
pub(crate) struct RecordingServerVerifier {
    inner: Arc<WebPkiServerVerifier>,
    record: Arc<VerificationRecord>,
}

impl RecordingServerVerifier {
    pub(crate) fn new(
        credentials: &CredentialSet,
        provider: &Arc<CryptoProvider>,
        record: Arc<VerificationRecord>,
    ) -> Result<Self> {
        let mut builder =
            WebPkiServerVerifier::builder_with_provider(root_store(credentials)?, Arc::clone(provider));
        if !credentials.crls().is_empty() {
            builder = builder
                .with_crls(credentials.crls().iter().cloned())
                .only_check_end_entity_revocation()
                .allow_unknown_revocation_status();
        }
        let inner = builder
            .build()
            .map_err(|err| CnxError::invalid_config(format!("peer verifier: {err}")))?;
        Ok(Self { inner, record })
    }
}

impl ServerCertVerifier for RecordingServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> core::result::Result<ServerCertVerified, RustlsError> {
        let verdict = self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
            .map(drop);
        let reasons = assess(&verdict, end_entity, intermediates);
        if let Err(err) = &verdict {
            tracing::debug!(error = %err, reasons = %reasons, "server certificate not accepted");
        }
        self.record.record(reasons);
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> core::result::Result<HandshakeSignatureValid, RustlsError> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> core::result::Result<HandshakeSignatureValid, RustlsError> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// 记录而不中断的客户端证书校验器（服务端角色使用），客户端证书为强制项。
#[derive(Debug)]
pub(crate) struct RecordingClientVerifier {
    inner: Arc<dyn ClientCertVerifier>,
    record: Arc<VerificationRecord>,
}

impl RecordingClientVerifier {
    pub(crate) fn new(
        credentials: &CredentialSet,
        provider: &Arc<CryptoProvider>,
        record: Arc<VerificationRecord>,
    ) -> Result<Self> {
        let mut builder =
            WebPkiClientVerifier::builder_with_provider(root_store(credentials)?, Arc::clone(provider));
        if !credentials.crls().is_empty() {
            builder = builder
                .with_crls(credentials.crls().iter().cloned())
                .only_check_end_entity_revocation()
                .allow_unknown_revocation_status();
        }
        let inner = builder
            .build()
            .map_err(|err| CnxError::invalid_config(format!("peer verifier: {err}")))?;
        Ok(Self { inner, record })
    }
}

impl ClientCertVerifier for RecordingClientVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> core::result::Result<ClientCertVerified, RustlsError> {
        let verdict = self
            .inner
            .verify_client_cert(end_entity, intermediates, now)
            .map(drop);
        let reasons = assess(&verdict, end_entity, intermediates);
        if let Err(err) = &verdict {
            tracing::debug!(error = %err, reasons = %reasons, "client certificate not accepted");
        }
        self.record.record(reasons);
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> core::result::Result<HandshakeSignatureValid, RustlsError> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> core::result::Result<HandshakeSignatureValid, RustlsError> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
