use std::io;

use diameter_cnx_core::{ErrorCategory, HandshakeFailure, SecurityClass};
use rustls::{AlertDescription, Error as RustlsError};

/// rustls 握手错误到 [`HandshakeFailure`] 的映射。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 对端管理器依据分类决定“重连”还是“告警”，因此协商失败必须区分
///   完整性违规、身份问题与瞬时故障，而不是统一成一句 I/O 错误；
/// - tokio-rustls 把 rustls 错误包装在 `io::Error` 里，需要先下钻再分类。
///
/// ## 逻辑（How）
/// - `categorize_with_rustls` 优先识别内嵌的 `rustls::Error`，否则按 `io::ErrorKind` 分类；
/// - `alert_to_category` 细化对端发来的告警：证书类告警说明**对端**拒绝了我们的身份。
///
/// ## 风险与权衡（Trade-offs）
/// - `General`/`Other` 等泛型错误按瞬时故障处理，避免误报安全事件；
/// - 未列出的告警同样视作瞬时故障，需要更细分类时集中在此扩展。
pub(crate) fn classify_handshake_error(error: &io::Error) -> HandshakeFailure {
    let detail = error.to_string();
    match categorize_with_rustls(error) {
        ErrorCategory::Security(SecurityClass::Integrity) => HandshakeFailure::Protocol(detail),
        ErrorCategory::Security(SecurityClass::Authentication) => {
            HandshakeFailure::Authentication(detail)
        }
        _ => HandshakeFailure::Transient(detail),
    }
}

fn categorize_with_rustls(error: &io::Error) -> ErrorCategory {
    if let Some(source) = error.get_ref()
        && let Some(rustls_error) = source.downcast_ref::<RustlsError>()
    {
        return categorize_rustls_error(rustls_error);
    }
    categorize_io_error(error)
}

fn categorize_rustls_error(error: &RustlsError) -> ErrorCategory {
    use RustlsError::*;
    match error {
        InappropriateMessage { .. }
        | InappropriateHandshakeMessage { .. }
        | InvalidEncryptedClientHello(_)
        | InvalidMessage(_)
        | PeerMisbehaved(_)
        | DecryptError
        | EncryptError
        | PeerSentOversizedRecord
        | NoApplicationProtocol => ErrorCategory::Security(SecurityClass::Integrity),
        NoCertificatesPresented
        | InvalidCertificate(_)
        | InvalidCertRevocationList(_)
        | UnsupportedNameType => ErrorCategory::Security(SecurityClass::Authentication),
        AlertReceived(alert) => alert_to_category(alert),
        _ => ErrorCategory::Retryable,
    }
}

fn alert_to_category(alert: &AlertDescription) -> ErrorCategory {
    use AlertDescription::*;
    match alert {
        BadCertificate
        | UnsupportedCertificate
        | CertificateRevoked
        | CertificateExpired
        | CertificateUnknown
        | UnknownCA
        | NoCertificate
        | CertificateUnobtainable
        | CertificateRequired
        | AccessDenied => ErrorCategory::Security(SecurityClass::Authentication),
        DecodeError
        | DecryptError
        | DecryptionFailed
        | AlertDescription::HandshakeFailure
        | IllegalParameter
        | RecordOverflow
        | BadRecordMac
        | UnexpectedMessage
        | InsufficientSecurity
        | InappropriateFallback
        | MissingExtension
        | UnsupportedExtension
        | BadCertificateStatusResponse
        | BadCertificateHashValue
        | UnknownPSKIdentity
        | UnrecognisedName
        | NoApplicationProtocol
        | ExportRestriction => ErrorCategory::Security(SecurityClass::Integrity),
        _ => ErrorCategory::Retryable,
    }
}

fn categorize_io_error(error: &io::Error) -> ErrorCategory {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::InvalidData => ErrorCategory::Security(SecurityClass::Integrity),
        ErrorKind::TimedOut => ErrorCategory::Timeout,
        _ => ErrorCategory::Retryable,
    }
}

#[cfg(test)]
mod tests {
    use rustls::CertificateError;

    use super::*;

    fn wrap(error: RustlsError) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, error)
    }

    #[test]
    fn missing_client_certificate_is_an_authentication_failure() {
        let failure = classify_handshake_error(&wrap(RustlsError::NoCertificatesPresented));
        assert!(matches!(failure, HandshakeFailure::Authentication(_)));
    }

    #[test]
    fn peer_alerts_are_refined() {
        let rejected = classify_handshake_error(&wrap(RustlsError::AlertReceived(
            AlertDescription::UnknownCA,
        )));
        assert!(matches!(rejected, HandshakeFailure::Authentication(_)));

        let mismatch = classify_handshake_error(&wrap(RustlsError::AlertReceived(
            AlertDescription::ProtocolVersion,
        )));
        assert!(matches!(mismatch, HandshakeFailure::Transient(_)));

        let tampered = classify_handshake_error(&wrap(RustlsError::AlertReceived(
            AlertDescription::BadRecordMac,
        )));
        assert!(matches!(tampered, HandshakeFailure::Protocol(_)));
    }

    #[test]
    fn plain_io_errors_are_transient() {
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(matches!(
            classify_handshake_error(&reset),
            HandshakeFailure::Transient(_)
        ));
        let eof = io::Error::from(io::ErrorKind::UnexpectedEof);
        assert!(matches!(
            classify_handshake_error(&eof),
            HandshakeFailure::Transient(_)
        ));
    }

    #[test]
    fn certificate_errors_keep_their_detail() {
        let failure = classify_handshake_error(&wrap(RustlsError::InvalidCertificate(
            CertificateError::UnknownIssuer,
        )));
        let HandshakeFailure::Authentication(detail) = failure else {
            panic!("unexpected classification");
        };
        assert!(detail.contains("certificate"), "{detail}");
    }
}
