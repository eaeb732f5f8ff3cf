//! rcgen 生成的测试 PKI 与原生 tokio-rustls 对端配置。
//!
//! - 测试 CA 签发的叶子证书 SAN 为 [`PEER_NAME`]；
//! - `foreign` 系列证书由另一个 CA 签发，用来构造“不受信任”的对端；
//! - 原生对端直接使用 rustls 配置，不经过被测的握手引擎。

use std::sync::{Arc, Once};

use diameter_cnx::{CredentialSet, SecurityConfig};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose,
};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

/// 测试叶子证书使用的主机名。
pub const PEER_NAME: &str = "peer.example.net";

/// 确保进程级 CryptoProvider 已安装，供原生对端的 `builder()` 使用。
pub fn ensure_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// 一个证书颁发机构及其签发能力。
pub struct TestCa {
    cert: Certificate,
    key: KeyPair,
}

/// 一张叶子证书与私钥。
pub struct Leaf {
    pub chain: Vec<CertificateDer<'static>>,
    key_der: Vec<u8>,
}

impl Leaf {
    pub fn key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()))
    }
}

impl TestCa {
    pub fn new(common_name: &str) -> Self {
        let key = KeyPair::generate().expect("generate CA key");
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("CA params");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let cert = params.self_signed(&key).expect("self-sign CA");
        Self { cert, key }
    }

    pub fn anchor(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    pub fn issue(&self, name: &str) -> Leaf {
        let key = KeyPair::generate().expect("generate leaf key");
        let mut params = CertificateParams::new(vec![name.to_owned()]).expect("leaf params");
        params.distinguished_name.push(DnType::CommonName, name);
        let cert = params
            .signed_by(&key, &self.cert, &self.key)
            .expect("sign leaf");
        Leaf {
            chain: vec![cert.der().clone()],
            key_der: key.serialize_der(),
        }
    }

    /// 由本 CA 签发、信任本 CA 的安全配置。
    pub fn security(&self, name: &str) -> SecurityConfig {
        let leaf = self.issue(name);
        let credentials =
            CredentialSet::new(leaf.chain.clone(), leaf.key(), vec![self.anchor()])
                .expect("credential set");
        SecurityConfig::new(credentials)
    }

    fn roots(&self) -> RootCertStore {
        let mut roots = RootCertStore::empty();
        roots.add(self.anchor()).expect("add anchor");
        roots
    }

    /// 不要求客户端证书的原生服务端。
    pub fn raw_server(&self, leaf: &Leaf) -> Arc<ServerConfig> {
        ensure_crypto_provider();
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(leaf.chain.clone(), leaf.key())
            .expect("raw server config");
        Arc::new(config)
    }

    /// 信任本 CA 的原生客户端；`leaf` 为 `Some` 时出示客户端证书。
    pub fn raw_client(&self, leaf: Option<&Leaf>) -> Arc<ClientConfig> {
        ensure_crypto_provider();
        let builder = ClientConfig::builder().with_root_certificates(self.roots());
        let config = match leaf {
            Some(leaf) => builder
                .with_client_auth_cert(leaf.chain.clone(), leaf.key())
                .expect("raw client config"),
            None => builder.with_no_client_auth(),
        };
        Arc::new(config)
    }
}

/// 自签名叶子证书，不属于任何测试 CA。
pub fn self_signed(name: &str) -> Leaf {
    let certified =
        rcgen::generate_simple_self_signed(vec![name.to_owned()]).expect("self-signed leaf");
    Leaf {
        chain: vec![certified.cert.der().clone()],
        key_der: certified.key_pair.serialize_der(),
    }
}
