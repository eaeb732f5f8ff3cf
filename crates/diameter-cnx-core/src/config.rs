//! 进程级安全配置快照。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 证书、私钥、信任锚、CRL 与优先级策略在进程启动时加载一次，之后只读；
//!   每次握手都显式接收 `&SecurityConfig`，测试可以随手构造伪造配置；
//! - [`SecuritySettings`] 是磁盘上的 TOML 表达，[`SecurityConfig`] 是解析 PEM 之后的内存快照，
//!   两者分离使“文件格式”与“握手所需材料”各自演进。
//!
//! ## 契约（What）
//! - 任何解析失败都归为 [`CnxError::InvalidConfig`]；
//! - 配置文件中的相对路径以配置文件所在目录为基准；
//! - 优先级策略至少包含一个协议版本，密码套件列表为空表示沿用后端默认值。

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use rustls_pki_types::{
    CertificateDer, CertificateRevocationListDer, PrivateKeyDer, pem::PemObject,
};
use serde::Deserialize;

use crate::error::CnxError;

/// TLS 协议版本。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "TLS1.2")]
    Tls12,
    #[serde(rename = "TLS1.3")]
    Tls13,
}

impl TlsVersion {
    pub const fn as_str(self) -> &'static str {
        match self {
            TlsVersion::Tls12 => "TLS1.2",
            TlsVersion::Tls13 => "TLS1.3",
        }
    }
}

/// 密码套件与协议版本的优先级策略。
///
/// 对握手引擎而言这是不透明值：只有后端在 `configure` 时才把套件名称解析为具体实现，
/// 解析失败即部署错误。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriorityPolicy {
    versions: BTreeSet<TlsVersion>,
    cipher_suites: Vec<String>,
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        Self {
            versions: BTreeSet::from([TlsVersion::Tls12, TlsVersion::Tls13]),
            cipher_suites: Vec::new(),
        }
    }
}

impl PriorityPolicy {
    pub fn new<I, S>(
        versions: impl IntoIterator<Item = TlsVersion>,
        cipher_suites: I,
    ) -> Result<Self, CnxError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let versions: BTreeSet<_> = versions.into_iter().collect();
        if versions.is_empty() {
            return Err(CnxError::invalid_config(
                "priority policy enables no protocol version",
            ));
        }
        Ok(Self {
            versions,
            cipher_suites: cipher_suites.into_iter().map(Into::into).collect(),
        })
    }

    pub fn versions(&self) -> impl Iterator<Item = TlsVersion> + '_ {
        self.versions.iter().copied()
    }

    pub fn allows(&self, version: TlsVersion) -> bool {
        self.versions.contains(&version)
    }

    /// 套件名称（如 `TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256`），为空表示后端默认。
    pub fn cipher_suites(&self) -> &[String] {
        &self.cipher_suites
    }

    /// 收窄到单一协议版本；策略本身不允许该版本时返回 `InvalidConfig`。
    pub fn restricted_to(&self, version: TlsVersion) -> Result<Self, CnxError> {
        if !self.allows(version) {
            return Err(CnxError::invalid_config(format!(
                "priority policy does not allow {}",
                version.as_str()
            )));
        }
        Ok(Self {
            versions: BTreeSet::from([version]),
            cipher_suites: self.cipher_suites.clone(),
        })
    }
}

/// 本端证书链、私钥以及校验对端所需的信任材料。
#[derive(Debug)]
pub struct CredentialSet {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    trust_anchors: Vec<CertificateDer<'static>>,
    crls: Vec<CertificateRevocationListDer<'static>>,
}

impl CredentialSet {
    pub fn new(
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        trust_anchors: Vec<CertificateDer<'static>>,
    ) -> Result<Self, CnxError> {
        if chain.is_empty() {
            return Err(CnxError::invalid_config("certificate chain is empty"));
        }
        if trust_anchors.is_empty() {
            return Err(CnxError::invalid_config(
                "no trust anchor configured, peer certificates cannot be verified",
            ));
        }
        Ok(Self {
            chain,
            key,
            trust_anchors,
            crls: Vec::new(),
        })
    }

    pub fn with_crls(
        mut self,
        crls: impl IntoIterator<Item = CertificateRevocationListDer<'static>>,
    ) -> Self {
        self.crls.extend(crls);
        self
    }

    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    pub fn key(&self) -> &PrivateKeyDer<'static> {
        &self.key
    }

    pub fn trust_anchors(&self) -> &[CertificateDer<'static>] {
        &self.trust_anchors
    }

    pub fn crls(&self) -> &[CertificateRevocationListDer<'static>] {
        &self.crls
    }
}

impl Clone for CredentialSet {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            key: self.key.clone_key(),
            trust_anchors: self.trust_anchors.clone(),
            crls: self.crls.clone(),
        }
    }
}

/// 握手所需的全部安全材料，进程内只读共享。
#[derive(Clone, Debug)]
pub struct SecurityConfig {
    priority: PriorityPolicy,
    credentials: CredentialSet,
    handshake_timeout: Option<Duration>,
}

impl SecurityConfig {
    pub fn new(credentials: CredentialSet) -> Self {
        Self {
            priority: PriorityPolicy::default(),
            credentials,
            handshake_timeout: None,
        }
    }

    pub fn with_priority(mut self, priority: PriorityPolicy) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    pub fn priority(&self) -> &PriorityPolicy {
        &self.priority
    }

    pub fn credentials(&self) -> &CredentialSet {
        &self.credentials
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout
    }

    /// 由 PEM 文本构造：`chain_pem` 可含多张证书，`trust_pem` 可含多个信任锚。
    pub fn from_pem(chain_pem: &[u8], key_pem: &[u8], trust_pem: &[u8]) -> Result<Self, CnxError> {
        let chain = parse_certificates(chain_pem, "certificate")?;
        let key = PrivateKeyDer::from_pem_slice(key_pem)
            .map_err(|err| CnxError::invalid_config(format!("private key: {err}")))?;
        let trust_anchors = parse_certificates(trust_pem, "trust anchor")?;
        Ok(Self::new(CredentialSet::new(chain, key, trust_anchors)?))
    }

    /// 读取配置文件并加载其引用的 PEM 材料。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CnxError> {
        Self::from_settings(&SecuritySettings::from_file(path)?)
    }

    pub fn from_settings(settings: &SecuritySettings) -> Result<Self, CnxError> {
        let chain_pem = read_file(&settings.resolve(&settings.certificate))?;
        let key_pem = read_file(&settings.resolve(&settings.private_key))?;
        let mut trust_pem = Vec::new();
        for anchor in &settings.trust_anchors {
            trust_pem.extend(read_file(&settings.resolve(anchor))?);
            trust_pem.push(b'\n');
        }

        let mut crls = Vec::new();
        for list in &settings.revocation_lists {
            let pem = read_file(&settings.resolve(list))?;
            for crl in CertificateRevocationListDer::pem_slice_iter(&pem) {
                crls.push(crl.map_err(|err| {
                    CnxError::invalid_config(format!("revocation list {}: {err}", list.display()))
                })?);
            }
        }

        let mut config = Self::from_pem(&chain_pem, &key_pem, &trust_pem)?;
        config.credentials = config.credentials.with_crls(crls);
        config.priority = settings.priority.to_policy()?;
        config.handshake_timeout = settings.handshake_timeout_ms.map(Duration::from_millis);
        Ok(config)
    }
}

/// 安全配置的 TOML 表达。
///
/// ```toml
/// certificate = "certs/peer.pem"
/// private_key = "certs/peer.key"
/// trust_anchors = ["certs/ca.pem"]
/// revocation_lists = ["certs/ca.crl"]
/// handshake_timeout_ms = 10000
///
/// [priority]
/// versions = ["TLS1.2", "TLS1.3"]
/// cipher_suites = []
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecuritySettings {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
    pub trust_anchors: Vec<PathBuf>,
    #[serde(default)]
    pub revocation_lists: Vec<PathBuf>,
    #[serde(default)]
    pub priority: PrioritySettings,
    #[serde(default)]
    pub handshake_timeout_ms: Option<u64>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl SecuritySettings {
    pub fn from_toml_str(text: &str) -> Result<Self, CnxError> {
        toml::from_str(text).map_err(|err| CnxError::invalid_config(format!("settings: {err}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CnxError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| {
            CnxError::invalid_config(format!("cannot read {}: {err}", path.display()))
        })?;
        let mut settings = Self::from_toml_str(&text)?;
        settings.base_dir = path.parent().map(Path::to_path_buf);
        Ok(settings)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// `[priority]` 表。
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrioritySettings {
    #[serde(default)]
    pub versions: Vec<TlsVersion>,
    #[serde(default)]
    pub cipher_suites: Vec<String>,
}

impl PrioritySettings {
    pub fn to_policy(&self) -> Result<PriorityPolicy, CnxError> {
        if self.versions.is_empty() {
            let mut policy = PriorityPolicy::default();
            policy.cipher_suites = self.cipher_suites.clone();
            return Ok(policy);
        }
        PriorityPolicy::new(self.versions.iter().copied(), self.cipher_suites.iter().cloned())
    }
}

fn parse_certificates(
    pem: &[u8],
    what: &'static str,
) -> Result<Vec<CertificateDer<'static>>, CnxError> {
    CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| CnxError::invalid_config(format!("{what}: {err}")))
}

fn read_file(path: &Path) -> Result<Vec<u8>, CnxError> {
    fs::read(path)
        .map_err(|err| CnxError::invalid_config(format!("cannot read {}: {err}", path.display())))
}
