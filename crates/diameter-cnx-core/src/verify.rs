use core::fmt;

/// 对端证书被拒绝的单个子原因。
///
/// # 契约（What）
/// - 五个子原因互不包含，可同时出现；
/// - [`RejectionReason::description`] 给出面向运维的说明文字，诊断输出逐条打印。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RejectionReason {
    /// 证书链不被信任（通常是未知 CA 或自签名）。
    Untrusted,
    /// 证书已被吊销。
    Revoked,
    /// 找不到签发者。
    IssuerUnknown,
    /// 签发者不是合法 CA。
    IssuerNotCa,
    /// 签名算法不安全或不受支持。
    InsecureAlgorithm,
}

impl RejectionReason {
    /// 全部子原因，按位序排列。
    pub const ALL: [RejectionReason; 5] = [
        RejectionReason::Untrusted,
        RejectionReason::Revoked,
        RejectionReason::IssuerUnknown,
        RejectionReason::IssuerNotCa,
        RejectionReason::InsecureAlgorithm,
    ];

    const fn mask(self) -> u8 {
        match self {
            RejectionReason::Untrusted => 1 << 0,
            RejectionReason::Revoked => 1 << 1,
            RejectionReason::IssuerUnknown => 1 << 2,
            RejectionReason::IssuerNotCa => 1 << 3,
            RejectionReason::InsecureAlgorithm => 1 << 4,
        }
    }

    /// 稳定的短名称，用于错误文案与日志字段。
    pub const fn as_str(self) -> &'static str {
        match self {
            RejectionReason::Untrusted => "untrusted",
            RejectionReason::Revoked => "revoked",
            RejectionReason::IssuerUnknown => "issuer_unknown",
            RejectionReason::IssuerNotCa => "issuer_not_ca",
            RejectionReason::InsecureAlgorithm => "insecure_algorithm",
        }
    }

    /// 人类可读的诊断说明。
    pub const fn description(self) -> &'static str {
        match self {
            RejectionReason::Untrusted => "the certificate is not trusted (unknown CA?)",
            RejectionReason::Revoked => "the certificate has been revoked",
            RejectionReason::IssuerUnknown => "the certificate has no known issuer",
            RejectionReason::IssuerNotCa => {
                "the certificate signer is not a CA, or lacks basic constraints"
            }
            RejectionReason::InsecureAlgorithm => "the certificate signature uses a weak algorithm",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 证书校验结果位图。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 校验器可能一次报告多个问题（例如“未知签发者”同时意味着“不受信任”），
///   位图让调用方既能整体判断（是否为空），又能逐条诊断；
/// - 相比 `Vec<RejectionReason>`，位图在比较、合并与写日志时都是常数开销。
///
/// ## 契约（What）
/// - 空位图表示校验通过，**任何**非空组合都表示拒绝，不存在“部分通过”；
/// - `from_bits` 会截掉未定义的高位，保证位图只包含五个已知子原因。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RejectionReasons {
    bits: u8,
}

impl RejectionReasons {
    const DEFINED: u8 = 0b1_1111;

    pub const UNTRUSTED: Self = Self::single(RejectionReason::Untrusted);
    pub const REVOKED: Self = Self::single(RejectionReason::Revoked);
    pub const ISSUER_UNKNOWN: Self = Self::single(RejectionReason::IssuerUnknown);
    pub const ISSUER_NOT_CA: Self = Self::single(RejectionReason::IssuerNotCa);
    pub const INSECURE_ALGORITHM: Self = Self::single(RejectionReason::InsecureAlgorithm);

    /// 空位图，即校验通过。
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// 由原始位值构造，未定义的位会被丢弃。
    pub const fn from_bits(bits: u8) -> Self {
        Self {
            bits: bits & Self::DEFINED,
        }
    }

    const fn single(reason: RejectionReason) -> Self {
        Self {
            bits: reason.mask(),
        }
    }

    pub const fn bits(&self) -> u8 {
        self.bits
    }

    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub const fn contains(&self, reason: RejectionReason) -> bool {
        self.bits & reason.mask() != 0
    }

    pub fn insert(&mut self, reason: RejectionReason) {
        self.bits |= reason.mask();
    }

    pub const fn union(self, other: Self) -> Self {
        Self {
            bits: self.bits | other.bits,
        }
    }

    /// 按位序遍历已置位的子原因。
    pub fn iter(&self) -> impl Iterator<Item = RejectionReason> + use<> {
        let reasons = *self;
        RejectionReason::ALL
            .into_iter()
            .filter(move |reason| reasons.contains(*reason))
    }
}

impl From<RejectionReason> for RejectionReasons {
    fn from(reason: RejectionReason) -> Self {
        Self::single(reason)
    }
}

impl FromIterator<RejectionReason> for RejectionReasons {
    fn from_iter<I: IntoIterator<Item = RejectionReason>>(iter: I) -> Self {
        let mut reasons = Self::empty();
        for reason in iter {
            reasons.insert(reason);
        }
        reasons
    }
}

impl core::ops::BitOr for RejectionReasons {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl core::ops::BitOrAssign for RejectionReasons {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl fmt::Display for RejectionReasons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for reason in self.iter() {
            if !first {
                f.write_str("|")?;
            }
            first = false;
            f.write_str(reason.as_str())?;
        }
        Ok(())
    }
}
