//! User key normalization and validation.
//!
//! A user key is an opaque email-shaped string. Keys are compared bytewise
//! after normalization, so every path that accepts a key from the outside
//! must run it through [`normalize`] and [`validate`] before touching any
//! shared state.

/// trim + 小写, 得到规范化的 key
pub fn normalize(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// 结构校验: 非空 local 部分 + `@` + domain 内部必须有 `.`
///
/// The split is on the last `@` so a quoted local part containing `@`
/// still lands on the right domain. The predicate is intentionally
/// syntactic only; identity verification is not this crate's job.
pub fn validate(key: &str) -> bool {
    let Some((local, domain)) = key.rsplit_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() {
        return false;
    }
    if key.chars().any(char::is_whitespace) {
        return false;
    }
    // 域名中的 . 两侧都要有内容
    match domain.rsplit_once('.') {
        Some((head, tail)) => !head.is_empty() && !tail.is_empty(),
        None => false,
    }
}
