//! Token 估算（简单的字符计数近似）
//!
//! 只用于上下文装配时的预算判断，不追求与真实分词器一致。

/// Token 估算器
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算文本的 token 数量
    /// 英文约 4 字符/token，中文约 1.5 字符/token
    pub fn estimate(text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let mut ascii_chars = 0usize;
        let mut non_ascii_chars = 0usize;
        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }

        let tokens = ascii_chars.div_ceil(4) + (non_ascii_chars as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }

    /// 多段文本的合计估算
    pub fn estimate_all<'a>(texts: impl IntoIterator<Item = &'a str>) -> usize {
        texts.into_iter().map(Self::estimate).sum()
    }
}
