//! 关键词抽取
//!
//! 中英文混合：CJK 片段交给 jieba（搜索引擎模式），ASCII 片段按正则切词；
//! 统一小写、去停用词，返回有序集合，保证检索结果与输入顺序无关。

use std::collections::BTreeSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;
use regex::Regex;

static JIEBA: OnceLock<Jieba> = OnceLock::new();
static WORD_RE: OnceLock<Regex> = OnceLock::new();

fn jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

fn word_re() -> Option<&'static Regex> {
    if let Some(re) = WORD_RE.get() {
        return Some(re);
    }
    let re = Regex::new(r"[a-z0-9][a-z0-9_\-]*").ok()?;
    Some(WORD_RE.get_or_init(|| re))
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "in", "is",
    "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "were", "will", "with",
    "的", "了", "和", "是", "在", "我", "也", "就", "都", "而", "及", "与", "着", "或",
];

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |
        '\u{3400}'..='\u{4DBF}' |
        '\u{F900}'..='\u{FAFF}' |
        '\u{3040}'..='\u{309F}' |
        '\u{30A0}'..='\u{30FF}'
    )
}

pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

/// 分词（保留重复、保留顺序）
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return Vec::new();
    }

    let mut tokens = Vec::new();
    if contains_cjk(&lower) {
        for piece in jieba().cut_for_search(&lower, true) {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            if piece.chars().any(is_cjk) {
                if !is_stop_word(piece) {
                    tokens.push(piece.to_string());
                }
            } else {
                push_ascii_words(piece, &mut tokens);
            }
        }
    } else {
        push_ascii_words(&lower, &mut tokens);
    }
    tokens
}

fn push_ascii_words(text: &str, out: &mut Vec<String>) {
    let Some(re) = word_re() else {
        out.extend(
            text.split_whitespace()
                .filter(|w| w.len() > 1 && !is_stop_word(w))
                .map(str::to_string),
        );
        return;
    };
    out.extend(
        re.find_iter(text)
            .map(|m| m.as_str())
            .filter(|w| w.len() > 1 && !is_stop_word(w))
            .map(str::to_string),
    );
}

/// 去重后的关键词集合
pub fn keywords(text: &str) -> BTreeSet<String> {
    tokenize(text).into_iter().collect()
}

/// Jaccard 相似度：|A∩B| / |A∪B|，任一为空时为 0
pub fn jaccard_similarity(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}
