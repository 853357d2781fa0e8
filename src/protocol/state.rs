//! 协议标记与派生状态
//!
//! ProtocolFlags 由单个作业独占，作业开始时重置，只会由 false 翻到 true。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// 协议标记（随检查点持久化）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolFlags {
    pub did_load: bool,
    pub did_mutate: bool,
    pub did_communicate: bool,
    /// 已加载的作用域
    pub loaded_scopes: BTreeSet<String>,
}

impl ProtocolFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定作用域是否已加载；无作用域时看 did_load
    pub fn is_loaded(&self, scope: Option<&str>) -> bool {
        match scope {
            Some(s) => self.loaded_scopes.contains(s),
            None => self.did_load,
        }
    }

    pub fn mark_loaded(&mut self, scope: Option<&str>) {
        self.did_load = true;
        if let Some(s) = scope {
            self.loaded_scopes.insert(s.to_string());
        }
    }

    pub fn mark_mutated(&mut self) {
        self.did_mutate = true;
    }

    pub fn mark_communicated(&mut self) {
        self.did_communicate = true;
    }

    pub fn state(&self) -> ProtocolState {
        ProtocolState::from(self)
    }

    /// self 是否是 earlier 的单调延伸（没有任何标记被撤回）
    pub fn extends(&self, earlier: &ProtocolFlags) -> bool {
        (self.did_load || !earlier.did_load)
            && (self.did_mutate || !earlier.did_mutate)
            && (self.did_communicate || !earlier.did_communicate)
            && earlier.loaded_scopes.is_subset(&self.loaded_scopes)
    }
}

/// 派生状态：Init → Loaded → Mutated → Communicated
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolState {
    Init,
    Loaded,
    Mutated,
    Communicated,
}

impl From<&ProtocolFlags> for ProtocolState {
    fn from(flags: &ProtocolFlags) -> Self {
        if flags.did_communicate {
            ProtocolState::Communicated
        } else if flags.did_mutate {
            ProtocolState::Mutated
        } else if flags.did_load {
            ProtocolState::Loaded
        } else {
            ProtocolState::Init
        }
    }
}
