//! 编译期作用域：局部变量、upvalue、循环与模块变量

use crate::runtime::bytecode::{Chunk, FnProto};
use std::collections::HashMap;

pub const MAX_LOCALS: usize = 256;
pub const MAX_UPVALUES: usize = 256;
pub const MAX_FIELDS: usize = 255;
pub const MAX_PARAMETERS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnKind {
    /// 模块顶层代码
    Script,
    Method,
    StaticMethod,
    /// 构造器的实例部分（`init name(...)`），隐式返回 this
    Initializer,
    /// 块参数 `{ |x| ... }`
    Block,
}

impl FnKind {
    pub fn is_method(&self) -> bool {
        matches!(self, FnKind::Method | FnKind::StaticMethod | FnKind::Initializer)
    }
}

#[derive(Debug, Clone)]
pub struct Local {
    pub name: String,
    pub depth: usize,
    pub captured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueDesc {
    pub is_local: bool,
    pub index: u8,
}

#[derive(Debug, Clone)]
pub struct LoopState {
    pub start: usize,
    pub scope_depth: usize,
    pub exit_jumps: Vec<usize>,
}

/// 正在编译的函数
#[derive(Debug)]
pub struct FnState {
    pub name: String,
    pub arity: usize,
    pub kind: FnKind,
    pub chunk: Chunk,
    pub locals: Vec<Local>,
    pub upvalues: Vec<UpvalueDesc>,
    pub scope_depth: usize,
    pub loops: Vec<LoopState>,
}

impl FnState {
    pub fn new(name: String, kind: FnKind) -> Self {
        // 槽位 0：方法中是接收者，其他函数中是闭包本身
        let slot_zero = if kind.is_method() { "this" } else { "" };
        Self {
            name,
            arity: 0,
            kind,
            chunk: Chunk::new(),
            locals: vec![Local {
                name: slot_zero.to_string(),
                depth: 0,
                captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
            loops: Vec::new(),
        }
    }

    pub fn resolve_local(&self, name: &str) -> Option<usize> {
        self.locals.iter().rposition(|local| local.name == name)
    }

    pub fn add_upvalue(&mut self, is_local: bool, index: u8) -> Result<usize, String> {
        let desc = UpvalueDesc { is_local, index };
        if let Some(existing) = self.upvalues.iter().position(|u| *u == desc) {
            return Ok(existing);
        }
        if self.upvalues.len() >= MAX_UPVALUES {
            return Err("Too many upvalues in one function.".to_string());
        }
        self.upvalues.push(desc);
        Ok(self.upvalues.len() - 1)
    }

    pub fn into_proto(self, module: &str) -> (FnProto, Vec<UpvalueDesc>) {
        let proto = FnProto {
            name: self.name,
            arity: self.arity,
            upvalue_count: self.upvalues.len(),
            module: module.to_string(),
            chunk: self.chunk,
        };
        (proto, self.upvalues)
    }
}

/// 模块变量表（编译期视图）
///
/// 编译开始时复制模块已有的变量名；被引用但尚未定义的名字
/// 先隐式声明，编译结束时仍未定义则报错。
#[derive(Debug, Clone, Default)]
pub struct ModuleVars {
    pub names: Vec<String>,
    lookup: HashMap<String, usize>,
    /// 隐式声明的变量 -> 首次使用的行号
    undefined: HashMap<usize, usize>,
}

impl ModuleVars {
    pub fn new(existing: &[String]) -> Self {
        let mut vars = Self::default();
        for name in existing {
            vars.lookup.insert(name.clone(), vars.names.len());
            vars.names.push(name.clone());
        }
        vars
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    /// 在定义之前引用：隐式声明
    pub fn declare_implicit(&mut self, name: &str, line: usize) -> usize {
        if let Some(index) = self.find(name) {
            return index;
        }
        let index = self.push(name);
        self.undefined.insert(index, line);
        index
    }

    /// 显式定义（`var` / `class` / import）
    pub fn define(&mut self, name: &str) -> Result<usize, String> {
        match self.find(name) {
            Some(index) if self.undefined.remove(&index).is_some() => Ok(index),
            Some(_) => Err(format!("Module variable '{name}' is already defined.")),
            None => Ok(self.push(name)),
        }
    }

    /// 隐藏变量（静态字段）首次使用即视为已定义
    pub fn hidden(&mut self, name: &str) -> usize {
        match self.find(name) {
            Some(index) => index,
            None => self.push(name),
        }
    }

    /// 第一个仍未定义的变量 (名字, 首次使用行)
    pub fn first_undefined(&self) -> Option<(&str, usize)> {
        self.undefined
            .iter()
            .min_by_key(|(_, line)| **line)
            .map(|(index, line)| (self.names[*index].as_str(), *line))
    }

    fn push(&mut self, name: &str) -> usize {
        let index = self.names.len();
        self.names.push(name.to_string());
        self.lookup.insert(name.to_string(), index);
        index
    }
}
