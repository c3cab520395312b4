//! 方法符号表
//!
//! 所有类共享一个全局符号表：签名字符串 -> 稠密整数。
//! 类的方法表以符号为下标。

use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    names: Vec<String>,
    lookup: HashMap<String, usize>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 查找符号，不存在时添加
    pub fn ensure(&mut self, name: &str) -> usize {
        if let Some(&symbol) = self.lookup.get(name) {
            return symbol;
        }
        let symbol = self.names.len();
        self.names.push(name.to_string());
        self.lookup.insert(name.to_string(), symbol);
        symbol
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    pub fn name(&self, symbol: usize) -> &str {
        self.names.get(symbol).map_or("<unknown>", String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_is_stable() {
        let mut table = SymbolTable::new();
        let a = table.ensure("call(_)");
        let b = table.ensure("toString");
        assert_eq!(table.ensure("call(_)"), a);
        assert_ne!(a, b);
        assert_eq!(table.name(b), "toString");
        assert_eq!(table.find("missing"), None);
        assert_eq!(table.len(), 2);
    }
}
