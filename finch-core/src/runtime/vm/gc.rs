//! 分配与回收
//!
//! 所有堆分配都经过 [`Vm::alloc`]：它在超过阈值时先回收，
//! 待分配对象引用的子对象一并作为根，避免在构造途中被回收。

use super::handle::HandleEntry;
use super::Vm;
use crate::runtime::heap::CollectStats;
use crate::runtime::object::ObjKind;
use crate::runtime::value::{ObjRef, Value};

impl Vm {
    pub(crate) fn alloc(&mut self, kind: ObjKind) -> ObjRef {
        let size = kind.memory_size();
        if self.heap.should_collect(size) {
            let mut pending = Vec::new();
            kind.trace(&mut pending);
            self.collect_with(pending, size);
        }
        self.heap.alloc(kind)
    }

    /// 强制回收一次
    pub fn collect_garbage(&mut self) -> CollectStats {
        self.collect_with(Vec::new(), 0)
    }

    fn collect_with(&mut self, mut roots: Vec<ObjRef>, pending: usize) -> CollectStats {
        self.gather_roots(&mut roots);
        let stats = self.heap.collect(roots, pending);
        tracing::debug!(
            target: "finch::gc",
            before = stats.bytes_before,
            after = stats.bytes_after,
            freed = stats.objects_freed,
            next = stats.next_gc,
            "collected"
        );
        stats
    }

    fn gather_roots(&self, roots: &mut Vec<ObjRef>) {
        fn value(v: &Value, roots: &mut Vec<ObjRef>) {
            if let Value::Obj(r) = v {
                roots.push(*r);
            }
        }

        roots.push(self.core_module);
        roots.extend(self.core.all());
        roots.extend(self.modules.values().copied());

        roots.extend(self.fiber);
        roots.extend(self.suspended.iter().flatten().copied());
        roots.extend(self.windows.iter().map(|w| w.fiber));
        roots.extend(self.api_fiber);

        for entry in self.handles.values() {
            match entry {
                HandleEntry::Value(v) => value(v, roots),
                HandleEntry::Call { closure, .. } => roots.push(*closure),
            }
        }
        self.temp_roots.iter().for_each(|v| value(v, roots));
        if let Some(abort) = &self.pending_abort {
            value(abort, roots);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::config::Configuration;
    use crate::runtime::vm::Vm;
    use finch_config::HeapConfig;

    fn stress_vm() -> Vm {
        let config = Configuration {
            heap: HeapConfig {
                stress: true,
                ..HeapConfig::default()
            },
            ..Configuration::default()
        };
        Vm::new(config)
    }

    #[test]
    fn test_module_variables_survive_collection() {
        let mut vm = stress_vm();
        vm.interpret("main", "var list = [1, 2, 3]\nvar s = \"kept\"").unwrap();
        vm.collect_garbage();
        vm.ensure_slots(1);
        vm.get_variable("main", "s", 0).unwrap();
        assert_eq!(vm.get_slot_string(0).unwrap(), "kept");
    }

    #[test]
    fn test_garbage_is_reclaimed() {
        let mut vm = Vm::new(Configuration::default());
        vm.collect_garbage();
        let baseline = vm.heap().live_objects();
        vm.interpret("main", "for (i in 0...100) {\n  var s = [i, i]\n}").unwrap();
        vm.collect_garbage();
        // 模块 main 及其闭包保留，循环中的临时列表全部回收
        assert!(vm.heap().live_objects() < baseline + 20);
    }

    #[test]
    fn test_stress_mode_runs_programs() {
        let mut vm = stress_vm();
        let source = "class P {\n  construct new(x) { _x = x }\n  x { _x }\n}\nvar total = 0\nfor (i in 1..20) {\n  total = total + P.new(i).x\n}";
        vm.interpret("main", source).unwrap();
        vm.ensure_slots(1);
        vm.get_variable("main", "total", 0).unwrap();
        assert_eq!(vm.get_slot_double(0).unwrap(), 210.0);
    }
}
