//! 外部类与外部方法
//!
//! 绑定回调在声明时各调用一次，结果缓存在类的方法表中。
//! 调用外部代码时压入新的槽位窗口：槽位 0 是接收者，之后是参数。

use super::slots::SlotWindow;
use super::Vm;
use crate::runtime::error::ForeignError;
use crate::runtime::object::{FiberState, ForeignMethodFn, Method, ObjKind};
use crate::runtime::value::{ObjRef, Value};

impl Vm {
    fn module_name(&self, module: ObjRef) -> String {
        match &self.heap[module] {
            ObjKind::Module(m) => m.name.clone(),
            _ => String::new(),
        }
    }

    /// `ForeignClass` 指令之后查找分配器
    pub(crate) fn bind_foreign_class(&mut self, module: ObjRef, class: ObjRef, name: &str) -> Result<(), Value> {
        let module_name = self.module_name(module);
        let methods = self
            .callbacks
            .bind_foreign_class
            .as_mut()
            .and_then(|bind| bind(&module_name, name));
        match methods {
            Some(methods) => {
                tracing::debug!(target: "finch::foreign", module = %module_name, class = name, "foreign class bound");
                if let Some(class) = self.class_obj_mut(class) {
                    class.foreign = Some(methods);
                }
                Ok(())
            }
            None => {
                let message = format!("Could not find foreign allocator for class {name} in module '{module_name}'.");
                Err(self.error_value(message))
            }
        }
    }

    /// `ForeignMethod` 指令：向宿主查询实现；找不到时记为未绑定
    pub(crate) fn bind_foreign_method(
        &mut self,
        module: ObjRef,
        class: Value,
        symbol: usize,
        is_static: bool,
    ) -> Result<(), Value> {
        let Value::Obj(class) = class else {
            return Err(self.error_value("Foreign method must be bound to a class."));
        };
        let Some((class_name, metaclass)) = self.class_obj(class).map(|c| (c.name.clone(), c.metaclass)) else {
            return Err(self.error_value("Foreign method must be bound to a class."));
        };
        let module_name = self.module_name(module);
        let signature = self.symbols.name(symbol).to_string();

        let function = self
            .callbacks
            .bind_foreign_method
            .as_mut()
            .and_then(|bind| bind(&module_name, &class_name, is_static, &signature));
        let method = match function {
            Some(function) => Method::Foreign(function),
            None => {
                tracing::debug!(
                    target: "finch::foreign",
                    module = %module_name,
                    class = %class_name,
                    signature = %signature,
                    "foreign method not bound"
                );
                Method::Unbound { module: module_name }
            }
        };

        let target = if is_static { metaclass.unwrap_or(class) } else { class };
        if let Some(target) = self.class_obj_mut(target) {
            target.bind(symbol, method);
        }
        Ok(())
    }

    /// 在新的槽位窗口中运行外部代码
    fn with_window(
        &mut self,
        fiber: ObjRef,
        base: usize,
        function: &ForeignMethodFn,
        allocating: bool,
    ) -> Result<(), Value> {
        let len = self.fiber_ref(fiber).stack.len() - base;
        self.windows.push(SlotWindow {
            fiber,
            base,
            len,
            allocating,
        });
        let previous = std::mem::replace(&mut self.fiber_mut(fiber).state, FiberState::SuspendedOnCall);
        // 嵌套调用各自记录中止请求
        let outer_abort = self.pending_abort.take();

        let result = function(self);

        self.fiber_mut(fiber).state = previous;
        self.windows.pop();
        let aborted = std::mem::replace(&mut self.pending_abort, outer_abort);

        match (result, aborted) {
            (Err(ForeignError(message)), _) => Err(self.error_value(message)),
            (Ok(()), Some(error)) => Err(error),
            (Ok(()), None) => Ok(()),
        }
    }

    /// 调用外部方法：结果留在接收者槽位
    pub(crate) fn call_foreign(
        &mut self,
        fiber: ObjRef,
        function: &ForeignMethodFn,
        args_start: usize,
        argc: usize,
    ) -> Result<(), Value> {
        debug_assert_eq!(self.fiber_ref(fiber).stack.len(), args_start + argc + 1);
        let result = self.with_window(fiber, args_start, function, false);
        self.fiber_mut(fiber).stack.truncate(args_start + 1);
        result
    }

    /// `ForeignConstruct` 指令：槽位 0 的类替换为分配器创建的外部对象
    pub(crate) fn construct_foreign(&mut self, fiber: ObjRef, base: usize) -> Result<(), Value> {
        let class = self.fiber_ref(fiber).stack[base];
        let Value::Obj(class_ref) = class else {
            return Err(self.error_value("Only classes can be constructed."));
        };
        let Some((name, allocate)) = self
            .class_obj(class_ref)
            .and_then(|c| Some((c.name.clone(), c.foreign.as_ref()?.allocate.clone())))
        else {
            return Err(self.error_value("Class is not a foreign class."));
        };

        let arity = self.fiber_ref(fiber).stack.len() - base;
        let result = self.with_window(fiber, base, &allocate, true);
        self.fiber_mut(fiber).stack.truncate(base + arity);
        result?;

        // 分配器成功返回后才算构造完成
        let instance = self.fiber_ref(fiber).stack[base];
        if let Value::Obj(r) = instance {
            if let ObjKind::Foreign(foreign) = &mut self.heap[r] {
                if foreign.class == class_ref {
                    foreign.constructed = true;
                    return Ok(());
                }
            }
        }
        let message = format!("Foreign class allocator for '{name}' did not create an instance.");
        Err(self.error_value(message))
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::config::Configuration;
    use crate::runtime::error::InterpretError;
    use crate::runtime::object::{ForeignClassMethods, ForeignMethodFn};
    use crate::runtime::vm::Vm;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_foreign_method_receives_arguments_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let add: ForeignMethodFn = Arc::new(move |vm: &mut Vm| {
            let a = vm.get_slot_double(1)?;
            let b = vm.get_slot_double(2)?;
            if let Ok(mut seen) = record.lock() {
                seen.push((a, b));
            }
            vm.set_slot_double(0, a - b)?;
            Ok(())
        });
        let bound = Arc::new(AtomicUsize::new(0));
        let counter = bound.clone();
        let config = Configuration::default().with_bind_foreign_method_fn(move |module, class, is_static, sig| {
            counter.fetch_add(1, Ordering::SeqCst);
            (module == "main" && class == "Math" && is_static && sig == "sub(_,_)").then(|| add.clone())
        });
        let mut vm = Vm::new(config);
        vm.interpret("main", "class Math {\n  foreign static sub(a, b)\n}\nvar r = Math.sub(10, 4)")
            .unwrap();
        vm.ensure_slots(1);
        vm.get_variable("main", "r", 0).unwrap();
        assert_eq!(vm.get_slot_double(0).unwrap(), 6.0);
        assert_eq!(*seen.lock().unwrap(), vec![(10.0, 4.0)]);
        assert_eq!(bound.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unbound_foreign_method_errors_on_call() {
        let mut vm = Vm::new(Configuration::default());
        let err = vm
            .interpret("main", "class A {\n  construct new() {}\n  foreign f(x)\n}\nA.new().f(1)")
            .unwrap_err();
        let InterpretError::Runtime(err) = err else {
            panic!("expected runtime error");
        };
        assert_eq!(err.message, "Could not find foreign method 'f(_)' for class A in module 'main'.");
    }

    #[test]
    fn test_foreign_error_becomes_runtime_error() {
        let fail: ForeignMethodFn = Arc::new(|_vm: &mut Vm| Err("host says no".into()));
        let config = Configuration::default()
            .with_bind_foreign_method_fn(move |_, _, _, _| Some(fail.clone()));
        let mut vm = Vm::new(config);
        let source = "class H {\n  foreign static go()\n}\nvar f = Fiber.new { H.go() }\nvar e = f.try()";
        vm.interpret("main", source).unwrap();
        vm.ensure_slots(1);
        vm.get_variable("main", "e", 0).unwrap();
        assert_eq!(vm.get_slot_string(0).unwrap(), "host says no");
    }

    #[test]
    fn test_abort_fiber_from_foreign_method() {
        let abort: ForeignMethodFn = Arc::new(|vm: &mut Vm| {
            vm.set_slot_string(0, "aborted by host")?;
            vm.abort_fiber(0)?;
            Ok(())
        });
        let config = Configuration::default()
            .with_bind_foreign_method_fn(move |_, _, _, _| Some(abort.clone()));
        let mut vm = Vm::new(config);
        let err = vm
            .interpret("main", "class H {\n  foreign static go()\n}\nH.go()")
            .unwrap_err();
        assert_eq!(err.to_string(), "aborted by host");
    }

    struct Counter {
        value: f64,
    }

    fn counter_class(finalized: Arc<AtomicUsize>, fail: bool) -> ForeignClassMethods {
        ForeignClassMethods {
            allocate: Arc::new(move |vm: &mut Vm| {
                let start = vm.get_slot_double(1).unwrap_or(0.0);
                vm.set_slot_new_foreign(0, 0, Counter { value: start })?;
                if fail {
                    return Err("allocation failed".into());
                }
                Ok(())
            }),
            finalize: Some(Arc::new(move |data| {
                if data.downcast_mut::<Counter>().is_some() {
                    finalized.fetch_add(1, Ordering::SeqCst);
                }
            })),
        }
    }

    fn counter_vm(finalized: Arc<AtomicUsize>, fail: bool) -> Vm {
        let increment: ForeignMethodFn = Arc::new(|vm: &mut Vm| {
            let counter = vm.get_slot_foreign::<Counter>(0)?;
            counter.value += 1.0;
            let value = counter.value;
            vm.set_slot_double(0, value)?;
            Ok(())
        });
        let config = Configuration::default()
            .with_bind_foreign_class_fn(move |_, class| {
                (class == "Counter").then(|| counter_class(finalized.clone(), fail))
            })
            .with_bind_foreign_method_fn(move |_, _, _, sig| (sig == "increment()").then(|| increment.clone()));
        Vm::new(config)
    }

    const COUNTER: &str = "foreign class Counter {\n  construct new(start) {}\n  foreign increment()\n}\n";

    #[test]
    fn test_foreign_class_lifecycle() {
        let finalized = Arc::new(AtomicUsize::new(0));
        let mut vm = counter_vm(finalized.clone(), false);
        let source = format!("{COUNTER}var c = Counter.new(5)\nc.increment()\nvar v = c.increment()\nc = null");
        vm.interpret("main", &source).unwrap();
        vm.ensure_slots(1);
        vm.get_variable("main", "v", 0).unwrap();
        assert_eq!(vm.get_slot_double(0).unwrap(), 7.0);

        vm.collect_garbage();
        assert_eq!(finalized.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_allocation_is_never_finalized() {
        let finalized = Arc::new(AtomicUsize::new(0));
        let mut vm = counter_vm(finalized.clone(), true);
        let source = format!("{COUNTER}Counter.new(1)");
        let err = vm.interpret("main", &source).unwrap_err();
        assert_eq!(err.to_string(), "allocation failed");
        vm.collect_garbage();
        assert_eq!(finalized.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_allocator_is_runtime_error() {
        let mut vm = Vm::new(Configuration::default());
        let err = vm.interpret("main", "foreign class F {}").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Could not find foreign allocator for class F in module 'main'."
        );
    }
}
