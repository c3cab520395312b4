//! 模块解析、加载与编译
//!
//! 导入分两步：`resolve(导入者, 名字)` 得到规范名，`load(规范名)` 得到源码。
//! 被导入的模块在导入者执行之前全部解析、加载并编译完成；
//! 任何一步失败都会撤销本次调用中新建的模块。

use super::execution::Flow;
use super::Vm;
use crate::compiler::{self, parser::Stmt};
use crate::runtime::bytecode::{Chunk, Constant, FnProto};
use crate::runtime::config::{Diagnostic, DiagnosticKind};
use crate::runtime::error::{CompileError, HostContractViolation, InterpretError};
use crate::runtime::object::{ClosureObj, FiberObj, FunctionObj, ModuleObj, ObjKind};
use crate::runtime::value::{ObjRef, Value};
use std::sync::Arc;

impl Vm {
    // ==================== 公开接口 ====================

    /// 在模块 `module` 中编译并运行源码
    ///
    /// 同名模块已存在时在其中继续定义变量。
    pub fn interpret(&mut self, module: &str, source: &str) -> Result<(), InterpretError> {
        tracing::debug!(target: "finch::vm", module, bytes = source.len(), "interpret");
        let closure = match self.compile_in_module(module, source) {
            Ok(closure) => closure,
            Err(err) => {
                self.report(Diagnostic {
                    kind: DiagnosticKind::Compile,
                    module: err.module.clone(),
                    line: err.line,
                    message: err.message.clone(),
                });
                return Err(err.into());
            }
        };

        self.temp_roots.push(Value::Obj(closure));
        let fiber = self.alloc(ObjKind::Fiber(Box::new(FiberObj::new(closure))));
        self.temp_roots.pop();

        self.run_nested(fiber)?;
        Ok(())
    }

    /// 把模块变量的值放入槽位
    pub fn get_variable(&mut self, module: &str, name: &str, slot: usize) -> Result<(), HostContractViolation> {
        let value = self.module_variable(module, name)?;
        self.set_slot_value(slot, value)
    }

    pub fn has_variable(&self, module: &str, name: &str) -> bool {
        self.module_variable(module, name).is_ok()
    }

    fn module_variable(&self, module: &str, name: &str) -> Result<Value, HostContractViolation> {
        let module_ref = self
            .find_module(module)
            .ok_or_else(|| HostContractViolation::UnknownModule(module.to_string()))?;
        match &self.heap[module_ref] {
            ObjKind::Module(m) => m.get(name).ok_or_else(|| HostContractViolation::UnknownVariable {
                module: module.to_string(),
                name: name.to_string(),
            }),
            _ => Err(HostContractViolation::UnknownModule(module.to_string())),
        }
    }

    pub(crate) fn find_module(&self, name: &str) -> Option<ObjRef> {
        if name == "core" {
            return Some(self.core_module);
        }
        self.modules.get(name).copied()
    }

    // ==================== 编译 ====================

    /// 编译源码（含预取导入），返回模块顶层闭包
    fn compile_in_module(&mut self, module: &str, source: &str) -> Result<ObjRef, CompileError> {
        let mut created = Vec::new();
        let result = self.compile_with_imports(module, source, &mut created);
        match result {
            Ok(closure) => {
                if let Some(module_ref) = self.modules.get(module).copied() {
                    if let ObjKind::Module(m) = &mut self.heap[module_ref] {
                        // 入口模块直接运行，不再经由 import 执行
                        m.executed = true;
                        m.body = None;
                    }
                }
                Ok(closure)
            }
            Err(err) => {
                for name in &created {
                    self.modules.remove(name);
                }
                if !created.is_empty() {
                    tracing::debug!(target: "finch::module", discarded = created.len(), "rolled back modules");
                }
                Err(err)
            }
        }
    }

    fn compile_with_imports(
        &mut self,
        module: &str,
        source: &str,
        created: &mut Vec<String>,
    ) -> Result<ObjRef, CompileError> {
        let module_ref = self.ensure_module(module, created);
        let mut statements = compiler::parse(module, source)?;
        self.prefetch_imports(module, &mut statements, created)?;
        self.compile_statements(module_ref, module, &statements)
    }

    fn ensure_module(&mut self, name: &str, created: &mut Vec<String>) -> ObjRef {
        if let Some(module) = self.modules.get(name) {
            return *module;
        }
        let mut module = ModuleObj::new(name);
        if let ObjKind::Module(core) = &self.heap[self.core_module] {
            module.variable_names = core.variable_names.clone();
            module.variables = core.variables.clone();
        }
        let module = self.alloc(ObjKind::Module(module));
        self.modules.insert(name.to_string(), module);
        created.push(name.to_string());
        module
    }

    /// 解析、加载并编译语句中的所有导入，把规范名写回 AST
    fn prefetch_imports(
        &mut self,
        importer: &str,
        statements: &mut [Stmt],
        created: &mut Vec<String>,
    ) -> Result<(), CompileError> {
        for (decl, line) in compiler::imports_mut(statements) {
            let Some(canonical) = self.resolve_module(importer, &decl.module) else {
                return Err(CompileError::new(
                    importer,
                    line,
                    format!("Could not resolve module '{}' imported from '{}'.", decl.module, importer),
                ));
            };
            decl.resolved = Some(canonical.clone());
            if self.find_module(&canonical).is_some() {
                continue;
            }

            let Some(loaded) = self.load_module(&canonical) else {
                return Err(CompileError::new(
                    importer,
                    line,
                    format!("Could not load module '{canonical}'."),
                ));
            };
            tracing::debug!(target: "finch::module", module = %canonical, importer, "loading module");

            let result = self.compile_with_imports(&canonical, &loaded.source, created);
            if let Some(on_complete) = loaded.on_complete {
                on_complete();
            }
            let closure = result?;
            if let Some(module_ref) = self.modules.get(&canonical).copied() {
                if let ObjKind::Module(m) = &mut self.heap[module_ref] {
                    m.body = Some(closure);
                }
            }
        }
        Ok(())
    }

    fn resolve_module(&mut self, importer: &str, name: &str) -> Option<String> {
        match self.callbacks.resolve_module.as_mut() {
            Some(resolve) => resolve(importer, name),
            None => Some(name.to_string()),
        }
    }

    fn load_module(&mut self, name: &str) -> Option<crate::runtime::config::LoadedModule> {
        self.callbacks.load_module.as_mut().and_then(|load| load(name))
    }

    /// 在已有模块对象中编译语句，返回顶层闭包
    pub(crate) fn compile_statements(
        &mut self,
        module_ref: ObjRef,
        module: &str,
        statements: &[Stmt],
    ) -> Result<ObjRef, CompileError> {
        let existing = match &self.heap[module_ref] {
            ObjKind::Module(m) => m.variable_names.clone(),
            _ => Vec::new(),
        };
        let compiled = compiler::compile(
            module,
            statements,
            &existing,
            &mut self.symbols,
            self.compiler.emit_debug_info,
        )?;

        if let ObjKind::Module(m) = &mut self.heap[module_ref] {
            m.variables.resize(compiled.variable_names.len(), Value::Null);
            m.variable_names = compiled.variable_names;
        }

        let roots = self.temp_roots.len();
        let function = self.materialize(&compiled.function, module_ref);
        let closure = self.alloc(ObjKind::Closure(ClosureObj {
            function,
            upvalues: Vec::new(),
        }));
        self.temp_roots.truncate(roots);
        Ok(closure)
    }

    /// 把函数原型物化为堆上的函数对象（常量池中的字符串和嵌套函数一并创建）
    ///
    /// 创建出的对象在调用者截断之前一直挂在临时根上。
    fn materialize(&mut self, proto: &FnProto, module: ObjRef) -> ObjRef {
        let mut constants = Vec::with_capacity(proto.chunk.constants.len());
        for constant in &proto.chunk.constants {
            let value = match constant {
                Constant::Num(n) => Value::Num(*n),
                Constant::Str(s) => self.new_string(s.clone()),
                Constant::Fn(inner) => Value::Obj(self.materialize(inner, module)),
            };
            self.temp_roots.push(value);
            constants.push(value);
        }

        let chunk = Chunk {
            code: proto.chunk.code.clone(),
            constants: Vec::new(),
            lines: proto.chunk.lines.clone(),
        };
        let function = self.alloc(ObjKind::Function(FunctionObj {
            name: proto.name.clone(),
            arity: proto.arity,
            upvalue_count: proto.upvalue_count,
            chunk: Arc::new(chunk),
            constants: constants.into(),
            module,
            field_offset: 0,
            owner_class: None,
        }));
        self.temp_roots.push(Value::Obj(function));
        function
    }

    // ==================== 运行时导入 ====================

    /// `ImportModule`：至多执行一次被导入模块的顶层代码
    pub(crate) fn import_module(&mut self, fiber: ObjRef, name: &str) -> Result<Flow, Value> {
        let Some(module) = self.find_module(name) else {
            let message = format!("Could not find module '{name}'.");
            return Err(self.error_value(message));
        };
        let body = match &mut self.heap[module] {
            ObjKind::Module(m) if !m.executed => {
                m.executed = true;
                m.body.take()
            }
            _ => None,
        };
        match body {
            Some(closure) => {
                tracing::debug!(target: "finch::module", module = name, "executing module");
                let args_start = self.fiber_ref(fiber).stack.len();
                self.push(fiber, Value::Obj(closure));
                self.call_closure(fiber, closure, args_start, 0)
            }
            None => {
                self.push(fiber, Value::Null);
                Ok(Flow::Next)
            }
        }
    }

    /// `ImportVariable`
    pub(crate) fn import_variable(&mut self, module: &str, name: &str) -> Result<Value, Value> {
        let value = self.find_module(module).and_then(|m| match &self.heap[m] {
            ObjKind::Module(m) => m.get(name),
            _ => None,
        });
        match value {
            Some(value) => Ok(value),
            None => {
                let message = format!("Could not find a variable named '{name}' in module '{module}'.");
                Err(self.error_value(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::config::{Configuration, LoadedModule};
    use crate::runtime::error::InterpretError;
    use crate::runtime::vm::Vm;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn vm_with_modules(modules: &'static [(&'static str, &'static str)], out: Arc<Mutex<String>>) -> Vm {
        let config = Configuration::default()
            .with_write_fn(move |text| {
                if let Ok(mut out) = out.lock() {
                    out.push_str(text);
                }
            })
            .with_load_module_fn(move |name| {
                modules
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map(|(_, source)| LoadedModule::new(*source))
            });
        Vm::new(config)
    }

    #[test]
    fn test_module_runs_once() {
        let out = Arc::new(Mutex::new(String::new()));
        let mut vm = vm_with_modules(&[("a", "System.print(\"loading a\")\nvar value = 3")], out.clone());
        vm.interpret("main", "import \"a\" for value\nimport \"a\"\nSystem.print(value)").unwrap();
        vm.interpret("other", "import \"a\" for value\nSystem.print(value)").unwrap();
        assert_eq!(*out.lock().unwrap(), "loading a\n3\n3\n");
    }

    #[test]
    fn test_import_alias() {
        let out = Arc::new(Mutex::new(String::new()));
        let mut vm = vm_with_modules(&[("math", "var Pi = 3")], out.clone());
        vm.interpret("main", "import \"math\" for Pi as P\nSystem.print(P)").unwrap();
        assert_eq!(*out.lock().unwrap(), "3\n");
    }

    #[test]
    fn test_missing_module_is_compile_error() {
        let out = Arc::new(Mutex::new(String::new()));
        let mut vm = vm_with_modules(&[], out);
        let err = vm.interpret("main", "var x = 1\nimport \"nope\"").unwrap_err();
        let InterpretError::Compile(err) = err else {
            panic!("expected compile error");
        };
        assert_eq!(err.module, "main");
        assert_eq!(err.line, 2);
        assert_eq!(err.message, "Could not load module 'nope'.");
        assert!(!vm.has_module("main"));
    }

    #[test]
    fn test_failed_import_discards_new_modules() {
        let out = Arc::new(Mutex::new(String::new()));
        let mut vm = vm_with_modules(&[("good", "var x = 1"), ("bad", "var = ")], out);
        let err = vm.interpret("main", "import \"good\"\nimport \"bad\"").unwrap_err();
        let InterpretError::Compile(err) = err else {
            panic!("expected compile error");
        };
        assert_eq!(err.module, "bad");
        assert!(!vm.has_module("good"));
        assert!(!vm.has_module("bad"));
    }

    #[test]
    fn test_missing_variable_is_runtime_error() {
        let out = Arc::new(Mutex::new(String::new()));
        let mut vm = vm_with_modules(&[("a", "var x = 1")], out);
        let err = vm.interpret("main", "import \"a\" for y").unwrap_err();
        let InterpretError::Runtime(err) = err else {
            panic!("expected runtime error");
        };
        assert_eq!(err.message, "Could not find a variable named 'y' in module 'a'.");
    }

    #[test]
    fn test_resolver_receives_importer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let config = Configuration::default()
            .with_resolve_module_fn(move |importer, name| {
                if let Ok(mut seen) = record.lock() {
                    seen.push(format!("{importer}:{name}"));
                }
                Some(format!("lib/{name}"))
            })
            .with_load_module_fn(|name| (name == "lib/util").then(|| LoadedModule::new("var u = 1")));
        let mut vm = Vm::new(config);
        vm.interpret("main", "import \"util\" for u").unwrap();
        assert!(vm.has_module("lib/util"));
        assert_eq!(*seen.lock().unwrap(), vec!["main:util".to_string()]);
    }

    #[test]
    fn test_unresolvable_import() {
        let config = Configuration::default().with_resolve_module_fn(|_, _| None);
        let mut vm = Vm::new(config);
        let err = vm.interpret("main", "import \"x\"").unwrap_err();
        assert_eq!(
            err.to_string(),
            "[main line 1] [Error] Could not resolve module 'x' imported from 'main'."
        );
    }

    #[test]
    fn test_on_complete_runs_once_on_success_and_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let config = Configuration::default().with_load_module_fn(move |name| {
            let counter = counter.clone();
            let source = if name == "ok" { "var a = 1" } else { "var = " };
            Some(LoadedModule::new(source).with_on_complete(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
        });
        let mut vm = Vm::new(config);
        vm.interpret("m1", "import \"ok\"").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        vm.interpret("m2", "import \"broken\"").unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_interpret_reuses_module() {
        let mut vm = Vm::new(Configuration::default());
        vm.interpret("repl", "var a = 1").unwrap();
        vm.interpret("repl", "var b = a + 1").unwrap();
        vm.ensure_slots(1);
        vm.get_variable("repl", "b", 0).unwrap();
        assert_eq!(vm.get_slot_double(0).unwrap(), 2.0);
    }

    #[test]
    fn test_has_variable() {
        let mut vm = Vm::new(Configuration::default());
        vm.interpret("main", "var answer = 42").unwrap();
        assert!(vm.has_variable("main", "answer"));
        assert!(!vm.has_variable("main", "question"));
        assert!(!vm.has_variable("nope", "answer"));
        assert!(vm.has_variable("core", "List"));
    }
}
