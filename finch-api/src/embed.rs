//! 单 VM 嵌入守卫
//!
//! 供只持有一个全局 VM 的宿主使用：`new_vm` 创建，`interpret` 执行，
//! `free_vm` 释放。重复创建返回 [`EmbedError::VmAlreadyCreated`]。
//!
//! 守卫在执行期间持有互斥锁；外部方法拿到的是 `&mut Vm`，
//! 不应再经由本模块重入。

use crate::error::{EmbedError, FinchError};
use finch_core::{Configuration, Vm};
use once_cell::sync::Lazy;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

static VM: Lazy<Mutex<Option<Vm>>> = Lazy::new(|| Mutex::new(None));

fn slot() -> MutexGuard<'static, Option<Vm>> {
    // 脚本 panic 不会破坏 Option 本身
    VM.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 创建全局 VM
pub fn new_vm(config: Configuration) -> Result<(), FinchError> {
    let mut guard = slot();
    if guard.is_some() {
        debug!(target: "finch::vm", "rejected second VM");
        return Err(EmbedError::VmAlreadyCreated.into());
    }
    *guard = Some(Vm::new(config));
    info!(target: "finch::vm", "embedded VM created");
    Ok(())
}

/// 释放全局 VM，之后可以再次 `new_vm`
pub fn free_vm() -> Result<(), FinchError> {
    match slot().take() {
        Some(vm) => {
            drop(vm);
            info!(target: "finch::vm", "embedded VM freed");
            Ok(())
        }
        None => Err(EmbedError::NoVm.into()),
    }
}

pub fn is_vm_created() -> bool {
    slot().is_some()
}

/// 在全局 VM 中执行源码
pub fn interpret(module: &str, source: &str) -> Result<(), FinchError> {
    with_vm(|vm| vm.interpret(module, source))?.map_err(FinchError::from)
}

/// 以独占方式访问全局 VM（读取变量、操作槽位等）
pub fn with_vm<R>(f: impl FnOnce(&mut Vm) -> R) -> Result<R, FinchError> {
    let mut guard = slot();
    let vm = guard.as_mut().ok_or(EmbedError::NoVm)?;
    Ok(f(vm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    // 守卫是进程级状态，整个生命周期放在一个测试里按顺序检查
    #[test]
    fn test_embed_lifecycle() {
        assert_eq!(free_vm(), Err(FinchError::Embed(EmbedError::NoVm)));
        assert_eq!(interpret("main", "1"), Err(FinchError::Embed(EmbedError::NoVm)));

        let output = Arc::new(Mutex::new(String::new()));
        let sink = output.clone();
        let config = Configuration::default().with_write_fn(move |text| sink.lock().unwrap().push_str(text));
        new_vm(config).unwrap();
        assert!(is_vm_created());

        let second = new_vm(Configuration::default());
        assert_eq!(second, Err(FinchError::Embed(EmbedError::VmAlreadyCreated)));
        assert_eq!(second.unwrap_err().to_string(), "VM already created");

        interpret("main", "var greeting = \"hi\"\nSystem.print(greeting)").unwrap();
        assert_eq!(*output.lock().unwrap(), "hi\n");

        let err = interpret("main", "Fiber.abort(\"stop\")").unwrap_err();
        assert!(matches!(err, FinchError::Runtime(_)));

        let greeting = with_vm(|vm| {
            vm.ensure_slots(1);
            vm.get_variable("main", "greeting", 0)?;
            vm.get_slot_string(0)
        })
        .unwrap()
        .unwrap();
        assert_eq!(greeting, "hi");

        free_vm().unwrap();
        assert!(!is_vm_created());
        new_vm(Configuration::default()).unwrap();
        assert!(!with_vm(|vm| vm.has_variable("main", "greeting")).unwrap());
        free_vm().unwrap();
    }
}
