//! 外部方法与外部类测试

mod common;
use common::Harness;
use finch_core::{ForeignClassMethods, ForeignError, InterpretError, Vm};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ===== 外部方法 =====

#[test]
fn test_binding_key_and_argument_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    let (mut vm, shared) = Harness::new()
        .method("Calc.call(_,_)", move |vm| {
            let receiver = vm.slot_type(0)?;
            let a = vm.get_slot_double(1)?;
            let b = vm.get_slot_string(2)?;
            record.lock().unwrap().push((receiver, a, b));
            vm.set_slot_string(0, "done")?;
            Ok(())
        })
        .build();
    let source = "class Calc {\n  construct new() {}\n  foreign call(a, b)\n}\nvar c = Calc.new()\nSystem.print(c.call(1, \"two\"))\nc.call(3, \"four\")";
    vm.interpret("main", source).unwrap();

    let captured = shared.lock().unwrap();
    assert_eq!(captured.output, "done\n");
    assert_eq!(
        captured.method_binds,
        vec![("main".to_string(), "Calc".to_string(), false, "call(_,_)".to_string())]
    );
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].1, 1.0);
    assert_eq!(seen[0].2, "two");
    assert_eq!(seen[1].1, 3.0);
}

#[test]
fn test_static_and_operator_signatures() {
    let (mut vm, shared) = Harness::new()
        .method("static Vec.zero", |vm| vm.set_slot_double(0, 0.0).map_err(Into::into))
        .method("Vec.+(_)", |vm| {
            let rhs = vm.get_slot_double(1)?;
            vm.set_slot_double(0, rhs + 100.0)?;
            Ok(())
        })
        .method("Vec.[_]", |vm| {
            let index = vm.get_slot_double(1)?;
            vm.set_slot_double(0, index * 2.0)?;
            Ok(())
        })
        .method("Vec.value=(_)", |vm| {
            let value = vm.get_slot_double(1)?;
            vm.set_slot_double(0, value)?;
            Ok(())
        })
        .build();
    let source = "class Vec {\n  construct new() {}\n  foreign static zero\n  foreign +(other)\n  foreign [index]\n  foreign value=(v)\n}\nvar v = Vec.new()\nSystem.print(Vec.zero)\nSystem.print(v + 1)\nSystem.print(v[4])\nSystem.print(v.value = 7)";
    vm.interpret("main", source).unwrap();

    let captured = shared.lock().unwrap();
    assert_eq!(captured.output, "0\n101\n8\n7\n");
    let signatures: Vec<(bool, &str)> = captured
        .method_binds
        .iter()
        .map(|(_, _, is_static, sig)| (*is_static, sig.as_str()))
        .collect();
    assert_eq!(
        signatures,
        vec![(true, "zero"), (false, "+(_)"), (false, "[_]"), (false, "value=(_)")]
    );
}

#[test]
fn test_foreign_method_inherited_by_subclass() {
    let (mut vm, shared) = Harness::new()
        .method("Base.hello()", |vm| vm.set_slot_string(0, "hi from host").map_err(Into::into))
        .build();
    let source = "class Base {\n  construct new() {}\n  foreign hello()\n}\nclass Derived is Base {\n  construct new() {}\n}\nSystem.print(Derived.new().hello())";
    vm.interpret("main", source).unwrap();
    let captured = shared.lock().unwrap();
    assert_eq!(captured.output, "hi from host\n");
    assert_eq!(captured.method_binds.len(), 1);
}

#[test]
fn test_foreign_error_unwinds_like_abort() {
    let (mut vm, shared) = Harness::new()
        .method("static Host.fail(_)", |vm| {
            let message = vm.get_slot_string(1)?;
            Err(ForeignError(message))
        })
        .build();
    let source = "class Host {\n  foreign static fail(msg)\n}\nvar f = Fiber.new { Host.fail(\"nope\") }\nSystem.print(f.try())\nHost.fail(\"fatal\")\nSystem.print(\"unreachable\")";
    let err = vm.interpret("main", source).unwrap_err();
    let InterpretError::Runtime(err) = err else {
        panic!("expected runtime error");
    };
    assert_eq!(err.message, "fatal");
    assert_eq!(shared.lock().unwrap().output, "nope\n");
}

#[test]
fn test_reentrant_call_from_foreign_method() {
    let (mut vm, shared) = Harness::new()
        .method("static Host.twice(_)", |vm| {
            let callback = vm.get_slot_handle(1)?;
            let call = vm.make_call_handle("call(_)")?;
            let mut total = 0.0;
            for n in [1.0, 2.0] {
                vm.ensure_slots(2);
                vm.set_slot_handle(0, &callback)?;
                vm.set_slot_double(1, n)?;
                vm.call(&call).map_err(|err| ForeignError(err.to_string()))?;
                total += vm.get_slot_double(0)?;
            }
            vm.release_handle(call);
            vm.release_handle(callback);
            vm.set_slot_double(0, total)?;
            Ok(())
        })
        .build();
    let source = "class Host {\n  foreign static twice(fn)\n}\nSystem.print(Host.twice {|n| n * 10 })";
    vm.interpret("main", source).unwrap();
    assert_eq!(shared.lock().unwrap().output, "30\n");
}

// ===== 外部类 =====

struct File {
    path: String,
    open: bool,
}

fn file_class(finalized: Arc<AtomicUsize>) -> ForeignClassMethods {
    ForeignClassMethods {
        allocate: Arc::new(|vm: &mut Vm| {
            let path = vm.get_slot_string(1)?;
            if path.is_empty() {
                return Err("path must not be empty".into());
            }
            vm.set_slot_new_foreign(0, 0, File { path, open: true })?;
            Ok(())
        }),
        finalize: Some(Arc::new(move |data| {
            if let Some(file) = data.downcast_mut::<File>() {
                file.open = false;
                finalized.fetch_add(1, Ordering::SeqCst);
            }
        })),
    }
}

fn file_vm(finalized: Arc<AtomicUsize>) -> (Vm, common::Shared) {
    Harness::new()
        .class("File", file_class(finalized))
        .method("File.path", |vm| {
            let path = vm.get_slot_foreign::<File>(0)?.path.clone();
            vm.set_slot_string(0, &path)?;
            Ok(())
        })
        .method("File.isOpen", |vm| {
            let open = vm.get_slot_foreign::<File>(0)?.open;
            vm.set_slot_bool(0, open)?;
            Ok(())
        })
        .build()
}

const FILE_CLASS: &str = "foreign class File {\n  construct open(path) {}\n  foreign path\n  foreign isOpen\n}\n";

#[test]
fn test_foreign_instance_methods() {
    let finalized = Arc::new(AtomicUsize::new(0));
    let (mut vm, shared) = file_vm(finalized.clone());
    let source = format!("{FILE_CLASS}var f = File.open(\"a.txt\")\nSystem.print(f.path)\nSystem.print(f.isOpen)\nSystem.print(f is File)");
    vm.interpret("main", &source).unwrap();
    assert_eq!(shared.lock().unwrap().output, "a.txt\ntrue\ntrue\n");

    vm.collect_garbage();
    assert_eq!(finalized.load(Ordering::SeqCst), 0);
}

#[test]
fn test_finalize_runs_once_per_unreachable_instance() {
    let finalized = Arc::new(AtomicUsize::new(0));
    let (mut vm, _) = file_vm(finalized.clone());
    let source = format!("{FILE_CLASS}for (i in 1..3) File.open(\"f\" + i.toString)\nvar kept = File.open(\"kept\")");
    vm.interpret("main", &source).unwrap();

    vm.collect_garbage();
    assert_eq!(finalized.load(Ordering::SeqCst), 3);
    vm.collect_garbage();
    assert_eq!(finalized.load(Ordering::SeqCst), 3);

    vm.interpret("main", "kept = null").unwrap();
    vm.collect_garbage();
    assert_eq!(finalized.load(Ordering::SeqCst), 4);
}

#[test]
fn test_allocator_failure_before_instance() {
    let finalized = Arc::new(AtomicUsize::new(0));
    let (mut vm, _) = file_vm(finalized.clone());
    let source = format!("{FILE_CLASS}File.open(\"\")");
    let err = vm.interpret("main", &source).unwrap_err();
    assert_eq!(err.to_string(), "path must not be empty");
    vm.collect_garbage();
    assert_eq!(finalized.load(Ordering::SeqCst), 0);
}

#[test]
fn test_allocator_must_create_instance() {
    let (mut vm, _) = Harness::new()
        .class(
            "Lazy",
            ForeignClassMethods {
                allocate: Arc::new(|_vm: &mut Vm| Ok(())),
                finalize: None,
            },
        )
        .build();
    let err = vm
        .interpret("main", "foreign class Lazy {\n  construct new() {}\n}\nLazy.new()")
        .unwrap_err();
    assert_eq!(err.to_string(), "Foreign class allocator for 'Lazy' did not create an instance.");
}

// ===== 分配器重入 =====

fn counting_finalizer(count: Arc<AtomicUsize>) -> Option<finch_core::Finalizer> {
    Some(Arc::new(move |_data: &mut (dyn std::any::Any + Send)| {
        count.fetch_add(1, Ordering::SeqCst);
    }))
}

/// 在分配器窗口中调用 `Maker.make()`，调用前后保留槽位 0 的类
fn call_maker(vm: &mut Vm) -> Result<(), ForeignError> {
    let class = vm.get_slot_handle(0)?;
    let make = vm.make_call_handle("make()")?;
    vm.ensure_slots(2);
    vm.get_variable("main", "Maker", 0)?;
    vm.call(&make).map_err(|err| ForeignError(err.to_string()))?;
    vm.set_slot_handle(1, &class)?;
    vm.release_handle(make);
    vm.release_handle(class);
    Ok(())
}

#[test]
fn test_failed_allocator_after_nested_construct_is_not_finalized() {
    let outer_finalized = Arc::new(AtomicUsize::new(0));
    let inner_finalized = Arc::new(AtomicUsize::new(0));
    let (mut vm, _) = Harness::new()
        .class(
            "Inner",
            ForeignClassMethods {
                allocate: Arc::new(|vm: &mut Vm| {
                    vm.set_slot_new_foreign(0, 0, 1u8)?;
                    Ok(())
                }),
                finalize: counting_finalizer(inner_finalized.clone()),
            },
        )
        .class(
            "Outer",
            ForeignClassMethods {
                allocate: Arc::new(|vm: &mut Vm| {
                    call_maker(vm)?;
                    vm.set_slot_new_foreign(0, 1, 2u8)?;
                    Err("outer gave up".into())
                }),
                finalize: counting_finalizer(outer_finalized.clone()),
            },
        )
        .build();
    let source = "foreign class Inner {\n  construct new() {}\n}\nclass Maker {\n  static make() { Inner.new() }\n}\nforeign class Outer {\n  construct new() {}\n}\nOuter.new()";
    let err = vm.interpret("main", source).unwrap_err();
    assert_eq!(err.to_string(), "outer gave up");

    vm.collect_garbage();
    assert_eq!(outer_finalized.load(Ordering::SeqCst), 0);
    assert_eq!(inner_finalized.load(Ordering::SeqCst), 1);
}

#[test]
fn test_foreign_factory_inside_allocator_creates_constructed_instances() {
    let outer_finalized = Arc::new(AtomicUsize::new(0));
    let thing_finalized = Arc::new(AtomicUsize::new(0));
    let (mut vm, _) = Harness::new()
        .class(
            "Thing",
            ForeignClassMethods {
                allocate: Arc::new(|vm: &mut Vm| {
                    vm.set_slot_new_foreign(0, 0, 0u8)?;
                    Ok(())
                }),
                finalize: counting_finalizer(thing_finalized.clone()),
            },
        )
        .method("static Thing.build()", |vm| {
            vm.set_slot_new_foreign(0, 0, 1u8)?;
            Ok(())
        })
        .class(
            "Outer",
            ForeignClassMethods {
                allocate: Arc::new(|vm: &mut Vm| {
                    call_maker(vm)?;
                    vm.set_slot_new_foreign(0, 1, 2u8)?;
                    Ok(())
                }),
                finalize: counting_finalizer(outer_finalized.clone()),
            },
        )
        .build();
    let source = "foreign class Thing {\n  construct new() {}\n  foreign static build()\n}\nclass Maker {\n  static make() {\n    Thing.build()\n    return Thing.build()\n  }\n}\nforeign class Outer {\n  construct new() {}\n}\nOuter.new()";
    vm.interpret("main", source).unwrap();

    vm.collect_garbage();
    assert_eq!(thing_finalized.load(Ordering::SeqCst), 2);
    assert_eq!(outer_finalized.load(Ordering::SeqCst), 1);
}

#[test]
fn test_foreign_type_mismatch() {
    let (mut vm, _) = Harness::new()
        .method("Plain.peek()", |vm| {
            vm.get_slot_foreign::<File>(0)?;
            Ok(())
        })
        .build();
    let err = vm
        .interpret("main", "class Plain {\n  construct new() {}\n  foreign peek()\n}\nPlain.new().peek()")
        .unwrap_err();
    assert!(matches!(err, InterpretError::Runtime(_)));
}
