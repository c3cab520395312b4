//! 垃圾回收测试
//!
//! 压力模式下每次分配前都回收，用于检查根集合是否完整

mod common;
use common::{capture_logs, Harness};
use finch_core::{Configuration, HeapConfig, Vm};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn stress() -> HeapConfig {
    HeapConfig {
        stress: true,
        ..HeapConfig::default()
    }
}

fn run_stressed(source: &str) -> String {
    let (mut vm, shared) = Harness::new().heap(stress()).build();
    if let Err(err) = vm.interpret("main", source) {
        panic!("script failed under stress: {err}");
    }
    let output = shared.lock().unwrap().output.clone();
    output
}

#[test]
fn test_collections_under_stress() {
    let out = run_stressed(
        "var list = []\nfor (i in 0...50) list.add(\"item\" + i.toString)\nvar map = {}\nfor (s in list) map[s] = [s]\nSystem.print(list.count)\nSystem.print(map[\"item49\"][0])",
    );
    assert_eq!(out, "50\nitem49\n");
}

#[test]
fn test_closures_and_fibers_under_stress() {
    let out = run_stressed(
        "var make = Fn.new {|n|\n  var acc = []\n  return Fn.new {\n    acc.add(n)\n    return acc.count\n  }\n}\nvar f = make.call(\"x\")\nf.call()\nvar gen = Fiber.new {\n  for (i in 1..3) Fiber.yield(\"v\" + i.toString)\n}\nvar parts = []\nwhile (true) {\n  var v = gen.call()\n  if (gen.isDone) break\n  parts.add(v)\n}\nSystem.print(f.call())\nSystem.print(parts.join(\",\"))",
    );
    assert_eq!(out, "2\nv1,v2,v3\n");
}

#[test]
fn test_classes_and_fields_under_stress() {
    let out = run_stressed(
        "class Node {\n  construct new(value, next) {\n    _value = value\n    _next = next\n  }\n  value { _value }\n  next { _next }\n}\nvar head = null\nfor (i in 1..20) head = Node.new(\"n\" + i.toString, head)\nvar count = 0\nwhile (head != null) {\n  count = count + 1\n  head = head.next\n}\nSystem.print(count)",
    );
    assert_eq!(out, "20\n");
}

#[test]
fn test_imported_module_under_stress() {
    let (mut vm, shared) = Harness::new()
        .heap(stress())
        .module("lib", "var Names = [\"a\", \"b\"].map {|s| s + \"!\" }.toList")
        .build();
    vm.interpret("main", "import \"lib\" for Names\nSystem.print(Names)").unwrap();
    assert_eq!(shared.lock().unwrap().output, "[a!, b!]\n");
}

#[test]
fn test_unreachable_objects_are_reclaimed() {
    let mut vm = Vm::new(Configuration::default());
    vm.collect_garbage();
    let baseline = vm.heap().live_objects();

    vm.interpret("main", "for (i in 0...100) [i, i.toString]").unwrap();
    assert!(vm.heap().live_objects() > baseline);
    vm.collect_garbage();
    // 入口模块和它的顶层函数会保留下来
    assert!(vm.heap().live_objects() <= baseline + 8);
}

#[test]
fn test_threshold_grows_after_collection() {
    let config = Configuration {
        heap: HeapConfig {
            initial_heap_size: 4096,
            min_heap_size: 4096,
            heap_growth_percent: 100,
            stress: false,
        },
        ..Configuration::default()
    };
    let mut vm = Vm::new(config);
    vm.interpret("main", "var keep = []\nfor (i in 0...200) keep.add(i.toString)").unwrap();
    let stats = vm.collect_garbage();
    assert!(stats.next_gc >= 4096);
    assert!(stats.next_gc >= stats.bytes_after);
}

#[test]
fn test_reallocate_callback_sees_allocations_and_frees() {
    let allocated = Arc::new(AtomicUsize::new(0));
    let freed = Arc::new(AtomicUsize::new(0));
    let (a, f) = (allocated.clone(), freed.clone());
    let config = Configuration::default().with_reallocate_fn(move |old, new| {
        if old == 0 {
            a.fetch_add(new, Ordering::SeqCst);
        } else if new == 0 {
            f.fetch_add(old, Ordering::SeqCst);
        }
    });
    let mut vm = Vm::new(config);
    vm.interpret("main", "for (i in 0...10) \"garbage\" + i.toString").unwrap();
    vm.collect_garbage();
    assert!(allocated.load(Ordering::SeqCst) > 0);
    assert!(freed.load(Ordering::SeqCst) > 0);
    assert!(freed.load(Ordering::SeqCst) <= allocated.load(Ordering::SeqCst));
}

#[test]
fn test_collection_is_logged() {
    let (mut vm, _) = Harness::new().build();
    vm.interpret("main", "var l = [1, 2, 3]").unwrap();
    let (stats, logs) = capture_logs(|| vm.collect_garbage());
    assert!(logs.contains("finch::gc"), "logs: {logs}");
    assert!(logs.contains("collected"));
    assert!(logs.contains(&format!("after={}", stats.bytes_after)));
}
