//! String
//!
//! 下标与迭代器都按 UTF-8 字节计。落在字符中间的下标取出的是
//! 单个字节（按有损方式解码）。

use super::{bind, bind_static, error, index_arg, int_arg, prim_try, range_arg, string_arg, MAX_SEQUENCE_LEN};
use crate::runtime::object::{ObjKind, PrimResult};
use crate::runtime::value::{ObjRef, Value};
use crate::runtime::vm::Vm;

pub(super) fn register(vm: &mut Vm, class: ObjRef) {
    bind_static(vm, class, "fromCodePoint(_)", string_from_code_point);
    bind_static(vm, class, "fromByte(_)", string_from_byte);

    bind(vm, class, "+(_)", string_plus);
    bind(vm, class, "*(_)", string_repeat);
    bind(vm, class, "[_]", string_subscript);
    bind(vm, class, "byteAt_(_)", string_byte_at);
    bind(vm, class, "byteCount_", string_byte_count);
    bind(vm, class, "count", string_count);
    bind(vm, class, "contains(_)", string_contains);
    bind(vm, class, "startsWith(_)", string_starts_with);
    bind(vm, class, "endsWith(_)", string_ends_with);
    bind(vm, class, "indexOf(_)", string_index_of);
    bind(vm, class, "indexOf(_,_)", string_index_of_from);
    bind(vm, class, "iterate(_)", string_iterate);
    bind(vm, class, "iteratorValue(_)", string_iterator_value);
    bind(vm, class, "split(_)", string_split);
    bind(vm, class, "replace(_,_)", string_replace);
    bind(vm, class, "trim()", string_trim);
    bind(vm, class, "trimStart()", string_trim_start);
    bind(vm, class, "trimEnd()", string_trim_end);
    bind(vm, class, "toString", string_to_string);
}

fn receiver(vm: &Vm, args: &[Value]) -> String {
    vm.as_str(args[0]).unwrap_or_default().to_string()
}

/// 从字节下标处取出一个字符
fn char_at(s: &str, index: usize) -> String {
    if s.is_char_boundary(index) {
        s[index..].chars().next().map(String::from).unwrap_or_default()
    } else {
        String::from_utf8_lossy(&s.as_bytes()[index..index + 1]).into_owned()
    }
}

fn string(vm: &mut Vm, text: impl Into<String>) -> PrimResult {
    PrimResult::Value(vm.new_string(text))
}

// ==================== 静态 ====================

fn string_from_code_point(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let code = prim_try!(int_arg(vm, args[1], "Code point"));
    if code < 0.0 {
        return error(vm, "Code point cannot be negative.");
    }
    if code > 0x10ffff as f64 {
        return error(vm, "Code point cannot be greater than 0x10ffff.");
    }
    match char::from_u32(code as u32) {
        Some(c) => string(vm, c.to_string()),
        None => error(vm, "Code point cannot be a surrogate."),
    }
}

fn string_from_byte(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let byte = prim_try!(int_arg(vm, args[1], "Byte"));
    if !(0.0..=255.0).contains(&byte) {
        return error(vm, "Byte must be between 0 and 255.");
    }
    string(vm, String::from_utf8_lossy(&[byte as u8]).into_owned())
}

// ==================== 运算符 ====================

fn string_plus(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let right = prim_try!(string_arg(vm, args[1], "Right operand"));
    let mut text = receiver(vm, args);
    text.push_str(&right);
    string(vm, text)
}

fn string_repeat(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let count = match args[1] {
        Value::Num(n) if n >= 0.0 && n.trunc() == n => n as usize,
        _ => return error(vm, "Count must be a non-negative integer."),
    };
    let text = receiver(vm, args);
    if text.len().checked_mul(count).map_or(true, |len| len > MAX_SEQUENCE_LEN) {
        return error(vm, "String is too large.");
    }
    let text = text.repeat(count);
    string(vm, text)
}

fn string_subscript(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let text = receiver(vm, args);
    let bytes = text.as_bytes();
    if let Value::Num(_) = args[1] {
        let index = prim_try!(index_arg(vm, args[1], bytes.len(), "Subscript"));
        return string(vm, char_at(&text, index));
    }

    let Some((start, len, descending)) = prim_try!(range_arg(vm, args[1], bytes.len())) else {
        return error(vm, "Subscript must be a number or a range.");
    };
    let slice: Vec<u8> = if descending {
        (0..len).map(|i| bytes[start - i]).collect()
    } else {
        bytes[start..start + len].to_vec()
    };
    string(vm, String::from_utf8_lossy(&slice).into_owned())
}

fn string_byte_at(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let text = receiver(vm, args);
    let index = prim_try!(index_arg(vm, args[1], text.len(), "Index"));
    PrimResult::Value(Value::Num(text.as_bytes()[index] as f64))
}

fn string_byte_count(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let len = vm.as_str(args[0]).map_or(0, str::len);
    PrimResult::Value(Value::Num(len as f64))
}

fn string_count(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let count = vm.as_str(args[0]).map_or(0, |s| s.chars().count());
    PrimResult::Value(Value::Num(count as f64))
}

// ==================== 查找 ====================

fn string_contains(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let search = prim_try!(string_arg(vm, args[1], "Argument"));
    PrimResult::Value(Value::Bool(receiver(vm, args).contains(&search)))
}

fn string_starts_with(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let prefix = prim_try!(string_arg(vm, args[1], "Argument"));
    PrimResult::Value(Value::Bool(receiver(vm, args).starts_with(&prefix)))
}

fn string_ends_with(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let suffix = prim_try!(string_arg(vm, args[1], "Argument"));
    PrimResult::Value(Value::Bool(receiver(vm, args).ends_with(&suffix)))
}

fn index_of(haystack: &[u8], needle: &[u8], start: usize) -> f64 {
    if start > haystack.len() {
        return -1.0;
    }
    if needle.is_empty() {
        return start as f64;
    }
    haystack[start..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map_or(-1.0, |i| (start + i) as f64)
}

fn string_index_of(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let search = prim_try!(string_arg(vm, args[1], "Argument"));
    let text = receiver(vm, args);
    PrimResult::Value(Value::Num(index_of(text.as_bytes(), search.as_bytes(), 0)))
}

fn string_index_of_from(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let search = prim_try!(string_arg(vm, args[1], "Argument"));
    let text = receiver(vm, args);
    let start = prim_try!(int_arg(vm, args[2], "Start"));
    let start = if start < 0.0 { start + text.len() as f64 } else { start };
    if start < 0.0 {
        return error(vm, "Start out of bounds.");
    }
    PrimResult::Value(Value::Num(index_of(text.as_bytes(), search.as_bytes(), start as usize)))
}

// ==================== 迭代 ====================

/// 迭代器是下一个字符起始字节的下标
fn string_iterate(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let text = receiver(vm, args);
    if args[1].is_null() {
        return PrimResult::Value(if text.is_empty() { Value::FALSE } else { Value::Num(0.0) });
    }
    let index = prim_try!(int_arg(vm, args[1], "Iterator"));
    if index < 0.0 || index as usize >= text.len() {
        return PrimResult::Value(Value::FALSE);
    }

    let mut next = index as usize + 1;
    while next < text.len() && !text.is_char_boundary(next) {
        next += 1;
    }
    PrimResult::Value(if next >= text.len() { Value::FALSE } else { Value::Num(next as f64) })
}

fn string_iterator_value(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let text = receiver(vm, args);
    let index = prim_try!(index_arg(vm, args[1], text.len(), "Iterator"));
    string(vm, char_at(&text, index))
}

// ==================== 变换 ====================

fn string_split(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let delimiter = prim_try!(string_arg(vm, args[1], "Delimiter"));
    if delimiter.is_empty() {
        return error(vm, "Delimiter cannot be empty.");
    }
    let text = receiver(vm, args);
    let parts: Vec<String> = text.split(delimiter.as_str()).map(str::to_string).collect();
    PrimResult::Value(new_string_list(vm, parts))
}

/// 逐个创建字符串并放入已挂在临时根上的列表
pub(super) fn new_string_list(vm: &mut Vm, items: Vec<String>) -> Value {
    let list = vm.new_list(Vec::with_capacity(items.len()));
    vm.temp_roots.push(list);
    for item in items {
        let value = vm.new_string(item);
        if let Value::Obj(r) = list {
            if let ObjKind::List(values) = &mut vm.heap[r] {
                values.push(value);
            }
        }
    }
    vm.temp_roots.pop();
    list
}

fn string_replace(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let from = prim_try!(string_arg(vm, args[1], "From"));
    let to = prim_try!(string_arg(vm, args[2], "To"));
    if from.is_empty() {
        return error(vm, "From must be a non-empty string.");
    }
    let text = receiver(vm, args).replace(&from, &to);
    string(vm, text)
}

fn string_trim(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let text = receiver(vm, args).trim().to_string();
    string(vm, text)
}

fn string_trim_start(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let text = receiver(vm, args).trim_start().to_string();
    string(vm, text)
}

fn string_trim_end(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let text = receiver(vm, args).trim_end().to_string();
    string(vm, text)
}

fn string_to_string(_vm: &mut Vm, args: &[Value]) -> PrimResult {
    PrimResult::Value(args[0])
}
