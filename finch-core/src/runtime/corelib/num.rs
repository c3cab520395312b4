//! Num

use super::{bind, bind_static, error, num_arg, prim_try, string_arg};
use crate::runtime::object::PrimResult;
use crate::runtime::value::{format_num, ObjRef, Value};
use crate::runtime::vm::Vm;

pub(super) fn register(vm: &mut Vm, class: ObjRef) {
    bind_static(vm, class, "fromString(_)", num_from_string);
    bind_static(vm, class, "pi", num_pi);
    bind_static(vm, class, "nan", num_nan);
    bind_static(vm, class, "infinity", num_infinity);
    bind_static(vm, class, "largest", num_largest);
    bind_static(vm, class, "smallest", num_smallest);

    bind(vm, class, "+(_)", num_add);
    bind(vm, class, "-(_)", num_sub);
    bind(vm, class, "*(_)", num_mul);
    bind(vm, class, "/(_)", num_div);
    bind(vm, class, "%(_)", num_rem);
    bind(vm, class, "<(_)", num_lt);
    bind(vm, class, "<=(_)", num_le);
    bind(vm, class, ">(_)", num_gt);
    bind(vm, class, ">=(_)", num_ge);
    bind(vm, class, "&(_)", num_bit_and);
    bind(vm, class, "|(_)", num_bit_or);
    bind(vm, class, "^(_)", num_bit_xor);
    bind(vm, class, "<<(_)", num_shift_left);
    bind(vm, class, ">>(_)", num_shift_right);
    bind(vm, class, "~", num_bit_not);
    bind(vm, class, "-", num_negate);
    bind(vm, class, "..(_)", num_range_inclusive);
    bind(vm, class, "...(_)", num_range_exclusive);

    bind(vm, class, "abs", num_abs);
    bind(vm, class, "ceil", num_ceil);
    bind(vm, class, "floor", num_floor);
    bind(vm, class, "round", num_round);
    bind(vm, class, "truncate", num_truncate);
    bind(vm, class, "fraction", num_fraction);
    bind(vm, class, "sign", num_sign);
    bind(vm, class, "sqrt", num_sqrt);
    bind(vm, class, "sin", num_sin);
    bind(vm, class, "cos", num_cos);
    bind(vm, class, "tan", num_tan);
    bind(vm, class, "log", num_log);
    bind(vm, class, "exp", num_exp);
    bind(vm, class, "isInteger", num_is_integer);
    bind(vm, class, "isNan", num_is_nan);
    bind(vm, class, "isInfinity", num_is_infinity);
    bind(vm, class, "min(_)", num_min);
    bind(vm, class, "max(_)", num_max);
    bind(vm, class, "clamp(_,_)", num_clamp);
    bind(vm, class, "pow(_)", num_pow);
    bind(vm, class, "toString", num_to_string);
}

fn receiver(args: &[Value]) -> f64 {
    args[0].as_num().unwrap_or_default()
}

fn num(n: f64) -> PrimResult {
    PrimResult::Value(Value::Num(n))
}

// ==================== 静态 ====================

fn num_from_string(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let text = prim_try!(string_arg(vm, args[1], "Argument"));
    let text = text.trim();
    if text.is_empty() {
        return PrimResult::Value(Value::Null);
    }
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok().map(|n| n as f64),
        None => text.parse::<f64>().ok().filter(|n| n.is_finite()),
    };
    PrimResult::Value(parsed.map_or(Value::Null, Value::Num))
}

fn num_pi(_vm: &mut Vm, _args: &[Value]) -> PrimResult {
    num(std::f64::consts::PI)
}

fn num_nan(_vm: &mut Vm, _args: &[Value]) -> PrimResult {
    num(f64::NAN)
}

fn num_infinity(_vm: &mut Vm, _args: &[Value]) -> PrimResult {
    num(f64::INFINITY)
}

fn num_largest(_vm: &mut Vm, _args: &[Value]) -> PrimResult {
    num(f64::MAX)
}

fn num_smallest(_vm: &mut Vm, _args: &[Value]) -> PrimResult {
    num(f64::MIN_POSITIVE)
}

// ==================== 运算符 ====================

macro_rules! binary {
    ($name:ident, |$a:ident, $b:ident| $body:expr) => {
        fn $name(vm: &mut Vm, args: &[Value]) -> PrimResult {
            let $a = receiver(args);
            let $b = prim_try!(num_arg(vm, args[1], "Right operand"));
            PrimResult::Value($body)
        }
    };
}

binary!(num_add, |a, b| Value::Num(a + b));
binary!(num_sub, |a, b| Value::Num(a - b));
binary!(num_mul, |a, b| Value::Num(a * b));
binary!(num_div, |a, b| Value::Num(a / b));
binary!(num_rem, |a, b| Value::Num(a % b));
binary!(num_lt, |a, b| Value::Bool(a < b));
binary!(num_le, |a, b| Value::Bool(a <= b));
binary!(num_gt, |a, b| Value::Bool(a > b));
binary!(num_ge, |a, b| Value::Bool(a >= b));
binary!(num_min, |a, b| Value::Num(a.min(b)));
binary!(num_max, |a, b| Value::Num(a.max(b)));
binary!(num_pow, |a, b| Value::Num(a.powf(b)));

// 位运算按 32 位无符号整数进行
binary!(num_bit_and, |a, b| Value::Num(((a as u32) & (b as u32)) as f64));
binary!(num_bit_or, |a, b| Value::Num(((a as u32) | (b as u32)) as f64));
binary!(num_bit_xor, |a, b| Value::Num(((a as u32) ^ (b as u32)) as f64));
binary!(num_shift_left, |a, b| Value::Num((a as u32).wrapping_shl(b as u32) as f64));
binary!(num_shift_right, |a, b| Value::Num((a as u32).wrapping_shr(b as u32) as f64));

fn num_bit_not(_vm: &mut Vm, args: &[Value]) -> PrimResult {
    num(!(receiver(args) as u32) as f64)
}

fn num_negate(_vm: &mut Vm, args: &[Value]) -> PrimResult {
    num(-receiver(args))
}

fn num_range(vm: &mut Vm, args: &[Value], inclusive: bool) -> PrimResult {
    let from = receiver(args);
    let to = prim_try!(num_arg(vm, args[1], "Right hand side of range"));
    PrimResult::Value(vm.new_range(from, to, inclusive))
}

fn num_range_inclusive(vm: &mut Vm, args: &[Value]) -> PrimResult {
    num_range(vm, args, true)
}

fn num_range_exclusive(vm: &mut Vm, args: &[Value]) -> PrimResult {
    num_range(vm, args, false)
}

fn num_clamp(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let value = receiver(args);
    let min = prim_try!(num_arg(vm, args[1], "Min value"));
    let max = prim_try!(num_arg(vm, args[2], "Max value"));
    num(value.max(min).min(max))
}

// ==================== 一元 ====================

macro_rules! unary {
    ($name:ident, |$n:ident| $body:expr) => {
        fn $name(_vm: &mut Vm, args: &[Value]) -> PrimResult {
            let $n = receiver(args);
            PrimResult::Value($body)
        }
    };
}

unary!(num_abs, |n| Value::Num(n.abs()));
unary!(num_ceil, |n| Value::Num(n.ceil()));
unary!(num_floor, |n| Value::Num(n.floor()));
unary!(num_round, |n| Value::Num(n.round()));
unary!(num_truncate, |n| Value::Num(n.trunc()));
unary!(num_fraction, |n| Value::Num(n.fract()));
unary!(num_sqrt, |n| Value::Num(n.sqrt()));
unary!(num_sin, |n| Value::Num(n.sin()));
unary!(num_cos, |n| Value::Num(n.cos()));
unary!(num_tan, |n| Value::Num(n.tan()));
unary!(num_log, |n| Value::Num(n.ln()));
unary!(num_exp, |n| Value::Num(n.exp()));
unary!(num_is_nan, |n| Value::Bool(n.is_nan()));
unary!(num_is_infinity, |n| Value::Bool(n.is_infinite()));
unary!(num_is_integer, |n| Value::Bool(n.is_finite() && n.trunc() == n));
unary!(num_sign, |n| Value::Num(if n > 0.0 {
    1.0
} else if n < 0.0 {
    -1.0
} else {
    0.0
}));

fn num_to_string(vm: &mut Vm, args: &[Value]) -> PrimResult {
    match args[0] {
        Value::Num(n) => PrimResult::Value(vm.new_string(format_num(n))),
        _ => error(vm, "Receiver must be a number."),
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{output, runtime_error};

    #[test]
    fn test_arithmetic_and_comparison() {
        let out = output("System.print(1 + 2 * 3)\nSystem.print(7 % 3)\nSystem.print(1 / 4)\nSystem.print((-3).abs)\nSystem.print(2 < 3)\nSystem.print(3 >= 4)");
        assert_eq!(out, "7\n1\n0.25\n3\ntrue\nfalse\n");
    }

    #[test]
    fn test_number_formatting() {
        let out = output("System.print(1 / 0)\nSystem.print(-1 / 0)\nSystem.print(0 / 0)\nSystem.print(1e20)\nSystem.print(100)");
        assert_eq!(out, "infinity\n-infinity\nnan\n1e+20\n100\n");
    }

    #[test]
    fn test_math_methods() {
        let out = output("System.print(2.pow(10))\nSystem.print(9.sqrt)\nSystem.print(1.5.floor)\nSystem.print((-1.5).ceil)\nSystem.print(5.clamp(0, 3))\nSystem.print(3.min(4))\nSystem.print(2.5.isInteger)\nSystem.print((-4).sign)");
        assert_eq!(out, "1024\n3\n1\n-1\n3\n3\nfalse\n-1\n");
    }

    #[test]
    fn test_bitwise() {
        let out = output("System.print(6 & 3)\nSystem.print(6 | 3)\nSystem.print(6 ^ 3)\nSystem.print(1 << 4)\nSystem.print(32 >> 2)\nSystem.print(~0)");
        assert_eq!(out, "2\n7\n5\n16\n8\n4294967295\n");
    }

    #[test]
    fn test_from_string() {
        let out = output("System.print(Num.fromString(\"12.5\"))\nSystem.print(Num.fromString(\"nope\"))\nSystem.print(Num.fromString(\" 0x1f \"))");
        assert_eq!(out, "12.5\nnull\n31\n");
    }

    #[test]
    fn test_operand_must_be_number() {
        assert_eq!(runtime_error("1 + \"a\""), "Right operand must be a number.");
        assert_eq!(runtime_error("1 < null"), "Right operand must be a number.");
    }
}
