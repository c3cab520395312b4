//! 槽位 API
//!
//! 宿主与虚拟机之间通过一组编号槽位交换值。槽位窗口是某个纤程栈上的
//! 一段连续区域：外部方法执行期间窗口覆盖接收者和参数；
//! 在外部方法之外，`ensure_slots` 在专用的 API 纤程上建立窗口。

use super::handle::Handle;
use super::Vm;
use crate::runtime::error::HostContractViolation;
use crate::runtime::object::{FiberObj, ForeignObj, ObjKind};
use crate::runtime::value::{ObjRef, Value};
use std::any::Any;

/// 纤程栈上的槽位区间
#[derive(Debug, Clone, Copy)]
pub(crate) struct SlotWindow {
    pub fiber: ObjRef,
    pub base: usize,
    pub len: usize,
    /// 外部类分配器的窗口：槽位 0 中新建的实例要等分配器成功返回才算构造完成
    pub allocating: bool,
}

/// 槽位中值的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotType {
    Bool,
    Num,
    Foreign,
    List,
    Map,
    Null,
    String,
    Unknown,
}

/// 可以从槽位读出的宿主类型
pub trait FromSlot: Sized {
    fn from_slot(vm: &mut Vm, slot: usize) -> Result<Self, HostContractViolation>;
}

/// 可以写入槽位的宿主类型
pub trait IntoSlot {
    fn into_slot(self, vm: &mut Vm, slot: usize) -> Result<(), HostContractViolation>;
}

type SlotResult<T> = Result<T, HostContractViolation>;

fn kind_name(vm: &Vm, value: Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Num(_) => "Num",
        Value::Obj(r) => vm.heap[r].type_name(),
    }
}

impl Vm {
    // ==================== 窗口 ====================

    fn window(&self) -> SlotResult<SlotWindow> {
        self.windows.last().copied().ok_or(HostContractViolation::NoSlotWindow)
    }

    /// 槽位下标 -> 纤程栈下标
    fn slot_position(&self, slot: usize) -> SlotResult<(ObjRef, usize)> {
        let window = self.window()?;
        if slot >= window.len {
            return Err(HostContractViolation::SlotOutOfRange {
                index: slot,
                count: window.len,
            });
        }
        Ok((window.fiber, window.base + slot))
    }

    /// 保证当前窗口至少有 `count` 个槽位；新槽位为 null
    ///
    /// 没有活动窗口时在 API 纤程上建立一个。
    pub fn ensure_slots(&mut self, count: usize) {
        if self.windows.is_empty() {
            let fiber = match self.api_fiber {
                Some(fiber) => fiber,
                None => {
                    let fiber = self.alloc(ObjKind::Fiber(Box::new(FiberObj::empty())));
                    self.api_fiber = Some(fiber);
                    fiber
                }
            };
            self.fiber_mut(fiber).stack.clear();
            self.windows.push(SlotWindow {
                fiber,
                base: 0,
                len: 0,
                allocating: false,
            });
        }

        let Some(window) = self.windows.last_mut() else {
            return;
        };
        if window.len >= count {
            return;
        }
        window.len = count;
        let (fiber, end) = (window.fiber, window.base + count);
        let stack = &mut self.fiber_mut(fiber).stack;
        if stack.len() < end {
            stack.resize(end, Value::Null);
        }
    }

    pub fn slot_count(&self) -> usize {
        self.windows.last().map_or(0, |w| w.len)
    }

    pub(crate) fn slot_value(&self, slot: usize) -> SlotResult<Value> {
        let (fiber, position) = self.slot_position(slot)?;
        Ok(self.fiber_ref(fiber).stack[position])
    }

    pub(crate) fn set_slot_value(&mut self, slot: usize, value: Value) -> SlotResult<()> {
        let (fiber, position) = self.slot_position(slot)?;
        self.fiber_mut(fiber).stack[position] = value;
        Ok(())
    }

    pub fn slot_type(&self, slot: usize) -> SlotResult<SlotType> {
        let value = self.slot_value(slot)?;
        Ok(match value {
            Value::Null => SlotType::Null,
            Value::Bool(_) => SlotType::Bool,
            Value::Num(_) => SlotType::Num,
            Value::Obj(r) => match &self.heap[r] {
                ObjKind::String(_) => SlotType::String,
                ObjKind::List(_) => SlotType::List,
                ObjKind::Map(_) => SlotType::Map,
                ObjKind::Foreign(_) => SlotType::Foreign,
                _ => SlotType::Unknown,
            },
        })
    }

    fn mismatch(&self, slot: usize, expected: &'static str, found: Value) -> HostContractViolation {
        HostContractViolation::TypeMismatch {
            index: slot,
            expected,
            found: kind_name(self, found),
        }
    }

    // ==================== 泛型读写 ====================

    pub fn get_slot<T: FromSlot>(&mut self, slot: usize) -> SlotResult<T> {
        T::from_slot(self, slot)
    }

    pub fn set_slot<T: IntoSlot>(&mut self, slot: usize, value: T) -> SlotResult<()> {
        value.into_slot(self, slot)
    }

    // ==================== 标量 ====================

    pub fn get_slot_bool(&self, slot: usize) -> SlotResult<bool> {
        match self.slot_value(slot)? {
            Value::Bool(b) => Ok(b),
            other => Err(self.mismatch(slot, "Bool", other)),
        }
    }

    pub fn set_slot_bool(&mut self, slot: usize, value: bool) -> SlotResult<()> {
        self.set_slot_value(slot, Value::Bool(value))
    }

    pub fn get_slot_double(&self, slot: usize) -> SlotResult<f64> {
        match self.slot_value(slot)? {
            Value::Num(n) => Ok(n),
            other => Err(self.mismatch(slot, "Num", other)),
        }
    }

    pub fn set_slot_double(&mut self, slot: usize, value: f64) -> SlotResult<()> {
        self.set_slot_value(slot, Value::Num(value))
    }

    pub fn set_slot_null(&mut self, slot: usize) -> SlotResult<()> {
        self.set_slot_value(slot, Value::Null)
    }

    // ==================== 字符串 ====================

    pub fn get_slot_string(&self, slot: usize) -> SlotResult<String> {
        let value = self.slot_value(slot)?;
        self.as_str(value)
            .map(str::to_string)
            .ok_or_else(|| self.mismatch(slot, "String", value))
    }

    pub fn set_slot_string(&mut self, slot: usize, text: &str) -> SlotResult<()> {
        self.slot_position(slot)?;
        let value = self.new_string(text);
        self.set_slot_value(slot, value)
    }

    pub fn get_slot_bytes(&self, slot: usize) -> SlotResult<Vec<u8>> {
        let value = self.slot_value(slot)?;
        self.as_str(value)
            .map(|s| s.as_bytes().to_vec())
            .ok_or_else(|| self.mismatch(slot, "String", value))
    }

    /// 字符串以 UTF-8 存储，不接受无效字节序列
    pub fn set_slot_bytes(&mut self, slot: usize, bytes: &[u8]) -> SlotResult<()> {
        let text = std::str::from_utf8(bytes).map_err(|_| HostContractViolation::InvalidUtf8)?;
        self.set_slot_string(slot, text)
    }

    // ==================== List ====================

    pub fn set_slot_new_list(&mut self, slot: usize) -> SlotResult<()> {
        self.slot_position(slot)?;
        let list = self.new_list(Vec::new());
        self.set_slot_value(slot, list)
    }

    fn slot_list(&self, slot: usize) -> SlotResult<ObjRef> {
        let value = self.slot_value(slot)?;
        match value {
            Value::Obj(r) if matches!(self.heap[r], ObjKind::List(_)) => Ok(r),
            other => Err(self.mismatch(slot, "List", other)),
        }
    }

    fn list_items(&self, list: ObjRef) -> &Vec<Value> {
        match &self.heap[list] {
            ObjKind::List(items) => items,
            _ => unreachable!("slot_list checked the kind"),
        }
    }

    fn list_items_mut(&mut self, list: ObjRef) -> &mut Vec<Value> {
        match &mut self.heap[list] {
            ObjKind::List(items) => items,
            _ => unreachable!("slot_list checked the kind"),
        }
    }

    /// 负下标从末尾计数
    fn list_index(index: i64, count: usize) -> SlotResult<usize> {
        let resolved = if index < 0 { count as i64 + index } else { index };
        if resolved < 0 || resolved >= count as i64 {
            return Err(HostContractViolation::IndexOutOfBounds { index, count });
        }
        Ok(resolved as usize)
    }

    pub fn get_list_count(&self, slot: usize) -> SlotResult<usize> {
        let list = self.slot_list(slot)?;
        Ok(self.list_items(list).len())
    }

    pub fn get_list_element(&mut self, list_slot: usize, index: i64, element_slot: usize) -> SlotResult<()> {
        let list = self.slot_list(list_slot)?;
        let items = self.list_items(list);
        let value = items[Self::list_index(index, items.len())?];
        self.set_slot_value(element_slot, value)
    }

    pub fn set_list_element(&mut self, list_slot: usize, index: i64, element_slot: usize) -> SlotResult<()> {
        let list = self.slot_list(list_slot)?;
        let value = self.slot_value(element_slot)?;
        let position = Self::list_index(index, self.list_items(list).len())?;
        self.list_items_mut(list)[position] = value;
        Ok(())
    }

    /// 在 `index` 前插入；-1 表示追加到末尾
    pub fn insert_in_list(&mut self, list_slot: usize, index: i64, element_slot: usize) -> SlotResult<()> {
        let list = self.slot_list(list_slot)?;
        let value = self.slot_value(element_slot)?;
        let count = self.list_items(list).len();
        let position = if index < 0 { count as i64 + 1 + index } else { index };
        if position < 0 || position > count as i64 {
            return Err(HostContractViolation::IndexOutOfBounds { index, count });
        }
        self.list_items_mut(list).insert(position as usize, value);
        Ok(())
    }

    // ==================== Map ====================

    pub fn set_slot_new_map(&mut self, slot: usize) -> SlotResult<()> {
        self.slot_position(slot)?;
        let map = Value::Obj(self.alloc(ObjKind::Map(Default::default())));
        self.set_slot_value(slot, map)
    }

    fn slot_map(&self, slot: usize) -> SlotResult<ObjRef> {
        let value = self.slot_value(slot)?;
        match value {
            Value::Obj(r) if matches!(self.heap[r], ObjKind::Map(_)) => Ok(r),
            other => Err(self.mismatch(slot, "Map", other)),
        }
    }

    fn slot_key(&self, slot: usize) -> SlotResult<(crate::runtime::object::MapKey, Value)> {
        let value = self.slot_value(slot)?;
        let key = self
            .map_key(value)
            .ok_or(HostContractViolation::UnhashableKey { index: slot })?;
        Ok((key, value))
    }

    fn map_obj(&mut self, map: ObjRef) -> &mut crate::runtime::object::MapObj {
        match &mut self.heap[map] {
            ObjKind::Map(map) => map,
            _ => unreachable!("slot_map checked the kind"),
        }
    }

    pub fn get_map_count(&mut self, slot: usize) -> SlotResult<usize> {
        let map = self.slot_map(slot)?;
        Ok(self.map_obj(map).len())
    }

    pub fn get_map_contains_key(&mut self, map_slot: usize, key_slot: usize) -> SlotResult<bool> {
        let map = self.slot_map(map_slot)?;
        let (key, _) = self.slot_key(key_slot)?;
        Ok(self.map_obj(map).contains(&key))
    }

    /// 键不存在时写入 null
    pub fn get_map_value(&mut self, map_slot: usize, key_slot: usize, value_slot: usize) -> SlotResult<()> {
        let map = self.slot_map(map_slot)?;
        let (key, _) = self.slot_key(key_slot)?;
        let value = self.map_obj(map).get(&key).unwrap_or_default();
        self.set_slot_value(value_slot, value)
    }

    pub fn set_map_value(&mut self, map_slot: usize, key_slot: usize, value_slot: usize) -> SlotResult<()> {
        let map = self.slot_map(map_slot)?;
        let (key, key_value) = self.slot_key(key_slot)?;
        let value = self.slot_value(value_slot)?;
        self.map_obj(map).insert(key, key_value, value);
        Ok(())
    }

    /// 删除键；被删除的值（或 null）写入 `removed_slot`
    pub fn remove_map_value(&mut self, map_slot: usize, key_slot: usize, removed_slot: usize) -> SlotResult<()> {
        let map = self.slot_map(map_slot)?;
        let (key, _) = self.slot_key(key_slot)?;
        self.slot_position(removed_slot)?;
        let removed = self.map_obj(map).remove(&key).unwrap_or_default();
        self.set_slot_value(removed_slot, removed)
    }

    // ==================== 外部对象 ====================

    /// 创建 `class_slot` 中外部类的实例，放入 `slot`，返回其私有数据
    ///
    /// 分配器放入自己槽位 0 的实例要等分配器成功返回后才会被终结；
    /// 其余实例（包括分配器内部嵌套调用创建的）立即视为已构造。
    pub fn set_slot_new_foreign<T: Any + Send>(
        &mut self,
        slot: usize,
        class_slot: usize,
        data: T,
    ) -> SlotResult<&mut T> {
        self.slot_position(slot)?;
        let class = match self.slot_value(class_slot)? {
            Value::Obj(r) => r,
            _ => return Err(HostContractViolation::NotAClass { index: class_slot }),
        };
        match self.class_obj(class) {
            Some(c) if c.foreign.is_some() => {}
            Some(c) => return Err(HostContractViolation::NotForeignClass(c.name.clone())),
            None => return Err(HostContractViolation::NotAClass { index: class_slot }),
        }

        let pending = slot == 0 && self.window()?.allocating;
        let object = self.alloc(ObjKind::Foreign(ForeignObj {
            class,
            data: Some(Box::new(data)),
            constructed: !pending,
        }));
        self.set_slot_value(slot, Value::Obj(object))?;
        self.foreign_data(object, slot)
    }

    /// 读取外部对象的私有数据
    pub fn get_slot_foreign<T: Any + Send>(&mut self, slot: usize) -> SlotResult<&mut T> {
        match self.slot_value(slot)? {
            Value::Obj(r) if matches!(self.heap[r], ObjKind::Foreign(_)) => self.foreign_data(r, slot),
            other => Err(self.mismatch(slot, "Foreign", other)),
        }
    }

    fn foreign_data<T: Any + Send>(&mut self, object: ObjRef, slot: usize) -> SlotResult<&mut T> {
        match &mut self.heap[object] {
            ObjKind::Foreign(ForeignObj { data: Some(data), .. }) => data
                .downcast_mut::<T>()
                .ok_or(HostContractViolation::ForeignTypeMismatch { index: slot }),
            _ => Err(HostContractViolation::ForeignTypeMismatch { index: slot }),
        }
    }

    // ==================== 中止 ====================

    /// 以槽位中的值作为错误中止当前纤程
    ///
    /// 外部方法返回后生效。
    pub fn abort_fiber(&mut self, slot: usize) -> SlotResult<()> {
        let value = self.slot_value(slot)?;
        self.pending_abort = Some(value);
        Ok(())
    }
}

// ==================== FromSlot / IntoSlot ====================

impl FromSlot for bool {
    fn from_slot(vm: &mut Vm, slot: usize) -> SlotResult<Self> {
        vm.get_slot_bool(slot)
    }
}

impl FromSlot for f64 {
    fn from_slot(vm: &mut Vm, slot: usize) -> SlotResult<Self> {
        vm.get_slot_double(slot)
    }
}

impl FromSlot for String {
    fn from_slot(vm: &mut Vm, slot: usize) -> SlotResult<Self> {
        vm.get_slot_string(slot)
    }
}

impl FromSlot for Handle {
    fn from_slot(vm: &mut Vm, slot: usize) -> SlotResult<Self> {
        vm.get_slot_handle(slot)
    }
}

impl IntoSlot for bool {
    fn into_slot(self, vm: &mut Vm, slot: usize) -> SlotResult<()> {
        vm.set_slot_bool(slot, self)
    }
}

impl IntoSlot for f64 {
    fn into_slot(self, vm: &mut Vm, slot: usize) -> SlotResult<()> {
        vm.set_slot_double(slot, self)
    }
}

impl IntoSlot for &str {
    fn into_slot(self, vm: &mut Vm, slot: usize) -> SlotResult<()> {
        vm.set_slot_string(slot, self)
    }
}

impl IntoSlot for String {
    fn into_slot(self, vm: &mut Vm, slot: usize) -> SlotResult<()> {
        vm.set_slot_string(slot, &self)
    }
}

impl IntoSlot for () {
    fn into_slot(self, vm: &mut Vm, slot: usize) -> SlotResult<()> {
        vm.set_slot_null(slot)
    }
}

impl IntoSlot for &Handle {
    fn into_slot(self, vm: &mut Vm, slot: usize) -> SlotResult<()> {
        vm.set_slot_handle(slot, self)
    }
}
