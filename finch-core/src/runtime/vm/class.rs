//! 类的创建、继承与方法绑定

use super::execution::FrameCtx;
use super::Vm;
use crate::runtime::object::{ClassObj, Method, ObjKind};
use crate::runtime::value::{ObjRef, Value};

/// 类字段数上限（含继承字段）
const MAX_FIELDS: usize = 255;

impl Vm {
    /// 创建类及其元类
    ///
    /// 父类的方法在这里一次性复制到子类，调用时不再沿继承链查找。
    pub(crate) fn new_class(&mut self, name: &str, superclass: Option<ObjRef>, own_fields: usize) -> ObjRef {
        let class_class = self.core.class;
        let mut metaclass = ClassObj::new(format!("{name} metaclass"), Some(class_class), 0);
        metaclass.metaclass = Some(class_class);
        if let Some(class) = self.class_obj(class_class) {
            metaclass.methods = class.methods.clone();
        }
        let metaclass = self.alloc(ObjKind::Class(metaclass));
        self.temp_roots.push(Value::Obj(metaclass));

        let mut class = ClassObj::new(name, superclass, own_fields);
        class.metaclass = Some(metaclass);
        if let Some(parent) = superclass.and_then(|s| self.class_obj(s)) {
            class.num_fields += parent.num_fields;
            class.methods = parent.methods.clone();
        }
        let class = self.alloc(ObjKind::Class(class));
        self.temp_roots.pop();
        class
    }

    /// `Class` / `ForeignClass` 指令：栈 [name, superclass] -> [class]
    pub(crate) fn declare_class(&mut self, ctx: &FrameCtx, own_fields: Option<usize>) -> Result<(), Value> {
        let fiber = ctx.fiber;
        let name = self.peek(fiber, 1);
        let name = self.as_str(name).unwrap_or_default().to_string();
        let superclass = self.peek(fiber, 0);

        let superclass = self.validate_superclass(&name, superclass, own_fields)?;
        let class = self.new_class(&name, Some(superclass), own_fields.unwrap_or(0));
        self.pop(fiber);
        self.pop(fiber);
        self.push(fiber, Value::Obj(class));

        if own_fields.is_none() {
            self.bind_foreign_class(ctx.module, class, &name)?;
        }
        tracing::trace!(target: "finch::vm", class = %name, "class declared");
        Ok(())
    }

    fn validate_superclass(
        &mut self,
        name: &str,
        superclass: Value,
        own_fields: Option<usize>,
    ) -> Result<ObjRef, Value> {
        let parent = match superclass {
            Value::Obj(r) => self.class_obj(r).map(|c| (r, c.num_fields, c.foreign.is_some(), c.name.clone())),
            _ => None,
        };
        let Some((parent, parent_fields, parent_foreign, parent_name)) = parent else {
            let message = format!("Class '{name}' cannot inherit from a non-class object.");
            return Err(self.error_value(message));
        };

        // Object 不在封闭列表中；引导期间尚未创建的内建类暂时指向 Object
        if parent != self.core.object && self.core.sealed().contains(&parent) {
            let message = format!("Class '{name}' cannot inherit from built-in class '{parent_name}'.");
            return Err(self.error_value(message));
        }
        if parent_foreign {
            let message = format!("Class '{name}' cannot inherit from foreign class '{parent_name}'.");
            return Err(self.error_value(message));
        }
        match own_fields {
            Some(own) if parent_fields + own > MAX_FIELDS => {
                let message = format!(
                    "Class '{name}' may not have more than {MAX_FIELDS} fields, including inherited ones."
                );
                Err(self.error_value(message))
            }
            None if parent_fields > 0 => {
                let message = format!("Foreign class '{name}' may not inherit from a class with fields.");
                Err(self.error_value(message))
            }
            _ => Ok(parent),
        }
    }

    /// 把闭包绑定为实例方法或静态方法
    ///
    /// 方法体（以及其中嵌套的块参数）中的字段下标按父类字段数偏移。
    pub(crate) fn bind_method(
        &mut self,
        class: Value,
        symbol: usize,
        method: Value,
        is_static: bool,
    ) -> Result<(), Value> {
        let (Value::Obj(class), Value::Obj(closure)) = (class, method) else {
            return Err(self.error_value("Method must be bound to a class."));
        };
        let Some((superclass, metaclass)) = self.class_obj(class).map(|c| (c.superclass, c.metaclass)) else {
            return Err(self.error_value("Method must be bound to a class."));
        };
        let field_offset = superclass
            .and_then(|s| self.class_obj(s))
            .map_or(0, |s| s.num_fields);
        let target = if is_static { metaclass.unwrap_or(class) } else { class };

        let function = match &self.heap[closure] {
            ObjKind::Closure(c) => c.function,
            _ => return Err(self.error_value("Method must be a function.")),
        };
        self.set_method_owner(function, field_offset, target);

        if let Some(target) = self.class_obj_mut(target) {
            target.bind(symbol, Method::Block(closure));
        }
        Ok(())
    }

    fn set_method_owner(&mut self, function: ObjRef, field_offset: usize, owner: ObjRef) {
        let mut pending = vec![function];
        while let Some(function) = pending.pop() {
            let ObjKind::Function(f) = &mut self.heap[function] else {
                continue;
            };
            f.field_offset = field_offset;
            f.owner_class = Some(owner);
            let constants = f.constants.clone();
            for value in constants.iter() {
                if let Value::Obj(r) = value {
                    if matches!(self.heap[*r], ObjKind::Function(_)) {
                        pending.push(*r);
                    }
                }
            }
        }
    }

    /// `Construct` 指令：用类创建新实例
    pub(crate) fn construct_instance(&mut self, class: Value) -> Result<Value, Value> {
        let Value::Obj(class) = class else {
            return Err(self.error_value("Only classes can be constructed."));
        };
        let Some(num_fields) = self.class_obj(class).map(|c| c.num_fields) else {
            return Err(self.error_value("Only classes can be constructed."));
        };
        let instance = self.alloc(ObjKind::Instance {
            class,
            fields: vec![Value::Null; num_fields],
        });
        Ok(Value::Obj(instance))
    }

    /// 沿继承链判断 `class` 是否为 `ancestor` 或其子类
    pub(crate) fn is_subclass(&self, class: ObjRef, ancestor: ObjRef) -> bool {
        let mut current = Some(class);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = self.class_obj(c).and_then(|c| c.superclass);
        }
        false
    }
}
