//! 带标记-清除回收的对象堆
//!
//! 对象存放在按索引寻址的槽位中，空闲槽位通过空闲列表复用；
//! 每次回收槽位时代数加一，使旧的 `ObjRef` 失效。

use crate::runtime::object::{Finalizer, HeapObject, ObjKind};
use crate::runtime::value::ObjRef;
use finch_config::HeapConfig;
use std::ops::{Index, IndexMut};

/// 堆访问错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("object reference {0:?} has been reclaimed")]
    Reclaimed(ObjRef),
    #[error("object reference {0:?} is out of bounds")]
    OutOfBounds(ObjRef),
}

/// 分配/释放时的记账回调：(旧大小, 新大小)
pub type ReallocateFn = Box<dyn FnMut(usize, usize) + Send>;

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    object: Option<HeapObject>,
    /// 分配或上次回收时估算的大小
    size: usize,
}

/// 一次回收的统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectStats {
    pub bytes_before: usize,
    pub bytes_after: usize,
    pub objects_freed: usize,
    pub next_gc: usize,
}

pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live_objects: usize,
    bytes_allocated: usize,
    next_gc: usize,
    config: HeapConfig,
    reallocate: Option<ReallocateFn>,
    /// 标记阶段使用的显式栈（避免递归）
    gray: Vec<ObjRef>,
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("live_objects", &self.live_objects)
            .field("bytes_allocated", &self.bytes_allocated)
            .field("next_gc", &self.next_gc)
            .finish_non_exhaustive()
    }
}

impl Heap {
    pub fn new(config: HeapConfig, reallocate: Option<ReallocateFn>) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live_objects: 0,
            bytes_allocated: 0,
            next_gc: config.initial_heap_size.max(config.min_heap_size),
            config,
            reallocate,
            gray: Vec::new(),
        }
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn next_gc(&self) -> usize {
        self.next_gc
    }

    pub fn live_objects(&self) -> usize {
        self.live_objects
    }

    /// 分配前是否需要先回收
    pub fn should_collect(&self, pending: usize) -> bool {
        self.config.stress || self.bytes_allocated + pending > self.next_gc
    }

    /// 分配对象（不会触发回收，由 VM 在分配前决定是否回收）
    pub fn alloc(&mut self, kind: ObjKind) -> ObjRef {
        let size = kind.memory_size();
        let object = HeapObject {
            marked: false,
            kind,
        };

        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.object = Some(object);
                slot.size = size;
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    object: Some(object),
                    size,
                });
                (self.slots.len() - 1) as u32
            }
        };

        self.live_objects += 1;
        self.bytes_allocated += size;
        if let Some(reallocate) = self.reallocate.as_mut() {
            reallocate(0, size);
        }
        ObjRef::new(index, self.slots[index as usize].generation)
    }

    pub fn get(&self, r: ObjRef) -> Result<&HeapObject, HeapError> {
        let slot = self.slots.get(r.index()).ok_or(HeapError::OutOfBounds(r))?;
        match &slot.object {
            Some(object) if slot.generation == r.generation => Ok(object),
            _ => Err(HeapError::Reclaimed(r)),
        }
    }

    pub fn get_mut(&mut self, r: ObjRef) -> Result<&mut HeapObject, HeapError> {
        let slot = self.slots.get_mut(r.index()).ok_or(HeapError::OutOfBounds(r))?;
        match &mut slot.object {
            Some(object) if slot.generation == r.generation => Ok(object),
            _ => Err(HeapError::Reclaimed(r)),
        }
    }

    pub fn is_live(&self, r: ObjRef) -> bool {
        self.get(r).is_ok()
    }

    // ==================== 回收 ====================

    /// 从根出发标记，清除其余对象，返回统计
    ///
    /// `pending` 是触发本次回收的待分配大小（0% 增长时用于计算下一个阈值）。
    pub fn collect(&mut self, roots: impl IntoIterator<Item = ObjRef>, pending: usize) -> CollectStats {
        let bytes_before = self.bytes_allocated;

        self.gray.extend(roots);
        self.mark();
        let objects_freed = self.sweep();

        self.next_gc = self.compute_next_gc(pending);
        CollectStats {
            bytes_before,
            bytes_after: self.bytes_allocated,
            objects_freed,
            next_gc: self.next_gc,
        }
    }

    fn compute_next_gc(&self, pending: usize) -> usize {
        let live = self.bytes_allocated;
        let target = if self.config.heap_growth_percent == 0 {
            live + pending
        } else {
            live.saturating_mul(100 + self.config.heap_growth_percent) / 100
        };
        target.max(self.config.min_heap_size)
    }

    fn mark(&mut self) {
        let mut children = Vec::new();
        while let Some(r) = self.gray.pop() {
            let Ok(object) = self.get_mut(r) else {
                continue;
            };
            if object.marked {
                continue;
            }
            object.marked = true;
            object.kind.trace(&mut children);
            self.gray.append(&mut children);
        }
    }

    /// 两遍清除：先收集外部对象的终结器（此时它们的类可能同样不可达），
    /// 再释放对象并在取出的私有数据上运行终结器
    fn sweep(&mut self) -> usize {
        let mut finalizers: Vec<(usize, Finalizer)> = Vec::new();
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(object) = &slot.object else { continue };
            if object.marked {
                continue;
            }
            if let ObjKind::Foreign(foreign) = &object.kind {
                if !foreign.constructed {
                    continue;
                }
                let finalize = self
                    .slots
                    .get(foreign.class.index())
                    .and_then(|class_slot| class_slot.object.as_ref())
                    .and_then(|class| match &class.kind {
                        ObjKind::Class(class) => class.foreign.as_ref(),
                        _ => None,
                    })
                    .and_then(|methods| methods.finalize.clone());
                if let Some(finalize) = finalize {
                    finalizers.push((index, finalize));
                }
            }
        }

        let mut freed = 0;
        let mut live_bytes = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(object) = slot.object.as_mut() else { continue };
            if object.marked {
                object.marked = false;
                slot.size = object.kind.memory_size();
                live_bytes += slot.size;
                continue;
            }

            if let Some(mut object) = slot.object.take() {
                if let ObjKind::Foreign(foreign) = &mut object.kind {
                    if let Some(position) = finalizers.iter().position(|(i, _)| *i == index) {
                        let (_, finalize) = finalizers.swap_remove(position);
                        if let Some(data) = foreign.data.as_mut() {
                            finalize(data.as_mut());
                        }
                    }
                }
            }
            slot.generation = slot.generation.wrapping_add(1);
            if let Some(reallocate) = self.reallocate.as_mut() {
                reallocate(slot.size, 0);
            }
            slot.size = 0;
            self.free.push(index as u32);
            freed += 1;
        }

        self.live_objects -= freed;
        self.bytes_allocated = live_bytes;
        freed
    }
}

impl Index<ObjRef> for Heap {
    type Output = ObjKind;

    /// 过期引用属于内部不变量被破坏
    fn index(&self, r: ObjRef) -> &ObjKind {
        match self.get(r) {
            Ok(object) => &object.kind,
            Err(err) => panic!("heap invariant violated: {err}"),
        }
    }
}

impl IndexMut<ObjRef> for Heap {
    fn index_mut(&mut self, r: ObjRef) -> &mut ObjKind {
        match self.get_mut(r) {
            Ok(object) => &mut object.kind,
            Err(err) => panic!("heap invariant violated: {err}"),
        }
    }
}
