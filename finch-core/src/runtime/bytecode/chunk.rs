//! 字节码块实现

use super::OpCode;

/// 编译期常量。运行时由 VM 物化为堆对象。
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Num(f64),
    Str(String),
    Fn(Box<FnProto>),
}

/// 编译器产出的函数原型
#[derive(Debug, Clone, PartialEq)]
pub struct FnProto {
    /// 调试名（出现在栈追踪中）
    pub name: String,
    pub arity: usize,
    pub upvalue_count: usize,
    /// 所属模块的规范名
    pub module: String,
    pub chunk: Chunk,
}

/// 字节码块
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    /// 指令字节码
    pub code: Vec<u8>,
    /// 常量池
    pub constants: Vec<Constant>,
    /// 行号信息 (与 code 一一对应)
    pub lines: Vec<usize>,
}

impl Chunk {
    /// 创建新的字节码块
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入单字节指令
    pub fn write_op(&mut self, op: OpCode, line: usize) {
        self.code.push(op as u8);
        self.lines.push(line);
    }

    /// 写入带 u8 操作数的指令
    pub fn write_op_u8(&mut self, op: OpCode, operand: u8, line: usize) {
        self.write_op(op, line);
        self.write_u8(operand, line);
    }

    /// 写入带 u16 操作数的指令
    pub fn write_op_u16(&mut self, op: OpCode, operand: u16, line: usize) {
        self.write_op(op, line);
        self.write_u16(operand, line);
    }

    pub fn write_u8(&mut self, value: u8, line: usize) {
        self.code.push(value);
        self.lines.push(line);
    }

    /// 写入 u16 操作数
    pub fn write_u16(&mut self, value: u16, line: usize) {
        let bytes = value.to_le_bytes();
        self.code.push(bytes[0]);
        self.code.push(bytes[1]);
        self.lines.push(line);
        self.lines.push(line);
    }

    /// 写入 i16 操作数
    pub fn write_i16(&mut self, value: i16, line: usize) {
        let bytes = value.to_le_bytes();
        self.code.push(bytes[0]);
        self.code.push(bytes[1]);
        self.lines.push(line);
        self.lines.push(line);
    }

    /// 写入跳转指令 (占位，稍后 patch)，返回操作数位置
    pub fn write_jump(&mut self, op: OpCode, line: usize) -> usize {
        self.write_op(op, line);
        let offset = self.code.len();
        self.write_i16(-1i16, line);
        offset
    }

    /// 修补跳转偏移量
    ///
    /// VM 执行完跳转指令后，ip 指向操作数之后 (offset + 2)
    pub fn patch_jump(&mut self, offset: usize) -> Result<(), String> {
        let jump = self.code.len() - (offset + 2);
        let jump = i16::try_from(jump).map_err(|_| "Too much code to jump over.".to_string())?;
        let bytes = jump.to_le_bytes();
        self.code[offset] = bytes[0];
        self.code[offset + 1] = bytes[1];
        Ok(())
    }

    /// 写入循环跳转 (负向跳转)
    pub fn write_loop(&mut self, loop_start: usize, line: usize) -> Result<(), String> {
        self.write_op(OpCode::Loop, line);
        let offset = self.code.len() - loop_start + 2;
        let jump = i16::try_from(offset).map_err(|_| "Loop body too large.".to_string())?;
        self.write_i16(-jump, line);
        Ok(())
    }

    /// 添加常量，返回索引
    pub fn add_constant(&mut self, constant: Constant) -> Result<u16, String> {
        let idx = self.constants.len();
        let idx = u16::try_from(idx).map_err(|_| "Too many constants in one function.".to_string())?;
        self.constants.push(constant);
        Ok(idx)
    }

    /// 获取当前代码位置 (用于计算跳转)
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.code[offset], self.code[offset + 1]])
    }

    pub fn read_i16(&self, offset: usize) -> i16 {
        i16::from_le_bytes([self.code[offset], self.code[offset + 1]])
    }

    /// 指令所在行（ip 指向下一条指令时传入 ip - 1）
    pub fn line_at(&self, offset: usize) -> usize {
        self.lines.get(offset).copied().unwrap_or(0)
    }

    /// 反汇编到 tracing（调试用）
    pub fn disassemble(&self, name: &str) {
        tracing::debug!(target: "finch::compiler", "== {} ==", name);
        for (i, constant) in self.constants.iter().enumerate() {
            match constant {
                Constant::Fn(proto) => {
                    tracing::debug!(target: "finch::compiler", "  [{:3}] <fn {}>", i, proto.name)
                }
                other => tracing::debug!(target: "finch::compiler", "  [{:3}] {:?}", i, other),
            }
        }

        let mut offset = 0;
        while offset < self.code.len() {
            offset = self.disassemble_instruction(offset);
        }

        for constant in &self.constants {
            if let Constant::Fn(proto) = constant {
                proto.chunk.disassemble(&proto.name);
            }
        }
    }

    /// 反汇编单条指令，返回下一条指令的位置
    fn disassemble_instruction(&self, offset: usize) -> usize {
        let line_info = if offset > 0 && self.lines[offset] == self.lines[offset - 1] {
            "   | ".to_string()
        } else {
            format!("{:4} ", self.lines[offset])
        };

        let Some(op) = OpCode::from_u8(self.code[offset]) else {
            tracing::debug!(target: "finch::compiler", "{:04} {}<bad opcode {}>", offset, line_info, self.code[offset]);
            return offset + 1;
        };

        let mut next = offset + 1 + op.operand_size();
        match op {
            OpCode::Jump | OpCode::Loop | OpCode::JumpIfFalse | OpCode::And | OpCode::Or => {
                let jump = self.read_i16(offset + 1);
                let target = next as isize + jump as isize;
                tracing::debug!(target: "finch::compiler", "{:04} {}{} -> {}", offset, line_info, op.name(), target);
            }
            OpCode::Closure => {
                let idx = self.read_u16(offset + 1);
                if let Some(Constant::Fn(proto)) = self.constants.get(idx as usize) {
                    next += proto.upvalue_count * 2;
                    tracing::debug!(target: "finch::compiler", "{:04} {}{} {}", offset, line_info, op.name(), proto.name);
                }
            }
            _ => {
                let operands = &self.code[offset + 1..next.min(self.code.len())];
                tracing::debug!(target: "finch::compiler", "{:04} {}{} {:?}", offset, line_info, op.name(), operands);
            }
        }
        next
    }
}
