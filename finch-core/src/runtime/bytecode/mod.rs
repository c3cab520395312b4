//! 字节码定义
//!
//! 操作数均为小端序；跳转偏移量是相对于操作数之后位置的 i16。

pub mod chunk;

pub use chunk::{Chunk, Constant, FnProto};

/// 操作码定义
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    // ===== 常量加载 =====
    /// u16 常量索引
    Constant = 0x00,
    Null,
    True,
    False,

    // ===== 变量 =====
    /// u8 槽位（相对于帧基址）
    LoadLocal = 0x10,
    StoreLocal,
    /// u8 upvalue 索引
    LoadUpvalue,
    StoreUpvalue,
    /// u16 模块变量索引
    LoadModuleVar,
    StoreModuleVar,
    /// u8 字段索引，接收者为槽位 0
    LoadFieldThis,
    StoreFieldThis,
    /// u8 字段索引，接收者在栈上
    LoadField,
    StoreField,

    // ===== 栈操作 =====
    Pop = 0x20,

    // ===== 调用 =====
    /// u8 参数个数 + u16 方法符号
    Call = 0x28,
    /// u8 参数个数 + u16 方法符号，从方法所属类的父类查找
    Super,

    // ===== 控制流 =====
    /// i16 偏移
    Jump = 0x30,
    Loop,
    JumpIfFalse,
    /// 栈顶为假则跳转（保留值），否则弹出
    And,
    /// 栈顶为真则跳转（保留值），否则弹出
    Or,
    CloseUpvalue,
    Return,

    // ===== 闭包与类 =====
    /// u16 函数常量 + 每个 upvalue 两个字节 (is_local, index)
    Closure = 0x40,
    /// 把槽位 0 的类替换为新实例
    Construct,
    /// 调用外部分配器，把槽位 0 的类替换为外部对象
    ForeignConstruct,
    /// u8 字段数；栈: [name, superclass] -> [class]
    Class,
    /// 栈: [name, superclass] -> [class]
    ForeignClass,
    /// u16 方法符号；栈: [class, closure] -> []
    MethodInstance,
    MethodStatic,
    /// u16 方法符号 + u8 是否静态；栈: [class] -> []
    ForeignMethod,

    // ===== 模块 =====
    /// u16 模块名常量；执行（至多一次）被导入模块的顶层代码
    ImportModule = 0x50,
    /// u16 模块名常量 + u16 变量名常量
    ImportVariable,
}

impl OpCode {
    const ALL: [OpCode; 34] = [
        OpCode::Constant,
        OpCode::Null,
        OpCode::True,
        OpCode::False,
        OpCode::LoadLocal,
        OpCode::StoreLocal,
        OpCode::LoadUpvalue,
        OpCode::StoreUpvalue,
        OpCode::LoadModuleVar,
        OpCode::StoreModuleVar,
        OpCode::LoadFieldThis,
        OpCode::StoreFieldThis,
        OpCode::LoadField,
        OpCode::StoreField,
        OpCode::Pop,
        OpCode::Call,
        OpCode::Super,
        OpCode::Jump,
        OpCode::Loop,
        OpCode::JumpIfFalse,
        OpCode::And,
        OpCode::Or,
        OpCode::CloseUpvalue,
        OpCode::Return,
        OpCode::Closure,
        OpCode::Construct,
        OpCode::ForeignConstruct,
        OpCode::Class,
        OpCode::ForeignClass,
        OpCode::MethodInstance,
        OpCode::MethodStatic,
        OpCode::ForeignMethod,
        OpCode::ImportModule,
        OpCode::ImportVariable,
    ];

    /// 解码字节；未知字节返回 None
    pub fn from_u8(byte: u8) -> Option<OpCode> {
        Self::ALL.iter().copied().find(|op| *op as u8 == byte)
    }

    /// 获取操作码名称
    pub fn name(&self) -> &'static str {
        match self {
            OpCode::Constant => "CONSTANT",
            OpCode::Null => "NULL",
            OpCode::True => "TRUE",
            OpCode::False => "FALSE",
            OpCode::LoadLocal => "LOAD_LOCAL",
            OpCode::StoreLocal => "STORE_LOCAL",
            OpCode::LoadUpvalue => "LOAD_UPVALUE",
            OpCode::StoreUpvalue => "STORE_UPVALUE",
            OpCode::LoadModuleVar => "LOAD_MODULE_VAR",
            OpCode::StoreModuleVar => "STORE_MODULE_VAR",
            OpCode::LoadFieldThis => "LOAD_FIELD_THIS",
            OpCode::StoreFieldThis => "STORE_FIELD_THIS",
            OpCode::LoadField => "LOAD_FIELD",
            OpCode::StoreField => "STORE_FIELD",
            OpCode::Pop => "POP",
            OpCode::Call => "CALL",
            OpCode::Super => "SUPER",
            OpCode::Jump => "JUMP",
            OpCode::Loop => "LOOP",
            OpCode::JumpIfFalse => "JUMP_IF_FALSE",
            OpCode::And => "AND",
            OpCode::Or => "OR",
            OpCode::CloseUpvalue => "CLOSE_UPVALUE",
            OpCode::Return => "RETURN",
            OpCode::Closure => "CLOSURE",
            OpCode::Construct => "CONSTRUCT",
            OpCode::ForeignConstruct => "FOREIGN_CONSTRUCT",
            OpCode::Class => "CLASS",
            OpCode::ForeignClass => "FOREIGN_CLASS",
            OpCode::MethodInstance => "METHOD_INSTANCE",
            OpCode::MethodStatic => "METHOD_STATIC",
            OpCode::ForeignMethod => "FOREIGN_METHOD",
            OpCode::ImportModule => "IMPORT_MODULE",
            OpCode::ImportVariable => "IMPORT_VARIABLE",
        }
    }

    /// 固定操作数字节数（Closure 另有变长部分）
    pub fn operand_size(&self) -> usize {
        match self {
            OpCode::Null
            | OpCode::True
            | OpCode::False
            | OpCode::Pop
            | OpCode::CloseUpvalue
            | OpCode::Return
            | OpCode::Construct
            | OpCode::ForeignConstruct
            | OpCode::ForeignClass => 0,

            OpCode::LoadLocal
            | OpCode::StoreLocal
            | OpCode::LoadUpvalue
            | OpCode::StoreUpvalue
            | OpCode::LoadFieldThis
            | OpCode::StoreFieldThis
            | OpCode::LoadField
            | OpCode::StoreField
            | OpCode::Class => 1,

            OpCode::Constant
            | OpCode::LoadModuleVar
            | OpCode::StoreModuleVar
            | OpCode::Jump
            | OpCode::Loop
            | OpCode::JumpIfFalse
            | OpCode::And
            | OpCode::Or
            | OpCode::Closure
            | OpCode::MethodInstance
            | OpCode::MethodStatic
            | OpCode::ImportModule => 2,

            OpCode::Call | OpCode::Super | OpCode::ForeignMethod => 3,

            OpCode::ImportVariable => 4,
        }
    }
}
