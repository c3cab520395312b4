//! Finch Core - embeddable scripting VM (pure logic, no IO)
//!
//! Contains lexer, parser, code generator, heap, fiber interpreter and the
//! core library. Host interaction happens only through the callbacks in
//! [`Configuration`] and the slot API on [`Vm`].
//!
//! Configuration is passed explicitly via parameters, not via global state.

pub mod compiler;
pub mod runtime;

// Re-export common types
pub use runtime::config::{
    BindForeignClassFn, BindForeignMethodFn, Configuration, Diagnostic, DiagnosticKind, ErrorFn,
    LoadModuleFn, LoadedModule, ResolveModuleFn, WriteFn,
};
pub use runtime::error::{
    CompileError, ForeignError, HostContractViolation, InterpretError, RuntimeError, TraceFrame,
};
pub use runtime::object::{Finalizer, ForeignClassMethods, ForeignMethodFn};
pub use runtime::value::Value;
pub use runtime::vm::{version_number, FromSlot, Handle, IntoSlot, SlotType, Vm};

// Re-export config types from finch-config
pub use finch_config::{CompilerConfig, HeapConfig, LimitConfig, Phase};
