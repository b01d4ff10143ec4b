//! Code that obtains a class's probe array from the runtime.

use super::support::push_int;
use crate::classfile::code::Insn;
use crate::classfile::constant_pool::ConstantPool;
use crate::classfile::opcodes::INVOKESTATIC;
use crate::classfile::FormatResult;
use crate::config::{InstrumentConfig, ProbeMode};
use std::fmt;

/// Generates the instructions that push a probe array onto the stack
pub trait AccessorGenerator: fmt::Debug + Send + Sync {
    /// Append code leaving the array for `(class_id, class_name,
    /// probe_count)` on the operand stack; returns the stack depth it needs
    fn generate(
        &self,
        pool: &mut ConstantPool,
        class_id: u64,
        class_name: &str,
        probe_count: u32,
        out: &mut Vec<Insn>,
    ) -> FormatResult<u16>;

    /// Probe representation of the arrays handed out
    fn mode(&self) -> ProbeMode;
}

/// Calls a static method of a runtime class bundled with the application
///
/// `getProbes(JLjava/lang/String;I)[Z` in exists mode,
/// `getCounters(JLjava/lang/String;I)Ljava/util/concurrent/atomic/AtomicIntegerArray;`
/// in count mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineAccessor {
    runtime_class: String,
    mode: ProbeMode,
}

impl OfflineAccessor {
    /// Accessor for the configured runtime class and probe mode
    #[must_use]
    pub fn new(config: &InstrumentConfig) -> Self {
        Self {
            runtime_class: config.runtime_class.clone(),
            mode: config.probe_mode,
        }
    }

    /// Runtime method name and descriptor
    #[must_use]
    pub fn method(&self) -> (&'static str, String) {
        let name = match self.mode {
            ProbeMode::Exists => "getProbes",
            ProbeMode::Count => "getCounters",
        };
        (name, format!("(JLjava/lang/String;I){}", self.mode.descriptor()))
    }
}

impl AccessorGenerator for OfflineAccessor {
    fn generate(
        &self,
        pool: &mut ConstantPool,
        class_id: u64,
        class_name: &str,
        probe_count: u32,
        out: &mut Vec<Insn>,
    ) -> FormatResult<u16> {
        out.push(Insn::Ldc {
            index: pool.add_long(class_id as i64)?,
            double_word: true,
        });
        out.push(Insn::Ldc {
            index: pool.add_string(class_name)?,
            double_word: false,
        });
        out.push(push_int(pool, probe_count as i32)?);
        let (name, descriptor) = self.method();
        out.push(Insn::Method {
            opcode: INVOKESTATIC,
            index: pool.add_method_ref(&self.runtime_class, name, &descriptor, false)?,
        });
        // long + String + int
        Ok(4)
    }

    fn mode(&self) -> ProbeMode {
        self.mode
    }
}
