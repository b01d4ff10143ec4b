//! Reserved names and probe code shared by every strategy.

use crate::classfile::code::{Insn, Node};
use crate::classfile::constant_pool::ConstantPool;
use crate::classfile::opcodes::{ALOAD, BASTORE, BIPUSH, ICONST_0, ICONST_1, INVOKEVIRTUAL, POP, SIPUSH};
use crate::classfile::{ClassFile, FormatError, FormatResult};
use crate::config::ProbeMode;
use crate::flow::ProbeId;
use std::collections::HashMap;
use std::ops::Range;

/// Name of the probe array slot (field or dynamic constant)
pub const DATA_FIELD: &str = "$probecovData";

/// Name of the generated initializer or bootstrap method
pub const INIT_METHOD: &str = "$probecovInit";

/// Suffix of companion classes
pub const COMPANION_SUFFIX: &str = "$probecovCompanion";

/// Static initializer name
pub const CLINIT: &str = "<clinit>";

/// Internal name of the companion class for `class_name`
#[must_use]
pub fn companion_name(class_name: &str) -> String {
    format!("{class_name}{COMPANION_SUFFIX}")
}

/// Whether a class already carries probe members
#[must_use]
pub fn is_instrumented(class: &ClassFile) -> bool {
    class.has_field(DATA_FIELD) || class.has_method(INIT_METHOD)
}

/// Shortest instruction pushing an `int` constant
pub fn push_int(pool: &mut ConstantPool, value: i32) -> FormatResult<Insn> {
    Ok(match value {
        -1..=5 => Insn::Simple((i32::from(ICONST_0) + value) as u8),
        v if i8::try_from(v).is_ok() => Insn::Int {
            opcode: BIPUSH,
            operand: v,
        },
        v if i16::try_from(v).is_ok() => Insn::Int {
            opcode: SIPUSH,
            operand: v,
        },
        v => Insn::Ldc {
            index: pool.add_integer(v)?,
            double_word: false,
        },
    })
}

/// Emits the code of single probes
///
/// Constants are added to the pool up front so that emitting only needs
/// shared access to the class.
#[derive(Debug)]
pub struct ProbeEmitter {
    mode: ProbeMode,
    increment: u16,
    pushes: HashMap<u32, Insn>,
}

impl ProbeEmitter {
    /// Prepare code for the probe ids in `ids`
    pub fn new(pool: &mut ConstantPool, mode: ProbeMode, ids: Range<u32>) -> FormatResult<Self> {
        let increment = match mode {
            ProbeMode::Exists => 0,
            ProbeMode::Count => pool.add_method_ref(
                ProbeMode::Count.class_name(),
                "incrementAndGet",
                "(I)I",
                false,
            )?,
        };
        let pushes = ids
            .map(|id| Ok((id, push_int(pool, id as i32)?)))
            .collect::<FormatResult<_>>()?;
        Ok(Self {
            mode,
            increment,
            pushes,
        })
    }

    /// Probe representation
    #[must_use]
    pub const fn mode(&self) -> ProbeMode {
        self.mode
    }

    /// Append the probe `id`, reading the array from local `var`
    ///
    /// Fails if `id` was not prepared.
    pub fn emit(&self, var: u16, id: ProbeId, out: &mut Vec<Node>) -> FormatResult<()> {
        let push = self.pushes.get(&id.as_u32()).ok_or_else(|| {
            FormatError::new(format!("probe id {} out of range", id.as_u32()))
        })?;
        out.push(Node::Insn(Insn::Var {
            opcode: ALOAD,
            var,
        }));
        out.push(Node::Insn(push.clone()));
        match self.mode {
            ProbeMode::Exists => {
                out.push(Node::Insn(Insn::Simple(ICONST_1)));
                out.push(Node::Insn(Insn::Simple(BASTORE)));
            }
            ProbeMode::Count => {
                out.push(Node::Insn(Insn::Method {
                    opcode: INVOKEVIRTUAL,
                    index: self.increment,
                }));
                out.push(Node::Insn(Insn::Simple(POP)));
            }
        }
        Ok(())
    }
}
