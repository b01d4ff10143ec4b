//! Where an instrumented class keeps its probe array.
//!
//! The strategy is a pure function of the class kind, its major version and
//! whether it has probes at all, so re-instrumenting the same bytes always
//! takes the same route.

use super::accessor::AccessorGenerator;
use super::support::{companion_name, CLINIT, DATA_FIELD, INIT_METHOD};
use crate::classfile::access::{FINAL, PRIVATE, PUBLIC, STATIC, SUPER, SYNTHETIC, TRANSIENT};
use crate::classfile::code::{Code, Insn, Node};
use crate::classfile::constant_pool::{ConstantPool, REF_INVOKE_STATIC};
use crate::classfile::descriptor::MethodDescriptor;
use crate::classfile::frames::{Frame, VType};
use crate::classfile::opcodes::{
    ARETURN, CHECKCAST, DUP, GETSTATIC, IFNONNULL, INVOKESTATIC, POP, PUTSTATIC, RETURN,
};
use crate::classfile::{Attribute, ClassFile, FormatResult, MemberInfo};
use crate::config::ProbeMode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// First major version with dynamic constants (Java 11)
pub const CONDY_MAJOR_VERSION: u16 = 55;

/// First major version with static interface methods (Java 8)
pub const INTERFACE_METHODS_MAJOR_VERSION: u16 = 52;

/// First major version that may carry stack map frames (Java 6)
const STACK_MAP_MAJOR_VERSION: u16 = 50;

/// Kind of class being instrumented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// Ordinary or abstract class, enum, record
    Class,
    /// Interface or annotation type
    Interface,
    /// `module-info`
    Module,
}

impl UnitKind {
    /// Kind of a parsed class
    #[must_use]
    pub const fn of(class: &ClassFile) -> Self {
        if class.is_module() {
            Self::Module
        } else if class.is_interface() {
            Self::Interface
        } else {
            Self::Class
        }
    }
}

/// How the probe array is attached to a class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Hidden static field filled by a lazy initializer
    EmbeddedSlot,
    /// `ldc` of a dynamic constant resolved by a bootstrap method
    CallSiteConstant,
    /// Static field on a generated companion class
    ExternalCompanion,
    /// No probes, class left untouched
    None,
}

impl Strategy {
    /// Stable lower-case name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmbeddedSlot => "embedded_slot",
            Self::CallSiteConstant => "call_site_constant",
            Self::ExternalCompanion => "external_companion",
            Self::None => "none",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the strategy for a class
///
/// `has_methods` tells whether any method other than `<clinit>` has code.
/// Returns `None` when no strategy applies, which callers must treat as an
/// error.
#[must_use]
pub const fn select(kind: UnitKind, major: u16, probe_count: u32, has_methods: bool) -> Option<Strategy> {
    if probe_count == 0 {
        return Some(Strategy::None);
    }
    match kind {
        UnitKind::Class if major >= CONDY_MAJOR_VERSION => Some(Strategy::CallSiteConstant),
        UnitKind::Class => Some(Strategy::EmbeddedSlot),
        UnitKind::Interface if !has_methods => Some(Strategy::ExternalCompanion),
        UnitKind::Interface if major >= CONDY_MAJOR_VERSION => Some(Strategy::CallSiteConstant),
        UnitKind::Interface if major >= INTERFACE_METHODS_MAJOR_VERSION => {
            Some(Strategy::EmbeddedSlot)
        }
        UnitKind::Interface => Some(Strategy::ExternalCompanion),
        UnitKind::Module => None,
    }
}

/// Identity of the class being instrumented
#[derive(Debug, Clone, Copy)]
pub struct UnitInfo<'a> {
    /// Internal class name
    pub name: &'a str,
    /// Class id of the original bytes
    pub id: u64,
    /// Probes in the class
    pub probe_count: u32,
    /// Runtime accessor code generator
    pub accessor: &'a dyn AccessorGenerator,
}

impl UnitInfo<'_> {
    fn mode(&self) -> ProbeMode {
        self.accessor.mode()
    }

    fn accessor_code(&self, pool: &mut ConstantPool, out: &mut Vec<Insn>) -> FormatResult<u16> {
        self.accessor
            .generate(pool, self.id, self.name, self.probe_count, out)
    }
}

/// Method prologue pushing the probe array; the caller stores it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeArrayLoad {
    /// Prologue for ordinary methods
    pub method: Vec<Insn>,
    /// Prologue for `<clinit>`
    pub clinit: Vec<Insn>,
    /// Stack depth the prologues need
    pub max_stack: u16,
}

impl Strategy {
    /// Prepare the prologue and any constants it needs
    pub fn emit_load(self, class: &mut ClassFile, unit: &UnitInfo<'_>) -> FormatResult<ProbeArrayLoad> {
        let mode = unit.mode();
        let interface = class.is_interface();
        let (method, max_stack) = match self {
            Self::None => (Vec::new(), 0),
            Self::EmbeddedSlot => {
                let init = class.pool.add_method_ref(
                    unit.name,
                    INIT_METHOD,
                    &format!("(){}", mode.descriptor()),
                    interface,
                )?;
                (
                    vec![Insn::Method {
                        opcode: INVOKESTATIC,
                        index: init,
                    }],
                    1,
                )
            }
            Self::CallSiteConstant => {
                let init = class.pool.add_method_ref(
                    unit.name,
                    INIT_METHOD,
                    &bootstrap_descriptor(mode),
                    interface,
                )?;
                let handle = class.pool.add_method_handle(REF_INVOKE_STATIC, init)?;
                let bootstrap = class.add_bootstrap_method(handle, &[])?;
                let constant = class
                    .pool
                    .add_dynamic(bootstrap, DATA_FIELD, "Ljava/lang/Object;")?;
                let cast = class.pool.add_class(mode.class_name())?;
                (
                    vec![
                        Insn::Ldc {
                            index: constant,
                            double_word: false,
                        },
                        Insn::Type {
                            opcode: CHECKCAST,
                            index: cast,
                        },
                    ],
                    1,
                )
            }
            Self::ExternalCompanion => {
                let field = class.pool.add_field_ref(
                    &companion_name(unit.name),
                    DATA_FIELD,
                    mode.descriptor(),
                )?;
                (
                    vec![Insn::Field {
                        opcode: GETSTATIC,
                        index: field,
                    }],
                    1,
                )
            }
        };

        if self == Self::EmbeddedSlot && interface {
            // the final field may only be written by <clinit>
            let mut clinit = Vec::new();
            let stack = unit.accessor_code(&mut class.pool, &mut clinit)?;
            let field = class
                .pool
                .add_field_ref(unit.name, DATA_FIELD, mode.descriptor())?;
            clinit.push(Insn::Simple(DUP));
            clinit.push(Insn::Field {
                opcode: PUTSTATIC,
                index: field,
            });
            return Ok(ProbeArrayLoad {
                method,
                clinit,
                max_stack: stack.max(2),
            });
        }
        Ok(ProbeArrayLoad {
            clinit: method.clone(),
            method,
            max_stack,
        })
    }

    /// Add the fields and methods the prologue relies on
    ///
    /// Returns the companion class for [`Strategy::ExternalCompanion`].
    pub fn emit_members(
        self,
        class: &mut ClassFile,
        unit: &UnitInfo<'_>,
    ) -> FormatResult<Option<ClassFile>> {
        let mode = unit.mode();
        match self {
            Self::None => Ok(None),
            Self::EmbeddedSlot => {
                let interface = class.is_interface();
                let field_access = if interface {
                    PUBLIC | STATIC | FINAL | SYNTHETIC
                } else {
                    PRIVATE | STATIC | TRANSIENT | SYNTHETIC
                };
                add_field(class, field_access, DATA_FIELD, mode.descriptor())?;
                let field = class
                    .pool
                    .add_field_ref(unit.name, DATA_FIELD, mode.descriptor())?;

                let mut code = Code::empty(0, 0);
                let ready = code.new_label();
                let mut insns = vec![
                    Insn::Field {
                        opcode: GETSTATIC,
                        index: field,
                    },
                    Insn::Simple(DUP),
                    Insn::Jump {
                        opcode: IFNONNULL,
                        target: ready,
                    },
                    Insn::Simple(POP),
                ];
                let stack = unit.accessor_code(&mut class.pool, &mut insns)?;
                if !interface {
                    insns.push(Insn::Simple(DUP));
                    insns.push(Insn::Field {
                        opcode: PUTSTATIC,
                        index: field,
                    });
                }
                code.max_stack = stack.max(2);
                code.nodes = insns.into_iter().map(Node::Insn).collect();
                code.nodes.push(Node::Label(ready));
                code.nodes.push(Node::Frame(Frame {
                    locals: Vec::new(),
                    stack: vec![VType::Object(mode.class_name().to_string())],
                }));
                code.nodes.push(Node::Insn(Insn::Simple(ARETURN)));
                add_method(
                    class,
                    PRIVATE | STATIC | SYNTHETIC,
                    INIT_METHOD,
                    &format!("(){}", mode.descriptor()),
                    &code,
                )?;

                if interface && !class.has_method(CLINIT) {
                    let mut insns = Vec::new();
                    let stack = unit.accessor_code(&mut class.pool, &mut insns)?;
                    insns.push(Insn::Field {
                        opcode: PUTSTATIC,
                        index: field,
                    });
                    insns.push(Insn::Simple(RETURN));
                    let mut code = Code::empty(stack, 0);
                    code.nodes = insns.into_iter().map(Node::Insn).collect();
                    add_method(class, STATIC | SYNTHETIC, CLINIT, "()V", &code)?;
                }
                Ok(None)
            }
            Self::CallSiteConstant => {
                let mut insns = Vec::new();
                let stack = unit.accessor_code(&mut class.pool, &mut insns)?;
                insns.push(Insn::Simple(ARETURN));
                let mut code = Code::empty(stack, 3);
                code.nodes = insns.into_iter().map(Node::Insn).collect();
                add_method(
                    class,
                    PRIVATE | STATIC | SYNTHETIC,
                    INIT_METHOD,
                    &bootstrap_descriptor(mode),
                    &code,
                )?;
                Ok(None)
            }
            Self::ExternalCompanion => companion(unit).map(Some),
        }
    }
}

fn bootstrap_descriptor(mode: ProbeMode) -> String {
    format!(
        "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/Class;){}",
        mode.descriptor()
    )
}

/// Satellite class holding the probe array in a static field
fn companion(unit: &UnitInfo<'_>) -> FormatResult<ClassFile> {
    let name = companion_name(unit.name);
    let mode = unit.mode();
    let mut class = ClassFile {
        minor_version: 3,
        major_version: 45,
        pool: ConstantPool::new(),
        access: PUBLIC | FINAL | SUPER | SYNTHETIC,
        this_class: 0,
        super_class: 0,
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods: Vec::new(),
        attributes: Vec::new(),
    };
    class.this_class = class.pool.add_class(&name)?;
    class.super_class = class.pool.add_class("java/lang/Object")?;
    add_field(
        &mut class,
        PUBLIC | STATIC | TRANSIENT | SYNTHETIC,
        DATA_FIELD,
        mode.descriptor(),
    )?;

    let mut insns = Vec::new();
    let stack = unit.accessor_code(&mut class.pool, &mut insns)?;
    let field = class.pool.add_field_ref(&name, DATA_FIELD, mode.descriptor())?;
    insns.push(Insn::Field {
        opcode: PUTSTATIC,
        index: field,
    });
    insns.push(Insn::Simple(RETURN));
    let mut code = Code::empty(stack, 0);
    code.nodes = insns.into_iter().map(Node::Insn).collect();
    add_method(&mut class, STATIC, CLINIT, "()V", &code)?;
    Ok(class)
}

fn add_field(class: &mut ClassFile, access: u16, name: &str, descriptor: &str) -> FormatResult<()> {
    let name_index = class.pool.add_utf8(name)?;
    let descriptor_index = class.pool.add_utf8(descriptor)?;
    class.fields.push(MemberInfo {
        access,
        name_index,
        descriptor_index,
        attributes: Vec::new(),
    });
    Ok(())
}

fn add_method(
    class: &mut ClassFile,
    access: u16,
    name: &str,
    descriptor: &str,
    code: &Code,
) -> FormatResult<()> {
    let class_name = class.name()?;
    let initial = Frame::initial(&class_name, access, name, &MethodDescriptor::parse(descriptor)?);
    let with_frames = class.major_version >= STACK_MAP_MAJOR_VERSION;
    let body = code.write(&mut class.pool, &initial, with_frames)?;
    let code_name = class.pool.add_utf8("Code")?;
    let name_index = class.pool.add_utf8(name)?;
    let descriptor_index = class.pool.add_utf8(descriptor)?;
    class.methods.push(MemberInfo {
        access,
        name_index,
        descriptor_index,
        attributes: vec![Attribute {
            name_index: code_name,
            info: body,
        }],
    });
    Ok(())
}
