//! Typed shadow of locals and operand stack.
//!
//! The tracker replays instructions from the most recent declared frame so
//! that frames can be produced for labels the instrumenter inserts. Values
//! are kept expanded: a `long` or `double` takes two entries, the second
//! being `Top`.

use super::{FlowError, FlowResult};
use crate::classfile::code::{Code, Insn, LabelId, Node};
use crate::classfile::constant_pool::{Constant, ConstantPool};
use crate::classfile::descriptor::MethodDescriptor;
use crate::classfile::frames::{Frame, VType};
use crate::classfile::opcodes::*;
use crate::classfile::FormatError;
use std::collections::HashMap;

/// Replays a method body and reports the frame at the current position
#[derive(Debug)]
pub struct FrameTracker<'a> {
    pool: &'a ConstantPool,
    class_name: String,
    locals: Vec<VType>,
    stack: Vec<VType>,
    live: bool,
    allocations: HashMap<LabelId, String>,
}

impl<'a> FrameTracker<'a> {
    /// Start at method entry
    pub fn new(
        pool: &'a ConstantPool,
        class_name: &str,
        initial: &Frame,
        code: &Code,
    ) -> FlowResult<Self> {
        let mut allocations = HashMap::new();
        let mut last_label = None;
        for node in &code.nodes {
            match node {
                Node::Label(label) => last_label = Some(*label),
                Node::Insn(Insn::Type { opcode: NEW, index }) => {
                    if let Some(label) = last_label {
                        let _ = allocations.insert(label, pool.class_name(*index)?.into_owned());
                    }
                    last_label = None;
                }
                Node::Insn(_) => last_label = None,
                Node::Line(_) | Node::Frame(_) => {}
            }
        }
        Ok(Self {
            pool,
            class_name: class_name.to_string(),
            locals: expand(&initial.locals),
            stack: Vec::new(),
            live: true,
            allocations,
        })
    }

    /// Advance over one node
    pub fn visit(&mut self, node: &Node, label: Option<LabelId>) -> FlowResult<()> {
        match node {
            Node::Frame(frame) => {
                self.locals = expand(&frame.locals);
                self.stack = expand(&frame.stack);
                self.live = true;
                Ok(())
            }
            Node::Insn(insn) if self.live => self.execute(insn, label),
            _ => Ok(()),
        }
    }

    /// Current frame with `pops` stack entries removed; `None` after an
    /// unconditional transfer
    #[must_use]
    pub fn frame(&self, pops: usize) -> Option<Frame> {
        if !self.live {
            return None;
        }
        let depth = self.stack.len().saturating_sub(pops);
        let mut locals = compress(&self.locals);
        while locals.last() == Some(&VType::Top) {
            let _ = locals.pop();
        }
        Some(Frame {
            locals,
            stack: compress(&self.stack[..depth]),
        })
    }

    fn execute(&mut self, insn: &Insn, label: Option<LabelId>) -> FlowResult<()> {
        match insn {
            Insn::Simple(opcode) => self.simple(*opcode)?,
            Insn::Int { opcode, operand } => {
                if *opcode == NEWARRAY {
                    self.pop(1)?;
                    self.push(VType::Object(primitive_array(*operand)?.to_string()));
                } else {
                    self.push(VType::Integer);
                }
            }
            Insn::Var { opcode, var } => self.variable(*opcode, usize::from(*var))?,
            Insn::Iinc { .. } => {}
            Insn::Type { opcode, index } => {
                let name = self.pool.class_name(*index)?.into_owned();
                match *opcode {
                    NEW => {
                        let site = label.ok_or_else(|| {
                            FlowError::Format(FormatError::new("new without a label"))
                        })?;
                        self.push(VType::Uninitialized(site));
                    }
                    ANEWARRAY => {
                        self.pop(1)?;
                        let array = if name.starts_with('[') {
                            format!("[{name}")
                        } else {
                            format!("[L{name};")
                        };
                        self.push(VType::Object(array));
                    }
                    CHECKCAST => {
                        self.pop(1)?;
                        self.push(VType::Object(name));
                    }
                    _ => {
                        self.pop(1)?;
                        self.push(VType::Integer);
                    }
                }
            }
            Insn::Field { opcode, index } => {
                let field = self.pool.member_ref(*index)?;
                let size = usize::from(crate::classfile::descriptor::slot_size(&field.descriptor));
                match *opcode {
                    GETSTATIC => self.push_descriptor(&field.descriptor),
                    PUTSTATIC => self.pop(size)?,
                    GETFIELD => {
                        self.pop(1)?;
                        self.push_descriptor(&field.descriptor);
                    }
                    _ => self.pop(size + 1)?,
                }
            }
            Insn::Method { opcode, index } => {
                let method = self.pool.member_ref(*index)?;
                let descriptor = MethodDescriptor::parse(&method.descriptor)?;
                self.pop(usize::from(descriptor.param_slots()))?;
                if *opcode != INVOKESTATIC {
                    let receiver = self.pop_value()?;
                    if *opcode == INVOKESPECIAL && method.name == "<init>" {
                        self.initialize(&receiver);
                    }
                }
                self.push_return(&descriptor);
            }
            Insn::Interface { index, .. } => {
                let method = self.pool.member_ref(*index)?;
                let descriptor = MethodDescriptor::parse(&method.descriptor)?;
                self.pop(usize::from(descriptor.param_slots()) + 1)?;
                self.push_return(&descriptor);
            }
            Insn::Dynamic { index } => {
                let descriptor = MethodDescriptor::parse(&self.pool.dynamic_descriptor(*index)?)?;
                self.pop(usize::from(descriptor.param_slots()))?;
                self.push_return(&descriptor);
            }
            Insn::Ldc { index, .. } => {
                let value = match self.pool.get(*index)? {
                    Constant::Integer(_) => VType::Integer,
                    Constant::Float(_) => VType::Float,
                    Constant::Long(_) => VType::Long,
                    Constant::Double(_) => VType::Double,
                    Constant::String(_) => VType::Object("java/lang/String".into()),
                    Constant::Class(_) => VType::Object("java/lang/Class".into()),
                    Constant::MethodType(_) => VType::Object("java/lang/invoke/MethodType".into()),
                    Constant::MethodHandle { .. } => {
                        VType::Object("java/lang/invoke/MethodHandle".into())
                    }
                    Constant::Dynamic { .. } => {
                        VType::from_descriptor(&self.pool.dynamic_descriptor(*index)?)
                    }
                    other => {
                        return Err(FlowError::Format(FormatError::new(format!(
                            "ldc of non-loadable constant {other:?}"
                        ))))
                    }
                };
                self.push(value);
            }
            Insn::Jump { opcode, .. } => {
                self.pop(jump_pop_count(*opcode))?;
                if *opcode == GOTO {
                    self.live = false;
                }
            }
            Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => {
                self.pop(1)?;
                self.live = false;
            }
            Insn::MultiANewArray { index, dims } => {
                self.pop(usize::from(*dims))?;
                let name = self.pool.class_name(*index)?.into_owned();
                self.push(VType::Object(name));
            }
        }
        Ok(())
    }

    fn simple(&mut self, opcode: u8) -> FlowResult<()> {
        match opcode {
            NOP => {}
            ACONST_NULL => self.push(VType::Null),
            ICONST_M1..=ICONST_5 => self.push(VType::Integer),
            LCONST_0 | LCONST_1 => self.push(VType::Long),
            FCONST_0..=FCONST_2 => self.push(VType::Float),
            DCONST_0 | DCONST_1 => self.push(VType::Double),
            IALOAD | BALOAD | CALOAD | SALOAD => self.replace(2, VType::Integer)?,
            LALOAD => self.replace(2, VType::Long)?,
            FALOAD => self.replace(2, VType::Float)?,
            DALOAD => self.replace(2, VType::Double)?,
            AALOAD => {
                self.pop(1)?;
                let array = self.pop_value()?;
                self.push(element_type(&array));
            }
            IASTORE | FASTORE | AASTORE | BASTORE | CASTORE | SASTORE => self.pop(3)?,
            LASTORE | DASTORE => self.pop(4)?,
            POP => self.pop(1)?,
            POP2 => self.pop(2)?,
            DUP..=SWAP => self.shuffle(opcode)?,
            IADD..=DREM => match (opcode - IADD) % 4 {
                0 => self.replace(2, VType::Integer)?,
                1 => self.replace(4, VType::Long)?,
                2 => self.replace(2, VType::Float)?,
                _ => self.replace(4, VType::Double)?,
            },
            INEG => self.replace(1, VType::Integer)?,
            LNEG => self.replace(2, VType::Long)?,
            FNEG => self.replace(1, VType::Float)?,
            DNEG => self.replace(2, VType::Double)?,
            ISHL | ISHR | IUSHR | IAND | IOR | IXOR => self.replace(2, VType::Integer)?,
            LSHL | LSHR | LUSHR => self.replace(3, VType::Long)?,
            LAND | LOR | LXOR => self.replace(4, VType::Long)?,
            I2L | F2L => self.replace(1, VType::Long)?,
            I2F => self.replace(1, VType::Float)?,
            I2D | F2D => self.replace(1, VType::Double)?,
            L2I | D2I => self.replace(2, VType::Integer)?,
            L2F | D2F => self.replace(2, VType::Float)?,
            L2D => self.replace(2, VType::Double)?,
            D2L => self.replace(2, VType::Long)?,
            F2I | I2B | I2C | I2S => self.replace(1, VType::Integer)?,
            LCMP | DCMPL | DCMPG => self.replace(4, VType::Integer)?,
            FCMPL | FCMPG => self.replace(2, VType::Integer)?,
            ARRAYLENGTH => self.replace(1, VType::Integer)?,
            MONITORENTER | MONITOREXIT => self.pop(1)?,
            IRETURN..=RETURN | ATHROW => {
                self.stack.clear();
                self.live = false;
            }
            other => {
                return Err(FlowError::Format(FormatError::new(format!(
                    "unexpected opcode {other}"
                ))))
            }
        }
        Ok(())
    }

    fn variable(&mut self, opcode: u8, var: usize) -> FlowResult<()> {
        match opcode {
            ILOAD => self.push(VType::Integer),
            LLOAD => self.push(VType::Long),
            FLOAD => self.push(VType::Float),
            DLOAD => self.push(VType::Double),
            ALOAD => {
                let value = self.locals.get(var).cloned().unwrap_or(VType::Top);
                self.stack.push(value);
            }
            ISTORE => {
                self.pop(1)?;
                self.set_local(var, VType::Integer);
            }
            LSTORE => {
                self.pop(2)?;
                self.set_local(var, VType::Long);
            }
            FSTORE => {
                self.pop(1)?;
                self.set_local(var, VType::Float);
            }
            DSTORE => {
                self.pop(2)?;
                self.set_local(var, VType::Double);
            }
            ASTORE => {
                let value = self.pop_value()?;
                self.set_local(var, value);
            }
            _ => return Err(FlowError::Subroutine),
        }
        Ok(())
    }

    fn shuffle(&mut self, opcode: u8) -> FlowResult<()> {
        let take = match opcode {
            DUP | SWAP => 1 + usize::from(opcode == SWAP),
            DUP_X1 | DUP2 => 2,
            DUP_X2 | DUP2_X1 => 3,
            _ => 4,
        };
        if self.stack.len() < take {
            return Err(underflow());
        }
        let top: Vec<VType> = self.stack.split_off(self.stack.len() - take);
        // top[last] is the topmost entry
        let order: &[usize] = match opcode {
            DUP => &[0, 0],
            DUP_X1 => &[1, 0, 1],
            DUP_X2 => &[2, 0, 1, 2],
            DUP2 => &[0, 1, 0, 1],
            DUP2_X1 => &[1, 2, 0, 1, 2],
            DUP2_X2 => &[2, 3, 0, 1, 2, 3],
            _ => &[1, 0],
        };
        self.stack.extend(order.iter().map(|i| top[*i].clone()));
        Ok(())
    }

    fn initialize(&mut self, receiver: &VType) {
        let initialized = match receiver {
            VType::UninitializedThis => VType::Object(self.class_name.clone()),
            VType::Uninitialized(label) => match self.allocations.get(label) {
                Some(name) => VType::Object(name.clone()),
                None => return,
            },
            _ => return,
        };
        for slot in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if slot == receiver {
                *slot = initialized.clone();
            }
        }
    }

    fn set_local(&mut self, var: usize, value: VType) {
        let wide = value.is_wide();
        let needed = var + 1 + usize::from(wide);
        if self.locals.len() < needed {
            self.locals.resize(needed, VType::Top);
        }
        if var > 0 && self.locals[var - 1].is_wide() {
            self.locals[var - 1] = VType::Top;
        }
        self.locals[var] = value;
        if wide {
            self.locals[var + 1] = VType::Top;
        }
    }

    fn push(&mut self, value: VType) {
        let wide = value.is_wide();
        self.stack.push(value);
        if wide {
            self.stack.push(VType::Top);
        }
    }

    fn push_descriptor(&mut self, descriptor: &str) {
        self.push(VType::from_descriptor(descriptor));
    }

    fn push_return(&mut self, descriptor: &MethodDescriptor) {
        if let Some(ret) = &descriptor.ret {
            self.push_descriptor(ret);
        }
    }

    fn pop(&mut self, count: usize) -> FlowResult<()> {
        if self.stack.len() < count {
            return Err(underflow());
        }
        self.stack.truncate(self.stack.len() - count);
        Ok(())
    }

    fn pop_value(&mut self) -> FlowResult<VType> {
        self.stack.pop().ok_or_else(underflow)
    }

    fn replace(&mut self, pops: usize, value: VType) -> FlowResult<()> {
        self.pop(pops)?;
        self.push(value);
        Ok(())
    }
}

fn underflow() -> FlowError {
    FlowError::Format(FormatError::new("operand stack underflow"))
}

fn primitive_array(atype: i32) -> FlowResult<&'static str> {
    Ok(match atype {
        4 => "[Z",
        5 => "[C",
        6 => "[F",
        7 => "[D",
        8 => "[B",
        9 => "[S",
        10 => "[I",
        11 => "[J",
        other => {
            return Err(FlowError::Format(FormatError::new(format!(
                "invalid newarray type {other}"
            ))))
        }
    })
}

fn element_type(array: &VType) -> VType {
    match array {
        VType::Object(name) => match name.strip_prefix('[') {
            Some(element) => VType::from_descriptor(element),
            None => VType::Object("java/lang/Object".into()),
        },
        VType::Null => VType::Null,
        _ => VType::Object("java/lang/Object".into()),
    }
}

fn expand(types: &[VType]) -> Vec<VType> {
    let mut out = Vec::with_capacity(types.len() + 2);
    for value in types {
        out.push(value.clone());
        if value.is_wide() {
            out.push(VType::Top);
        }
    }
    out
}

fn compress(slots: &[VType]) -> Vec<VType> {
    let mut out = Vec::with_capacity(slots.len());
    let mut index = 0;
    while index < slots.len() {
        let value = &slots[index];
        out.push(value.clone());
        index += if value.is_wide() { 2 } else { 1 };
    }
    out
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::testing::CodeBuilder;

    fn replay<'a>(code: &Code, pool: &'a ConstantPool, initial: &Frame) -> FrameTracker<'a> {
        let mut tracker = FrameTracker::new(pool, "a/B", initial, code).unwrap();
        let mut label = None;
        for node in &code.nodes {
            if let Node::Label(l) = node {
                label = Some(*l);
            }
            tracker.visit(node, label).unwrap();
            if matches!(node, Node::Insn(_)) {
                label = None;
            }
        }
        tracker
    }

    #[test]
    fn test_wide_locals_compress() {
        let mut b = CodeBuilder::new();
        b.simple(LCONST_1).var(LSTORE, 1).simple(ICONST_0).var(ISTORE, 3);
        let code = b.build();
        let pool = ConstantPool::new();
        let initial = Frame {
            locals: vec![VType::Integer],
            stack: vec![],
        };
        let tracker = replay(&code, &pool, &initial);
        let frame = tracker.frame(0).unwrap();
        assert_eq!(
            frame.locals,
            vec![VType::Integer, VType::Long, VType::Integer]
        );
        assert!(frame.stack.is_empty());
    }

    #[test]
    fn test_pops_before_branch() {
        let mut b = CodeBuilder::new();
        b.simple(ICONST_1).simple(ICONST_2);
        let code = b.build();
        let pool = ConstantPool::new();
        let tracker = replay(&code, &pool, &Frame::default());
        assert_eq!(tracker.frame(2).unwrap().stack, vec![]);
        assert_eq!(tracker.frame(1).unwrap().stack, vec![VType::Integer]);
    }

    #[test]
    fn test_dead_after_goto() {
        let mut b = CodeBuilder::new();
        let l = b.new_label();
        b.jump(GOTO, l);
        b.place(l).simple(RETURN);
        let code = b.build();
        let pool = ConstantPool::new();
        let mut tracker = FrameTracker::new(&pool, "a/B", &Frame::default(), &code).unwrap();
        tracker.visit(&code.nodes[0], None).unwrap();
        assert!(tracker.frame(0).is_none());
    }

    #[test]
    fn test_constructor_call_initializes() {
        let mut b = CodeBuilder::new();
        let site = b.label();
        b.new_object("a/C").simple(DUP).invoke_special("a/C", "<init>", "()V");
        let (code, pool) = b.build_with_pool();
        let tracker = replay(&code, &pool, &Frame::default());
        assert_eq!(
            tracker.frame(0).unwrap().stack,
            vec![VType::Object("a/C".into())]
        );
        assert!(tracker.allocations.contains_key(&site));
    }

    #[test]
    fn test_uninitialized_this() {
        let mut b = CodeBuilder::new();
        b.var(ALOAD, 0).invoke_special("java/lang/Object", "<init>", "()V");
        let (code, pool) = b.build_with_pool();
        let initial = Frame {
            locals: vec![VType::UninitializedThis],
            stack: vec![],
        };
        let tracker = replay(&code, &pool, &initial);
        assert_eq!(
            tracker.frame(0).unwrap().locals,
            vec![VType::Object("a/B".into())]
        );
    }
}
