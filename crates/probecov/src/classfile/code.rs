//! Method bodies as a node list with symbolic labels.
//!
//! `Code::parse` turns a `Code` attribute into [`Node`]s where every branch
//! target, exception range bound, line start, local variable bound, frame
//! position and `new` site is a [`LabelId`]. `Code::write` assembles the
//! nodes back, recomputing offsets, so instructions can be inserted freely.

use super::constant_pool::ConstantPool;
use super::frames::{decode_stack_map, encode_stack_map, Frame};
use super::opcodes::{
    self, ALOAD, ALOAD_3, ASTORE, ASTORE_3, BIPUSH, GOTO, GOTO_W, IINC, ILOAD, ILOAD_0, ISTORE,
    ISTORE_0, JSR, JSR_W, LDC, LDC2_W, LDC_W, LOOKUPSWITCH, MULTIANEWARRAY, NEW, NEWARRAY, RET,
    SIPUSH, TABLESWITCH, WIDE,
};
use super::{FormatError, FormatResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read};
use tracing::debug;

const LINE_NUMBER_TABLE: &str = "LineNumberTable";
const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
const STACK_MAP_TABLE: &str = "StackMapTable";

const MAX_CODE_LENGTH: u32 = 65_535;

/// Symbolic position in a method body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(u32);

impl LabelId {
    /// Create a label id
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the inner value
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Index into per-label tables
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One element of a method body
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A position that can be referenced
    Label(LabelId),
    /// Source line of the following instructions
    Line(u16),
    /// Declared stack map frame at this position
    Frame(Frame),
    /// An instruction
    Insn(Insn),
}

/// A decoded instruction; constant pool operands stay as indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insn {
    /// Instruction without operands
    Simple(u8),
    /// `bipush`, `sipush`, `newarray`
    Int {
        /// Opcode
        opcode: u8,
        /// Immediate operand
        operand: i32,
    },
    /// Local variable load/store or `ret` (short forms normalized)
    Var {
        /// Long-form opcode
        opcode: u8,
        /// Slot index
        var: u16,
    },
    /// `new`, `anewarray`, `checkcast`, `instanceof`
    Type {
        /// Opcode
        opcode: u8,
        /// Class constant index
        index: u16,
    },
    /// Field access
    Field {
        /// Opcode
        opcode: u8,
        /// Field reference index
        index: u16,
    },
    /// `invokevirtual`, `invokespecial`, `invokestatic`
    Method {
        /// Opcode
        opcode: u8,
        /// Method or interface method reference index
        index: u16,
    },
    /// `invokeinterface`
    Interface {
        /// Interface method reference index
        index: u16,
        /// Argument slot count operand
        count: u8,
    },
    /// `invokedynamic`
    Dynamic {
        /// Invoke dynamic constant index
        index: u16,
    },
    /// `ldc`, `ldc_w`, `ldc2_w`
    Ldc {
        /// Loadable constant index
        index: u16,
        /// Long or double constant
        double_word: bool,
    },
    /// `iinc`
    Iinc {
        /// Slot index
        var: u16,
        /// Increment
        incr: i16,
    },
    /// Conditional or unconditional jump (`goto_w` normalized to `goto`)
    Jump {
        /// Opcode
        opcode: u8,
        /// Branch target
        target: LabelId,
    },
    /// `tableswitch`
    TableSwitch {
        /// Default target
        default: LabelId,
        /// Lowest key
        low: i32,
        /// Targets for `low..=high`
        targets: Vec<LabelId>,
    },
    /// `lookupswitch`
    LookupSwitch {
        /// Default target
        default: LabelId,
        /// Sorted key/target pairs
        pairs: Vec<(i32, LabelId)>,
    },
    /// `multianewarray`
    MultiANewArray {
        /// Array class constant index
        index: u16,
        /// Dimensions
        dims: u8,
    },
}

impl Insn {
    /// Opcode in long form
    #[must_use]
    pub const fn opcode(&self) -> u8 {
        match self {
            Self::Simple(opcode)
            | Self::Int { opcode, .. }
            | Self::Var { opcode, .. }
            | Self::Type { opcode, .. }
            | Self::Field { opcode, .. }
            | Self::Method { opcode, .. }
            | Self::Jump { opcode, .. } => *opcode,
            Self::Interface { .. } => opcodes::INVOKEINTERFACE,
            Self::Dynamic { .. } => opcodes::INVOKEDYNAMIC,
            Self::Ldc { index, double_word } => {
                if *double_word {
                    LDC2_W
                } else if *index <= 0xFF {
                    LDC
                } else {
                    LDC_W
                }
            }
            Self::Iinc { .. } => IINC,
            Self::TableSwitch { .. } => TABLESWITCH,
            Self::LookupSwitch { .. } => LOOKUPSWITCH,
            Self::MultiANewArray { .. } => MULTIANEWARRAY,
        }
    }

    /// Switch targets: default first, then the cases in order
    #[must_use]
    pub fn switch_targets(&self) -> Option<(LabelId, Vec<LabelId>)> {
        match self {
            Self::TableSwitch {
                default, targets, ..
            } => Some((*default, targets.clone())),
            Self::LookupSwitch { default, pairs } => {
                Some((*default, pairs.iter().map(|(_, l)| *l).collect()))
            }
            _ => None,
        }
    }

    /// Encoded size when placed at `offset`
    fn size(&self, offset: u32) -> u32 {
        match self {
            Self::Simple(_) => 1,
            Self::Int { opcode, .. } => {
                if *opcode == SIPUSH {
                    3
                } else {
                    2
                }
            }
            Self::Var { opcode, var } => match (*opcode == RET, *var) {
                (false, 0..=3) => 1,
                (_, 0..=0xFF) => 2,
                _ => 4,
            },
            Self::Type { .. } | Self::Field { .. } | Self::Method { .. } | Self::Jump { .. } => 3,
            Self::Interface { .. } | Self::Dynamic { .. } => 5,
            Self::Ldc { index, double_word } => {
                if !*double_word && *index <= 0xFF {
                    2
                } else {
                    3
                }
            }
            Self::Iinc { var, incr } => {
                if *var <= 0xFF && i8::try_from(*incr).is_ok() {
                    3
                } else {
                    6
                }
            }
            Self::TableSwitch { targets, .. } => {
                1 + switch_padding(offset) + 12 + 4 * targets.len() as u32
            }
            Self::LookupSwitch { pairs, .. } => {
                1 + switch_padding(offset) + 8 + 8 * pairs.len() as u32
            }
            Self::MultiANewArray { .. } => 4,
        }
    }
}

const fn switch_padding(offset: u32) -> u32 {
    3 - (offset % 4)
}

/// Exception table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handler {
    /// Start of the protected range (inclusive)
    pub start: LabelId,
    /// End of the protected range (exclusive)
    pub end: LabelId,
    /// Handler entry
    pub handler: LabelId,
    /// Caught class constant index, 0 for any
    pub catch_type: u16,
}

/// `LocalVariableTable` / `LocalVariableTypeTable` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    /// Scope start
    pub start: LabelId,
    /// Scope end (exclusive)
    pub end: LabelId,
    /// Name constant index
    pub name: u16,
    /// Descriptor (or signature) constant index
    pub descriptor: u16,
    /// Slot index
    pub index: u16,
}

/// A parsed `Code` attribute
#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    /// Declared operand stack depth
    pub max_stack: u16,
    /// Declared local variable slots
    pub max_locals: u16,
    /// Body in program order
    pub nodes: Vec<Node>,
    /// Exception table
    pub handlers: Vec<Handler>,
    /// Local variable debug table
    pub local_variables: Vec<LocalVariable>,
    /// Local variable generic signature table
    pub local_variable_types: Vec<LocalVariable>,
    /// Whether the original attribute carried a `StackMapTable`
    pub has_stack_map: bool,
    label_count: u32,
}

#[derive(Default)]
struct Labels {
    by_offset: BTreeMap<u32, LabelId>,
    next: u32,
}

impl Labels {
    fn at(&mut self, offset: u32) -> LabelId {
        let next = &mut self.next;
        *self.by_offset.entry(offset).or_insert_with(|| {
            let id = LabelId::new(*next);
            *next += 1;
            id
        })
    }
}

struct RawLocal {
    start: u32,
    length: u32,
    name: u16,
    descriptor: u16,
    index: u16,
}

impl Code {
    /// Parse the body of a `Code` attribute
    pub fn parse(data: &[u8], pool: &ConstantPool, initial: &Frame) -> FormatResult<Self> {
        let mut input = Cursor::new(data);
        let max_stack = input.read_u16::<BigEndian>()?;
        let max_locals = input.read_u16::<BigEndian>()?;
        let code_length = input.read_u32::<BigEndian>()?;
        if code_length == 0 || code_length > MAX_CODE_LENGTH {
            return Err(FormatError::new(format!("invalid code length {code_length}")));
        }
        let mut code = vec![0u8; code_length as usize];
        input.read_exact(&mut code)?;

        let mut labels = Labels::default();
        let insns = decode_instructions(&code, &mut labels)?;
        let insn_offsets: BTreeSet<u32> = insns.iter().map(|(offset, _)| *offset).collect();
        let valid = |offset: u32| insn_offsets.contains(&offset) || offset == code_length;

        let handler_count = input.read_u16::<BigEndian>()?;
        let mut handlers = Vec::with_capacity(usize::from(handler_count));
        for _ in 0..handler_count {
            let start = u32::from(input.read_u16::<BigEndian>()?);
            let end = u32::from(input.read_u16::<BigEndian>()?);
            let handler = u32::from(input.read_u16::<BigEndian>()?);
            let catch_type = input.read_u16::<BigEndian>()?;
            if !valid(start) || !valid(end) || !insn_offsets.contains(&handler) {
                return Err(FormatError::new("exception table entry outside code"));
            }
            handlers.push(Handler {
                start: labels.at(start),
                end: labels.at(end),
                handler: labels.at(handler),
                catch_type,
            });
        }

        let mut lines: BTreeMap<u32, Vec<u16>> = BTreeMap::new();
        let mut raw_locals = Vec::new();
        let mut raw_local_types = Vec::new();
        let mut stack_map: Option<Vec<u8>> = None;
        let attribute_count = input.read_u16::<BigEndian>()?;
        for _ in 0..attribute_count {
            let name_index = input.read_u16::<BigEndian>()?;
            let length = input.read_u32::<BigEndian>()?;
            let mut body = vec![0u8; length as usize];
            input.read_exact(&mut body)?;
            let name = pool.utf8(name_index)?;
            match name.as_ref() {
                LINE_NUMBER_TABLE => {
                    let mut attr = Cursor::new(body.as_slice());
                    for _ in 0..attr.read_u16::<BigEndian>()? {
                        let pc = u32::from(attr.read_u16::<BigEndian>()?);
                        let line = attr.read_u16::<BigEndian>()?;
                        if insn_offsets.contains(&pc) {
                            lines.entry(pc).or_default().push(line);
                        }
                    }
                }
                LOCAL_VARIABLE_TABLE => raw_locals = read_locals(&body)?,
                LOCAL_VARIABLE_TYPE_TABLE => raw_local_types = read_locals(&body)?,
                STACK_MAP_TABLE => stack_map = Some(body),
                other => debug!(attribute = other, "dropping code attribute"),
            }
        }

        for pc in lines.keys() {
            let _ = labels.at(*pc);
        }
        let mut to_locals = |raw: Vec<RawLocal>| -> Vec<LocalVariable> {
            raw.into_iter()
                .filter(|l| valid(l.start) && valid(l.start + l.length))
                .map(|l| LocalVariable {
                    start: labels.at(l.start),
                    end: labels.at(l.start + l.length),
                    name: l.name,
                    descriptor: l.descriptor,
                    index: l.index,
                })
                .collect()
        };
        let local_variables = to_locals(raw_locals);
        let local_variable_types = to_locals(raw_local_types);

        let has_stack_map = stack_map.is_some();
        let mut frames = BTreeMap::new();
        if let Some(body) = stack_map {
            for (offset, frame) in decode_stack_map(&body, initial, pool, |o| labels.at(o))? {
                if insn_offsets.contains(&offset) {
                    let _ = labels.at(offset);
                    let _ = frames.insert(offset, frame);
                } else {
                    return Err(FormatError::new(format!(
                        "stack map frame at invalid offset {offset}"
                    )));
                }
            }
        }

        let mut nodes = Vec::with_capacity(insns.len() * 2);
        for (offset, insn) in insns {
            if let Some(label) = labels.by_offset.get(&offset) {
                nodes.push(Node::Label(*label));
            }
            if let Some(numbers) = lines.remove(&offset) {
                nodes.extend(numbers.into_iter().map(Node::Line));
            }
            if let Some(frame) = frames.remove(&offset) {
                nodes.push(Node::Frame(frame));
            }
            nodes.push(Node::Insn(insn));
        }
        if let Some(label) = labels.by_offset.get(&code_length) {
            nodes.push(Node::Label(*label));
        }
        if let Some(stray) = labels.by_offset.keys().find(|o| !valid(**o)) {
            return Err(FormatError::new(format!(
                "reference to offset {stray} inside an instruction"
            )));
        }

        Ok(Self {
            max_stack,
            max_locals,
            nodes,
            handlers,
            local_variables,
            local_variable_types,
            has_stack_map,
            label_count: labels.next,
        })
    }

    /// Empty body for a generated method
    #[must_use]
    pub const fn empty(max_stack: u16, max_locals: u16) -> Self {
        Self {
            max_stack,
            max_locals,
            nodes: Vec::new(),
            handlers: Vec::new(),
            local_variables: Vec::new(),
            local_variable_types: Vec::new(),
            has_stack_map: false,
            label_count: 0,
        }
    }

    /// Allocate a fresh label
    pub fn new_label(&mut self) -> LabelId {
        let id = LabelId::new(self.label_count);
        self.label_count += 1;
        id
    }

    /// Number of labels allocated so far
    #[must_use]
    pub const fn label_count(&self) -> u32 {
        self.label_count
    }

    /// Iterate over instructions only
    pub fn instructions(&self) -> impl Iterator<Item = &Insn> {
        self.nodes.iter().filter_map(|n| match n {
            Node::Insn(insn) => Some(insn),
            _ => None,
        })
    }

    /// Assemble into the body of a `Code` attribute
    ///
    /// Frames are written only when `with_frames` is set; otherwise frame
    /// nodes are ignored and no `StackMapTable` is produced.
    pub fn write(
        &self,
        pool: &mut ConstantPool,
        initial: &Frame,
        with_frames: bool,
    ) -> FormatResult<Vec<u8>> {
        let mut label_offsets: Vec<Option<u32>> = vec![None; self.label_count as usize];
        let mut offset = 0u32;
        for node in &self.nodes {
            match node {
                Node::Label(label) => {
                    let slot = label_offsets
                        .get_mut(label.index())
                        .ok_or_else(|| FormatError::new("label out of range"))?;
                    *slot = Some(offset);
                }
                Node::Insn(insn) => offset += insn.size(offset),
                Node::Line(_) | Node::Frame(_) => {}
            }
        }
        let code_length = offset;
        if code_length == 0 || code_length > MAX_CODE_LENGTH {
            return Err(FormatError::new(format!(
                "method code too large ({code_length} bytes)"
            )));
        }
        let offset_of = |label: LabelId| -> FormatResult<u32> {
            label_offsets
                .get(label.index())
                .copied()
                .flatten()
                .ok_or_else(|| FormatError::new(format!("unplaced label {}", label.as_u32())))
        };

        let mut code = Vec::with_capacity(code_length as usize);
        let mut lines: Vec<(u32, u16)> = Vec::new();
        let mut frames: Vec<(u32, &Frame)> = Vec::new();
        for node in &self.nodes {
            let at = code.len() as u32;
            match node {
                Node::Label(_) => {}
                Node::Line(line) => lines.push((at, *line)),
                Node::Frame(frame) => {
                    if frames.last().map_or(true, |(o, _)| *o != at) {
                        frames.push((at, frame));
                    }
                }
                Node::Insn(insn) => encode_insn(&mut code, insn, at, &offset_of)?,
            }
        }
        frames.retain(|(o, _)| *o < code_length);

        let mut out = Vec::with_capacity(code.len() + 64);
        out.write_u16::<BigEndian>(self.max_stack)?;
        out.write_u16::<BigEndian>(self.max_locals)?;
        out.write_u32::<BigEndian>(code_length)?;
        out.extend_from_slice(&code);

        let mut table = Vec::new();
        for h in &self.handlers {
            let (start, end) = (offset_of(h.start)?, offset_of(h.end)?);
            if start < end {
                table.push((start, end, offset_of(h.handler)?, h.catch_type));
            }
        }
        out.write_u16::<BigEndian>(table.len() as u16)?;
        for (start, end, handler, catch_type) in table {
            out.write_u16::<BigEndian>(start as u16)?;
            out.write_u16::<BigEndian>(end as u16)?;
            out.write_u16::<BigEndian>(handler as u16)?;
            out.write_u16::<BigEndian>(catch_type)?;
        }

        let mut attributes: Vec<(&str, Vec<u8>)> = Vec::new();
        if !lines.is_empty() {
            let mut body = Vec::with_capacity(2 + lines.len() * 4);
            body.write_u16::<BigEndian>(lines.len() as u16)?;
            for (pc, line) in &lines {
                body.write_u16::<BigEndian>(*pc as u16)?;
                body.write_u16::<BigEndian>(*line)?;
            }
            attributes.push((LINE_NUMBER_TABLE, body));
        }
        for (name, table) in [
            (LOCAL_VARIABLE_TABLE, &self.local_variables),
            (LOCAL_VARIABLE_TYPE_TABLE, &self.local_variable_types),
        ] {
            if !table.is_empty() {
                attributes.push((name, write_locals(table, &offset_of)?));
            }
        }
        if with_frames && !frames.is_empty() {
            let body = encode_stack_map(&frames, initial, pool, &offset_of)?;
            attributes.push((STACK_MAP_TABLE, body));
        }

        out.write_u16::<BigEndian>(attributes.len() as u16)?;
        for (name, body) in attributes {
            out.write_u16::<BigEndian>(pool.add_utf8(name)?)?;
            out.write_u32::<BigEndian>(body.len() as u32)?;
            out.extend_from_slice(&body);
        }
        Ok(out)
    }
}

fn read_locals(body: &[u8]) -> FormatResult<Vec<RawLocal>> {
    let mut input = Cursor::new(body);
    let count = input.read_u16::<BigEndian>()?;
    (0..count)
        .map(|_| {
            Ok(RawLocal {
                start: u32::from(input.read_u16::<BigEndian>()?),
                length: u32::from(input.read_u16::<BigEndian>()?),
                name: input.read_u16::<BigEndian>()?,
                descriptor: input.read_u16::<BigEndian>()?,
                index: input.read_u16::<BigEndian>()?,
            })
        })
        .collect()
}

fn write_locals(
    table: &[LocalVariable],
    offset_of: &impl Fn(LabelId) -> FormatResult<u32>,
) -> FormatResult<Vec<u8>> {
    let mut body = Vec::with_capacity(2 + table.len() * 10);
    body.write_u16::<BigEndian>(table.len() as u16)?;
    for local in table {
        let start = offset_of(local.start)?;
        let end = offset_of(local.end)?;
        body.write_u16::<BigEndian>(start as u16)?;
        body.write_u16::<BigEndian>(end.saturating_sub(start) as u16)?;
        body.write_u16::<BigEndian>(local.name)?;
        body.write_u16::<BigEndian>(local.descriptor)?;
        body.write_u16::<BigEndian>(local.index)?;
    }
    Ok(body)
}

const fn is_simple(opcode: u8) -> bool {
    matches!(
        opcode,
        0..=15 | 46..=53 | 79..=131 | 133..=152 | 172..=177 | 190 | 191 | 194 | 195
    )
}

fn decode_instructions(code: &[u8], labels: &mut Labels) -> FormatResult<Vec<(u32, Insn)>> {
    let code_length = code.len() as u32;
    let mut input = Cursor::new(code);
    let mut insns = Vec::new();
    let target = |labels: &mut Labels, base: u32, delta: i64| -> FormatResult<LabelId> {
        let at = i64::from(base) + delta;
        if at < 0 || at >= i64::from(code_length) {
            return Err(FormatError::new(format!("branch target {at} outside code")));
        }
        Ok(labels.at(at as u32))
    };

    while (input.position() as usize) < code.len() {
        let offset = input.position() as u32;
        let opcode = input.read_u8()?;
        let insn = match opcode {
            op if is_simple(op) => Insn::Simple(op),
            BIPUSH => Insn::Int {
                opcode,
                operand: i32::from(input.read_i8()?),
            },
            SIPUSH => Insn::Int {
                opcode,
                operand: i32::from(input.read_i16::<BigEndian>()?),
            },
            NEWARRAY => Insn::Int {
                opcode,
                operand: i32::from(input.read_u8()?),
            },
            LDC => Insn::Ldc {
                index: u16::from(input.read_u8()?),
                double_word: false,
            },
            LDC_W | LDC2_W => Insn::Ldc {
                index: input.read_u16::<BigEndian>()?,
                double_word: opcode == LDC2_W,
            },
            ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Insn::Var {
                opcode,
                var: u16::from(input.read_u8()?),
            },
            ILOAD_0..=ALOAD_3 => Insn::Var {
                opcode: ILOAD + (opcode - ILOAD_0) / 4,
                var: u16::from((opcode - ILOAD_0) % 4),
            },
            ISTORE_0..=ASTORE_3 => Insn::Var {
                opcode: ISTORE + (opcode - ISTORE_0) / 4,
                var: u16::from((opcode - ISTORE_0) % 4),
            },
            IINC => Insn::Iinc {
                var: u16::from(input.read_u8()?),
                incr: i16::from(input.read_i8()?),
            },
            opcodes::IFEQ..=JSR | opcodes::IFNULL | opcodes::IFNONNULL => Insn::Jump {
                opcode,
                target: target(labels, offset, i64::from(input.read_i16::<BigEndian>()?))?,
            },
            GOTO_W | JSR_W => Insn::Jump {
                opcode: if opcode == GOTO_W { GOTO } else { JSR },
                target: target(labels, offset, i64::from(input.read_i32::<BigEndian>()?))?,
            },
            TABLESWITCH => {
                for _ in 0..switch_padding(offset) {
                    let _ = input.read_u8()?;
                }
                let default = target(labels, offset, i64::from(input.read_i32::<BigEndian>()?))?;
                let low = input.read_i32::<BigEndian>()?;
                let high = input.read_i32::<BigEndian>()?;
                if high < low {
                    return Err(FormatError::new("tableswitch high below low"));
                }
                let count = i64::from(high) - i64::from(low) + 1;
                let mut targets = Vec::new();
                for _ in 0..count {
                    targets.push(target(labels, offset, i64::from(input.read_i32::<BigEndian>()?))?);
                }
                Insn::TableSwitch {
                    default,
                    low,
                    targets,
                }
            }
            LOOKUPSWITCH => {
                for _ in 0..switch_padding(offset) {
                    let _ = input.read_u8()?;
                }
                let default = target(labels, offset, i64::from(input.read_i32::<BigEndian>()?))?;
                let count = input.read_i32::<BigEndian>()?;
                if count < 0 {
                    return Err(FormatError::new("negative lookupswitch pair count"));
                }
                let mut pairs = Vec::new();
                for _ in 0..count {
                    let key = input.read_i32::<BigEndian>()?;
                    pairs.push((key, target(labels, offset, i64::from(input.read_i32::<BigEndian>()?))?));
                }
                Insn::LookupSwitch { default, pairs }
            }
            opcodes::GETSTATIC..=opcodes::PUTFIELD => Insn::Field {
                opcode,
                index: input.read_u16::<BigEndian>()?,
            },
            opcodes::INVOKEVIRTUAL..=opcodes::INVOKESTATIC => Insn::Method {
                opcode,
                index: input.read_u16::<BigEndian>()?,
            },
            opcodes::INVOKEINTERFACE => {
                let index = input.read_u16::<BigEndian>()?;
                let count = input.read_u8()?;
                let _ = input.read_u8()?;
                Insn::Interface { index, count }
            }
            opcodes::INVOKEDYNAMIC => {
                let index = input.read_u16::<BigEndian>()?;
                let _ = input.read_u16::<BigEndian>()?;
                Insn::Dynamic { index }
            }
            NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => {
                if opcode == NEW {
                    let _ = labels.at(offset);
                }
                Insn::Type {
                    opcode,
                    index: input.read_u16::<BigEndian>()?,
                }
            }
            MULTIANEWARRAY => Insn::MultiANewArray {
                index: input.read_u16::<BigEndian>()?,
                dims: input.read_u8()?,
            },
            WIDE => {
                let inner = input.read_u8()?;
                match inner {
                    IINC => Insn::Iinc {
                        var: input.read_u16::<BigEndian>()?,
                        incr: input.read_i16::<BigEndian>()?,
                    },
                    ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Insn::Var {
                        opcode: inner,
                        var: input.read_u16::<BigEndian>()?,
                    },
                    other => {
                        return Err(FormatError::new(format!(
                            "invalid wide opcode {other} at {offset}"
                        )))
                    }
                }
            }
            other => {
                return Err(FormatError::new(format!(
                    "invalid opcode {other} at {offset}"
                )))
            }
        };
        insns.push((offset, insn));
    }
    Ok(insns)
}

fn encode_insn(
    out: &mut Vec<u8>,
    insn: &Insn,
    at: u32,
    offset_of: &impl Fn(LabelId) -> FormatResult<u32>,
) -> FormatResult<()> {
    let relative = |label: LabelId| -> FormatResult<i64> {
        Ok(i64::from(offset_of(label)?) - i64::from(at))
    };
    match insn {
        Insn::Simple(opcode) => out.write_u8(*opcode)?,
        Insn::Int { opcode, operand } => {
            out.write_u8(*opcode)?;
            if *opcode == SIPUSH {
                out.write_i16::<BigEndian>(*operand as i16)?;
            } else {
                out.write_u8(*operand as u8)?;
            }
        }
        Insn::Var { opcode, var } => {
            let is_ret = *opcode == RET;
            if !is_ret && *var <= 3 {
                let short_base = if *opcode >= ISTORE { ISTORE_0 } else { ILOAD_0 };
                let long_base = if *opcode >= ISTORE { ISTORE } else { ILOAD };
                out.write_u8(short_base + (opcode - long_base) * 4 + *var as u8)?;
            } else if *var <= 0xFF {
                out.write_u8(*opcode)?;
                out.write_u8(*var as u8)?;
            } else {
                out.write_u8(WIDE)?;
                out.write_u8(*opcode)?;
                out.write_u16::<BigEndian>(*var)?;
            }
        }
        Insn::Type { opcode, index }
        | Insn::Field { opcode, index }
        | Insn::Method { opcode, index } => {
            out.write_u8(*opcode)?;
            out.write_u16::<BigEndian>(*index)?;
        }
        Insn::Interface { index, count } => {
            out.write_u8(opcodes::INVOKEINTERFACE)?;
            out.write_u16::<BigEndian>(*index)?;
            out.write_u8(*count)?;
            out.write_u8(0)?;
        }
        Insn::Dynamic { index } => {
            out.write_u8(opcodes::INVOKEDYNAMIC)?;
            out.write_u16::<BigEndian>(*index)?;
            out.write_u16::<BigEndian>(0)?;
        }
        Insn::Ldc { index, .. } => {
            let opcode = insn.opcode();
            out.write_u8(opcode)?;
            if opcode == LDC {
                out.write_u8(*index as u8)?;
            } else {
                out.write_u16::<BigEndian>(*index)?;
            }
        }
        Insn::Iinc { var, incr } => {
            if let (true, Ok(small)) = (*var <= 0xFF, i8::try_from(*incr)) {
                out.write_u8(IINC)?;
                out.write_u8(*var as u8)?;
                out.write_i8(small)?;
            } else {
                out.write_u8(WIDE)?;
                out.write_u8(IINC)?;
                out.write_u16::<BigEndian>(*var)?;
                out.write_i16::<BigEndian>(*incr)?;
            }
        }
        Insn::Jump { opcode, target } => {
            let delta = i16::try_from(relative(*target)?)
                .map_err(|_| FormatError::new("branch offset exceeds 16 bits"))?;
            out.write_u8(*opcode)?;
            out.write_i16::<BigEndian>(delta)?;
        }
        Insn::TableSwitch {
            default,
            low,
            targets,
        } => {
            out.write_u8(TABLESWITCH)?;
            for _ in 0..switch_padding(at) {
                out.write_u8(0)?;
            }
            out.write_i32::<BigEndian>(relative(*default)? as i32)?;
            out.write_i32::<BigEndian>(*low)?;
            out.write_i32::<BigEndian>(*low + targets.len() as i32 - 1)?;
            for label in targets {
                out.write_i32::<BigEndian>(relative(*label)? as i32)?;
            }
        }
        Insn::LookupSwitch { default, pairs } => {
            out.write_u8(LOOKUPSWITCH)?;
            for _ in 0..switch_padding(at) {
                out.write_u8(0)?;
            }
            out.write_i32::<BigEndian>(relative(*default)? as i32)?;
            out.write_i32::<BigEndian>(pairs.len() as i32)?;
            for (key, label) in pairs {
                out.write_i32::<BigEndian>(*key)?;
                out.write_i32::<BigEndian>(relative(*label)? as i32)?;
            }
        }
        Insn::MultiANewArray { index, dims } => {
            out.write_u8(MULTIANEWARRAY)?;
            out.write_u16::<BigEndian>(*index)?;
            out.write_u8(*dims)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::classfile::frames::VType;
    use crate::classfile::opcodes::*;

    fn assemble(code_bytes: &[u8], max_locals: u16) -> Vec<u8> {
        let mut data = Vec::new();
        data.write_u16::<BigEndian>(4).unwrap();
        data.write_u16::<BigEndian>(max_locals).unwrap();
        data.write_u32::<BigEndian>(code_bytes.len() as u32).unwrap();
        data.extend_from_slice(code_bytes);
        data.write_u16::<BigEndian>(0).unwrap();
        data.write_u16::<BigEndian>(0).unwrap();
        data
    }

    fn static_initial() -> Frame {
        Frame {
            locals: vec![VType::Integer],
            stack: vec![],
        }
    }

    #[test]
    fn test_short_forms_normalized() {
        let data = assemble(&[ILOAD_0 + 1, ISTORE_0 + 2, IRETURN], 3);
        let pool = ConstantPool::new();
        let code = Code::parse(&data, &pool, &static_initial()).unwrap();
        let insns: Vec<_> = code.instructions().cloned().collect();
        assert_eq!(
            insns,
            vec![
                Insn::Var { opcode: ILOAD, var: 1 },
                Insn::Var { opcode: ISTORE, var: 2 },
                Insn::Simple(IRETURN),
            ]
        );
    }

    #[test]
    fn test_branch_creates_label_before_target() {
        // iload_0; ifeq +5; iconst_1; ireturn; iconst_0; ireturn
        let data = assemble(&[ILOAD_0, IFEQ, 0, 5, ICONST_1, IRETURN, ICONST_0, IRETURN], 1);
        let pool = ConstantPool::new();
        let code = Code::parse(&data, &pool, &static_initial()).unwrap();
        let target = match &code.nodes[1] {
            Node::Insn(Insn::Jump { target, .. }) => *target,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(code.nodes[4], Node::Label(target));
        assert_eq!(code.nodes[5], Node::Insn(Insn::Simple(ICONST_0)));
    }

    #[test]
    fn test_write_reproduces_simple_code() {
        let bytes = [ILOAD_0, IFEQ, 0, 5, ICONST_1, IRETURN, ICONST_0, IRETURN];
        let data = assemble(&bytes, 1);
        let mut pool = ConstantPool::new();
        let code = Code::parse(&data, &pool, &static_initial()).unwrap();
        let written = code.write(&mut pool, &static_initial(), false).unwrap();
        assert_eq!(written, data);
    }

    #[test]
    fn test_inserted_code_shifts_branches() {
        let bytes = [ILOAD_0, IFEQ, 0, 5, ICONST_1, IRETURN, ICONST_0, IRETURN];
        let mut pool = ConstantPool::new();
        let mut code = Code::parse(&assemble(&bytes, 1), &pool, &static_initial()).unwrap();
        code.nodes.insert(0, Node::Insn(Insn::Simple(NOP)));
        let written = code.write(&mut pool, &static_initial(), false).unwrap();
        let body = &written[8..8 + 9];
        assert_eq!(body, &[NOP, ILOAD_0, IFEQ, 0, 5, ICONST_1, IRETURN, ICONST_0, IRETURN]);
    }

    #[test]
    fn test_wide_var_round_trip() {
        let bytes = [WIDE, ILOAD, 0x01, 0x00, IRETURN];
        let mut pool = ConstantPool::new();
        let code = Code::parse(&assemble(&bytes, 300), &pool, &static_initial()).unwrap();
        assert_eq!(
            code.instructions().next(),
            Some(&Insn::Var { opcode: ILOAD, var: 256 })
        );
        let written = code.write(&mut pool, &static_initial(), false).unwrap();
        assert_eq!(&written[8..13], &bytes);
    }

    #[test]
    fn test_tableswitch_padding() {
        // iload_0 at 0, tableswitch at 1 -> pad 2 bytes, then default/low/high/1 target
        let mut bytes = vec![ILOAD_0, TABLESWITCH, 0, 0];
        for v in [23i32, 0, 0, 23] {
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        bytes.extend_from_slice(&[NOP, NOP, NOP, NOP, NOP, NOP]);
        bytes.push(RETURN);
        let mut pool = ConstantPool::new();
        let code = Code::parse(&assemble(&bytes, 1), &pool, &static_initial()).unwrap();
        assert!(matches!(
            code.instructions().nth(1),
            Some(Insn::TableSwitch { targets, .. }) if targets.len() == 1
        ));
        let written = code.write(&mut pool, &static_initial(), false).unwrap();
        assert_eq!(&written[8..8 + bytes.len()], bytes.as_slice());
    }

    #[test]
    fn test_invalid_opcode_rejected() {
        let pool = ConstantPool::new();
        assert!(Code::parse(&assemble(&[0xFE], 0), &pool, &Frame::default()).is_err());
    }

    #[test]
    fn test_branch_outside_code_rejected() {
        let pool = ConstantPool::new();
        let data = assemble(&[GOTO, 0, 40, RETURN], 0);
        assert!(Code::parse(&data, &pool, &Frame::default()).is_err());
    }
}
