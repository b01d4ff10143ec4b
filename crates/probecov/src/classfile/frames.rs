//! Verification types and the `StackMapTable` attribute codec.
//!
//! Frames are kept in the class file's own compressed form: a `long` or
//! `double` local occupies one list entry, not two slots.

use super::code::LabelId;
use super::constant_pool::ConstantPool;
use super::descriptor::MethodDescriptor;
use super::{access, FormatError, FormatResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// A verification type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VType {
    /// Unusable slot
    Top,
    /// int, short, char, byte, boolean
    Integer,
    /// float
    Float,
    /// long (one entry, two slots)
    Long,
    /// double (one entry, two slots)
    Double,
    /// The null reference
    Null,
    /// `this` in a constructor before the super call
    UninitializedThis,
    /// Reference type: internal name, or descriptor for arrays
    Object(String),
    /// Result of the `new` instruction at the label
    Uninitialized(LabelId),
}

impl VType {
    /// Whether the type occupies two slots
    #[inline]
    #[must_use]
    pub const fn is_wide(&self) -> bool {
        matches!(self, Self::Long | Self::Double)
    }

    /// Verification type of a value with the given field descriptor
    #[must_use]
    pub fn from_descriptor(descriptor: &str) -> Self {
        match descriptor.as_bytes().first() {
            Some(b'Z' | b'B' | b'C' | b'S' | b'I') => Self::Integer,
            Some(b'F') => Self::Float,
            Some(b'J') => Self::Long,
            Some(b'D') => Self::Double,
            Some(b'L') => Self::Object(
                descriptor
                    .strip_prefix('L')
                    .and_then(|d| d.strip_suffix(';'))
                    .unwrap_or(descriptor)
                    .to_string(),
            ),
            _ => Self::Object(descriptor.to_string()),
        }
    }
}

/// Locals and operand stack at one instruction
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    /// Local variable types
    pub locals: Vec<VType>,
    /// Operand stack types, bottom first
    pub stack: Vec<VType>,
}

impl Frame {
    /// The implicit frame at method entry
    #[must_use]
    pub fn initial(
        class_name: &str,
        method_access: u16,
        method_name: &str,
        descriptor: &MethodDescriptor,
    ) -> Self {
        let mut locals = Vec::with_capacity(descriptor.params.len() + 1);
        if method_access & access::STATIC == 0 {
            if method_name == "<init>" && class_name != "java/lang/Object" {
                locals.push(VType::UninitializedThis);
            } else {
                locals.push(VType::Object(class_name.to_string()));
            }
        }
        locals.extend(descriptor.params.iter().map(|p| VType::from_descriptor(p)));
        Self {
            locals,
            stack: Vec::new(),
        }
    }
}

const SAME_LOCALS_1_STACK_ITEM: u8 = 64;
const SAME_LOCALS_1_STACK_ITEM_EXTENDED: u8 = 247;
const CHOP: u8 = 248;
const SAME_FRAME_EXTENDED: u8 = 251;
const APPEND: u8 = 252;
const FULL_FRAME: u8 = 255;

/// Decode a `StackMapTable` into `(bytecode offset, frame)` pairs
pub fn decode_stack_map(
    data: &[u8],
    initial: &Frame,
    pool: &ConstantPool,
    mut label_at: impl FnMut(u32) -> LabelId,
) -> FormatResult<Vec<(u32, Frame)>> {
    let mut input = Cursor::new(data);
    let count = input.read_u16::<BigEndian>()?;
    let mut frames = Vec::with_capacity(usize::from(count));
    let mut locals = initial.locals.clone();
    let mut offset: Option<u32> = None;

    for _ in 0..count {
        let frame_type = input.read_u8()?;
        let (delta, stack) = match frame_type {
            0..=63 => (u32::from(frame_type), Vec::new()),
            64..=127 => {
                let item = read_vtype(&mut input, pool, &mut label_at)?;
                (u32::from(frame_type - SAME_LOCALS_1_STACK_ITEM), vec![item])
            }
            SAME_LOCALS_1_STACK_ITEM_EXTENDED => {
                let delta = u32::from(input.read_u16::<BigEndian>()?);
                (delta, vec![read_vtype(&mut input, pool, &mut label_at)?])
            }
            CHOP..=250 => {
                let delta = u32::from(input.read_u16::<BigEndian>()?);
                let k = usize::from(SAME_FRAME_EXTENDED - frame_type);
                if k > locals.len() {
                    return Err(FormatError::new("chop frame removes too many locals"));
                }
                locals.truncate(locals.len() - k);
                (delta, Vec::new())
            }
            SAME_FRAME_EXTENDED => (u32::from(input.read_u16::<BigEndian>()?), Vec::new()),
            APPEND..=254 => {
                let delta = u32::from(input.read_u16::<BigEndian>()?);
                for _ in 0..(frame_type - SAME_FRAME_EXTENDED) {
                    locals.push(read_vtype(&mut input, pool, &mut label_at)?);
                }
                (delta, Vec::new())
            }
            FULL_FRAME => {
                let delta = u32::from(input.read_u16::<BigEndian>()?);
                let n_locals = input.read_u16::<BigEndian>()?;
                locals = (0..n_locals)
                    .map(|_| read_vtype(&mut input, pool, &mut label_at))
                    .collect::<FormatResult<_>>()?;
                let n_stack = input.read_u16::<BigEndian>()?;
                let stack = (0..n_stack)
                    .map(|_| read_vtype(&mut input, pool, &mut label_at))
                    .collect::<FormatResult<_>>()?;
                (delta, stack)
            }
            other => {
                return Err(FormatError::new(format!(
                    "reserved stack map frame type {other}"
                )))
            }
        };
        let at = match offset {
            None => delta,
            Some(prev) => prev + delta + 1,
        };
        offset = Some(at);
        frames.push((
            at,
            Frame {
                locals: locals.clone(),
                stack,
            },
        ));
    }
    Ok(frames)
}

fn read_vtype(
    input: &mut Cursor<&[u8]>,
    pool: &ConstantPool,
    label_at: &mut impl FnMut(u32) -> LabelId,
) -> FormatResult<VType> {
    Ok(match input.read_u8()? {
        0 => VType::Top,
        1 => VType::Integer,
        2 => VType::Float,
        3 => VType::Double,
        4 => VType::Long,
        5 => VType::Null,
        6 => VType::UninitializedThis,
        7 => VType::Object(pool.class_name(input.read_u16::<BigEndian>()?)?.into_owned()),
        8 => VType::Uninitialized(label_at(u32::from(input.read_u16::<BigEndian>()?))),
        other => {
            return Err(FormatError::new(format!(
                "unknown verification type tag {other}"
            )))
        }
    })
}

/// Encode frames (sorted by offset) as a compressed `StackMapTable` body
pub fn encode_stack_map(
    frames: &[(u32, &Frame)],
    initial: &Frame,
    pool: &mut ConstantPool,
    offset_of: impl Fn(LabelId) -> FormatResult<u32>,
) -> FormatResult<Vec<u8>> {
    let mut out = Vec::new();
    out.write_u16::<BigEndian>(frames.len() as u16)?;
    let mut prev_locals: &[VType] = &initial.locals;
    let mut prev_offset: Option<u32> = None;

    for (offset, frame) in frames {
        let delta = match prev_offset {
            None => *offset,
            Some(prev) if *offset > prev => offset - prev - 1,
            Some(_) => return Err(FormatError::new("stack map frames out of order")),
        };
        let delta16 = u16::try_from(delta)
            .map_err(|_| FormatError::new("stack map offset delta overflow"))?;
        let locals = frame.locals.as_slice();
        let same_locals = locals == prev_locals;

        if same_locals && frame.stack.is_empty() {
            if delta < 64 {
                out.write_u8(delta as u8)?;
            } else {
                out.write_u8(SAME_FRAME_EXTENDED)?;
                out.write_u16::<BigEndian>(delta16)?;
            }
        } else if same_locals && frame.stack.len() == 1 {
            if delta < 64 {
                out.write_u8(SAME_LOCALS_1_STACK_ITEM + delta as u8)?;
            } else {
                out.write_u8(SAME_LOCALS_1_STACK_ITEM_EXTENDED)?;
                out.write_u16::<BigEndian>(delta16)?;
            }
            write_vtype(&mut out, &frame.stack[0], pool, &offset_of)?;
        } else if frame.stack.is_empty()
            && locals.len() < prev_locals.len()
            && prev_locals.len() - locals.len() <= 3
            && prev_locals.starts_with(locals)
        {
            let k = (prev_locals.len() - locals.len()) as u8;
            out.write_u8(SAME_FRAME_EXTENDED - k)?;
            out.write_u16::<BigEndian>(delta16)?;
        } else if frame.stack.is_empty()
            && locals.len() > prev_locals.len()
            && locals.len() - prev_locals.len() <= 3
            && locals.starts_with(prev_locals)
        {
            let appended = &locals[prev_locals.len()..];
            out.write_u8(SAME_FRAME_EXTENDED + appended.len() as u8)?;
            out.write_u16::<BigEndian>(delta16)?;
            for vtype in appended {
                write_vtype(&mut out, vtype, pool, &offset_of)?;
            }
        } else {
            out.write_u8(FULL_FRAME)?;
            out.write_u16::<BigEndian>(delta16)?;
            out.write_u16::<BigEndian>(locals.len() as u16)?;
            for vtype in locals {
                write_vtype(&mut out, vtype, pool, &offset_of)?;
            }
            out.write_u16::<BigEndian>(frame.stack.len() as u16)?;
            for vtype in &frame.stack {
                write_vtype(&mut out, vtype, pool, &offset_of)?;
            }
        }
        prev_locals = locals;
        prev_offset = Some(*offset);
    }
    Ok(out)
}

fn write_vtype(
    out: &mut Vec<u8>,
    vtype: &VType,
    pool: &mut ConstantPool,
    offset_of: &impl Fn(LabelId) -> FormatResult<u32>,
) -> FormatResult<()> {
    match vtype {
        VType::Top => out.write_u8(0)?,
        VType::Integer => out.write_u8(1)?,
        VType::Float => out.write_u8(2)?,
        VType::Double => out.write_u8(3)?,
        VType::Long => out.write_u8(4)?,
        VType::Null => out.write_u8(5)?,
        VType::UninitializedThis => out.write_u8(6)?,
        VType::Object(name) => {
            out.write_u8(7)?;
            out.write_u16::<BigEndian>(pool.add_class(name)?)?;
        }
        VType::Uninitialized(label) => {
            out.write_u8(8)?;
            out.write_u16::<BigEndian>(offset_of(*label)? as u16)?;
        }
    }
    Ok(())
}
