//! Constant pool: parsed entries, lazy string decoding, deduplicated inserts.

use super::{mutf8, FormatError, FormatResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Read;

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_INTERFACE_METHODREF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_HANDLE: u8 = 15;
const TAG_METHOD_TYPE: u8 = 16;
const TAG_DYNAMIC: u8 = 17;
const TAG_INVOKE_DYNAMIC: u8 = 18;
const TAG_MODULE: u8 = 19;
const TAG_PACKAGE: u8 = 20;

/// `REF_invokeStatic` method handle kind
pub const REF_INVOKE_STATIC: u8 = 6;

/// One constant pool entry
///
/// Strings keep their raw modified UTF-8 bytes; floats keep their bit
/// pattern so that entries can be hashed for deduplication.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    /// Slot 0 and the upper half of long/double entries
    Unusable,
    /// Raw modified UTF-8 bytes
    Utf8(Vec<u8>),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType(u16),
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module(u16),
    Package(u16),
}

impl Constant {
    const fn is_wide(&self) -> bool {
        matches!(self, Self::Long(_) | Self::Double(_))
    }
}

/// A resolved field or method reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    /// Internal name of the owner
    pub owner: String,
    /// Member name
    pub name: String,
    /// Member descriptor
    pub descriptor: String,
}

/// Class file constant pool
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    lookup: HashMap<Constant, u16>,
}

impl ConstantPool {
    /// Create an empty pool (slot 0 reserved)
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: vec![Constant::Unusable],
            lookup: HashMap::new(),
        }
    }

    /// Parse the pool from `constant_pool_count` onward
    pub fn parse<R: Read>(input: &mut R) -> FormatResult<Self> {
        let count = input.read_u16::<BigEndian>()?;
        if count == 0 {
            return Err(FormatError::new("constant pool count is zero"));
        }
        let mut pool = Self::new();
        let mut index = 1u16;
        while index < count {
            let tag = input.read_u8()?;
            let constant = match tag {
                TAG_UTF8 => {
                    let len = input.read_u16::<BigEndian>()? as usize;
                    let mut bytes = vec![0u8; len];
                    input.read_exact(&mut bytes)?;
                    Constant::Utf8(bytes)
                }
                TAG_INTEGER => Constant::Integer(input.read_i32::<BigEndian>()?),
                TAG_FLOAT => Constant::Float(input.read_u32::<BigEndian>()?),
                TAG_LONG => Constant::Long(input.read_i64::<BigEndian>()?),
                TAG_DOUBLE => Constant::Double(input.read_u64::<BigEndian>()?),
                TAG_CLASS => Constant::Class(input.read_u16::<BigEndian>()?),
                TAG_STRING => Constant::String(input.read_u16::<BigEndian>()?),
                TAG_FIELDREF | TAG_METHODREF | TAG_INTERFACE_METHODREF => {
                    let class = input.read_u16::<BigEndian>()?;
                    let name_and_type = input.read_u16::<BigEndian>()?;
                    match tag {
                        TAG_FIELDREF => Constant::FieldRef { class, name_and_type },
                        TAG_METHODREF => Constant::MethodRef { class, name_and_type },
                        _ => Constant::InterfaceMethodRef { class, name_and_type },
                    }
                }
                TAG_NAME_AND_TYPE => Constant::NameAndType {
                    name: input.read_u16::<BigEndian>()?,
                    descriptor: input.read_u16::<BigEndian>()?,
                },
                TAG_METHOD_HANDLE => Constant::MethodHandle {
                    kind: input.read_u8()?,
                    reference: input.read_u16::<BigEndian>()?,
                },
                TAG_METHOD_TYPE => Constant::MethodType(input.read_u16::<BigEndian>()?),
                TAG_DYNAMIC | TAG_INVOKE_DYNAMIC => {
                    let bootstrap = input.read_u16::<BigEndian>()?;
                    let name_and_type = input.read_u16::<BigEndian>()?;
                    if tag == TAG_DYNAMIC {
                        Constant::Dynamic { bootstrap, name_and_type }
                    } else {
                        Constant::InvokeDynamic { bootstrap, name_and_type }
                    }
                }
                TAG_MODULE => Constant::Module(input.read_u16::<BigEndian>()?),
                TAG_PACKAGE => Constant::Package(input.read_u16::<BigEndian>()?),
                other => {
                    return Err(FormatError::new(format!(
                        "unknown constant pool tag {other} at index {index}"
                    )))
                }
            };
            let wide = constant.is_wide();
            let _ = pool.lookup.entry(constant.clone()).or_insert(index);
            pool.entries.push(constant);
            index += 1;
            if wide {
                pool.entries.push(Constant::Unusable);
                index += 1;
            }
        }
        Ok(pool)
    }

    /// Write `constant_pool_count` and all entries
    pub fn write(&self, out: &mut Vec<u8>) -> FormatResult<()> {
        out.write_u16::<BigEndian>(self.count())?;
        for constant in &self.entries {
            match constant {
                Constant::Unusable => {}
                Constant::Utf8(bytes) => {
                    out.write_u8(TAG_UTF8)?;
                    out.write_u16::<BigEndian>(bytes.len() as u16)?;
                    out.extend_from_slice(bytes);
                }
                Constant::Integer(v) => {
                    out.write_u8(TAG_INTEGER)?;
                    out.write_i32::<BigEndian>(*v)?;
                }
                Constant::Float(bits) => {
                    out.write_u8(TAG_FLOAT)?;
                    out.write_u32::<BigEndian>(*bits)?;
                }
                Constant::Long(v) => {
                    out.write_u8(TAG_LONG)?;
                    out.write_i64::<BigEndian>(*v)?;
                }
                Constant::Double(bits) => {
                    out.write_u8(TAG_DOUBLE)?;
                    out.write_u64::<BigEndian>(*bits)?;
                }
                Constant::Class(i) => write_tagged(out, TAG_CLASS, &[*i])?,
                Constant::String(i) => write_tagged(out, TAG_STRING, &[*i])?,
                Constant::FieldRef { class, name_and_type } => {
                    write_tagged(out, TAG_FIELDREF, &[*class, *name_and_type])?;
                }
                Constant::MethodRef { class, name_and_type } => {
                    write_tagged(out, TAG_METHODREF, &[*class, *name_and_type])?;
                }
                Constant::InterfaceMethodRef { class, name_and_type } => {
                    write_tagged(out, TAG_INTERFACE_METHODREF, &[*class, *name_and_type])?;
                }
                Constant::NameAndType { name, descriptor } => {
                    write_tagged(out, TAG_NAME_AND_TYPE, &[*name, *descriptor])?;
                }
                Constant::MethodHandle { kind, reference } => {
                    out.write_u8(TAG_METHOD_HANDLE)?;
                    out.write_u8(*kind)?;
                    out.write_u16::<BigEndian>(*reference)?;
                }
                Constant::MethodType(i) => write_tagged(out, TAG_METHOD_TYPE, &[*i])?,
                Constant::Dynamic { bootstrap, name_and_type } => {
                    write_tagged(out, TAG_DYNAMIC, &[*bootstrap, *name_and_type])?;
                }
                Constant::InvokeDynamic { bootstrap, name_and_type } => {
                    write_tagged(out, TAG_INVOKE_DYNAMIC, &[*bootstrap, *name_and_type])?;
                }
                Constant::Module(i) => write_tagged(out, TAG_MODULE, &[*i])?,
                Constant::Package(i) => write_tagged(out, TAG_PACKAGE, &[*i])?,
            }
        }
        Ok(())
    }

    /// Value of `constant_pool_count` (number of slots plus one)
    #[must_use]
    pub fn count(&self) -> u16 {
        self.entries.len() as u16
    }

    /// Look up an entry
    pub fn get(&self, index: u16) -> FormatResult<&Constant> {
        match self.entries.get(index as usize) {
            Some(Constant::Unusable) | None => Err(FormatError::new(format!(
                "invalid constant pool index {index}"
            ))),
            Some(constant) => Ok(constant),
        }
    }

    /// Decode a `CONSTANT_Utf8` entry
    pub fn utf8(&self, index: u16) -> FormatResult<Cow<'_, str>> {
        match self.get(index)? {
            // NUL and surrogate encodings are invalid UTF-8, so anything
            // std accepts decodes identically.
            Constant::Utf8(bytes) => match std::str::from_utf8(bytes) {
                Ok(s) => Ok(Cow::Borrowed(s)),
                Err(_) => mutf8::decode(bytes).map(Cow::Owned),
            },
            other => Err(unexpected(index, "Utf8", other)),
        }
    }

    /// Internal name of a `CONSTANT_Class` entry
    pub fn class_name(&self, index: u16) -> FormatResult<Cow<'_, str>> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(*name),
            other => Err(unexpected(index, "Class", other)),
        }
    }

    /// Name and descriptor of a `CONSTANT_NameAndType` entry
    pub fn name_and_type(&self, index: u16) -> FormatResult<(Cow<'_, str>, Cow<'_, str>)> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            other => Err(unexpected(index, "NameAndType", other)),
        }
    }

    /// Resolve a field, method or interface method reference
    pub fn member_ref(&self, index: u16) -> FormatResult<MemberRef> {
        match self.get(index)? {
            Constant::FieldRef { class, name_and_type }
            | Constant::MethodRef { class, name_and_type }
            | Constant::InterfaceMethodRef { class, name_and_type } => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok(MemberRef {
                    owner: self.class_name(*class)?.into_owned(),
                    name: name.into_owned(),
                    descriptor: descriptor.into_owned(),
                })
            }
            other => Err(unexpected(index, "member reference", other)),
        }
    }

    /// Descriptor of an `invokedynamic` or dynamic constant entry
    pub fn dynamic_descriptor(&self, index: u16) -> FormatResult<Cow<'_, str>> {
        match self.get(index)? {
            Constant::Dynamic { name_and_type, .. }
            | Constant::InvokeDynamic { name_and_type, .. } => {
                Ok(self.name_and_type(*name_and_type)?.1)
            }
            other => Err(unexpected(index, "dynamic constant", other)),
        }
    }

    fn add(&mut self, constant: Constant) -> FormatResult<u16> {
        if let Some(index) = self.lookup.get(&constant) {
            return Ok(*index);
        }
        let width = if constant.is_wide() { 2 } else { 1 };
        let index = self.entries.len();
        if index + width > usize::from(u16::MAX) {
            return Err(FormatError::new("constant pool overflow"));
        }
        let index = index as u16;
        let _ = self.lookup.insert(constant.clone(), index);
        self.entries.push(constant);
        if width == 2 {
            self.entries.push(Constant::Unusable);
        }
        Ok(index)
    }

    /// Add (or find) a `CONSTANT_Utf8`
    pub fn add_utf8(&mut self, value: &str) -> FormatResult<u16> {
        let bytes = mutf8::encode(value);
        if bytes.len() > usize::from(u16::MAX) {
            return Err(FormatError::new("string constant too long"));
        }
        self.add(Constant::Utf8(bytes))
    }

    /// Add (or find) a `CONSTANT_Class`
    pub fn add_class(&mut self, internal_name: &str) -> FormatResult<u16> {
        let name = self.add_utf8(internal_name)?;
        self.add(Constant::Class(name))
    }

    /// Add (or find) a `CONSTANT_String`
    pub fn add_string(&mut self, value: &str) -> FormatResult<u16> {
        let utf8 = self.add_utf8(value)?;
        self.add(Constant::String(utf8))
    }

    /// Add (or find) a `CONSTANT_Integer`
    pub fn add_integer(&mut self, value: i32) -> FormatResult<u16> {
        self.add(Constant::Integer(value))
    }

    /// Add (or find) a `CONSTANT_Long`
    pub fn add_long(&mut self, value: i64) -> FormatResult<u16> {
        self.add(Constant::Long(value))
    }

    /// Add (or find) a `CONSTANT_NameAndType`
    pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> FormatResult<u16> {
        let name = self.add_utf8(name)?;
        let descriptor = self.add_utf8(descriptor)?;
        self.add(Constant::NameAndType { name, descriptor })
    }

    /// Add (or find) a `CONSTANT_Fieldref`
    pub fn add_field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> FormatResult<u16> {
        let class = self.add_class(owner)?;
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        self.add(Constant::FieldRef { class, name_and_type })
    }

    /// Add (or find) a `CONSTANT_Methodref` or `CONSTANT_InterfaceMethodref`
    pub fn add_method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        interface: bool,
    ) -> FormatResult<u16> {
        let class = self.add_class(owner)?;
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        if interface {
            self.add(Constant::InterfaceMethodRef { class, name_and_type })
        } else {
            self.add(Constant::MethodRef { class, name_and_type })
        }
    }

    /// Add (or find) a `CONSTANT_MethodHandle`
    pub fn add_method_handle(&mut self, kind: u8, reference: u16) -> FormatResult<u16> {
        self.add(Constant::MethodHandle { kind, reference })
    }

    /// Add (or find) a `CONSTANT_Dynamic`
    pub fn add_dynamic(&mut self, bootstrap: u16, name: &str, descriptor: &str) -> FormatResult<u16> {
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        self.add(Constant::Dynamic { bootstrap, name_and_type })
    }
}

fn write_tagged(out: &mut Vec<u8>, tag: u8, values: &[u16]) -> FormatResult<()> {
    out.write_u8(tag)?;
    for value in values {
        out.write_u16::<BigEndian>(*value)?;
    }
    Ok(())
}

fn unexpected(index: u16, expected: &str, found: &Constant) -> FormatError {
    FormatError::new(format!(
        "constant pool index {index}: expected {expected}, found {found:?}"
    ))
}
