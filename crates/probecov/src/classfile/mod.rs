//! Class file reading and writing.
//!
//! Only the structure needed for instrumentation is decoded eagerly: the
//! constant pool, members and attributes. Method bodies are decoded on
//! demand through [`code::Code`].

pub mod code;
pub mod constant_pool;
pub mod descriptor;
pub mod frames;
pub mod mutf8;
pub mod opcodes;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use constant_pool::ConstantPool;
use std::io::{self, Cursor, Read};
use thiserror::Error;

/// Access flags
pub mod access {
    /// `ACC_PUBLIC`
    pub const PUBLIC: u16 = 0x0001;
    /// `ACC_PRIVATE`
    pub const PRIVATE: u16 = 0x0002;
    /// `ACC_STATIC`
    pub const STATIC: u16 = 0x0008;
    /// `ACC_FINAL`
    pub const FINAL: u16 = 0x0010;
    /// `ACC_SUPER`
    pub const SUPER: u16 = 0x0020;
    /// `ACC_TRANSIENT`
    pub const TRANSIENT: u16 = 0x0080;
    /// `ACC_NATIVE`
    pub const NATIVE: u16 = 0x0100;
    /// `ACC_INTERFACE`
    pub const INTERFACE: u16 = 0x0200;
    /// `ACC_ABSTRACT`
    pub const ABSTRACT: u16 = 0x0400;
    /// `ACC_SYNTHETIC`
    pub const SYNTHETIC: u16 = 0x1000;
    /// `ACC_MODULE`
    pub const MODULE: u16 = 0x8000;
}

/// First four bytes of every class file
pub const MAGIC: u32 = 0xCAFE_BABE;

/// Oldest supported major version (Java 1.1)
pub const MIN_MAJOR_VERSION: u16 = 45;

/// Newest supported major version (Java 25)
pub const MAX_MAJOR_VERSION: u16 = 69;

/// Major version that requires stack map frames (Java 7)
pub const FRAMES_MAJOR_VERSION: u16 = 51;

/// Structural problem in class file bytes
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct FormatError {
    message: String,
}

impl FormatError {
    /// Create a format error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for FormatError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::new("unexpected end of class file")
        } else {
            Self::new(err.to_string())
        }
    }
}

/// Result type for class file codec operations
pub type FormatResult<T> = Result<T, FormatError>;

/// A raw attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Constant pool index of the attribute name
    pub name_index: u16,
    /// Attribute body
    pub info: Vec<u8>,
}

/// A field or method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    /// Access flags
    pub access: u16,
    /// Constant pool index of the name
    pub name_index: u16,
    /// Constant pool index of the descriptor
    pub descriptor_index: u16,
    /// Member attributes
    pub attributes: Vec<Attribute>,
}

/// A parsed class file
#[derive(Debug, Clone)]
pub struct ClassFile {
    /// Minor version
    pub minor_version: u16,
    /// Major version
    pub major_version: u16,
    /// Constant pool
    pub pool: ConstantPool,
    /// Class access flags
    pub access: u16,
    /// Constant pool index of this class
    pub this_class: u16,
    /// Constant pool index of the super class, 0 for none
    pub super_class: u16,
    /// Implemented interfaces
    pub interfaces: Vec<u16>,
    /// Fields
    pub fields: Vec<MemberInfo>,
    /// Methods
    pub methods: Vec<MemberInfo>,
    /// Class attributes
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Parse class file bytes
    pub fn parse(bytes: &[u8]) -> FormatResult<Self> {
        let mut input = Cursor::new(bytes);
        if input.read_u32::<BigEndian>()? != MAGIC {
            return Err(FormatError::new("not a class file (bad magic)"));
        }
        let minor_version = input.read_u16::<BigEndian>()?;
        let major_version = input.read_u16::<BigEndian>()?;
        if !(MIN_MAJOR_VERSION..=MAX_MAJOR_VERSION).contains(&major_version) {
            return Err(FormatError::new(format!(
                "unsupported class file major version {major_version}"
            )));
        }
        let pool = ConstantPool::parse(&mut input)?;
        let access = input.read_u16::<BigEndian>()?;
        let this_class = input.read_u16::<BigEndian>()?;
        let super_class = input.read_u16::<BigEndian>()?;
        let interface_count = input.read_u16::<BigEndian>()?;
        let interfaces = (0..interface_count)
            .map(|_| input.read_u16::<BigEndian>())
            .collect::<io::Result<Vec<_>>>()?;
        let fields = read_members(&mut input)?;
        let methods = read_members(&mut input)?;
        let attributes = read_attributes(&mut input)?;
        if (input.position() as usize) != bytes.len() {
            return Err(FormatError::new("trailing bytes after class file"));
        }

        let class = Self {
            minor_version,
            major_version,
            pool,
            access,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };
        let _ = class.name()?;
        Ok(class)
    }

    /// Serialize to class file bytes
    pub fn to_bytes(&self) -> FormatResult<Vec<u8>> {
        let mut out = Vec::with_capacity(1024);
        out.write_u32::<BigEndian>(MAGIC)?;
        out.write_u16::<BigEndian>(self.minor_version)?;
        out.write_u16::<BigEndian>(self.major_version)?;
        self.pool.write(&mut out)?;
        out.write_u16::<BigEndian>(self.access)?;
        out.write_u16::<BigEndian>(self.this_class)?;
        out.write_u16::<BigEndian>(self.super_class)?;
        out.write_u16::<BigEndian>(self.interfaces.len() as u16)?;
        for interface in &self.interfaces {
            out.write_u16::<BigEndian>(*interface)?;
        }
        write_members(&mut out, &self.fields)?;
        write_members(&mut out, &self.methods)?;
        write_attributes(&mut out, &self.attributes)?;
        Ok(out)
    }

    /// Internal name of this class
    pub fn name(&self) -> FormatResult<String> {
        Ok(self.pool.class_name(self.this_class)?.into_owned())
    }

    /// Internal name of the super class
    pub fn super_name(&self) -> FormatResult<Option<String>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        Ok(Some(self.pool.class_name(self.super_class)?.into_owned()))
    }

    /// Internal names of the implemented interfaces
    pub fn interface_names(&self) -> FormatResult<Vec<String>> {
        self.interfaces
            .iter()
            .map(|i| Ok(self.pool.class_name(*i)?.into_owned()))
            .collect()
    }

    /// Whether this is an interface
    #[must_use]
    pub const fn is_interface(&self) -> bool {
        self.access & access::INTERFACE != 0
    }

    /// Whether this is a `module-info` class
    #[must_use]
    pub const fn is_module(&self) -> bool {
        self.access & access::MODULE != 0
    }

    /// Whether the class is compiler generated
    #[must_use]
    pub const fn is_synthetic(&self) -> bool {
        self.access & access::SYNTHETIC != 0
    }

    /// Value of the `SourceFile` attribute
    #[must_use]
    pub fn source_file(&self) -> Option<String> {
        let attribute = self.attribute(&self.attributes, "SourceFile")?;
        let index = Cursor::new(attribute.info.as_slice())
            .read_u16::<BigEndian>()
            .ok()?;
        self.pool.utf8(index).ok().map(|s| s.into_owned())
    }

    /// Find an attribute by name in `attributes`
    #[must_use]
    pub fn attribute<'a>(&self, attributes: &'a [Attribute], name: &str) -> Option<&'a Attribute> {
        attributes
            .iter()
            .find(|a| self.pool.utf8(a.name_index).is_ok_and(|n| n == name))
    }

    /// Position of the named attribute in `attributes`
    #[must_use]
    pub fn attribute_position(&self, attributes: &[Attribute], name: &str) -> Option<usize> {
        attributes
            .iter()
            .position(|a| self.pool.utf8(a.name_index).is_ok_and(|n| n == name))
    }

    /// Name of a field or method
    pub fn member_name(&self, member: &MemberInfo) -> FormatResult<String> {
        Ok(self.pool.utf8(member.name_index)?.into_owned())
    }

    /// Descriptor of a field or method
    pub fn member_descriptor(&self, member: &MemberInfo) -> FormatResult<String> {
        Ok(self.pool.utf8(member.descriptor_index)?.into_owned())
    }

    /// Whether a field with this name exists
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.fields
            .iter()
            .any(|f| self.pool.utf8(f.name_index).is_ok_and(|n| n == name))
    }

    /// Whether a method with this name exists
    #[must_use]
    pub fn has_method(&self, name: &str) -> bool {
        self.methods
            .iter()
            .any(|m| self.pool.utf8(m.name_index).is_ok_and(|n| n == name))
    }

    /// Append a bootstrap method, creating `BootstrapMethods` if needed
    ///
    /// Returns the index of the new entry.
    pub fn add_bootstrap_method(&mut self, method_handle: u16, arguments: &[u16]) -> FormatResult<u16> {
        let position = match self.attribute_position(&self.attributes, "BootstrapMethods") {
            Some(position) => position,
            None => {
                let name_index = self.pool.add_utf8("BootstrapMethods")?;
                self.attributes.push(Attribute {
                    name_index,
                    info: vec![0, 0],
                });
                self.attributes.len() - 1
            }
        };
        let info = &mut self.attributes[position].info;
        let count = Cursor::new(info.as_slice()).read_u16::<BigEndian>()?;
        if count == u16::MAX {
            return Err(FormatError::new("too many bootstrap methods"));
        }
        info.write_u16::<BigEndian>(method_handle)?;
        info.write_u16::<BigEndian>(arguments.len() as u16)?;
        for argument in arguments {
            info.write_u16::<BigEndian>(*argument)?;
        }
        info[..2].copy_from_slice(&(count + 1).to_be_bytes());
        Ok(count)
    }
}

fn read_attributes(input: &mut Cursor<&[u8]>) -> FormatResult<Vec<Attribute>> {
    let count = input.read_u16::<BigEndian>()?;
    let mut attributes = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let name_index = input.read_u16::<BigEndian>()?;
        let length = input.read_u32::<BigEndian>()? as usize;
        let remaining = input.get_ref().len() - input.position() as usize;
        if length > remaining {
            return Err(FormatError::new("unexpected end of class file"));
        }
        let mut info = vec![0u8; length];
        input.read_exact(&mut info)?;
        attributes.push(Attribute { name_index, info });
    }
    Ok(attributes)
}

fn read_members(input: &mut Cursor<&[u8]>) -> FormatResult<Vec<MemberInfo>> {
    let count = input.read_u16::<BigEndian>()?;
    let mut members = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        members.push(MemberInfo {
            access: input.read_u16::<BigEndian>()?,
            name_index: input.read_u16::<BigEndian>()?,
            descriptor_index: input.read_u16::<BigEndian>()?,
            attributes: read_attributes(input)?,
        });
    }
    Ok(members)
}

fn write_attributes(out: &mut Vec<u8>, attributes: &[Attribute]) -> FormatResult<()> {
    out.write_u16::<BigEndian>(attributes.len() as u16)?;
    for attribute in attributes {
        let length = u32::try_from(attribute.info.len())
            .map_err(|_| FormatError::new("attribute too large"))?;
        out.write_u16::<BigEndian>(attribute.name_index)?;
        out.write_u32::<BigEndian>(length)?;
        out.extend_from_slice(&attribute.info);
    }
    Ok(())
}

fn write_members(out: &mut Vec<u8>, members: &[MemberInfo]) -> FormatResult<()> {
    out.write_u16::<BigEndian>(members.len() as u16)?;
    for member in members {
        out.write_u16::<BigEndian>(member.access)?;
        out.write_u16::<BigEndian>(member.name_index)?;
        out.write_u16::<BigEndian>(member.descriptor_index)?;
        write_attributes(out, &member.attributes)?;
    }
    Ok(())
}
