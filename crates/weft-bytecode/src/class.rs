//! Class file format
//!
//! A [`ClassNode`] is the structural tree of one compiled class: header,
//! fields, methods with their instruction lists, and markers. It is encoded
//! as a single `.wclass` unit behind a magic/version/checksum header.

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::insn::{Insn, InsnList};
use thiserror::Error;

/// Magic number for Weft class files: "WEFT"
pub const MAGIC: [u8; 4] = *b"WEFT";

/// Current class file version
pub const VERSION: u32 = 1;

const HEADER_LEN: usize = 16;

/// Name of instance initializers
pub const CONSTRUCTOR_NAME: &str = "<init>";

/// Access flags
pub mod access {
    /// Visible everywhere
    pub const PUBLIC: u16 = 0x0001;
    /// Visible to the declaring class only
    pub const PRIVATE: u16 = 0x0002;
    /// Visible to subclasses
    pub const PROTECTED: u16 = 0x0004;
    /// Class-level member
    pub const STATIC: u16 = 0x0008;
    /// Not overridable / not reassignable
    pub const FINAL: u16 = 0x0010;
    /// Modern invokespecial semantics (classes)
    pub const SUPER: u16 = 0x0020;
    /// Interface type
    pub const INTERFACE: u16 = 0x0200;
    /// No body / not instantiable
    pub const ABSTRACT: u16 = 0x0400;
    /// Compiler or engine generated
    pub const SYNTHETIC: u16 = 0x1000;
}

/// Class file flags
pub mod flags {
    /// Class was produced at runtime
    pub const SYNTHESIZED: u32 = 1 << 0;
}

/// Class file encoding/decoding errors
#[derive(Debug, Error)]
pub enum ClassFileError {
    /// Decode error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected WEFT, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Stored checksum
        expected: u32,
        /// Computed checksum
        actual: u32,
    },

    /// Bytes left after the class payload
    #[error("{0} trailing bytes after class payload")]
    TrailingBytes(usize),
}

/// Value attached to a marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerValue {
    /// Integer
    Int(i32),
    /// String
    Str(String),
    /// Boolean
    Bool(bool),
}

/// Annotation-like metadata on a class or member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    /// Marker type descriptor, e.g. `Lweft/Override;`
    pub descriptor: String,
    /// Named values
    pub values: Vec<(String, MarkerValue)>,
}

impl Marker {
    /// Create a marker without values
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            values: Vec::new(),
        }
    }

    /// Add a named value
    pub fn with(mut self, key: impl Into<String>, value: MarkerValue) -> Self {
        self.values.push((key.into(), value));
        self
    }

    /// Look up a value by name
    pub fn get(&self, key: &str) -> Option<&MarkerValue> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Integer value by name
    pub fn int(&self, key: &str) -> Option<i32> {
        match self.get(key) {
            Some(MarkerValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// String value by name
    pub fn str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(MarkerValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    /// Boolean value by name
    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(MarkerValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.descriptor);
        writer.emit_u32(self.values.len() as u32);
        for (key, value) in &self.values {
            writer.emit_string(key);
            match value {
                MarkerValue::Int(v) => {
                    writer.emit_u8(0);
                    writer.emit_i32(*v);
                }
                MarkerValue::Str(v) => {
                    writer.emit_u8(1);
                    writer.emit_string(v);
                }
                MarkerValue::Bool(v) => {
                    writer.emit_u8(2);
                    writer.emit_u8(*v as u8);
                }
            }
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let descriptor = reader.read_string()?;
        let count = reader.read_u32()? as usize;
        let mut values = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let key = reader.read_string()?;
            let offset = reader.position();
            let value = match reader.read_u8()? {
                0 => MarkerValue::Int(reader.read_i32()?),
                1 => MarkerValue::Str(reader.read_string()?),
                2 => MarkerValue::Bool(reader.read_u8()? != 0),
                tag => return Err(DecodeError::InvalidTag(tag, offset)),
            };
            values.push((key, value));
        }
        Ok(Self { descriptor, values })
    }
}

fn encode_markers(markers: &[Marker], writer: &mut BytecodeWriter) {
    writer.emit_u32(markers.len() as u32);
    for marker in markers {
        marker.encode(writer);
    }
}

fn decode_markers(reader: &mut BytecodeReader<'_>) -> Result<Vec<Marker>, DecodeError> {
    let count = reader.read_u32()? as usize;
    let mut markers = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        markers.push(Marker::decode(reader)?);
    }
    Ok(markers)
}

/// Field declaration
#[derive(Debug, Clone, PartialEq)]
pub struct FieldNode {
    /// Access flags
    pub access: u16,
    /// Field name
    pub name: String,
    /// Field descriptor
    pub descriptor: String,
    /// Markers
    pub markers: Vec<Marker>,
}

impl FieldNode {
    /// Create a field declaration
    pub fn new(access: u16, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            access,
            name: name.into(),
            descriptor: descriptor.into(),
            markers: Vec::new(),
        }
    }

    /// Whether the field is static
    pub fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u16(self.access);
        writer.emit_string(&self.name);
        writer.emit_string(&self.descriptor);
        encode_markers(&self.markers, writer);
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            access: reader.read_u16()?,
            name: reader.read_string()?,
            descriptor: reader.read_string()?,
            markers: decode_markers(reader)?,
        })
    }
}

/// Method declaration with its body
#[derive(Debug, Clone, PartialEq)]
pub struct MethodNode {
    /// Access flags
    pub access: u16,
    /// Method name (`<init>` for constructors)
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Declared operand stack bound, in words
    pub max_stack: u16,
    /// Declared local slot count, receiver included
    pub max_locals: u16,
    /// Body; empty for abstract methods
    pub insns: InsnList,
    /// Markers
    pub markers: Vec<Marker>,
}

impl MethodNode {
    /// Create a method declaration with an empty body
    pub fn new(access: u16, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            access,
            name: name.into(),
            descriptor: descriptor.into(),
            max_stack: 0,
            max_locals: 0,
            insns: InsnList::new(),
            markers: Vec::new(),
        }
    }

    /// Whether this is an instance initializer
    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR_NAME
    }

    /// Whether the method is static
    pub fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }

    /// Whether the method has no body
    pub fn is_abstract(&self) -> bool {
        self.access & access::ABSTRACT != 0
    }

    /// First marker with the given descriptor
    pub fn marker(&self, descriptor: &str) -> Option<&Marker> {
        self.markers.iter().find(|m| m.descriptor == descriptor)
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u16(self.access);
        writer.emit_string(&self.name);
        writer.emit_string(&self.descriptor);
        writer.emit_u16(self.max_stack);
        writer.emit_u16(self.max_locals);
        encode_markers(&self.markers, writer);
        writer.emit_u32(self.insns.len() as u32);
        for insn in &self.insns {
            writer.emit_insn(insn);
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let access = reader.read_u16()?;
        let name = reader.read_string()?;
        let descriptor = reader.read_string()?;
        let max_stack = reader.read_u16()?;
        let max_locals = reader.read_u16()?;
        let markers = decode_markers(reader)?;

        let count = reader.read_u32()? as usize;
        let mut insns: Vec<Insn> = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            insns.push(reader.read_insn()?);
        }

        Ok(Self {
            access,
            name,
            descriptor,
            max_stack,
            max_locals,
            insns: InsnList::from_vec(insns),
            markers,
        })
    }
}

/// A compiled class
#[derive(Debug, Clone, PartialEq)]
pub struct ClassNode {
    /// Class file flags
    pub flags: u32,
    /// Access flags
    pub access: u16,
    /// Internal name
    pub name: String,
    /// Superclass internal name, None for a hierarchy root
    pub super_name: Option<String>,
    /// Declared interfaces
    pub interfaces: Vec<String>,
    /// Source file tag
    pub source_file: Option<String>,
    /// Declared fields
    pub fields: Vec<FieldNode>,
    /// Declared methods, constructors included
    pub methods: Vec<MethodNode>,
    /// Class-level markers
    pub markers: Vec<Marker>,
}

impl ClassNode {
    /// Create an empty public class
    pub fn new(name: impl Into<String>, super_name: Option<String>) -> Self {
        Self {
            flags: 0,
            access: access::PUBLIC | access::SUPER,
            name: name.into(),
            super_name,
            interfaces: Vec::new(),
            source_file: None,
            fields: Vec::new(),
            methods: Vec::new(),
            markers: Vec::new(),
        }
    }

    /// Whether the class is an interface
    pub fn is_interface(&self) -> bool {
        self.access & access::INTERFACE != 0
    }

    /// Declared method by name and descriptor
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&MethodNode> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Declared field by name
    pub fn find_field(&self, name: &str) -> Option<&FieldNode> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Declared constructors
    pub fn constructors(&self) -> impl Iterator<Item = &MethodNode> {
        self.methods.iter().filter(|m| m.is_constructor())
    }

    /// Encode the class to binary format (.wclass)
    ///
    /// Format:
    /// - Header: magic (4 bytes) + version (u32) + flags (u32) + checksum (u32)
    /// - Header fields: access, name, super, interfaces, source file, markers
    /// - Field table
    /// - Method table
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BytecodeWriter::with_capacity(256);

        writer.emit_bytes(&MAGIC);
        writer.emit_u32(VERSION);
        writer.emit_u32(self.flags);
        let checksum_offset = writer.offset();
        writer.emit_u32(0);

        writer.emit_u16(self.access);
        writer.emit_string(&self.name);
        writer.emit_opt_string(self.super_name.as_deref());
        writer.emit_u32(self.interfaces.len() as u32);
        for interface in &self.interfaces {
            writer.emit_string(interface);
        }
        writer.emit_opt_string(self.source_file.as_deref());
        encode_markers(&self.markers, &mut writer);

        writer.emit_u32(self.fields.len() as u32);
        for field in &self.fields {
            field.encode(&mut writer);
        }

        writer.emit_u32(self.methods.len() as u32);
        for method in &self.methods {
            method.encode(&mut writer);
        }

        // CRC32 of everything after the header
        let checksum = crc32fast::hash(&writer.buffer()[HEADER_LEN..]);
        writer.patch_u32(checksum_offset, checksum);

        writer.into_bytes()
    }

    /// Decode a class from binary format
    pub fn decode(data: &[u8]) -> Result<Self, ClassFileError> {
        let mut reader = BytecodeReader::new(data);

        let magic: [u8; 4] = [
            reader.read_u8()?,
            reader.read_u8()?,
            reader.read_u8()?,
            reader.read_u8()?,
        ];
        if magic != MAGIC {
            return Err(ClassFileError::InvalidMagic(magic));
        }

        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(ClassFileError::UnsupportedVersion(version));
        }

        let flags = reader.read_u32()?;
        let stored_checksum = reader.read_u32()?;
        let calculated_checksum = crc32fast::hash(&data[HEADER_LEN..]);
        if stored_checksum != calculated_checksum {
            return Err(ClassFileError::ChecksumMismatch {
                expected: stored_checksum,
                actual: calculated_checksum,
            });
        }

        let access = reader.read_u16()?;
        let name = reader.read_string()?;
        let super_name = reader.read_opt_string()?;
        let interface_count = reader.read_u32()? as usize;
        let mut interfaces = Vec::with_capacity(interface_count.min(64));
        for _ in 0..interface_count {
            interfaces.push(reader.read_string()?);
        }
        let source_file = reader.read_opt_string()?;
        let markers = decode_markers(&mut reader)?;

        let field_count = reader.read_u32()? as usize;
        let mut fields = Vec::with_capacity(field_count.min(256));
        for _ in 0..field_count {
            fields.push(FieldNode::decode(&mut reader)?);
        }

        let method_count = reader.read_u32()? as usize;
        let mut methods = Vec::with_capacity(method_count.min(256));
        for _ in 0..method_count {
            methods.push(MethodNode::decode(&mut reader)?);
        }

        if reader.has_more() {
            return Err(ClassFileError::TrailingBytes(reader.remaining()));
        }

        Ok(Self {
            flags,
            access,
            name,
            super_name,
            interfaces,
            source_file,
            fields,
            methods,
            markers,
        })
    }
}
