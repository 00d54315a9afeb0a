//! Binary encoding primitives
//!
//! Little-endian writer and reader used by the class file format, including
//! the encoding of individual instruction nodes.

use crate::insn::{Constant, Insn, Label, MemberRef};
use crate::opcode::{Opcode, OperandForm};
use thiserror::Error;

/// Tag byte for a label pseudo-node
pub const TAG_LABEL: u8 = 0xFE;
/// Tag byte for a line pseudo-node
pub const TAG_LINE: u8 = 0xFD;

const CONST_INT: u8 = 0;
const CONST_LONG: u8 = 1;
const CONST_FLOAT: u8 = 2;
const CONST_DOUBLE: u8 = 3;
const CONST_STR: u8 = 4;

/// Errors that can occur while decoding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Unexpected end of input
    #[error("Unexpected end of input at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid UTF-8 string
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Unknown opcode byte
    #[error("Invalid opcode {0:#04x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// Unknown constant tag after LDC
    #[error("Invalid constant tag {0} at offset {1}")]
    InvalidConstantTag(u8, usize),

    /// Unknown tag in a tagged value
    #[error("Invalid value tag {0} at offset {1}")]
    InvalidTag(u8, usize),
}

/// Byte writer
///
/// Provides methods for emitting primitives, strings and instruction nodes
/// into a growable buffer.
#[derive(Debug, Default)]
pub struct BytecodeWriter {
    pub(crate) buffer: Vec<u8>,
}

impl BytecodeWriter {
    /// Create a new writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new writer with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Get the current buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return its bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Current offset (length written so far)
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    // ===== Primitives =====

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 16-bit unsigned integer
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit unsigned integer
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit signed integer
    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit signed integer
    pub fn emit_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit float
    pub fn emit_f32(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit float
    pub fn emit_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit raw bytes
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Emit a length-prefixed UTF-8 string
    pub fn emit_string(&mut self, value: &str) {
        self.emit_u32(value.len() as u32);
        self.buffer.extend_from_slice(value.as_bytes());
    }

    /// Emit an optional string as a presence byte plus the string
    pub fn emit_opt_string(&mut self, value: Option<&str>) {
        match value {
            Some(s) => {
                self.emit_u8(1);
                self.emit_string(s);
            }
            None => self.emit_u8(0),
        }
    }

    /// Overwrite a previously emitted u32
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    // ===== Instructions =====

    /// Emit an opcode byte
    pub fn emit_opcode(&mut self, opcode: Opcode) {
        self.emit_u8(opcode.to_u8());
    }

    fn emit_member(&mut self, member: &MemberRef) {
        self.emit_string(&member.owner);
        self.emit_string(&member.name);
        self.emit_string(&member.descriptor);
    }

    /// Emit one instruction node
    pub fn emit_insn(&mut self, insn: &Insn) {
        match insn {
            Insn::Label(label) => {
                self.emit_u8(TAG_LABEL);
                self.emit_u32(label.0);
            }
            Insn::Line(line) => {
                self.emit_u8(TAG_LINE);
                self.emit_u32(*line);
            }
            Insn::Simple(op) => self.emit_opcode(*op),
            Insn::Int { opcode, value } => {
                self.emit_opcode(*opcode);
                self.emit_i32(*value);
            }
            Insn::Ldc(constant) => {
                self.emit_opcode(Opcode::Ldc);
                match constant {
                    Constant::Int(v) => {
                        self.emit_u8(CONST_INT);
                        self.emit_i32(*v);
                    }
                    Constant::Long(v) => {
                        self.emit_u8(CONST_LONG);
                        self.emit_i64(*v);
                    }
                    Constant::Float(v) => {
                        self.emit_u8(CONST_FLOAT);
                        self.emit_f32(*v);
                    }
                    Constant::Double(v) => {
                        self.emit_u8(CONST_DOUBLE);
                        self.emit_f64(*v);
                    }
                    Constant::Str(s) => {
                        self.emit_u8(CONST_STR);
                        self.emit_string(s);
                    }
                }
            }
            Insn::Var { opcode, slot } => {
                self.emit_opcode(*opcode);
                self.emit_u16(*slot);
            }
            Insn::Iinc { slot, delta } => {
                self.emit_opcode(Opcode::Iinc);
                self.emit_u16(*slot);
                self.emit_u16(*delta as u16);
            }
            Insn::Type { opcode, class } => {
                self.emit_opcode(*opcode);
                self.emit_string(class);
            }
            Insn::Field { opcode, member } | Insn::Method { opcode, member } => {
                self.emit_opcode(*opcode);
                self.emit_member(member);
            }
            Insn::Jump { opcode, target } => {
                self.emit_opcode(*opcode);
                self.emit_u32(target.0);
            }
        }
    }
}

/// Byte reader
///
/// Mirrors [`BytecodeWriter`]; every read is bounds-checked.
pub struct BytecodeReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a new reader
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Current position
    pub fn position(&self) -> usize {
        self.position
    }

    /// Remaining bytes
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Check if there are more bytes to read
    pub fn has_more(&self) -> bool {
        self.position < self.buffer.len()
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self
            .position
            .checked_add(N)
            .filter(|&end| end <= self.buffer.len())
            .ok_or(DecodeError::UnexpectedEnd(self.position))?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buffer[self.position..end]);
        self.position = end;
        Ok(out)
    }

    // ===== Primitives =====

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    /// Read a 16-bit unsigned integer
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    /// Read a 32-bit unsigned integer
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    /// Read a 32-bit signed integer
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    /// Read a 64-bit signed integer
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.take()?))
    }

    /// Read a 32-bit float
    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_le_bytes(self.take()?))
    }

    /// Read a 64-bit float
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_le_bytes(self.take()?))
    }

    /// Read `len` raw bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, DecodeError> {
        let end = self
            .position
            .checked_add(len)
            .filter(|&end| end <= self.buffer.len())
            .ok_or(DecodeError::UnexpectedEnd(self.position))?;
        let bytes = self.buffer[self.position..end].to_vec();
        self.position = end;
        Ok(bytes)
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let start = self.position;
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// Read an optional string written by `emit_opt_string`
    pub fn read_opt_string(&mut self) -> Result<Option<String>, DecodeError> {
        let offset = self.position;
        match self.read_u8()? {
            0 => Ok(None),
            1 => self.read_string().map(Some),
            tag => Err(DecodeError::InvalidTag(tag, offset)),
        }
    }

    // ===== Instructions =====

    fn read_member(&mut self) -> Result<MemberRef, DecodeError> {
        Ok(MemberRef {
            owner: self.read_string()?,
            name: self.read_string()?,
            descriptor: self.read_string()?,
        })
    }

    /// Read one instruction node
    pub fn read_insn(&mut self) -> Result<Insn, DecodeError> {
        let offset = self.position;
        let byte = self.read_u8()?;
        match byte {
            TAG_LABEL => return Ok(Insn::Label(Label(self.read_u32()?))),
            TAG_LINE => return Ok(Insn::Line(self.read_u32()?)),
            _ => {}
        }

        let opcode = Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, offset))?;
        let insn = match opcode.form() {
            OperandForm::None => Insn::Simple(opcode),
            OperandForm::Int => Insn::Int {
                opcode,
                value: self.read_i32()?,
            },
            OperandForm::Constant => {
                let tag_offset = self.position;
                let constant = match self.read_u8()? {
                    CONST_INT => Constant::Int(self.read_i32()?),
                    CONST_LONG => Constant::Long(self.read_i64()?),
                    CONST_FLOAT => Constant::Float(self.read_f32()?),
                    CONST_DOUBLE => Constant::Double(self.read_f64()?),
                    CONST_STR => Constant::Str(self.read_string()?),
                    tag => return Err(DecodeError::InvalidConstantTag(tag, tag_offset)),
                };
                Insn::Ldc(constant)
            }
            OperandForm::Var => Insn::Var {
                opcode,
                slot: self.read_u16()?,
            },
            OperandForm::Iinc => Insn::Iinc {
                slot: self.read_u16()?,
                delta: self.read_u16()? as i16,
            },
            OperandForm::Type => Insn::Type {
                opcode,
                class: self.read_string()?,
            },
            OperandForm::Field => Insn::Field {
                opcode,
                member: self.read_member()?,
            },
            OperandForm::Method => Insn::Method {
                opcode,
                member: self.read_member()?,
            },
            OperandForm::Jump => Insn::Jump {
                opcode,
                target: Label(self.read_u32()?),
            },
        };
        Ok(insn)
    }
}
