//! Type descriptors and value categories
//!
//! Field descriptors use the single-letter convention (`I`, `J`, `Lname;`,
//! `[elem`), method descriptors wrap them as `(params)ret`. The value
//! category of a descriptor decides which load, store and return opcodes
//! move it and how many local slots it occupies.

use crate::opcode::Opcode;
use std::fmt;
use thiserror::Error;

/// Internal name of the implicit root of every class hierarchy
pub const ROOT_CLASS: &str = "weft/lang/Object";

/// Descriptor parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// Descriptor ended before a type was complete
    #[error("Truncated descriptor '{0}'")]
    Truncated(String),

    /// Unexpected character in a descriptor
    #[error("Unexpected '{found}' at {offset} in descriptor '{descriptor}'")]
    Unexpected {
        descriptor: String,
        offset: usize,
        found: char,
    },

    /// Trailing characters after a complete descriptor
    #[error("Trailing input in descriptor '{0}'")]
    Trailing(String),

    /// Cast index outside the parameter list
    #[error("Slot {index} is out of range for descriptor '{descriptor}'")]
    SlotOutOfRange { descriptor: String, index: i32 },
}

/// Value category of a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// `Z`, `B`, `S`, `C`, `I`
    SmallInt,
    /// `J`
    WideInt,
    /// `F`
    Float,
    /// `D`
    Double,
    /// Objects and arrays
    Reference,
    /// `V`, only valid as a return type
    Void,
}

impl Category {
    /// Resolve the category of a descriptor.
    ///
    /// Never fails: anything that is not a recognised primitive or void is
    /// treated as a reference.
    pub fn from_descriptor(descriptor: &str) -> Self {
        match descriptor.as_bytes().first() {
            Some(b'Z' | b'B' | b'S' | b'C' | b'I') => Self::SmallInt,
            Some(b'J') => Self::WideInt,
            Some(b'F') => Self::Float,
            Some(b'D') => Self::Double,
            Some(b'V') => Self::Void,
            _ => Self::Reference,
        }
    }

    /// Canonical descriptor for the category
    pub fn descriptor(self) -> &'static str {
        match self {
            Self::SmallInt => "I",
            Self::WideInt => "J",
            Self::Float => "F",
            Self::Double => "D",
            Self::Reference => "Lweft/lang/Object;",
            Self::Void => "V",
        }
    }

    /// Opcode that pushes a local of this category.
    ///
    /// Void has no load form and falls back to the reference load.
    pub fn load_opcode(self) -> Opcode {
        match self {
            Self::SmallInt => Opcode::Iload,
            Self::WideInt => Opcode::Lload,
            Self::Float => Opcode::Fload,
            Self::Double => Opcode::Dload,
            Self::Reference | Self::Void => Opcode::Aload,
        }
    }

    /// Opcode that stores the top of stack into a local of this category
    pub fn store_opcode(self) -> Opcode {
        match self {
            Self::SmallInt => Opcode::Istore,
            Self::WideInt => Opcode::Lstore,
            Self::Float => Opcode::Fstore,
            Self::Double => Opcode::Dstore,
            Self::Reference | Self::Void => Opcode::Astore,
        }
    }

    /// Opcode that returns a value of this category, or the no-value return
    pub fn return_opcode(self) -> Opcode {
        match self {
            Self::SmallInt => Opcode::Ireturn,
            Self::WideInt => Opcode::Lreturn,
            Self::Float => Opcode::Freturn,
            Self::Double => Opcode::Dreturn,
            Self::Reference => Opcode::Areturn,
            Self::Void => Opcode::Return,
        }
    }

    /// Local slots and stack words occupied by one value
    pub fn slot_size(self) -> u16 {
        match self {
            Self::WideInt | Self::Double => 2,
            Self::Void => 0,
            _ => 1,
        }
    }
}

/// A parsed field descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// `Z`
    Boolean,
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `S`
    Short,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `F`
    Float,
    /// `D`
    Double,
    /// `Lname;` with the internal (slash separated) name
    Object(String),
    /// `[elem`
    Array(Box<FieldType>),
}

impl FieldType {
    /// Reference type for a class name; dotted names are normalized
    pub fn object(name: &str) -> Self {
        Self::Object(internal_name(name))
    }

    /// Parse a complete field descriptor
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let mut pos = 0;
        let ty = Self::parse_at(descriptor, &mut pos)?;
        if pos != descriptor.len() {
            return Err(DescriptorError::Trailing(descriptor.to_string()));
        }
        Ok(ty)
    }

    fn parse_at(descriptor: &str, pos: &mut usize) -> Result<Self, DescriptorError> {
        let bytes = descriptor.as_bytes();
        let Some(&c) = bytes.get(*pos) else {
            return Err(DescriptorError::Truncated(descriptor.to_string()));
        };
        *pos += 1;
        let ty = match c {
            b'Z' => Self::Boolean,
            b'B' => Self::Byte,
            b'C' => Self::Char,
            b'S' => Self::Short,
            b'I' => Self::Int,
            b'J' => Self::Long,
            b'F' => Self::Float,
            b'D' => Self::Double,
            b'[' => Self::Array(Box::new(Self::parse_at(descriptor, pos)?)),
            b'L' => {
                let rest = &descriptor[*pos..];
                let end = rest
                    .find(';')
                    .ok_or_else(|| DescriptorError::Truncated(descriptor.to_string()))?;
                if end == 0 {
                    return Err(DescriptorError::Unexpected {
                        descriptor: descriptor.to_string(),
                        offset: *pos,
                        found: ';',
                    });
                }
                let name = rest[..end].to_string();
                *pos += end + 1;
                Self::Object(name)
            }
            other => {
                return Err(DescriptorError::Unexpected {
                    descriptor: descriptor.to_string(),
                    offset: *pos - 1,
                    found: other as char,
                })
            }
        };
        Ok(ty)
    }

    /// Value category
    pub fn category(&self) -> Category {
        match self {
            Self::Boolean | Self::Byte | Self::Char | Self::Short | Self::Int => Category::SmallInt,
            Self::Long => Category::WideInt,
            Self::Float => Category::Float,
            Self::Double => Category::Double,
            Self::Object(_) | Self::Array(_) => Category::Reference,
        }
    }

    /// Local slots occupied by a value of this type
    pub fn slot_size(&self) -> u16 {
        self.category().slot_size()
    }

    /// Number of array dimensions
    pub fn array_depth(&self) -> usize {
        match self {
            Self::Array(inner) => 1 + inner.array_depth(),
            _ => 0,
        }
    }

    /// Innermost element type
    pub fn element(&self) -> &FieldType {
        match self {
            Self::Array(inner) => inner.element(),
            other => other,
        }
    }

    /// Rebuild with a new element type, keeping the array depth
    pub fn with_element(&self, element: FieldType) -> FieldType {
        match self {
            Self::Array(inner) => Self::Array(Box::new(inner.with_element(element))),
            _ => element,
        }
    }

    /// Whether the element type is a class (possibly inside arrays)
    pub fn is_object_element(&self) -> bool {
        matches!(self.element(), Self::Object(_))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => f.write_str("Z"),
            Self::Byte => f.write_str("B"),
            Self::Char => f.write_str("C"),
            Self::Short => f.write_str("S"),
            Self::Int => f.write_str("I"),
            Self::Long => f.write_str("J"),
            Self::Float => f.write_str("F"),
            Self::Double => f.write_str("D"),
            Self::Object(name) => write!(f, "L{};", name),
            Self::Array(inner) => write!(f, "[{}", inner),
        }
    }
}

/// A parsed method descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Parameter types in declaration order
    pub params: Vec<FieldType>,
    /// Return type, None for void
    pub ret: Option<FieldType>,
}

impl MethodDescriptor {
    /// Parse `(params)ret`.
    ///
    /// A missing return type after the closing parenthesis is read as void,
    /// which is how constructor signatures are sometimes written.
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let bytes = descriptor.as_bytes();
        if bytes.first() != Some(&b'(') {
            return Err(match bytes.first() {
                Some(&c) => DescriptorError::Unexpected {
                    descriptor: descriptor.to_string(),
                    offset: 0,
                    found: c as char,
                },
                None => DescriptorError::Truncated(descriptor.to_string()),
            });
        }

        let mut pos = 1;
        let mut params = Vec::new();
        loop {
            match bytes.get(pos) {
                Some(b')') => {
                    pos += 1;
                    break;
                }
                Some(_) => params.push(FieldType::parse_at(descriptor, &mut pos)?),
                None => return Err(DescriptorError::Truncated(descriptor.to_string())),
            }
        }

        let ret = match bytes.get(pos) {
            None => None,
            Some(b'V') => {
                pos += 1;
                None
            }
            Some(_) => Some(FieldType::parse_at(descriptor, &mut pos)?),
        };
        if pos != descriptor.len() {
            return Err(DescriptorError::Trailing(descriptor.to_string()));
        }

        Ok(Self { params, ret })
    }

    /// Local slots needed for the parameters, excluding the receiver
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(FieldType::slot_size).sum()
    }

    /// Category of the return value
    pub fn return_category(&self) -> Category {
        self.ret
            .as_ref()
            .map(FieldType::category)
            .unwrap_or(Category::Void)
    }

    /// Stack words pushed by a call returning this type
    pub fn return_slots(&self) -> u16 {
        self.return_category().slot_size()
    }

    /// Type at a cast slot: `0..n` address parameters, `-1` the return.
    ///
    /// Returns `Ok(None)` for a void return slot.
    pub fn slot(&self, index: i32) -> Result<Option<&FieldType>, DescriptorError> {
        if index == -1 {
            return Ok(self.ret.as_ref());
        }
        usize::try_from(index)
            .ok()
            .and_then(|i| self.params.get(i))
            .map(Some)
            .ok_or_else(|| DescriptorError::SlotOutOfRange {
                descriptor: self.to_string(),
                index,
            })
    }

    /// Replace the class at a slot with `target`, keeping array depth.
    ///
    /// Primitive and void slots are returned unchanged.
    pub fn with_cast(&self, index: i32, target: &str) -> Result<Self, DescriptorError> {
        let replace = |ty: &FieldType| {
            if ty.is_object_element() {
                ty.with_element(FieldType::object(target))
            } else {
                ty.clone()
            }
        };

        let mut out = self.clone();
        match self.slot(index)? {
            Some(ty) if index == -1 => out.ret = Some(replace(ty)),
            Some(ty) => {
                // slot() validated the index
                out.params[index as usize] = replace(ty);
            }
            None => {}
        }
        Ok(out)
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for param in &self.params {
            write!(f, "{}", param)?;
        }
        f.write_str(")")?;
        match &self.ret {
            Some(ret) => write!(f, "{}", ret),
            None => f.write_str("V"),
        }
    }
}

/// Normalize a dotted class name to its internal slash form
pub fn internal_name(name: &str) -> String {
    name.replace('.', "/")
}
