//! Runtime values
//!
//! Operand stack entries and local slots hold a [`Value`]. Wide values
//! (`Long`, `Double`) count as two words against the declared stack and
//! local bounds, matching their descriptor category.

use crate::object::ObjectRef;
use std::fmt;
use std::sync::Arc;
use weft_bytecode::Category;

/// A value on the operand stack, in a local, or in a field
#[derive(Clone, PartialEq)]
pub enum Value {
    /// Null reference (also the filler for the upper half of wide locals)
    Null,
    /// 32-bit int (booleans, bytes, chars and shorts included)
    Int(i32),
    /// 64-bit long
    Long(i64),
    /// 32-bit float
    Float(f32),
    /// 64-bit double
    Double(f64),
    /// Heap object
    Ref(ObjectRef),
    /// Immutable string
    Str(Arc<str>),
}

impl Value {
    /// Zero value for a field or local of the given category
    pub fn default_for(category: Category) -> Self {
        match category {
            Category::SmallInt => Self::Int(0),
            Category::WideInt => Self::Long(0),
            Category::Float => Self::Float(0.0),
            Category::Double => Self::Double(0.0),
            Category::Reference | Category::Void => Self::Null,
        }
    }

    /// Zero value for a descriptor
    pub fn default_for_descriptor(descriptor: &str) -> Self {
        Self::default_for(Category::from_descriptor(descriptor))
    }

    /// Create a string value
    pub fn str(s: &str) -> Self {
        Self::Str(Arc::from(s))
    }

    /// Words occupied on the operand stack or in locals
    pub fn slot_size(&self) -> u16 {
        match self {
            Self::Long(_) | Self::Double(_) => 2,
            _ => 1,
        }
    }

    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Extract an int
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract a long
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract a float
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract a double
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract an object reference
    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Self::Ref(r) => Some(*r),
            _ => None,
        }
    }

    /// Extract a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this value can live in a slot of the given category
    pub fn fits(&self, category: Category) -> bool {
        matches!(
            (self, category),
            (Self::Int(_), Category::SmallInt)
                | (Self::Long(_), Category::WideInt)
                | (Self::Float(_), Category::Float)
                | (Self::Double(_), Category::Double)
                | (Self::Null | Self::Ref(_) | Self::Str(_), Category::Reference)
        )
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Int(v) => write!(f, "{}", v),
            Self::Long(v) => write!(f, "{}L", v),
            Self::Float(v) => write!(f, "{}f", v),
            Self::Double(v) => write!(f, "{}d", v),
            Self::Ref(r) => write!(f, "{:?}", r),
            Self::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Int(v as i32)
    }
}

impl From<ObjectRef> for Value {
    fn from(r: ObjectRef) -> Self {
        Self::Ref(r)
    }
}
