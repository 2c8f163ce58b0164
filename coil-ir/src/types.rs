//! IR Type Handles
//!
//! A COIL type is a packed 32-bit value:
//! `[category:4][width:8][qualifiers:8][attributes:12]`.
//! Primitive types are fully described by the handle itself. Composite
//! types keep their structure in a [`TypeRegistry`](crate::TypeRegistry)
//! side table and store the table index in the attribute bits.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

const CATEGORY_SHIFT: u32 = 28;
const WIDTH_SHIFT: u32 = 20;
const QUALIFIER_SHIFT: u32 = 12;
const ATTRIBUTE_MASK: u32 = 0xFFF;

/// Number of composite types a single registry can hold
pub const MAX_COMPOSITES: usize = 1 << 12;

/// Type category, the top four bits of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Category {
    Void = 0,
    Bool = 1,
    Integer = 2,
    Float = 3,
    Pointer = 4,
    Vector = 5,
    Array = 6,
    Struct = 7,
    Union = 8,
    Function = 9,
    Enum = 10,
}

impl Category {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Category::Void),
            1 => Some(Category::Bool),
            2 => Some(Category::Integer),
            3 => Some(Category::Float),
            4 => Some(Category::Pointer),
            5 => Some(Category::Vector),
            6 => Some(Category::Array),
            7 => Some(Category::Struct),
            8 => Some(Category::Union),
            9 => Some(Category::Function),
            10 => Some(Category::Enum),
            _ => None,
        }
    }

    /// Composite categories index into the registry side table
    pub fn is_composite(self) -> bool {
        matches!(
            self,
            Category::Pointer
                | Category::Vector
                | Category::Array
                | Category::Struct
                | Category::Union
                | Category::Function
        )
    }

    /// Widths accepted for a primitive of this category
    pub fn accepts_width(self, width: u8) -> bool {
        match self {
            Category::Void => width == 0,
            Category::Bool => width == 1,
            Category::Integer => matches!(width, 8 | 16 | 32 | 64 | 128),
            Category::Float => matches!(width, 16 | 32 | 64 | 80 | 128),
            Category::Enum => matches!(width, 8 | 16 | 32 | 64),
            _ => false,
        }
    }

    pub fn to_str(self) -> &'static str {
        match self {
            Category::Void => "void",
            Category::Bool => "bool",
            Category::Integer => "integer",
            Category::Float => "float",
            Category::Pointer => "pointer",
            Category::Vector => "vector",
            Category::Array => "array",
            Category::Struct => "struct",
            Category::Union => "union",
            Category::Function => "function",
            Category::Enum => "enum",
        }
    }
}

bitflags! {
    /// Type qualifiers, bits 19..12 of a handle
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Qualifiers: u8 {
        const UNSIGNED = 0x01;
        const CONST = 0x02;
        const VOLATILE = 0x04;
        const RESTRICT = 0x08;
        const ATOMIC = 0x10;
    }
}

/// Packed 32-bit type handle
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Type(u32);

impl Type {
    pub const VOID: Type = Type::pack(Category::Void, 0, Qualifiers::empty(), 0);
    pub const BOOL: Type = Type::pack(Category::Bool, 1, Qualifiers::empty(), 0);
    pub const I8: Type = Type::pack(Category::Integer, 8, Qualifiers::empty(), 0);
    pub const I16: Type = Type::pack(Category::Integer, 16, Qualifiers::empty(), 0);
    pub const I32: Type = Type::pack(Category::Integer, 32, Qualifiers::empty(), 0);
    pub const I64: Type = Type::pack(Category::Integer, 64, Qualifiers::empty(), 0);
    pub const U8: Type = Type::pack(Category::Integer, 8, Qualifiers::UNSIGNED, 0);
    pub const U16: Type = Type::pack(Category::Integer, 16, Qualifiers::UNSIGNED, 0);
    pub const U32: Type = Type::pack(Category::Integer, 32, Qualifiers::UNSIGNED, 0);
    pub const U64: Type = Type::pack(Category::Integer, 64, Qualifiers::UNSIGNED, 0);
    pub const F32: Type = Type::pack(Category::Float, 32, Qualifiers::empty(), 0);
    pub const F64: Type = Type::pack(Category::Float, 64, Qualifiers::empty(), 0);

    /// Pack the four fields into a handle. No validation is performed.
    pub const fn pack(category: Category, width: u8, qualifiers: Qualifiers, attributes: u16) -> Type {
        Type(
            ((category as u32) << CATEGORY_SHIFT)
                | ((width as u32) << WIDTH_SHIFT)
                | ((qualifiers.bits() as u32) << QUALIFIER_SHIFT)
                | (attributes as u32 & ATTRIBUTE_MASK),
        )
    }

    /// Reinterpret raw bits as a handle, e.g. when reading a binary
    pub const fn from_bits(bits: u32) -> Type {
        Type(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// `None` for the reserved category codes 11..=15
    pub fn category(self) -> Option<Category> {
        Category::from_u8((self.0 >> CATEGORY_SHIFT) as u8)
    }

    pub fn width(self) -> u8 {
        (self.0 >> WIDTH_SHIFT) as u8
    }

    /// Raw qualifier byte, including bits no qualifier is defined for
    pub fn qualifier_bits(self) -> u8 {
        (self.0 >> QUALIFIER_SHIFT) as u8
    }

    pub fn qualifiers(self) -> Qualifiers {
        Qualifiers::from_bits_truncate(self.qualifier_bits())
    }

    pub fn attributes(self) -> u16 {
        (self.0 & ATTRIBUTE_MASK) as u16
    }

    pub fn is_composite(self) -> bool {
        self.category().is_some_and(Category::is_composite)
    }

    /// Side table index for composite handles
    pub fn composite_index(self) -> Option<usize> {
        if self.is_composite() {
            Some(self.attributes() as usize)
        } else {
            None
        }
    }

    pub fn is_void(self) -> bool {
        self.category() == Some(Category::Void)
    }

    pub fn is_unsigned(self) -> bool {
        self.qualifiers().contains(Qualifiers::UNSIGNED)
    }

    /// Same type with its qualifier byte replaced
    pub fn with_qualifiers(self, qualifiers: Qualifiers) -> Type {
        Type((self.0 & !(0xFF << QUALIFIER_SHIFT)) | ((qualifiers.bits() as u32) << QUALIFIER_SHIFT))
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type(0x{:08X} {})", self.0, self)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let qualifiers = self.qualifiers();
        if qualifiers.contains(Qualifiers::CONST) { write!(f, "const ")?; }
        if qualifiers.contains(Qualifiers::VOLATILE) { write!(f, "volatile ")?; }
        if qualifiers.contains(Qualifiers::RESTRICT) { write!(f, "restrict ")?; }
        if qualifiers.contains(Qualifiers::ATOMIC) { write!(f, "atomic ")?; }

        let width = self.width();
        match self.category() {
            Some(Category::Void) => write!(f, "void"),
            Some(Category::Bool) => write!(f, "bool"),
            Some(Category::Integer) if self.is_unsigned() => write!(f, "u{width}"),
            Some(Category::Integer) => write!(f, "i{width}"),
            Some(Category::Float) => write!(f, "f{width}"),
            Some(Category::Enum) => write!(f, "enum{width}"),
            Some(category) => write!(f, "{}#{}", category.to_str(), self.attributes()),
            None => write!(f, "invalid"),
        }
    }
}
