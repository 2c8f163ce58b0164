//! Type Registry
//!
//! Owns the side tables behind composite type handles. Primitive handles are
//! computed, never looked up, so interning the same primitive twice yields
//! the same value. Composite interning always mints a fresh index: two
//! structs with identical fields are distinct types.

use coil_common::{CoilError, Result};
use log::trace;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::types::{Category, Qualifiers, Type, MAX_COMPOSITES};

/// Pointers are 64-bit on every COIL target
const POINTER_WIDTH: u8 = 64;
const POINTER_SIZE: u64 = 8;
const MAX_ALIGN: u64 = 64;

/// Struct or union member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: Option<String>,
    pub ty: Type,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self { name: Some(name.into()), ty }
    }

    pub fn anonymous(ty: Type) -> Self {
        Self { name: None, ty }
    }
}

/// Side table entry for a composite handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositeType {
    Pointer { pointee: Type },
    Array { element: Type, count: u64 },
    Vector { element: Type, lanes: u32 },
    Struct { name: Option<String>, fields: Vec<Field> },
    Union { name: Option<String>, fields: Vec<Field> },
    Function { return_type: Type, params: Vec<Type>, variadic: bool },
}

impl CompositeType {
    pub fn category(&self) -> Category {
        match self {
            CompositeType::Pointer { .. } => Category::Pointer,
            CompositeType::Array { .. } => Category::Array,
            CompositeType::Vector { .. } => Category::Vector,
            CompositeType::Struct { .. } => Category::Struct,
            CompositeType::Union { .. } => Category::Union,
            CompositeType::Function { .. } => Category::Function,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            CompositeType::Struct { name, .. } | CompositeType::Union { name, .. } => name.as_deref(),
            _ => None,
        }
    }

    /// Handle width field for this entry
    fn width(&self) -> u8 {
        match self {
            CompositeType::Pointer { .. } => POINTER_WIDTH,
            CompositeType::Vector { lanes, .. } => (*lanes).min(u8::MAX as u32) as u8,
            _ => 0,
        }
    }
}

/// Fields of a primitive handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimitiveType {
    pub category: Category,
    pub width: u8,
    pub qualifiers: Qualifiers,
}

impl PrimitiveType {
    pub fn to_type(self) -> Type {
        Type::pack(self.category, self.width, self.qualifiers, 0)
    }
}

/// Result of [`TypeRegistry::resolve`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TypeDescriptor<'a> {
    Primitive(PrimitiveType),
    Composite { handle: Type, entry: &'a CompositeType },
}

impl TypeDescriptor<'_> {
    /// Re-encode the descriptor into the handle it was resolved from
    pub fn handle(&self) -> Type {
        match self {
            TypeDescriptor::Primitive(primitive) => primitive.to_type(),
            TypeDescriptor::Composite { handle, .. } => *handle,
        }
    }
}

/// Interns and resolves types for one Module
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeRegistry {
    composites: Vec<CompositeType>,
    primitives: Vec<Type>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of composite entries
    pub fn len(&self) -> usize {
        self.composites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.composites.is_empty()
    }

    /// Side table in index order
    pub fn composites(&self) -> impl Iterator<Item = (Type, &CompositeType)> + '_ {
        self.composites
            .iter()
            .enumerate()
            .map(|(index, entry)| (Self::handle_for(index, entry, Qualifiers::empty()), entry))
    }

    /// Distinct primitives seen by this registry, in first-use order
    pub fn primitives(&self) -> &[Type] {
        &self.primitives
    }

    pub fn intern_primitive(&mut self, category: Category, width: u8, qualifiers: Qualifiers) -> Result<Type> {
        if category.is_composite() {
            return Err(CoilError::invalid_argument(format!(
                "{} is a composite category",
                category.to_str()
            )));
        }
        if !category.accepts_width(width) {
            return Err(CoilError::invalid_argument(format!(
                "width {} is not valid for {}",
                width,
                category.to_str()
            )));
        }

        let ty = Type::pack(category, width, qualifiers, 0);
        self.record_primitive(ty)?;
        Ok(ty)
    }

    pub fn intern_pointer(&mut self, base: Type, qualifiers: Qualifiers) -> Result<Type> {
        self.resolve(base)?;
        let ty = self.push(CompositeType::Pointer { pointee: base }, &[base])?;
        Ok(ty.with_qualifiers(qualifiers))
    }

    pub fn intern_array(&mut self, element: Type, count: u64) -> Result<Type> {
        self.check_element(element, "array")?;
        self.push(CompositeType::Array { element, count }, &[element])
    }

    pub fn intern_vector(&mut self, element: Type, lanes: u32) -> Result<Type> {
        self.check_element(element, "vector")?;
        if !matches!(element.category(), Some(Category::Bool | Category::Integer | Category::Float)) {
            return Err(CoilError::invalid_argument(format!(
                "vector element must be a scalar, got {element}"
            )));
        }
        if lanes == 0 {
            return Err(CoilError::invalid_argument("vector needs at least one lane"));
        }
        self.push(CompositeType::Vector { element, lanes }, &[element])
    }

    pub fn intern_struct(&mut self, name: Option<&str>, fields: Vec<Field>) -> Result<Type> {
        for field in &fields {
            self.check_element(field.ty, "struct field")?;
        }
        let components: Vec<Type> = fields.iter().map(|f| f.ty).collect();
        let entry = CompositeType::Struct {
            name: name.map(str::to_string),
            fields,
        };
        self.push(entry, &components)
    }

    pub fn intern_union(&mut self, name: Option<&str>, fields: Vec<Field>) -> Result<Type> {
        for field in &fields {
            self.check_element(field.ty, "union field")?;
        }
        let components: Vec<Type> = fields.iter().map(|f| f.ty).collect();
        let entry = CompositeType::Union {
            name: name.map(str::to_string),
            fields,
        };
        self.push(entry, &components)
    }

    pub fn intern_function(&mut self, return_type: Type, params: &[Type], variadic: bool) -> Result<Type> {
        self.resolve(return_type)?;
        for &param in params {
            self.check_element(param, "parameter")?;
        }
        let components: Vec<Type> = std::iter::once(return_type).chain(params.iter().copied()).collect();
        let entry = CompositeType::Function {
            return_type,
            params: params.to_vec(),
            variadic,
        };
        self.push(entry, &components)
    }

    pub fn resolve(&self, ty: Type) -> Result<TypeDescriptor<'_>> {
        let unknown = CoilError::UnknownType { handle: ty.bits() };
        let category = ty.category().ok_or_else(|| unknown.clone())?;

        if !category.is_composite() {
            if !category.accepts_width(ty.width())
                || ty.attributes() != 0
                || Qualifiers::from_bits(ty.qualifier_bits()).is_none()
            {
                return Err(unknown);
            }
            return Ok(TypeDescriptor::Primitive(PrimitiveType {
                category,
                width: ty.width(),
                qualifiers: ty.qualifiers(),
            }));
        }

        let entry = self.composites.get(ty.attributes() as usize).ok_or_else(|| unknown.clone())?;
        if entry.category() != category || entry.width() != ty.width() {
            return Err(unknown);
        }
        Ok(TypeDescriptor::Composite { handle: ty, entry })
    }

    /// Composite entry behind a handle
    pub fn composite(&self, ty: Type) -> Result<&CompositeType> {
        match self.resolve(ty)? {
            TypeDescriptor::Composite { entry, .. } => Ok(entry),
            TypeDescriptor::Primitive(_) => Err(CoilError::invalid_argument(format!(
                "{ty} is not a composite type"
            ))),
        }
    }

    /// Validate a handle against this registry and remember it if primitive
    pub fn track(&mut self, ty: Type) -> Result<()> {
        match self.resolve(ty)? {
            TypeDescriptor::Primitive(_) => self.record_primitive(ty),
            TypeDescriptor::Composite { .. } => Ok(()),
        }
    }

    /// Validate every handle, then remember the primitives among them.
    /// Nothing is recorded unless all of them resolve.
    pub fn track_all(&mut self, types: &[Type]) -> Result<()> {
        for &ty in types {
            self.resolve(ty)?;
        }
        self.primitives.try_reserve(types.len())?;
        for &ty in types {
            if !ty.is_composite() && !self.primitives.contains(&ty) {
                self.primitives.push(ty);
            }
        }
        Ok(())
    }

    /// Size and alignment in bytes, C layout rules
    pub fn layout(&self, ty: Type) -> Result<(u64, u64)> {
        match self.resolve(ty)? {
            TypeDescriptor::Primitive(primitive) => Ok(primitive_layout(primitive)),
            TypeDescriptor::Composite { entry, .. } => match entry {
                CompositeType::Pointer { .. } => Ok((POINTER_SIZE, POINTER_SIZE)),
                CompositeType::Array { element, count } => {
                    let (size, align) = self.layout(*element)?;
                    Ok((size.saturating_mul(*count), align))
                }
                CompositeType::Vector { element, lanes } => {
                    let (size, _) = self.layout(*element)?;
                    let total = size.saturating_mul(*lanes as u64).next_power_of_two();
                    Ok((total, total.min(MAX_ALIGN)))
                }
                CompositeType::Struct { fields, .. } => {
                    let mut offset = 0u64;
                    let mut max_align = 1u64;
                    for field in fields {
                        let (size, align) = self.layout(field.ty)?;
                        offset = align_up(offset, align).saturating_add(size);
                        max_align = max_align.max(align);
                    }
                    Ok((align_up(offset, max_align), max_align))
                }
                CompositeType::Union { fields, .. } => {
                    let mut max_size = 0u64;
                    let mut max_align = 1u64;
                    for field in fields {
                        let (size, align) = self.layout(field.ty)?;
                        max_size = max_size.max(size);
                        max_align = max_align.max(align);
                    }
                    Ok((align_up(max_size, max_align), max_align))
                }
                CompositeType::Function { .. } => Ok((0, 1)),
            },
        }
    }

    /// Human readable spelling of a type, expanding composites
    pub fn describe(&self, ty: Type) -> String {
        let entry = match self.resolve(ty) {
            Ok(TypeDescriptor::Composite { entry, .. }) => entry,
            Ok(TypeDescriptor::Primitive(_)) => return ty.to_string(),
            Err(_) => return format!("<unknown 0x{:08X}>", ty.bits()),
        };

        let mut out = String::new();
        match entry {
            CompositeType::Pointer { pointee } => {
                let _ = write!(out, "{}*", self.describe(*pointee));
            }
            CompositeType::Array { element, count } => {
                let _ = write!(out, "[{} x {}]", count, self.describe(*element));
            }
            CompositeType::Vector { element, lanes } => {
                let _ = write!(out, "<{} x {}>", lanes, self.describe(*element));
            }
            CompositeType::Struct { name: Some(name), .. } | CompositeType::Union { name: Some(name), .. } => {
                let _ = write!(out, "%{name}");
            }
            CompositeType::Struct { name: None, fields } | CompositeType::Union { name: None, fields } => {
                let keyword = if entry.category() == Category::Union { "union " } else { "" };
                let members: Vec<String> = fields.iter().map(|f| self.describe(f.ty)).collect();
                let _ = write!(out, "{keyword}{{{}}}", members.join(", "));
            }
            CompositeType::Function { return_type, params, variadic } => {
                let mut parts: Vec<String> = params.iter().map(|p| self.describe(*p)).collect();
                if *variadic {
                    parts.push("...".to_string());
                }
                let _ = write!(out, "{} ({})", self.describe(*return_type), parts.join(", "));
            }
        }
        out
    }

    /// Resolve a component handle without recording it
    fn check_element(&self, ty: Type, what: &str) -> Result<()> {
        self.resolve(ty)?;
        if matches!(ty.category(), Some(Category::Void | Category::Function)) {
            return Err(CoilError::invalid_argument(format!("{what} cannot have type {ty}")));
        }
        Ok(())
    }

    fn record_primitive(&mut self, ty: Type) -> Result<()> {
        if !self.primitives.contains(&ty) {
            self.primitives.try_reserve(1)?;
            self.primitives.push(ty);
        }
        Ok(())
    }

    /// Append a validated entry and record its primitive components
    fn push(&mut self, entry: CompositeType, components: &[Type]) -> Result<Type> {
        let index = self.composites.len();
        if index >= MAX_COMPOSITES {
            return Err(CoilError::OutOfMemory {
                message: format!("type registry is full ({MAX_COMPOSITES} composite types)"),
            });
        }
        self.composites.try_reserve(1)?;
        self.track_all(components)?;

        let ty = Self::handle_for(index, &entry, Qualifiers::empty());
        trace!("interned {} as index {}", entry.category().to_str(), index);
        self.composites.push(entry);
        Ok(ty)
    }

    fn handle_for(index: usize, entry: &CompositeType, qualifiers: Qualifiers) -> Type {
        Type::pack(entry.category(), entry.width(), qualifiers, index as u16)
    }
}

fn primitive_layout(primitive: PrimitiveType) -> (u64, u64) {
    if primitive.category == Category::Void {
        return (0, 1);
    }
    let bytes = (primitive.width as u64).div_ceil(8);
    let align = bytes.next_power_of_two().min(16);
    (align_up(bytes, align), align)
}

fn align_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align).saturating_mul(align)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_primitive_interning_is_idempotent() {
        let mut registry = TypeRegistry::new();
        let a = registry.intern_primitive(Category::Integer, 32, Qualifiers::empty()).unwrap();
        let b = registry.intern_primitive(Category::Integer, 32, Qualifiers::empty()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, Type::I32);
        assert_eq!(registry.primitives(), &[Type::I32]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_primitive_roundtrip_every_accepted_combination() {
        let mut registry = TypeRegistry::new();
        for code in 0..16u8 {
            let Some(category) = Category::from_u8(code) else { continue };
            for width in 0..=u8::MAX {
                for bits in 0..=Qualifiers::all().bits() {
                    let qualifiers = Qualifiers::from_bits_truncate(bits);
                    let Ok(ty) = registry.intern_primitive(category, width, qualifiers) else { continue };
                    let descriptor = registry.resolve(ty).unwrap();
                    assert_eq!(descriptor.handle().bits(), ty.bits());
                    assert!(matches!(descriptor, TypeDescriptor::Primitive(p) if p.width == width));
                }
            }
        }
    }

    #[test]
    fn test_primitive_rejects_bad_input() {
        let mut registry = TypeRegistry::new();
        assert!(registry.intern_primitive(Category::Integer, 12, Qualifiers::empty()).is_err());
        assert!(registry.intern_primitive(Category::Void, 8, Qualifiers::empty()).is_err());
        assert!(registry.intern_primitive(Category::Struct, 0, Qualifiers::empty()).is_err());
    }

    #[test]
    fn test_composites_are_not_deduplicated() {
        let mut registry = TypeRegistry::new();
        let fields = vec![Field::new("x", Type::I32), Field::new("y", Type::I32)];
        let a = registry.intern_struct(Some("Point"), fields.clone()).unwrap();
        let b = registry.intern_struct(Some("Point"), fields).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.composite_index(), Some(0));
        assert_eq!(b.composite_index(), Some(1));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_resolve_unknown_index() {
        let registry = TypeRegistry::new();
        let dangling = Type::pack(Category::Struct, 0, Qualifiers::empty(), 3);
        let err = registry.resolve(dangling).unwrap_err();
        assert_eq!(err, CoilError::UnknownType { handle: dangling.bits() });
    }

    #[test]
    fn test_resolve_category_mismatch() {
        let mut registry = TypeRegistry::new();
        registry.intern_array(Type::I8, 4).unwrap();
        let wrong = Type::pack(Category::Struct, 0, Qualifiers::empty(), 0);
        assert!(registry.resolve(wrong).is_err());
    }

    #[test]
    fn test_pointer_qualifiers() {
        let mut registry = TypeRegistry::new();
        let ptr = registry.intern_pointer(Type::I8, Qualifiers::CONST).unwrap();
        assert_eq!(ptr.category(), Some(Category::Pointer));
        assert_eq!(ptr.width(), 64);
        assert_eq!(ptr.qualifiers(), Qualifiers::CONST);
        assert_eq!(
            registry.composite(ptr).unwrap(),
            &CompositeType::Pointer { pointee: Type::I8 }
        );
        assert_eq!(registry.describe(ptr), "i8*");
    }

    #[test]
    fn test_component_from_foreign_registry() {
        let mut other = TypeRegistry::new();
        let foreign = other.intern_array(Type::I32, 2).unwrap();

        let mut registry = TypeRegistry::new();
        let err = registry.intern_pointer(foreign, Qualifiers::empty()).unwrap_err();
        assert_eq!(err, CoilError::UnknownType { handle: foreign.bits() });
    }

    #[test]
    fn test_struct_layout() {
        let mut registry = TypeRegistry::new();
        let ty = registry
            .intern_struct(
                None,
                vec![Field::new("a", Type::I8), Field::new("b", Type::I32), Field::new("c", Type::I16)],
            )
            .unwrap();
        assert_eq!(registry.layout(ty).unwrap(), (12, 4));

        let arr = registry.intern_array(ty, 3).unwrap();
        assert_eq!(registry.layout(arr).unwrap(), (36, 4));

        let vec = registry.intern_vector(Type::F32, 3).unwrap();
        assert_eq!(registry.layout(vec).unwrap(), (16, 16));
        assert_eq!(vec.width(), 3);

        let union = registry
            .intern_union(Some("U"), vec![Field::new("a", Type::I8), Field::new("b", Type::I64)])
            .unwrap();
        assert_eq!(registry.layout(union).unwrap(), (8, 8));
    }

    #[test]
    fn test_function_type() {
        let mut registry = TypeRegistry::new();
        let sig = registry.intern_function(Type::I32, &[Type::I32, Type::I32], true).unwrap();
        assert_eq!(registry.describe(sig), "i32 (i32, i32, ...)");
        assert_eq!(registry.layout(sig).unwrap(), (0, 1));
        assert!(registry.intern_function(Type::I32, &[Type::VOID], false).is_err());
    }

    #[test]
    fn test_rejected_intern_records_nothing() {
        let mut registry = TypeRegistry::new();
        registry.intern_primitive(Category::Bool, 1, Qualifiers::empty()).unwrap();
        let before = registry.clone();

        let fields = vec![Field::new("a", Type::I16), Field::new("b", Type::VOID)];
        assert!(registry.intern_struct(None, fields).is_err());
        assert!(registry.intern_union(None, vec![Field::new("f", Type::F64), Field::anonymous(Type::VOID)]).is_err());
        assert!(registry.intern_function(Type::I64, &[Type::U8, Type::VOID], false).is_err());
        assert!(registry.intern_vector(Type::F32, 0).is_err());
        assert_eq!(registry, before);

        registry.intern_function(Type::VOID, &[Type::U8], false).unwrap();
        assert_eq!(registry.primitives(), &[Type::BOOL, Type::VOID, Type::U8]);
    }

    #[test]
    fn test_registry_full() {
        let mut registry = TypeRegistry::new();
        for _ in 0..MAX_COMPOSITES {
            registry.intern_array(Type::I8, 1).unwrap();
        }
        let err = registry.intern_array(Type::I8, 1).unwrap_err();
        assert_eq!(err.kind(), coil_common::ErrorKind::OutOfMemory);
        assert_eq!(registry.len(), MAX_COMPOSITES);
    }
}
