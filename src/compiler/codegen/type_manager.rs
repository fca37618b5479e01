//! Type registration and layout.
//!
//! The type manager canonicalises function types, computes struct layouts
//! with inherited fields, assigns virtual-method slots, and reserves the
//! linear-memory region every class's vtable is materialised into.
//!
//! Determinism rules: function-type indices equal the order of first
//! interning, struct registration order is preserved, and a subtype's field
//! layout is always a prefix extension of its supertype's layout.

use crate::compiler::bytecode::{ClassFile, access};
use crate::compiler::codegen::function_name::FunctionName;
use crate::compiler::codegen::value_types::{FunctionType, NamedStorageType, ValueType};
use crate::compiler::compiler_errors::WasmError;
use crate::return_input_error;
use rustc_hash::FxHashMap;

/// Bytes per vtable slot in linear memory.
pub const VTABLE_SLOT_SIZE: u32 = 4;

/// Name of the synthetic header field holding the vtable offset.
pub const VTABLE_FIELD: &str = ".vtable";

#[derive(Debug, Clone)]
pub struct StructType {
    pub name: String,
    /// Header field first, then inherited fields in their original order,
    /// then the class's own fields. Fixed at first registration.
    pub fields: Vec<NamedStorageType>,
    /// The vtable: slot index = position. Overrides keep the inherited slot,
    /// new virtual methods append.
    pub methods: Vec<FunctionName>,
    /// Index in the type section, assigned at finish when GC is enabled.
    pub type_index: Option<u32>,
    /// Offset of this class's vtable in the data section.
    pub vtable_offset: u32,
}

#[derive(Debug, Default)]
pub struct TypeManager {
    function_types: Vec<FunctionType>,
    structs: FxHashMap<String, StructType>,
    struct_order: Vec<String>,
    array_elements: Vec<ValueType>,
    vtable_bytes: u32,
}

impl TypeManager {
    pub fn new() -> Self {
        TypeManager::default()
    }

    // =========================================================================
    // Function types
    // =========================================================================

    /// Canonicalise a function type, returning its index in the type section.
    ///
    /// The cardinality is small, so a linear scan for structural equality
    /// keeps the index assignment equal to first-interning order without any
    /// hashing subtleties.
    pub fn intern(&mut self, ty: &FunctionType) -> u32 {
        for (index, existing) in self.function_types.iter().enumerate() {
            if existing == ty {
                return index as u32;
            }
        }
        self.function_types.push(ty.clone());
        (self.function_types.len() - 1) as u32
    }

    pub fn function_types(&self) -> &[FunctionType] {
        &self.function_types
    }

    /// Index of an already-interned function type.
    pub fn find(&self, ty: &FunctionType) -> Option<u32> {
        self.function_types
            .iter()
            .position(|existing| existing == ty)
            .map(|index| index as u32)
    }

    // =========================================================================
    // Struct types
    // =========================================================================

    /// Register `name` and its whole superclass chain. Repeated registration
    /// returns without touching the existing layout.
    ///
    /// A superclass outside the compiled set bounds the chain: the class is
    /// laid out as a root with just the vtable header field.
    pub fn register_class(
        &mut self,
        classes: &FxHashMap<String, ClassFile>,
        name: &str,
    ) -> Result<(), WasmError> {
        if self.structs.contains_key(name) {
            return Ok(());
        }
        let class = match classes.get(name) {
            Some(class) => class,
            None => return_input_error!("unknown class {}", name),
        };

        let (mut fields, mut methods) = match class
            .super_name
            .as_deref()
            .filter(|super_name| classes.contains_key(*super_name))
        {
            Some(super_name) => {
                self.register_class(classes, super_name)?;
                let parent = &self.structs[super_name];
                (parent.fields.clone(), parent.methods.clone())
            }
            None => (
                vec![NamedStorageType::new(ValueType::I32, VTABLE_FIELD)],
                Vec::new(),
            ),
        };

        for field in &class.fields {
            if field.is_static() {
                continue;
            }
            let ch = field.descriptor.chars().next().unwrap_or('V');
            let ty = ValueType::storage_from_descriptor_char(ch)
                .map_err(|e| e.in_method(name, &field.name))?;
            fields.push(NamedStorageType::new(ty, field.name.as_str()));
        }

        for method in &class.methods {
            if method.is_static()
                || method.name.starts_with('<')
                || method.access_flags & access::PRIVATE != 0
            {
                continue;
            }
            let fn_name = FunctionName::new(name, &method.name, &method.descriptor);
            match methods
                .iter()
                .position(|m| m.method_name == method.name && m.descriptor == method.descriptor)
            {
                Some(slot) => methods[slot] = fn_name,
                None => methods.push(fn_name),
            }
        }

        let vtable_offset = self.vtable_bytes;
        self.vtable_bytes += methods.len() as u32 * VTABLE_SLOT_SIZE;

        self.structs.insert(
            name.to_owned(),
            StructType {
                name: name.to_owned(),
                fields,
                methods,
                type_index: None,
                vtable_offset,
            },
        );
        self.struct_order.push(name.to_owned());
        Ok(())
    }

    pub fn struct_type(&self, name: &str) -> Result<&StructType, WasmError> {
        match self.structs.get(name) {
            Some(ty) => Ok(ty),
            None => return_input_error!("unknown class {}", name),
        }
    }

    /// Linear-memory offset of a class's vtable.
    pub fn vtable_offset(&self, name: &str) -> Result<u32, WasmError> {
        Ok(self.struct_type(name)?.vtable_offset)
    }

    /// Virtual slot of a method, looked up through the receiver class.
    pub fn vtable_slot(
        &self,
        class_name: &str,
        method_name: &str,
        descriptor: &str,
    ) -> Result<u32, WasmError> {
        let struct_type = self.struct_type(class_name)?;
        match struct_type
            .methods
            .iter()
            .position(|m| m.method_name == method_name && m.descriptor == descriptor)
        {
            Some(slot) => Ok(slot as u32),
            None => return_input_error!(
                "no virtual slot for {}{} in class {}",
                method_name,
                descriptor,
                class_name
            ),
        }
    }

    /// Index of a named field in the struct layout. Shadowing resolves to
    /// the most-derived declaration.
    pub fn field_index(&self, class_name: &str, field_name: &str) -> Result<u32, WasmError> {
        let struct_type = self.struct_type(class_name)?;
        match struct_type
            .fields
            .iter()
            .rposition(|f| f.name == field_name)
        {
            Some(index) => Ok(index as u32),
            None => return_input_error!("no field {} in class {}", field_name, class_name),
        }
    }

    /// Total size of the vtable region at the bottom of the data section.
    pub fn vtable_region_size(&self) -> u32 {
        self.vtable_bytes
    }

    /// Registered structs in registration order, for vtable materialisation
    /// and the GC type section.
    pub fn structs_in_order(&self) -> impl Iterator<Item = &StructType> {
        self.struct_order.iter().map(|name| &self.structs[name])
    }

    // =========================================================================
    // Array types
    // =========================================================================

    /// Register an array type by element type. All array operations share one
    /// opcode set, so only the element type matters for identity.
    pub fn register_array(&mut self, element: ValueType) -> u32 {
        for (index, existing) in self.array_elements.iter().enumerate() {
            if *existing == element {
                return index as u32;
            }
        }
        self.array_elements.push(element);
        (self.array_elements.len() - 1) as u32
    }

    pub fn array_elements(&self) -> &[ValueType] {
        &self.array_elements
    }

    /// Assign type-section indices to struct and array types, after all
    /// function types are interned. Returns the total type count.
    pub fn assign_composite_indices(&mut self) -> u32 {
        let mut next = self.function_types.len() as u32;
        for name in &self.struct_order {
            if let Some(struct_type) = self.structs.get_mut(name) {
                struct_type.type_index = Some(next);
                next += 1;
            }
        }
        next += self.array_elements.len() as u32;
        next
    }

    /// Type-section index of a registered array type.
    pub fn array_type_index(&self, element: ValueType) -> Option<u32> {
        let base = self.function_types.len() as u32 + self.struct_order.len() as u32;
        self.array_elements
            .iter()
            .position(|e| *e == element)
            .map(|i| base + i as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::bytecode::{ConstantPool, FieldInfo, MethodInfo};

    fn class(
        name: &str,
        super_name: Option<&str>,
        fields: Vec<(&str, &str, u16)>,
        methods: Vec<(&str, &str, u16)>,
    ) -> ClassFile {
        ClassFile {
            name: name.to_owned(),
            super_name: super_name.map(str::to_owned),
            interfaces: Vec::new(),
            access_flags: access::PUBLIC,
            fields: fields
                .into_iter()
                .map(|(n, d, a)| FieldInfo {
                    name: n.to_owned(),
                    descriptor: d.to_owned(),
                    access_flags: a,
                })
                .collect(),
            methods: methods
                .into_iter()
                .map(|(n, d, a)| MethodInfo {
                    name: n.to_owned(),
                    descriptor: d.to_owned(),
                    access_flags: a,
                    code: None,
                    annotations: Vec::new(),
                })
                .collect(),
            source_file: None,
            constant_pool: ConstantPool::default(),
        }
    }

    fn classes(list: Vec<ClassFile>) -> FxHashMap<String, ClassFile> {
        list.into_iter().map(|c| (c.name.clone(), c)).collect()
    }

    #[test]
    fn function_type_interning_is_first_come_first_indexed() {
        let mut types = TypeManager::new();
        let a = FunctionType::new(vec![ValueType::I32, ValueType::I32], vec![ValueType::I32]);
        let b = FunctionType::new(vec![ValueType::I32], vec![ValueType::I32]);
        let c = FunctionType::new(vec![ValueType::I64], vec![ValueType::I64]);

        assert_eq!(types.intern(&a), 0);
        assert_eq!(types.intern(&b), 1);
        assert_eq!(types.intern(&a), 0);
        assert_eq!(types.intern(&c), 2);
        assert_eq!(types.function_types().len(), 3);
    }

    #[test]
    fn subtype_layout_extends_supertype_prefix() {
        let set = classes(vec![
            class("Base", None, vec![("x", "I", 0), ("cached", "I", access::STATIC)], vec![]),
            class("Derived", Some("Base"), vec![("y", "D", 0)], vec![]),
        ]);
        let mut types = TypeManager::new();
        types.register_class(&set, "Derived").unwrap();

        let base = types.struct_type("Base").unwrap();
        let derived = types.struct_type("Derived").unwrap();
        assert_eq!(base.fields.len(), 2); // header + x, statics excluded
        assert_eq!(derived.fields[..base.fields.len()], base.fields[..]);
        assert_eq!(derived.fields.last().unwrap().name, "y");
        assert_eq!(types.field_index("Derived", "x").unwrap(), 1);
        assert_eq!(types.field_index("Derived", "y").unwrap(), 2);
    }

    #[test]
    fn overrides_keep_their_slot_and_new_methods_append() {
        let set = classes(vec![
            class(
                "Shape",
                None,
                vec![],
                vec![("area", "()D", 0), ("name", "()Ljava/lang/String;", 0)],
            ),
            class(
                "Circle",
                Some("Shape"),
                vec![],
                vec![("area", "()D", 0), ("radius", "()D", 0)],
            ),
        ]);
        let mut types = TypeManager::new();
        types.register_class(&set, "Circle").unwrap();

        assert_eq!(types.vtable_slot("Shape", "area", "()D").unwrap(), 0);
        assert_eq!(types.vtable_slot("Circle", "area", "()D").unwrap(), 0);
        assert_eq!(types.vtable_slot("Circle", "radius", "()D").unwrap(), 2);

        let circle = types.struct_type("Circle").unwrap();
        assert_eq!(circle.methods[0].class_name, "Circle");
        assert_eq!(circle.methods[1].class_name, "Shape");
    }

    #[test]
    fn vtable_offsets_are_packed_in_registration_order() {
        let set = classes(vec![
            class("A", None, vec![], vec![("m", "()V", 0), ("n", "()V", 0)]),
            class("B", None, vec![], vec![("p", "()V", 0)]),
        ]);
        let mut types = TypeManager::new();
        types.register_class(&set, "A").unwrap();
        types.register_class(&set, "B").unwrap();

        assert_eq!(types.vtable_offset("A").unwrap(), 0);
        assert_eq!(types.vtable_offset("B").unwrap(), 2 * VTABLE_SLOT_SIZE);
        assert_eq!(types.vtable_region_size(), 3 * VTABLE_SLOT_SIZE);
    }

    #[test]
    fn unknown_class_is_fatal() {
        let types = TypeManager::new();
        assert!(types.struct_type("ghost/Class").is_err());

        let mut types = TypeManager::new();
        let set = classes(vec![]);
        assert!(types.register_class(&set, "ghost/Class").is_err());
    }

    #[test]
    fn array_registration_dedups_by_element() {
        let mut types = TypeManager::new();
        assert_eq!(types.register_array(ValueType::I32), 0);
        assert_eq!(types.register_array(ValueType::F64), 1);
        assert_eq!(types.register_array(ValueType::I32), 0);
        assert_eq!(types.array_elements().len(), 2);
    }
}
