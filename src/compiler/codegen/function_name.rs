//! Canonical function identity.
//!
//! Every function the compiler touches, defined, imported or runtime-library,
//! is identified by a [`FunctionName`]: class, method and descriptor, with the
//! derived `signature_name` used as the key in every map across the pipeline.

use rustc_hash::FxHashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionName {
    pub class_name: String,
    pub method_name: String,
    pub descriptor: String,
    pub signature_name: String,
}

impl FunctionName {
    pub fn new(class_name: &str, method_name: &str, descriptor: &str) -> FunctionName {
        FunctionName {
            class_name: class_name.to_owned(),
            method_name: method_name.to_owned(),
            descriptor: descriptor.to_owned(),
            signature_name: format!("{class_name}.{method_name}{descriptor}"),
        }
    }

    /// Parse a `class.method(descriptor)` signature back into its parts.
    /// Used by the text parser for `call $...` operands.
    pub fn from_signature(signature: &str) -> Option<FunctionName> {
        let paren = signature.find('(')?;
        let (front, descriptor) = signature.split_at(paren);
        let dot = front.rfind('.')?;
        let (class_name, method_name) = front.split_at(dot);
        Some(FunctionName::new(class_name, &method_name[1..], descriptor))
    }
}

/// Interning registry enforcing the one-instance-per-signature invariant.
///
/// Construction from a constant-pool method reference goes through here so
/// that repeated references to the same method always observe the identical
/// name record.
#[derive(Debug, Default)]
pub struct FunctionNameRegistry {
    names: FxHashMap<String, FunctionName>,
}

impl FunctionNameRegistry {
    pub fn new() -> Self {
        FunctionNameRegistry {
            names: FxHashMap::default(),
        }
    }

    pub fn intern(&mut self, class_name: &str, method_name: &str, descriptor: &str) -> &FunctionName {
        let signature = format!("{class_name}.{method_name}{descriptor}");
        self.names
            .entry(signature)
            .or_insert_with(|| FunctionName::new(class_name, method_name, descriptor))
    }

    pub fn get(&self, signature_name: &str) -> Option<&FunctionName> {
        self.names.get(signature_name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_name_is_derived() {
        let name = FunctionName::new("com/example/Math", "add", "(II)I");
        assert_eq!(name.signature_name, "com/example/Math.add(II)I");
    }

    #[test]
    fn interning_is_idempotent() {
        let mut registry = FunctionNameRegistry::new();
        registry.intern("A", "m", "()V");
        registry.intern("A", "m", "()V");
        registry.intern("A", "m", "(I)V");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn signature_round_trips() {
        let name = FunctionName::new("com/example/Text", "indexOf", "(Ljava/lang/String;I)I");
        let parsed = FunctionName::from_signature(&name.signature_name).unwrap();
        assert_eq!(parsed, name);
    }
}
