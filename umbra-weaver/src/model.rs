// Reflection metadata produced by a weave.
//
// These types are what the manifest carries to native code generation and
// what dependent modules read back to learn about types they build on.

use serde::{Deserialize, Serialize};

/// Native data-type classification of a property or parameter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropertyKind {
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    String,
    Name,
    Text,
    Object { class: String },
    Class { class: String },
    WeakObject { class: String },
    SoftObject { class: String },
    Interface { interface: String },
    Struct { name: String },
    Enum { name: String },
    Array { inner: Box<PropertyKind> },
    Set { inner: Box<PropertyKind> },
    Map { key: Box<PropertyKind>, value: Box<PropertyKind> },
    Optional { inner: Box<PropertyKind> },
    Delegate { signature: String },
    MulticastDelegate { signature: String },
}

impl PropertyKind {
    pub fn is_primitive(&self) -> bool {
        use PropertyKind::*;
        matches!(
            self,
            Int8 | UInt8 | Int16 | UInt16 | Int32 | UInt32 | Int64 | UInt64 | Float | Double
        )
    }

    /// True when the managed value has the exact native layout. Structs ask
    /// `struct_blittable`, which must already know every struct it is asked about.
    pub fn is_blittable(&self, struct_blittable: &dyn Fn(&str) -> bool) -> bool {
        use PropertyKind::*;
        match self {
            k if k.is_primitive() => true,
            Name | Object { .. } | Class { .. } | WeakObject { .. } | Delegate { .. } => true,
            Struct { name } => struct_blittable(name),
            _ => false,
        }
    }

    /// Whether the replication layer can send this kind.
    pub fn is_replicable(&self) -> bool {
        use PropertyKind::*;
        match self {
            Set { .. } | Map { .. } | Optional { .. } | Delegate { .. } | MulticastDelegate { .. } => false,
            Interface { .. } => false,
            Array { inner } => inner.is_replicable() && !matches!(**inner, Array { .. }),
            _ => true,
        }
    }

    /// Multicast delegates only exist inside native objects.
    pub fn is_marshalable(&self) -> bool {
        use PropertyKind::*;
        match self {
            MulticastDelegate { .. } => false,
            Array { inner } | Set { inner } | Optional { inner } => inner.is_marshalable(),
            Map { key, value } => key.is_marshalable() && value.is_marshalable(),
            _ => true,
        }
    }

    /// Struct named directly by this kind (not through a container).
    pub fn direct_struct(&self) -> Option<&str> {
        match self {
            PropertyKind::Struct { name } => Some(name),
            _ => None,
        }
    }

    /// Native property class name, as the engine spells it.
    pub fn native_type(&self) -> &'static str {
        use PropertyKind::*;
        match self {
            Bool => "BoolProperty",
            Int8 => "Int8Property",
            UInt8 => "ByteProperty",
            Int16 => "Int16Property",
            UInt16 => "UInt16Property",
            Int32 => "IntProperty",
            UInt32 => "UInt32Property",
            Int64 => "Int64Property",
            UInt64 => "UInt64Property",
            Float => "FloatProperty",
            Double => "DoubleProperty",
            String => "StrProperty",
            Name => "NameProperty",
            Text => "TextProperty",
            Object { .. } => "ObjectProperty",
            Class { .. } => "ClassProperty",
            WeakObject { .. } => "WeakObjectProperty",
            SoftObject { .. } => "SoftObjectProperty",
            Interface { .. } => "InterfaceProperty",
            Struct { .. } => "StructProperty",
            Enum { .. } => "EnumProperty",
            Array { .. } => "ArrayProperty",
            Set { .. } => "SetProperty",
            Map { .. } => "MapProperty",
            Optional { .. } => "OptionalProperty",
            Delegate { .. } => "DelegateProperty",
            MulticastDelegate { .. } => "MulticastInlineDelegateProperty",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParamDirection {
    /// By value.
    In,
    /// By shared reference; native sees a const reference.
    ConstRef,
    /// By `&mut`; copied back after the call.
    InOut,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ParamMeta {
    pub name: String,
    pub native_name: String,
    pub kind: PropertyKind,
    pub direction: ParamDirection,
    /// CPF_* flags.
    pub flags: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    /// Newly declared function with a managed body.
    Callable,
    /// Dispatch point implemented by visual scripting; the managed body is a default.
    ImplementableEvent,
    /// Dispatch point with a managed default implementation.
    NativeEvent,
    /// Remote procedure call.
    Rpc,
    /// Managed implementation of an event an ancestor declares.
    Override,
    /// Managed implementation of an interface function.
    InterfaceImpl,
}

impl FunctionKind {
    /// Declarations whose managed callers go through native dispatch.
    pub fn dispatches_natively(self) -> bool {
        matches!(
            self,
            FunctionKind::ImplementableEvent | FunctionKind::NativeEvent | FunctionKind::Rpc
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FunctionMeta {
    /// Native name.
    pub name: String,
    pub rust_name: String,
    pub kind: FunctionKind,
    /// FUNC_* flags.
    pub flags: u32,
    pub params: Vec<ParamMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<PropertyKind>,
    /// Type declaring the native function this one implements (overrides and
    /// interface implementations).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_by: Option<String>,
}

impl FunctionMeta {
    pub fn is_static(&self) -> bool {
        self.flags & umbra_flags::FUNC_STATIC != 0
    }

    pub fn is_event(&self) -> bool {
        umbra_flags::is_event(self.flags)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Replication {
    /// Lifetime condition specifier (`None`, `OwnerOnly`, ...).
    pub condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PropertyMeta {
    pub name: String,
    pub native_name: String,
    pub kind: PropertyKind,
    /// CPF_* flags.
    pub flags: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication: Option<Replication>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub getter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setter: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClassMeta {
    pub name: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// CLASS_* flags.
    pub flags: u32,
    pub properties: Vec<PropertyMeta>,
    pub functions: Vec<FunctionMeta>,
    #[serde(default)]
    pub interfaces: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StructMeta {
    pub name: String,
    pub full_name: String,
    /// STRUCT_* flags.
    pub flags: u32,
    pub blittable: bool,
    pub properties: Vec<PropertyMeta>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EnumVariantMeta {
    pub name: String,
    pub value: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EnumMeta {
    pub name: String,
    pub full_name: String,
    /// Underlying integer type (`u8`, `i32`, ...).
    pub underlying: String,
    pub variants: Vec<EnumVariantMeta>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InterfaceMeta {
    pub name: String,
    pub full_name: String,
    pub functions: Vec<FunctionMeta>,
}

/// Everything one module exports, as written to `<Module>.manifest.json`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleManifest {
    pub module: String,
    pub package: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub classes: Vec<ClassMeta>,
    #[serde(default)]
    pub structs: Vec<StructMeta>,
    #[serde(default)]
    pub enums: Vec<EnumMeta>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceMeta>,
}

impl ModuleManifest {
    pub fn class(&self, name: &str) -> Option<&ClassMeta> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub fn strukt(&self, name: &str) -> Option<&StructMeta> {
        self.structs.iter().find(|s| s.name == name)
    }

    pub fn enumeration(&self, name: &str) -> Option<&EnumMeta> {
        self.enums.iter().find(|e| e.name == name)
    }

    pub fn interface(&self, name: &str) -> Option<&InterfaceMeta> {
        self.interfaces.iter().find(|i| i.name == name)
    }

    pub fn type_count(&self) -> usize {
        self.classes.len() + self.structs.len() + self.enums.len() + self.interfaces.len()
    }
}
