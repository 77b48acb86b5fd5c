// Classification: declarations in, weave plans out.
//
// Every reflected type, property, parameter and function is classified here.
// The plans carry both the metadata written to the manifest and the syntax
// the emitter needs (field types, marshaler paths, parameter idents).

use std::collections::{HashMap, HashSet};

use proc_macro2::{Ident, TokenStream};
use quote::{quote, ToTokens};
use syn::{
    Attribute, Expr, FnArg, Fields, GenericArgument, ImplItem, ItemEnum, ItemStruct, ItemTrait, Lit, Pat,
    PathArguments, PathSegment, ReturnType, Signature, TraitItem, Type, Visibility,
};

use umbra_flags::*;

use crate::error::AuthoringError;
use crate::model::*;
use crate::naming::{self, ident, to_pascal_case, to_snake_case};
use crate::order;
use crate::parse::{self, Declarations, ImplDecl, Located, Specifier, CONSTRUCTOR, UFUNCTION, UPROPERTY};
use crate::validate::{self, FunctionSpec};

// ---------------------------------------------------------------------------
// Type environment
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    Class,
    Struct,
    Enum,
    Interface,
}

/// Reflected types visible to a module: its own declarations first, then
/// whatever its dependency manifests export.
pub struct TypeEnv<'a> {
    local: HashMap<String, Category>,
    manifests: &'a [ModuleManifest],
}

impl<'a> TypeEnv<'a> {
    pub fn new(decls: &Declarations, manifests: &'a [ModuleManifest]) -> Self {
        let mut local = HashMap::new();
        for c in &decls.classes {
            local.insert(c.item.ident.to_string(), Category::Class);
        }
        for s in &decls.structs {
            local.insert(s.item.ident.to_string(), Category::Struct);
        }
        for e in &decls.enums {
            local.insert(e.item.ident.to_string(), Category::Enum);
        }
        for i in &decls.interfaces {
            local.insert(i.item.ident.to_string(), Category::Interface);
        }
        TypeEnv { local, manifests }
    }

    pub fn category(&self, name: &str) -> Option<Category> {
        if let Some(&c) = self.local.get(name) {
            return Some(c);
        }
        self.manifests.iter().find_map(|m| {
            if m.class(name).is_some() {
                Some(Category::Class)
            } else if m.strukt(name).is_some() {
                Some(Category::Struct)
            } else if m.enumeration(name).is_some() {
                Some(Category::Enum)
            } else if m.interface(name).is_some() {
                Some(Category::Interface)
            } else {
                None
            }
        })
    }

    /// Blittability of a struct another module declares.
    pub fn external_blittable(&self, name: &str) -> bool {
        self.manifests
            .iter()
            .find_map(|m| m.strukt(name))
            .is_some_and(|s| s.blittable)
    }

    fn external_class(&self, name: &str) -> Option<&'a ClassMeta> {
        self.manifests
            .iter()
            .find_map(|m| m.classes.iter().find(|c| c.name == name || c.full_name == name))
    }

    fn external_interface(&self, name: &str) -> Option<&'a InterfaceMeta> {
        self.manifests.iter().find_map(|m| m.interface(name))
    }
}

// ---------------------------------------------------------------------------
// Type shapes
// ---------------------------------------------------------------------------

pub struct Classified {
    pub kind: PropertyKind,
    /// Marshaler type moving the value; empty for multicast delegates.
    pub marshaller: TokenStream,
}

fn generic_args(segment: &PathSegment) -> Vec<&Type> {
    match &segment.arguments {
        PathArguments::AngleBracketed(args) => args
            .args
            .iter()
            .filter_map(|a| match a {
                GenericArgument::Type(t) => Some(t),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn reflected_name(ty: &Type, env: &TypeEnv, category: Category) -> Option<String> {
    let name = match ty {
        Type::TraitObject(t) => t.bounds.iter().find_map(|b| match b {
            syn::TypeParamBound::Trait(t) => t.path.segments.last().map(|s| s.ident.to_string()),
            _ => None,
        })?,
        other => parse::type_name(other)?,
    };
    (env.category(&name) == Some(category)).then_some(name)
}

/// Element of a container: marshalable and not itself a container.
fn element(ty: &Type, env: &TypeEnv) -> Option<Classified> {
    let c = classify_type(ty, env)?;
    let nested = matches!(
        c.kind,
        PropertyKind::Array { .. } | PropertyKind::Set { .. } | PropertyKind::Map { .. }
    );
    (c.kind.is_marshalable() && !nested).then_some(c)
}

/// Native classification of a Rust type, or `None` when it has no native
/// representation.
pub fn classify_type(ty: &Type, env: &TypeEnv) -> Option<Classified> {
    let m = quote!(::umbra_runtime::marshal);
    let ty = match ty {
        Type::Group(g) => &*g.elem,
        Type::Paren(p) => &*p.elem,
        other => other,
    };
    let Type::Path(tp) = ty else { return None };
    if tp.qself.is_some() {
        return None;
    }
    let segment = tp.path.segments.last()?;
    let name = segment.ident.to_string();
    let args = generic_args(segment);
    let classified = |kind: PropertyKind, marshaller: TokenStream| Some(Classified { kind, marshaller });
    let blittable = |kind: PropertyKind| classified(kind, quote!(::umbra_runtime::Blittable<#ty>));

    match (name.as_str(), args.as_slice()) {
        ("i8", []) => blittable(PropertyKind::Int8),
        ("u8", []) => blittable(PropertyKind::UInt8),
        ("i16", []) => blittable(PropertyKind::Int16),
        ("u16", []) => blittable(PropertyKind::UInt16),
        ("i32", []) => blittable(PropertyKind::Int32),
        ("u32", []) => blittable(PropertyKind::UInt32),
        ("i64", []) => blittable(PropertyKind::Int64),
        ("u64", []) => blittable(PropertyKind::UInt64),
        ("f32", []) => blittable(PropertyKind::Float),
        ("f64", []) => blittable(PropertyKind::Double),
        ("bool", []) => classified(PropertyKind::Bool, quote!(#m::BoolMarshaller)),
        ("String", []) => classified(PropertyKind::String, quote!(#m::StringMarshaller)),
        ("Name", []) => classified(PropertyKind::Name, quote!(#m::NameMarshaller)),
        ("Text", []) => classified(PropertyKind::Text, quote!(#m::TextMarshaller)),
        ("Vec", [inner]) => {
            let inner = element(inner, env)?;
            let im = inner.marshaller;
            classified(
                PropertyKind::Array { inner: Box::new(inner.kind) },
                quote!(#m::ArrayMarshaller<#im>),
            )
        }
        ("HashSet", [inner]) => {
            let inner = element(inner, env)?;
            let im = inner.marshaller;
            classified(
                PropertyKind::Set { inner: Box::new(inner.kind) },
                quote!(#m::SetMarshaller<#im>),
            )
        }
        ("HashMap", [key, value]) => {
            let key = element(key, env)?;
            let value = element(value, env)?;
            let (km, vm) = (key.marshaller, value.marshaller);
            classified(
                PropertyKind::Map {
                    key: Box::new(key.kind),
                    value: Box::new(value.kind),
                },
                quote!(#m::MapMarshaller<#km, #vm>),
            )
        }
        ("Option", [inner]) => {
            let inner = classify_type(inner, env).filter(|c| c.kind.is_marshalable())?;
            let im = inner.marshaller;
            classified(
                PropertyKind::Optional { inner: Box::new(inner.kind) },
                quote!(#m::OptionalMarshaller<#im>),
            )
        }
        ("ObjectRef", [t]) => classified(
            PropertyKind::Object {
                class: reflected_name(t, env, Category::Class)?,
            },
            quote!(#m::ObjectMarshaller<#t>),
        ),
        ("SubclassOf", [t]) => classified(
            PropertyKind::Class {
                class: reflected_name(t, env, Category::Class)?,
            },
            quote!(#m::ClassMarshaller<#t>),
        ),
        ("WeakObjectRef", [t]) => classified(
            PropertyKind::WeakObject {
                class: reflected_name(t, env, Category::Class)?,
            },
            quote!(#m::WeakObjectMarshaller<#t>),
        ),
        ("SoftObjectRef", [t]) => classified(
            PropertyKind::SoftObject {
                class: reflected_name(t, env, Category::Class)?,
            },
            quote!(#m::SoftObjectMarshaller<#t>),
        ),
        ("ScriptInterface", [t]) => classified(
            PropertyKind::Interface {
                interface: reflected_name(t, env, Category::Interface)?,
            },
            quote!(#m::InterfaceMarshaller<#t>),
        ),
        ("Delegate", [f]) => classified(
            PropertyKind::Delegate {
                signature: f.to_token_stream().to_string(),
            },
            quote!(#m::DelegateMarshaller<#f>),
        ),
        ("MulticastDelegate", [f]) => classified(
            PropertyKind::MulticastDelegate {
                signature: f.to_token_stream().to_string(),
            },
            TokenStream::new(),
        ),
        (_, []) => match env.category(&name)? {
            Category::Struct => classified(
                PropertyKind::Struct { name },
                quote!(<#ty as ::umbra_runtime::NativeStruct>::Marshaller),
            ),
            Category::Enum => classified(PropertyKind::Enum { name }, quote!(#m::EnumMarshaller<#ty>)),
            Category::Class | Category::Interface => None,
        },
        _ => None,
    }
}

fn marshalable(item: &str, ty: &Type, env: &TypeEnv) -> Result<Classified, AuthoringError> {
    classify_type(ty, env)
        .filter(|c| c.kind.is_marshalable())
        .ok_or_else(|| AuthoringError::UnsupportedType {
            item: item.to_string(),
            ty: ty.to_token_stream().to_string(),
        })
}

fn kind_flags(kind: &PropertyKind) -> u64 {
    if kind.is_primitive() {
        CPF_IS_PLAIN_OLD_DATA | CPF_ZERO_CONSTRUCTOR | CPF_NO_DESTRUCTOR
    } else {
        CPF_NONE
    }
}

fn property_access(vis: &Visibility) -> u64 {
    match vis {
        Visibility::Public(_) => CPF_NATIVE_ACCESS_SPECIFIER_PUBLIC,
        Visibility::Restricted(_) => CPF_NATIVE_ACCESS_SPECIFIER_PROTECTED,
        Visibility::Inherited => CPF_NATIVE_ACCESS_SPECIFIER_PRIVATE,
    }
}

fn function_access(vis: &Visibility) -> u32 {
    match vis {
        Visibility::Public(_) => FUNC_PUBLIC,
        Visibility::Restricted(_) => FUNC_PROTECTED,
        Visibility::Inherited => FUNC_PRIVATE,
    }
}

fn attr_specifiers(item: &str, attr: &Attribute) -> Result<Vec<Specifier>, AuthoringError> {
    parse::parse_specifiers(attr).map_err(|e| AuthoringError::MalformedAttribute {
        item: item.to_string(),
        message: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

pub struct PropertyPlan {
    pub meta: PropertyMeta,
    pub field: Ident,
    pub ty: Type,
    pub vis: Visibility,
    pub marshaller: TokenStream,
}

pub struct ParamPlan {
    pub ident: Ident,
    /// Value type; references are stripped.
    pub ty: Type,
    pub direction: ParamDirection,
    pub marshaller: TokenStream,
}

pub struct ReturnPlan {
    pub ty: Type,
    pub marshaller: TokenStream,
}

pub struct FunctionPlan {
    pub meta: FunctionMeta,
    /// Impl block the method is declared in.
    pub impl_ordinal: usize,
    pub method: Ident,
    pub params: Vec<ParamPlan>,
    pub ret: Option<ReturnPlan>,
    /// Native class owning the function the binding resolves.
    pub binding_class: String,
    /// The authored body moves to `<method>_implementation` and `method`
    /// becomes a stub dispatching through native code.
    pub renamed: bool,
    /// Trait path, for interface implementations.
    pub interface: Option<syn::Path>,
    pub invoker: Ident,
    pub binding_fn: Ident,
}

impl FunctionPlan {
    /// Method the invoker calls.
    pub fn body(&self) -> Ident {
        if self.renamed {
            ident(&naming::implementation_name(&self.method.to_string()))
        } else {
            self.method.clone()
        }
    }

    pub fn is_static(&self) -> bool {
        self.meta.is_static()
    }

    /// No parameter block is needed in either direction.
    pub fn is_bare(&self) -> bool {
        self.params.is_empty() && self.ret.is_none()
    }
}

pub struct ClassPlan {
    /// Index into `Declarations::classes`.
    pub decl: usize,
    pub meta: ClassMeta,
    pub properties: Vec<PropertyPlan>,
    pub functions: Vec<FunctionPlan>,
    pub constructor: Option<Ident>,
    pub is_abstract: bool,
}

impl ClassPlan {
    pub fn property(&self, field: &str) -> Option<&PropertyPlan> {
        self.properties.iter().find(|p| p.field == field)
    }
}

pub struct StructPlan {
    pub decl: usize,
    pub meta: StructMeta,
    pub properties: Vec<PropertyPlan>,
}

pub struct EnumPlan {
    pub decl: usize,
    pub meta: EnumMeta,
    pub repr: Ident,
    /// `#[repr]` must be added.
    pub add_repr: bool,
    pub variants: Vec<(Ident, i64)>,
}

pub struct InterfacePlan {
    pub decl: usize,
    pub meta: InterfaceMeta,
}

/// Everything the emitter needs for one module.
#[derive(Default)]
pub struct Analysis {
    /// Base-first.
    pub classes: Vec<ClassPlan>,
    /// Dependency-first.
    pub structs: Vec<StructPlan>,
    pub enums: Vec<EnumPlan>,
    pub interfaces: Vec<InterfacePlan>,
}

impl Analysis {
    pub fn class(&self, name: &str) -> Option<&ClassPlan> {
        self.classes.iter().find(|c| c.meta.name == name)
    }

    pub fn strukt(&self, name: &str) -> Option<&StructPlan> {
        self.structs.iter().find(|s| s.meta.name == name)
    }

    pub fn enumeration(&self, name: &str) -> Option<&EnumPlan> {
        self.enums.iter().find(|e| e.meta.name == name)
    }

    pub fn interface(&self, name: &str) -> Option<&InterfacePlan> {
        self.interfaces.iter().find(|i| i.meta.name == name)
    }

    pub fn manifest(&self, module: &str, package: &str, dependencies: &[String]) -> ModuleManifest {
        ModuleManifest {
            module: module.to_string(),
            package: package.to_string(),
            dependencies: dependencies.to_vec(),
            classes: self.classes.iter().map(|c| c.meta.clone()).collect(),
            structs: self.structs.iter().map(|s| s.meta.clone()).collect(),
            enums: self.enums.iter().map(|e| e.meta.clone()).collect(),
            interfaces: self.interfaces.iter().map(|i| i.meta.clone()).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

struct SignaturePlan {
    params: Vec<ParamPlan>,
    param_metas: Vec<ParamMeta>,
    ret: Option<ReturnPlan>,
    ret_kind: Option<PropertyKind>,
    is_static: bool,
}

fn signature_plan(item: &str, sig: &Signature, env: &TypeEnv) -> Result<SignaturePlan, AuthoringError> {
    if !sig.generics.params.is_empty() || sig.asyncness.is_some() || sig.unsafety.is_some() {
        return Err(AuthoringError::Signature {
            item: item.to_string(),
            problem: "reflected functions cannot be generic, async or unsafe",
        });
    }
    let mut plan = SignaturePlan {
        params: Vec::new(),
        param_metas: Vec::new(),
        ret: None,
        ret_kind: None,
        is_static: true,
    };
    for arg in &sig.inputs {
        match arg {
            FnArg::Receiver(r) => {
                if r.reference.is_none() || r.mutability.is_some() {
                    return Err(AuthoringError::Signature {
                        item: item.to_string(),
                        problem: "reflected functions take `&self`; object state lives in native properties",
                    });
                }
                plan.is_static = false;
            }
            FnArg::Typed(pt) => {
                let Pat::Ident(pi) = &*pt.pat else {
                    return Err(AuthoringError::Signature {
                        item: item.to_string(),
                        problem: "parameters must be plain identifiers",
                    });
                };
                let (ty, direction) = match &*pt.ty {
                    Type::Reference(r) if r.mutability.is_some() => (&*r.elem, ParamDirection::InOut),
                    Type::Reference(r) => (&*r.elem, ParamDirection::ConstRef),
                    other => (other, ParamDirection::In),
                };
                let c = marshalable(item, ty, env)?;
                let flags = CPF_PARM
                    | match direction {
                        ParamDirection::In => CPF_NONE,
                        ParamDirection::ConstRef => CPF_CONST_PARM | CPF_REFERENCE_PARM,
                        ParamDirection::InOut => CPF_OUT_PARM | CPF_REFERENCE_PARM,
                    };
                let rust_name = pi.ident.to_string();
                plan.param_metas.push(ParamMeta {
                    native_name: naming::property_native_name(&rust_name, c.kind == PropertyKind::Bool),
                    name: rust_name,
                    kind: c.kind,
                    direction,
                    flags,
                    default: None,
                });
                plan.params.push(ParamPlan {
                    ident: pi.ident.clone(),
                    ty: ty.clone(),
                    direction,
                    marshaller: c.marshaller,
                });
            }
        }
    }
    if let ReturnType::Type(_, ty) = &sig.output {
        let unit = matches!(&**ty, Type::Tuple(t) if t.elems.is_empty());
        if !unit {
            let c = marshalable(item, ty, env)?;
            plan.ret_kind = Some(c.kind);
            plan.ret = Some(ReturnPlan {
                ty: (**ty).clone(),
                marshaller: c.marshaller,
            });
        }
    }
    Ok(plan)
}

fn function_meta(
    item: &str,
    rust_name: &str,
    kind: FunctionKind,
    spec: &FunctionSpec,
    plan: &SignaturePlan,
    access: u32,
) -> Result<FunctionMeta, AuthoringError> {
    let mut flags = spec.flags | access;
    if plan.is_static {
        flags |= FUNC_STATIC;
    }
    if plan.param_metas.iter().any(|p| p.direction == ParamDirection::InOut) {
        flags |= FUNC_HAS_OUT_PARMS;
    }
    let mut params = plan.param_metas.clone();
    for (param, value) in &spec.defaults {
        let Some(p) = params.iter_mut().find(|p| &p.name == param) else {
            return Err(AuthoringError::SpecifierValue {
                item: item.to_string(),
                specifier: format!("defaults({param})"),
                expected: "the name of a parameter",
            });
        };
        p.default = Some(value.clone());
        flags |= FUNC_HAS_DEFAULTS;
    }
    Ok(FunctionMeta {
        name: spec.native_name.clone().unwrap_or_else(|| to_pascal_case(rust_name)),
        rust_name: rust_name.to_string(),
        kind,
        flags,
        params,
        return_value: plan.ret_kind.clone(),
        declared_by: None,
    })
}

fn binding_idents(prefix: Option<&str>, rust_name: &str) -> (Ident, Ident) {
    let base = rust_name.strip_prefix("r#").unwrap_or(rust_name);
    let base = match prefix {
        Some(p) => format!("{p}_{base}"),
        None => base.to_string(),
    };
    (
        ident(&naming::invoker_name(&base)),
        ident(&format!("__umbra_fn_{base}")),
    )
}

// ---------------------------------------------------------------------------
// Ancestry
// ---------------------------------------------------------------------------

/// An event declared by an ancestor class.
struct InheritedEvent {
    declarer: String,
    declarer_full: String,
    function: FunctionMeta,
}

struct Ancestry<'e, 'a> {
    local: HashMap<String, ClassMeta>,
    env: &'e TypeEnv<'a>,
}

impl Ancestry<'_, '_> {
    fn class(&self, full_name: &str) -> Option<&ClassMeta> {
        self.local
            .get(full_name)
            .or_else(|| self.env.external_class(full_name))
    }

    fn event(&self, parent: Option<&str>, rust_name: &str) -> Option<InheritedEvent> {
        let mut seen = HashSet::new();
        let mut next = parent.map(str::to_string);
        while let Some(full) = next {
            if !seen.insert(full.clone()) {
                break;
            }
            let meta = self.class(&full)?;
            let found = meta
                .functions
                .iter()
                .find(|f| f.rust_name == rust_name && f.is_event() && f.kind != FunctionKind::Override);
            if let Some(f) = found {
                return Some(InheritedEvent {
                    declarer: meta.name.clone(),
                    declarer_full: meta.full_name.clone(),
                    function: f.clone(),
                });
            }
            next = meta.parent.clone();
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Classify and validate every reflected declaration of `module`.
pub fn analyze(module: &str, decls: &Declarations, deps: &[ModuleManifest]) -> Result<Analysis, AuthoringError> {
    let mut seen = HashSet::new();
    for name in decls.type_names() {
        if !seen.insert(name.clone()) {
            return Err(AuthoringError::DuplicateType(name));
        }
    }
    let env = TypeEnv::new(decls, deps);
    let full = |name: &str| format!("{module}.{name}");

    let mut analysis = Analysis::default();
    for (i, e) in decls.enums.iter().enumerate() {
        analysis.enums.push(enum_plan(i, e, full(&e.item.ident.to_string()))?);
    }
    for (i, t) in decls.interfaces.iter().enumerate() {
        analysis
            .interfaces
            .push(interface_plan(i, t, full(&t.item.ident.to_string()), &env)?);
    }
    analysis.structs = struct_plans(decls, &env, &full)?;
    analysis.classes = class_plans(decls, &env, &full, &analysis.interfaces)?;
    Ok(analysis)
}

const INTEGER_REPRS: &[&str] = &["u8", "i8", "u16", "i16", "u32", "i32", "u64", "i64"];

fn repr_of(attrs: &[Attribute]) -> Option<String> {
    attrs.iter().filter(|a| a.path().is_ident("repr")).find_map(|a| {
        let list = a
            .parse_args_with(syn::punctuated::Punctuated::<Ident, syn::Token![,]>::parse_terminated)
            .ok()?;
        list.iter()
            .map(Ident::to_string)
            .find(|r| INTEGER_REPRS.contains(&r.as_str()))
    })
}

fn repr_range(repr: &str) -> (i128, i128) {
    match repr {
        "u8" => (0, u8::MAX as i128),
        "i8" => (i8::MIN as i128, i8::MAX as i128),
        "u16" => (0, u16::MAX as i128),
        "i16" => (i16::MIN as i128, i16::MAX as i128),
        "u32" => (0, u32::MAX as i128),
        "i32" => (i32::MIN as i128, i32::MAX as i128),
        "u64" => (0, i64::MAX as i128),
        _ => (i64::MIN as i128, i64::MAX as i128),
    }
}

fn int_literal(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::Lit(syn::ExprLit { lit: Lit::Int(i), .. }) => i.base10_parse::<i64>().ok(),
        Expr::Unary(syn::ExprUnary {
            op: syn::UnOp::Neg(_),
            expr,
            ..
        }) => int_literal(expr).and_then(i64::checked_neg),
        Expr::Group(g) => int_literal(&g.expr),
        Expr::Paren(p) => int_literal(&p.expr),
        _ => None,
    }
}

fn enum_plan(decl: usize, located: &Located<ItemEnum>, full_name: String) -> Result<EnumPlan, AuthoringError> {
    let e = &located.item;
    let name = e.ident.to_string();
    validate::plain_specifiers(&name, &located.specifiers)?;
    if !e.generics.params.is_empty() {
        return Err(AuthoringError::GenericType(name));
    }
    let declared = repr_of(&e.attrs);
    let underlying = declared.clone().unwrap_or_else(|| "u8".to_string());
    let (min, max) = repr_range(&underlying);
    if e.variants.is_empty() {
        return Err(AuthoringError::EnumShape(name));
    }

    let mut next: Option<i64> = Some(0);
    let mut variants = Vec::with_capacity(e.variants.len());
    let mut metas = Vec::with_capacity(e.variants.len());
    for v in &e.variants {
        if !matches!(v.fields, Fields::Unit) {
            return Err(AuthoringError::EnumShape(name));
        }
        let value = match &v.discriminant {
            Some((_, expr)) => int_literal(expr),
            None => next,
        }
        .filter(|&value| (min..=max).contains(&(value as i128)))
        .ok_or_else(|| AuthoringError::EnumShape(name.clone()))?;
        next = value.checked_add(1);
        variants.push((v.ident.clone(), value));
        metas.push(EnumVariantMeta {
            name: v.ident.to_string(),
            value,
        });
    }
    Ok(EnumPlan {
        decl,
        meta: EnumMeta {
            name,
            full_name,
            underlying: underlying.clone(),
            variants: metas,
        },
        repr: ident(&underlying),
        add_repr: declared.is_none(),
        variants,
    })
}

fn interface_plan(
    decl: usize,
    located: &Located<ItemTrait>,
    full_name: String,
    env: &TypeEnv,
) -> Result<InterfacePlan, AuthoringError> {
    let t = &located.item;
    let name = t.ident.to_string();
    validate::plain_specifiers(&name, &located.specifiers)?;
    if !t.generics.params.is_empty() {
        return Err(AuthoringError::GenericType(name));
    }
    let mut functions: Vec<FunctionMeta> = Vec::new();
    for item in &t.items {
        let TraitItem::Fn(f) = item else { continue };
        let Some(attr) = parse::find_marker(&f.attrs, UFUNCTION) else {
            continue;
        };
        let rust_name = f.sig.ident.to_string();
        let item_name = format!("{name}.{rust_name}");
        let spec = validate::function_specifiers(&name, &rust_name, &attr_specifiers(&item_name, attr)?)?;
        let kind = match spec.kind {
            Some(FunctionKind::Rpc) => {
                return Err(AuthoringError::Signature {
                    item: item_name,
                    problem: "interfaces cannot declare remote procedure calls",
                });
            }
            Some(kind) => kind,
            None => {
                return Err(AuthoringError::Signature {
                    item: item_name,
                    problem: "interface functions cannot be overrides",
                });
            }
        };
        let plan = signature_plan(&item_name, &f.sig, env)?;
        if plan.is_static {
            return Err(AuthoringError::Signature {
                item: item_name,
                problem: "interface functions take `&self`",
            });
        }
        let meta = function_meta(&item_name, &rust_name, kind, &spec, &plan, FUNC_PUBLIC)?;
        if functions.iter().any(|f| f.name == meta.name) {
            return Err(AuthoringError::DuplicateFunction {
                class: name,
                function: meta.name,
            });
        }
        functions.push(meta);
    }
    Ok(InterfacePlan {
        decl,
        meta: InterfaceMeta {
            name,
            full_name,
            functions,
        },
    })
}

fn impls_of<'d>(decls: &'d Declarations, name: &str) -> impl Iterator<Item = &'d ImplDecl> {
    decls
        .impls
        .iter()
        .map(|i| &i.item)
        .filter(move |i| i.self_name == name)
}

fn inherent_methods(decls: &Declarations, name: &str) -> HashMap<String, Signature> {
    impls_of(decls, name)
        .filter(|i| i.trait_name.is_none())
        .flat_map(|i| i.item.items.iter())
        .filter_map(|item| match item {
            ImplItem::Fn(f) => Some((f.sig.ident.to_string(), f.sig.clone())),
            _ => None,
        })
        .collect()
}

fn named_fields<'s>(name: &str, s: &'s ItemStruct) -> Result<Vec<&'s syn::Field>, AuthoringError> {
    if !s.generics.params.is_empty() {
        return Err(AuthoringError::GenericType(name.to_string()));
    }
    match &s.fields {
        Fields::Named(n) => Ok(n.named.iter().collect()),
        Fields::Unit => Ok(Vec::new()),
        Fields::Unnamed(_) => Err(AuthoringError::UnnamedFields(name.to_string())),
    }
}

fn struct_plans(
    decls: &Declarations,
    env: &TypeEnv,
    full: &dyn Fn(&str) -> String,
) -> Result<Vec<StructPlan>, AuthoringError> {
    let mut names = Vec::with_capacity(decls.structs.len());
    let mut kinds = Vec::with_capacity(decls.structs.len());
    let mut drafts = Vec::with_capacity(decls.structs.len());

    for (decl, located) in decls.structs.iter().enumerate() {
        let s = &located.item;
        let name = s.ident.to_string();
        let flags = validate::struct_specifiers(&name, &located.specifiers)?;
        let methods = inherent_methods(decls, &name);
        for reserved in ["from_native", "to_native"] {
            if methods.contains_key(reserved) {
                return Err(AuthoringError::ReservedMethod {
                    strukt: name,
                    method: reserved.to_string(),
                });
            }
        }

        let mut properties = Vec::new();
        for field in named_fields(&name, s)? {
            let Some(field_ident) = field.ident.clone() else { continue };
            let field_name = field_ident.to_string();
            let item = format!("{name}.{field_name}");
            let spec = match parse::find_marker(&field.attrs, UPROPERTY) {
                Some(attr) => validate::property_specifiers(&item, &attr_specifiers(&item, attr)?, false)?,
                None => validate::PropertySpec::default(),
            };
            let c = marshalable(&item, &field.ty, env)?;
            properties.push(PropertyPlan {
                meta: PropertyMeta {
                    native_name: spec
                        .native_name
                        .clone()
                        .unwrap_or_else(|| naming::property_native_name(&field_name, c.kind == PropertyKind::Bool)),
                    name: field_name,
                    flags: spec.flags | kind_flags(&c.kind) | property_access(&field.vis),
                    kind: c.kind,
                    replication: None,
                    getter: None,
                    setter: None,
                },
                field: field_ident,
                ty: field.ty.clone(),
                vis: field.vis.clone(),
                marshaller: c.marshaller,
            });
        }
        kinds.push(properties.iter().map(|p| p.meta.kind.clone()).collect::<Vec<_>>());
        names.push(name);
        drafts.push(Some((decl, flags, properties)));
    }

    let (order, blittable) = order::order_structs(&names, &kinds, &|n| env.external_blittable(n))?;
    let mut plans = Vec::with_capacity(order.len());
    for i in order {
        let Some((decl, flags, properties)) = drafts[i].take() else {
            return Err(AuthoringError::DuplicateMetadata(names[i].clone()));
        };
        let is_blittable = blittable.get(&names[i]).copied().unwrap_or(false);
        let pod = if is_blittable {
            STRUCT_IS_PLAIN_OLD_DATA | STRUCT_ZERO_CONSTRUCTOR | STRUCT_NO_DESTRUCTOR
        } else {
            STRUCT_NONE
        };
        plans.push(StructPlan {
            decl,
            meta: StructMeta {
                name: names[i].clone(),
                full_name: full(&names[i]),
                flags: flags | pod,
                blittable: is_blittable,
                properties: properties.iter().map(|p| p.meta.clone()).collect(),
            },
            properties,
        });
    }
    Ok(plans)
}

/// Resolve a `parent = ...` specifier to a full name, and to a local class
/// index when the parent is declared in this module.
fn resolve_parent(
    class: &str,
    parent: &str,
    decls: &Declarations,
    env: &TypeEnv,
    full: &dyn Fn(&str) -> String,
) -> Result<(String, Option<usize>), AuthoringError> {
    if let Some(i) = decls
        .classes
        .iter()
        .position(|c| c.item.ident == parent || full(&c.item.ident.to_string()) == parent)
    {
        return Ok((full(&decls.classes[i].item.ident.to_string()), Some(i)));
    }
    match env.external_class(parent) {
        Some(meta) => Ok((meta.full_name.clone(), None)),
        None => Err(AuthoringError::UnknownParent {
            class: class.to_string(),
            parent: parent.to_string(),
        }),
    }
}

fn class_plans(
    decls: &Declarations,
    env: &TypeEnv,
    full: &dyn Fn(&str) -> String,
    interfaces: &[InterfacePlan],
) -> Result<Vec<ClassPlan>, AuthoringError> {
    let names: Vec<String> = decls.classes.iter().map(|c| c.item.ident.to_string()).collect();
    let mut specs = Vec::with_capacity(names.len());
    let mut parents = Vec::with_capacity(names.len());
    let mut local_parents = Vec::with_capacity(names.len());
    for (i, located) in decls.classes.iter().enumerate() {
        let spec = validate::class_specifiers(&names[i], &located.specifiers)?;
        let parent = match &spec.parent {
            Some(p) => Some(resolve_parent(&names[i], p, decls, env, full)?),
            None => None,
        };
        local_parents.push(parent.as_ref().and_then(|(_, local)| *local));
        parents.push(parent.map(|(full_name, _)| full_name));
        specs.push(spec);
    }
    let order = order::order_classes(&names, &local_parents)?;

    let mut ancestry = Ancestry {
        local: HashMap::new(),
        env,
    };
    let mut plans = Vec::with_capacity(order.len());
    for i in order {
        let builder = ClassBuilder {
            decls,
            env,
            interfaces,
            ancestry: &ancestry,
            name: &names[i],
            full_name: full(&names[i]),
            parent: parents[i].clone(),
        };
        let plan = builder.build(i, specs[i].flags)?;
        ancestry.local.insert(plan.meta.full_name.clone(), plan.meta.clone());
        plans.push(plan);
    }
    Ok(plans)
}

struct ClassBuilder<'c, 'e, 'a> {
    decls: &'c Declarations,
    env: &'e TypeEnv<'a>,
    interfaces: &'c [InterfacePlan],
    ancestry: &'c Ancestry<'e, 'a>,
    name: &'c str,
    full_name: String,
    parent: Option<String>,
}

impl ClassBuilder<'_, '_, '_> {
    fn build(&self, decl: usize, flags: u32) -> Result<ClassPlan, AuthoringError> {
        let s = &self.decls.classes[decl].item;
        let methods = inherent_methods(self.decls, self.name);
        let properties = self.properties(s, &methods)?;

        let mut generated: Vec<String> = Vec::new();
        for p in &properties {
            let field = p.field.to_string();
            generated.push(naming::setter_name(&field));
            generated.push(field);
        }

        let mut constructor = None;
        let mut functions = Vec::new();
        let mut interfaces = Vec::new();
        for im in impls_of(self.decls, self.name) {
            for item in &im.item.items {
                let ImplItem::Fn(f) = item else { continue };
                if parse::has_marker(&f.attrs, CONSTRUCTOR) {
                    validate::constructor(self.name, &f.sig)?;
                    if constructor.replace(f.sig.ident.clone()).is_some() {
                        return Err(AuthoringError::DuplicateConstructor {
                            class: self.name.to_string(),
                        });
                    }
                }
            }
            match (&im.trait_name, im.woven) {
                (_, false) => self.reject_unwoven(im)?,
                (Some(iface), true) => {
                    let full = self.interface_impl(im, iface, &mut functions)?;
                    if !interfaces.contains(&full) {
                        interfaces.push(full);
                    }
                }
                (None, true) => self.inherent_impl(im, &mut functions)?,
            }
        }

        let mut native_names = HashSet::new();
        for f in &functions {
            validate::function(self.name, &f.meta)?;
            if !native_names.insert(f.meta.name.clone()) {
                return Err(AuthoringError::DuplicateFunction {
                    class: self.name.to_string(),
                    function: f.meta.name.clone(),
                });
            }
            if f.renamed {
                generated.push(f.body().to_string());
            }
        }
        if let Some(taken) = generated.iter().find(|g| methods.contains_key(g.as_str())) {
            return Err(AuthoringError::ReservedMethod {
                strukt: self.name.to_string(),
                method: taken.clone(),
            });
        }

        Ok(ClassPlan {
            decl,
            meta: ClassMeta {
                name: self.name.to_string(),
                full_name: self.full_name.clone(),
                parent: self.parent.clone(),
                flags,
                properties: properties.iter().map(|p| p.meta.clone()).collect(),
                functions: functions.iter().map(|f| f.meta.clone()).collect(),
                interfaces,
            },
            properties,
            functions,
            constructor,
            is_abstract: flags & CLASS_ABSTRACT != 0,
        })
    }

    fn properties(
        &self,
        s: &ItemStruct,
        methods: &HashMap<String, Signature>,
    ) -> Result<Vec<PropertyPlan>, AuthoringError> {
        let mut out = Vec::new();
        for field in named_fields(self.name, s)? {
            let Some(attr) = parse::find_marker(&field.attrs, UPROPERTY) else {
                continue;
            };
            let Some(field_ident) = field.ident.clone() else { continue };
            let field_name = field_ident.to_string();
            let item = format!("{}.{field_name}", self.name);
            let spec = validate::property_specifiers(&item, &attr_specifiers(&item, attr)?, true)?;
            let c = classify_type(&field.ty, self.env)
                .filter(|c| c.kind.is_marshalable() || matches!(c.kind, PropertyKind::MulticastDelegate { .. }))
                .ok_or_else(|| AuthoringError::UnsupportedType {
                    item: item.clone(),
                    ty: field.ty.to_token_stream().to_string(),
                })?;
            let lookup = |n: &str| methods.get(n).cloned();
            let replication = validate::replication(self.name, &field_name, &c.kind, &spec, &lookup)?;
            validate::accessors(self.name, &field_name, &field.ty, &spec, &lookup)?;
            out.push(PropertyPlan {
                meta: PropertyMeta {
                    native_name: spec
                        .native_name
                        .clone()
                        .unwrap_or_else(|| naming::property_native_name(&field_name, c.kind == PropertyKind::Bool)),
                    name: field_name,
                    flags: spec.flags | kind_flags(&c.kind) | property_access(&field.vis),
                    kind: c.kind,
                    replication,
                    getter: spec.getter.clone(),
                    setter: spec.setter.clone(),
                },
                field: field_ident,
                ty: field.ty.clone(),
                vis: field.vis.clone(),
                marshaller: c.marshaller,
            });
        }
        Ok(out)
    }

    fn reject_unwoven(&self, im: &ImplDecl) -> Result<(), AuthoringError> {
        for item in &im.item.items {
            if let ImplItem::Fn(f) = item {
                if parse::has_marker(&f.attrs, UFUNCTION) {
                    return Err(AuthoringError::Signature {
                        item: format!("{}.{}", self.name, f.sig.ident),
                        problem: "reflected functions must be declared in a `#[uclass_impl]` block",
                    });
                }
            }
        }
        Ok(())
    }

    fn inherent_impl(&self, im: &ImplDecl, out: &mut Vec<FunctionPlan>) -> Result<(), AuthoringError> {
        for item in &im.item.items {
            let ImplItem::Fn(f) = item else { continue };
            if parse::has_marker(&f.attrs, CONSTRUCTOR) {
                continue;
            }
            let rust_name = f.sig.ident.to_string();
            let item_name = format!("{}.{rust_name}", self.name);
            let inherited = self.ancestry.event(self.parent.as_deref(), &rust_name);
            let spec = match parse::find_marker(&f.attrs, UFUNCTION) {
                Some(attr) => Some(validate::function_specifiers(
                    self.name,
                    &rust_name,
                    &attr_specifiers(&item_name, attr)?,
                )?),
                None => None,
            };

            let plan = match (spec, inherited) {
                // Declared as new while an ancestor already dispatches it.
                (Some(FunctionSpec { kind: Some(_), .. }), Some(event)) => {
                    return Err(AuthoringError::RedeclaredEvent {
                        class: self.name.to_string(),
                        function: rust_name,
                        ancestor: event.declarer,
                    });
                }
                (Some(spec @ FunctionSpec { kind: Some(_), .. }), None) => {
                    self.declaration(im, f.sig.clone(), &f.vis, &spec)?
                }
                (Some(FunctionSpec { kind: None, .. }), None) => {
                    return Err(AuthoringError::NothingToOverride {
                        class: self.name.to_string(),
                        function: rust_name,
                    });
                }
                (_, Some(event)) => self.override_of(im, &f.sig, event)?,
                (None, None) => continue,
            };
            out.push(plan);
        }
        Ok(())
    }

    fn declaration(
        &self,
        im: &ImplDecl,
        sig: Signature,
        vis: &Visibility,
        spec: &FunctionSpec,
    ) -> Result<FunctionPlan, AuthoringError> {
        let rust_name = sig.ident.to_string();
        let item_name = format!("{}.{rust_name}", self.name);
        let kind = spec.kind.unwrap_or(FunctionKind::Callable);
        let plan = signature_plan(&item_name, &sig, self.env)?;
        let meta = function_meta(&item_name, &rust_name, kind, spec, &plan, function_access(vis))?;
        let (invoker, binding_fn) = binding_idents(None, &rust_name);
        Ok(FunctionPlan {
            meta,
            impl_ordinal: im.ordinal,
            method: sig.ident,
            params: plan.params,
            ret: plan.ret,
            binding_class: self.name.to_string(),
            renamed: kind.dispatches_natively(),
            interface: None,
            invoker,
            binding_fn,
        })
    }

    fn override_of(&self, im: &ImplDecl, sig: &Signature, event: InheritedEvent) -> Result<FunctionPlan, AuthoringError> {
        let rust_name = sig.ident.to_string();
        let item_name = format!("{}.{rust_name}", self.name);
        let plan = signature_plan(&item_name, sig, self.env)?;
        let same_shape = plan.param_metas.len() == event.function.params.len()
            && plan
                .param_metas
                .iter()
                .zip(&event.function.params)
                .all(|(mine, theirs)| mine.kind == theirs.kind && mine.direction == theirs.direction)
            && plan.ret_kind == event.function.return_value;
        if !same_shape {
            return Err(AuthoringError::Signature {
                item: item_name,
                problem: "signature differs from the event it overrides",
            });
        }
        let (invoker, binding_fn) = binding_idents(None, &rust_name);
        let mut flags = event.function.flags;
        if plan.is_static {
            flags |= FUNC_STATIC;
        }
        Ok(FunctionPlan {
            meta: FunctionMeta {
                name: event.function.name.clone(),
                rust_name,
                kind: FunctionKind::Override,
                flags,
                params: event.function.params.clone(),
                return_value: event.function.return_value.clone(),
                declared_by: Some(event.declarer_full),
            },
            impl_ordinal: im.ordinal,
            method: sig.ident.clone(),
            params: plan.params,
            ret: plan.ret,
            binding_class: event.declarer,
            renamed: true,
            interface: None,
            invoker,
            binding_fn,
        })
    }

    /// Returns the interface's full name.
    fn interface_impl(&self, im: &ImplDecl, iface: &str, out: &mut Vec<FunctionPlan>) -> Result<String, AuthoringError> {
        let meta = self
            .interfaces
            .iter()
            .map(|i| &i.meta)
            .find(|m| m.name == iface)
            .or_else(|| self.env.external_interface(iface))
            .ok_or_else(|| AuthoringError::UnknownInterface {
                class: self.name.to_string(),
                interface: iface.to_string(),
            })?;
        let Some((_, trait_path, _)) = &im.item.trait_ else {
            return Ok(meta.full_name.clone());
        };
        let prefix = to_snake_case(iface);

        for item in &im.item.items {
            let ImplItem::Fn(f) = item else { continue };
            let rust_name = f.sig.ident.to_string();
            let Some(declared) = meta.functions.iter().find(|d| d.rust_name == rust_name) else {
                if parse::has_marker(&f.attrs, UFUNCTION) {
                    return Err(AuthoringError::NotInInterface {
                        class: self.name.to_string(),
                        interface: iface.to_string(),
                        function: rust_name,
                    });
                }
                continue;
            };
            let item_name = format!("{}.{rust_name}", self.name);
            let plan = signature_plan(&item_name, &f.sig, self.env)?;
            let same_shape = plan.param_metas.len() == declared.params.len()
                && plan
                    .param_metas
                    .iter()
                    .zip(&declared.params)
                    .all(|(mine, theirs)| mine.kind == theirs.kind)
                && plan.ret_kind == declared.return_value;
            if !same_shape {
                return Err(AuthoringError::Signature {
                    item: item_name,
                    problem: "signature differs from the interface declaration",
                });
            }
            let (invoker, binding_fn) = binding_idents(Some(&prefix), &rust_name);
            out.push(FunctionPlan {
                meta: FunctionMeta {
                    kind: FunctionKind::InterfaceImpl,
                    declared_by: Some(meta.full_name.clone()),
                    ..declared.clone()
                },
                impl_ordinal: im.ordinal,
                method: f.sig.ident.clone(),
                params: plan.params,
                ret: plan.ret,
                binding_class: meta.name.clone(),
                renamed: false,
                interface: Some(trait_path.clone()),
                invoker,
                binding_fn,
            });
        }
        Ok(meta.full_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::tests::declarations;

    fn engine() -> ModuleManifest {
        let event = |rust: &str, params: Vec<ParamMeta>| FunctionMeta {
            name: to_pascal_case(rust),
            rust_name: rust.to_string(),
            kind: FunctionKind::ImplementableEvent,
            flags: FUNC_EVENT | FUNC_BLUEPRINT_EVENT | FUNC_PUBLIC,
            params,
            return_value: None,
            declared_by: None,
        };
        ModuleManifest {
            module: "Engine".into(),
            package: "/Script/Engine".into(),
            classes: vec![ClassMeta {
                name: "Actor".into(),
                full_name: "Engine.Actor".into(),
                parent: None,
                flags: 0,
                properties: Vec::new(),
                functions: vec![
                    event("receive_begin_play", Vec::new()),
                    event(
                        "receive_tick",
                        vec![ParamMeta {
                            name: "delta_seconds".into(),
                            native_name: "DeltaSeconds".into(),
                            kind: PropertyKind::Float,
                            direction: ParamDirection::In,
                            flags: CPF_PARM,
                            default: None,
                        }],
                    ),
                ],
                interfaces: Vec::new(),
            }],
            ..Default::default()
        }
    }

    fn analyze_source(source: &str) -> Result<Analysis, AuthoringError> {
        let decls = declarations(source);
        analyze("Game", &decls, &[engine()])
    }

    #[test]
    fn classifies_type_shapes() {
        let decls = declarations("#[ustruct] pub struct Ammo { count: i32 } #[uenum] pub enum Mode { A }");
        let manifests = [engine()];
        let env = TypeEnv::new(&decls, &manifests);
        let kind = |src: &str| classify_type(&syn::parse_str(src).unwrap(), &env).map(|c| c.kind);

        assert_eq!(kind("f32"), Some(PropertyKind::Float));
        assert_eq!(kind("bool"), Some(PropertyKind::Bool));
        assert_eq!(
            kind("Vec<Ammo>"),
            Some(PropertyKind::Array {
                inner: Box::new(PropertyKind::Struct { name: "Ammo".into() })
            })
        );
        assert_eq!(
            kind("HashMap<Name, Mode>"),
            Some(PropertyKind::Map {
                key: Box::new(PropertyKind::Name),
                value: Box::new(PropertyKind::Enum { name: "Mode".into() }),
            })
        );
        assert_eq!(kind("ObjectRef<Actor>"), Some(PropertyKind::Object { class: "Actor".into() }));
        assert_eq!(kind("ObjectRef<Unknown>"), None);
        assert_eq!(kind("Vec<Vec<i32>>"), None);
        assert_eq!(kind("&str"), None);
        assert_eq!(kind("Actor"), None);
    }

    #[test]
    fn struct_marshaller_goes_through_native_struct() {
        let decls = declarations("#[ustruct] pub struct Ammo { count: i32 }");
        let env = TypeEnv::new(&decls, &[]);
        let c = classify_type(&syn::parse_quote!(Ammo), &env).unwrap();
        assert_eq!(
            c.marshaller.to_string(),
            quote!(<Ammo as ::umbra_runtime::NativeStruct>::Marshaller).to_string()
        );
    }

    #[test]
    fn rpc_with_return_value_is_an_authoring_error() {
        let err = analyze_source(
            r#"
            #[uclass(parent = Actor)] pub struct Turret {}
            #[uclass_impl] impl Turret {
                #[ufunction(Server, Reliable)]
                pub fn fire(&self) -> i32 { 1 }
            }
            "#,
        )
        .err();
        assert!(matches!(err, Some(AuthoringError::RpcReturnValue { .. })));
    }

    #[test]
    fn overrides_are_detected_explicitly_and_implicitly() {
        let analysis = analyze_source(
            r#"
            #[uclass(parent = Actor)] pub struct Turret {}
            #[uclass_impl] impl Turret {
                #[ufunction(Override)]
                fn receive_tick(&self, delta_seconds: f32) {}
                fn receive_begin_play(&self) {}
                fn helper(&self) {}
            }
            "#,
        )
        .unwrap();
        let turret = analysis.class("Turret").unwrap();
        assert_eq!(turret.functions.len(), 2);
        let tick = &turret.functions[0];
        assert_eq!(tick.meta.kind, FunctionKind::Override);
        assert_eq!(tick.meta.name, "ReceiveTick");
        assert_eq!(tick.binding_class, "Actor");
        assert_eq!(tick.meta.declared_by.as_deref(), Some("Engine.Actor"));
        assert_eq!(tick.body(), "receive_tick_implementation");
        assert!(turret.functions[1].is_bare());
    }

    #[test]
    fn redeclaring_an_inherited_event_is_rejected() {
        let err = analyze_source(
            r#"
            #[uclass(parent = Actor)] pub struct Turret {}
            #[uclass_impl] impl Turret {
                #[ufunction(NativeEvent)]
                fn receive_begin_play(&self) {}
            }
            "#,
        )
        .err();
        assert!(matches!(err, Some(AuthoringError::RedeclaredEvent { ancestor, .. }) if ancestor == "Actor"));
    }

    #[test]
    fn override_without_event_is_rejected() {
        let err = analyze_source(
            r#"
            #[uclass] pub struct Turret {}
            #[uclass_impl] impl Turret {
                #[ufunction(Override)]
                fn spin(&self) {}
            }
            "#,
        )
        .err();
        assert!(matches!(err, Some(AuthoringError::NothingToOverride { .. })));
    }

    #[test]
    fn events_declared_by_local_ancestors_are_inherited() {
        let analysis = analyze_source(
            r#"
            #[uclass(parent = Turret)] pub struct Sniper {}
            #[uclass(parent = Actor)] pub struct Turret {}
            #[uclass_impl] impl Turret {
                #[ufunction(NativeEvent)]
                pub fn on_target(&self, distance: f32) {}
            }
            #[uclass_impl] impl Sniper {
                fn on_target(&self, distance: f32) {}
            }
            "#,
        )
        .unwrap();
        let names: Vec<_> = analysis.classes.iter().map(|c| c.meta.name.as_str()).collect();
        assert_eq!(names, ["Turret", "Sniper"]);
        let turret = analysis.class("Turret").unwrap();
        assert!(turret.functions[0].renamed);
        let sniper = analysis.class("Sniper").unwrap();
        assert_eq!(sniper.functions[0].meta.kind, FunctionKind::Override);
        assert_eq!(sniper.functions[0].binding_class, "Turret");
        assert_eq!(sniper.meta.parent.as_deref(), Some("Game.Turret"));
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let err = analyze_source("#[uclass(parent = Pawnish)] pub struct Turret {}").err();
        assert!(matches!(err, Some(AuthoringError::UnknownParent { .. })));
    }

    #[test]
    fn class_properties_and_flags() {
        let analysis = analyze_source(
            r#"
            #[uclass(parent = Actor)] pub struct Turret {
                #[uproperty(EditAnywhere, Replicated)] pub health: f32,
                #[uproperty(BlueprintReadOnly)] is_armed: bool,
                cooldown: f32,
            }
            "#,
        )
        .unwrap();
        let turret = analysis.class("Turret").unwrap();
        assert_eq!(turret.properties.len(), 2);
        let health = &turret.properties[0].meta;
        assert_eq!(health.native_name, "Health");
        assert_ne!(health.flags & CPF_NET, 0);
        assert_ne!(health.flags & CPF_IS_PLAIN_OLD_DATA, 0);
        assert_ne!(health.flags & CPF_NATIVE_ACCESS_SPECIFIER_PUBLIC, 0);
        assert_eq!(health.replication.as_ref().map(|r| r.condition.as_str()), Some("None"));
        assert_eq!(turret.properties[1].meta.native_name, "bIsArmed");
    }

    #[test]
    fn generated_accessor_names_are_reserved() {
        let err = analyze_source(
            r#"
            #[uclass] pub struct Turret { #[uproperty] health: f32 }
            impl Turret { fn set_health(&self, v: f32) {} }
            "#,
        )
        .err();
        assert!(matches!(err, Some(AuthoringError::ReservedMethod { method, .. }) if method == "set_health"));
    }

    #[test]
    fn struct_reserved_methods_and_blittability() {
        let err = analyze_source(
            r#"
            #[ustruct] pub struct Ammo { count: i32 }
            impl Ammo { fn from_native() {} }
            "#,
        )
        .err();
        assert!(matches!(err, Some(AuthoringError::ReservedMethod { .. })));

        let analysis = analyze_source(
            r#"
            #[ustruct] pub struct Loadout { primary: Ammo, label: String }
            #[ustruct] pub struct Ammo { count: i32, spread: f32 }
            "#,
        )
        .unwrap();
        let names: Vec<_> = analysis.structs.iter().map(|s| s.meta.name.as_str()).collect();
        assert_eq!(names, ["Ammo", "Loadout"]);
        assert!(analysis.strukt("Ammo").unwrap().meta.blittable);
        assert!(!analysis.strukt("Loadout").unwrap().meta.blittable);
    }

    #[test]
    fn enums_take_discriminants_and_repr() {
        let analysis = analyze_source(
            r#"
            #[uenum] pub enum Mode { Idle, Firing = 5, Reloading }
            #[uenum] #[repr(i32)] pub enum Signed { Low = -1, High = 1 }
            "#,
        )
        .unwrap();
        let mode = analysis.enumeration("Mode").unwrap();
        assert!(mode.add_repr);
        let values: Vec<i64> = mode.meta.variants.iter().map(|v| v.value).collect();
        assert_eq!(values, [0, 5, 6]);
        let signed = analysis.enumeration("Signed").unwrap();
        assert_eq!(signed.meta.underlying, "i32");
        assert!(!signed.add_repr);

        let err = analyze_source("#[uenum] pub enum Big { Huge = 300 }").err();
        assert!(matches!(err, Some(AuthoringError::EnumShape(_))));
        let err = analyze_source("#[uenum] pub enum Shaped { Point(i32) }").err();
        assert!(matches!(err, Some(AuthoringError::EnumShape(_))));
    }

    #[test]
    fn interface_implementations() {
        let analysis = analyze_source(
            r#"
            #[uinterface] pub trait Damageable {
                #[ufunction(BlueprintCallable)]
                fn take_damage(&self, amount: f32) -> bool;
            }
            #[uclass(parent = Actor)] pub struct Turret {}
            #[uclass_impl] impl Damageable for Turret {
                fn take_damage(&self, amount: f32) -> bool { amount > 0.0 }
            }
            "#,
        )
        .unwrap();
        let turret = analysis.class("Turret").unwrap();
        assert_eq!(turret.meta.interfaces, ["Game.Damageable"]);
        let f = &turret.functions[0];
        assert_eq!(f.meta.kind, FunctionKind::InterfaceImpl);
        assert_eq!(f.binding_class, "Damageable");
        assert_eq!(f.invoker, "__umbra_invoke_damageable_take_damage");

        let err = analyze_source(
            r#"
            #[uclass] pub struct Turret {}
            #[uclass_impl] impl Clone for Turret { fn clone(&self) -> Self { todo!() } }
            "#,
        )
        .err();
        assert!(matches!(err, Some(AuthoringError::UnknownInterface { .. })));
    }

    #[test]
    fn parameters_directions_and_defaults() {
        let analysis = analyze_source(
            r#"
            #[uclass] pub struct Turret {}
            #[uclass_impl] impl Turret {
                #[ufunction(BlueprintCallable, defaults(count = 2))]
                pub fn reload(&self, count: i32, label: &String, total: &mut i32) {}
            }
            "#,
        )
        .unwrap();
        let f = &analysis.class("Turret").unwrap().functions[0];
        assert_eq!(f.meta.params[0].default.as_deref(), Some("2"));
        assert_eq!(f.meta.params[1].direction, ParamDirection::ConstRef);
        assert_eq!(f.meta.params[2].direction, ParamDirection::InOut);
        assert_ne!(f.meta.flags & FUNC_HAS_OUT_PARMS, 0);
        assert_ne!(f.meta.flags & FUNC_HAS_DEFAULTS, 0);
        assert_ne!(f.meta.flags & FUNC_PUBLIC, 0);
    }

    #[test]
    fn functions_need_shared_receivers() {
        let err = analyze_source(
            r#"
            #[uclass] pub struct Turret {}
            #[uclass_impl] impl Turret {
                #[ufunction(BlueprintCallable)]
                pub fn reset(&mut self) {}
            }
            "#,
        )
        .err();
        assert!(matches!(err, Some(AuthoringError::Signature { .. })));
    }
}
