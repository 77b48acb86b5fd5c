// Authoring rules.
//
// Specifier lists are interpreted here, and every combination the native
// object system cannot represent is rejected with an `AuthoringError`.

use quote::ToTokens;
use syn::{FnArg, ReturnType, Signature, Type};

use umbra_flags::*;

use crate::error::AuthoringError;
use crate::model::{FunctionKind, FunctionMeta, PropertyKind, Replication};
use crate::parse::{SpecValue, Specifier};

fn unknown(item: &str, spec: &Specifier) -> AuthoringError {
    AuthoringError::UnknownSpecifier {
        item: item.to_string(),
        specifier: spec.name.clone(),
    }
}

fn text_value(item: &str, spec: &Specifier) -> Result<String, AuthoringError> {
    spec.text().map(str::to_string).ok_or_else(|| AuthoringError::SpecifierValue {
        item: item.to_string(),
        specifier: spec.name.clone(),
        expected: "a name",
    })
}

fn flag(item: &str, spec: &Specifier) -> Result<(), AuthoringError> {
    match spec.value {
        SpecValue::Flag => Ok(()),
        _ => Err(AuthoringError::SpecifierValue {
            item: item.to_string(),
            specifier: spec.name.clone(),
            expected: "no value",
        }),
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, PartialEq)]
pub struct ClassSpec {
    pub parent: Option<String>,
    pub flags: u32,
}

pub fn class_specifiers(class: &str, specs: &[Specifier]) -> Result<ClassSpec, AuthoringError> {
    let mut out = ClassSpec::default();
    for spec in specs {
        match spec.name.as_str() {
            "parent" => out.parent = Some(text_value(class, spec)?),
            "Abstract" => out.flags |= CLASS_ABSTRACT,
            "Transient" => out.flags |= CLASS_TRANSIENT,
            "Config" => out.flags |= CLASS_CONFIG,
            "DefaultConfig" => out.flags |= CLASS_CONFIG | CLASS_DEFAULT_CONFIG,
            "NotPlaceable" => out.flags |= CLASS_NOT_PLACEABLE,
            "Hidden" => out.flags |= CLASS_HIDDEN,
            "Deprecated" => out.flags |= CLASS_DEPRECATED,
            "Blueprintable" | "BlueprintType" => {}
            _ => return Err(unknown(class, spec)),
        }
        if spec.name != "parent" && spec.name != "Config" {
            flag(class, spec)?;
        }
    }
    Ok(out)
}

pub fn struct_specifiers(name: &str, specs: &[Specifier]) -> Result<u32, AuthoringError> {
    let mut flags = STRUCT_NONE;
    for spec in specs {
        match spec.name.as_str() {
            "Atomic" => flags |= STRUCT_ATOMIC,
            "Immutable" => flags |= STRUCT_IMMUTABLE | STRUCT_ATOMIC,
            "BlueprintType" => {}
            _ => return Err(unknown(name, spec)),
        }
        flag(name, spec)?;
    }
    Ok(flags)
}

/// Enums and interfaces accept only the visibility specifiers.
pub fn plain_specifiers(name: &str, specs: &[Specifier]) -> Result<(), AuthoringError> {
    for spec in specs {
        match spec.name.as_str() {
            "BlueprintType" | "Blueprintable" => flag(name, spec)?,
            _ => return Err(unknown(name, spec)),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[derive(Debug, Default, PartialEq)]
pub struct PropertySpec {
    pub native_name: Option<String>,
    pub flags: u64,
    pub replicated: bool,
    pub notify: Option<String>,
    pub condition: Option<String>,
    pub getter: Option<String>,
    pub setter: Option<String>,
}

/// Interpret `#[uproperty(...)]`. Replication and accessors exist only on
/// class properties.
pub fn property_specifiers(item: &str, specs: &[Specifier], on_class: bool) -> Result<PropertySpec, AuthoringError> {
    let mut out = PropertySpec::default();
    for spec in specs {
        let class_only = matches!(
            spec.name.as_str(),
            "Replicated" | "ReplicatedUsing" | "condition" | "getter" | "setter" | "BlueprintAssignable"
        );
        if class_only && !on_class {
            return Err(unknown(item, spec));
        }
        match spec.name.as_str() {
            "name" => out.native_name = Some(text_value(item, spec)?),
            "ReplicatedUsing" => {
                out.replicated = true;
                out.notify = Some(text_value(item, spec)?);
                out.flags |= CPF_NET | CPF_REP_NOTIFY;
            }
            "condition" => out.condition = Some(text_value(item, spec)?),
            "getter" => out.getter = Some(text_value(item, spec)?),
            "setter" => out.setter = Some(text_value(item, spec)?),
            other => {
                flag(item, spec)?;
                out.flags |= match other {
                    "EditAnywhere" | "EditDefaultsOnly" | "EditInstanceOnly" => CPF_EDIT,
                    "VisibleAnywhere" | "VisibleDefaultsOnly" | "VisibleInstanceOnly" => CPF_EDIT,
                    "BlueprintReadWrite" => CPF_BLUEPRINT_VISIBLE,
                    "BlueprintReadOnly" => CPF_BLUEPRINT_VISIBLE | CPF_BLUEPRINT_READ_ONLY,
                    "BlueprintAssignable" => CPF_BLUEPRINT_ASSIGNABLE,
                    "Replicated" => {
                        out.replicated = true;
                        CPF_NET
                    }
                    "Transient" => CPF_TRANSIENT,
                    "SaveGame" => CPF_SAVE_GAME,
                    "Config" => CPF_CONFIG,
                    "ExposeOnSpawn" => CPF_EXPOSE_ON_SPAWN,
                    _ => return Err(unknown(item, spec)),
                };
            }
        }
    }
    Ok(out)
}

/// Replication rules for a class property. `methods` finds a method of the
/// class by Rust name.
pub fn replication(
    class: &str,
    property: &str,
    kind: &PropertyKind,
    spec: &PropertySpec,
    methods: &dyn Fn(&str) -> Option<Signature>,
) -> Result<Option<Replication>, AuthoringError> {
    if !spec.replicated {
        if spec.condition.is_some() {
            return Err(AuthoringError::SpecifierValue {
                item: format!("{class}.{property}"),
                specifier: "condition".into(),
                expected: "Replicated or ReplicatedUsing alongside it",
            });
        }
        return Ok(None);
    }
    if !kind.is_replicable() {
        return Err(AuthoringError::NetworkedKind {
            class: class.to_string(),
            property: property.to_string(),
            kind: kind.native_type().to_string(),
        });
    }
    let condition = spec.condition.clone().unwrap_or_else(|| "None".to_string());
    if lifetime_condition(&condition).is_none() {
        return Err(AuthoringError::LifetimeCondition {
            class: class.to_string(),
            property: property.to_string(),
            condition,
        });
    }
    if let Some(notify) = &spec.notify {
        let problem = match methods(notify) {
            None => Some("is not a method of the class"),
            Some(sig) if !takes_shared_self(&sig) => Some("must take `&self`"),
            Some(sig) if typed_inputs(&sig).count() > 1 => Some("must take at most one parameter"),
            Some(_) => None,
        };
        if let Some(problem) = problem {
            return Err(AuthoringError::ReplicationNotify {
                class: class.to_string(),
                property: property.to_string(),
                notify: notify.clone(),
                problem,
            });
        }
    }
    Ok(Some(Replication {
        condition,
        notify: spec.notify.clone(),
    }))
}

/// Getter and setter named by a class property must match its type.
pub fn accessors(
    class: &str,
    property: &str,
    ty: &Type,
    spec: &PropertySpec,
    methods: &dyn Fn(&str) -> Option<Signature>,
) -> Result<(), AuthoringError> {
    let shape_error = |accessor: &'static str, function: &str, problem: &'static str| AuthoringError::AccessorShape {
        class: class.to_string(),
        property: property.to_string(),
        accessor,
        function: function.to_string(),
        problem,
    };
    if let Some(getter) = &spec.getter {
        let sig = methods(getter).ok_or_else(|| shape_error("getter", getter, "is not a method of the class"))?;
        if !takes_shared_self(&sig) || typed_inputs(&sig).count() != 0 {
            return Err(shape_error("getter", getter, "must take only `&self`"));
        }
        match &sig.output {
            ReturnType::Type(_, ret) if same_type(ret, ty) => {}
            _ => return Err(shape_error("getter", getter, "must return the property type")),
        }
    }
    if let Some(setter) = &spec.setter {
        let sig = methods(setter).ok_or_else(|| shape_error("setter", setter, "is not a method of the class"))?;
        let inputs: Vec<&Type> = typed_inputs(&sig).collect();
        if !takes_shared_self(&sig) || inputs.len() != 1 || !same_type(inputs[0], ty) {
            return Err(shape_error("setter", setter, "must take `&self` and one value of the property type"));
        }
        if !returns_unit(&sig) {
            return Err(shape_error("setter", setter, "must not return a value"));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

#[derive(Debug, Default, PartialEq)]
pub struct FunctionSpec {
    /// `None` for `Override`.
    pub kind: Option<FunctionKind>,
    pub flags: u32,
    pub native_name: Option<String>,
    /// (parameter, default value source)
    pub defaults: Vec<(String, String)>,
}

/// Interpret `#[ufunction(...)]` and reject disallowed combinations.
pub fn function_specifiers(class: &str, function: &str, specs: &[Specifier]) -> Result<FunctionSpec, AuthoringError> {
    let item = format!("{class}.{function}");
    let mut out = FunctionSpec::default();
    let mut events = 0;
    let mut routes = 0;
    let mut is_override = false;
    for spec in specs {
        match spec.name.as_str() {
            "name" => {
                out.native_name = Some(text_value(&item, spec)?);
                continue;
            }
            "defaults" => {
                let SpecValue::List(list) = &spec.value else {
                    return Err(AuthoringError::SpecifierValue {
                        item,
                        specifier: spec.name.clone(),
                        expected: "a list of `param = value`",
                    });
                };
                for d in list {
                    let value = match &d.value {
                        SpecValue::Str(s) => format!("{s:?}"),
                        SpecValue::Path(s) | SpecValue::Expr(s) => s.clone(),
                        _ => {
                            return Err(AuthoringError::SpecifierValue {
                                item,
                                specifier: format!("defaults({})", d.name),
                                expected: "a value",
                            });
                        }
                    };
                    out.defaults.push((d.name.clone(), value));
                }
                continue;
            }
            _ => flag(&item, spec)?,
        }
        out.flags |= match spec.name.as_str() {
            "BlueprintCallable" => FUNC_BLUEPRINT_CALLABLE,
            "BlueprintPure" => FUNC_BLUEPRINT_CALLABLE | FUNC_BLUEPRINT_PURE,
            "AuthorityOnly" => FUNC_BLUEPRINT_AUTHORITY_ONLY,
            "ImplementableEvent" => {
                events += 1;
                out.kind = Some(FunctionKind::ImplementableEvent);
                FUNC_EVENT | FUNC_BLUEPRINT_EVENT
            }
            "NativeEvent" => {
                events += 1;
                out.kind = Some(FunctionKind::NativeEvent);
                FUNC_EVENT | FUNC_BLUEPRINT_EVENT
            }
            "Server" => {
                routes += 1;
                FUNC_NET | FUNC_NET_SERVER | FUNC_EVENT
            }
            "Client" => {
                routes += 1;
                FUNC_NET | FUNC_NET_CLIENT | FUNC_EVENT
            }
            "NetMulticast" => {
                routes += 1;
                FUNC_NET | FUNC_NET_MULTICAST | FUNC_EVENT
            }
            "Reliable" => FUNC_NET_RELIABLE,
            "Unreliable" => FUNC_NONE,
            "Override" => {
                is_override = true;
                FUNC_NONE
            }
            _ => return Err(unknown(&item, spec)),
        };
    }

    let conflict = || AuthoringError::ConflictingSpecifiers {
        class: class.to_string(),
        function: function.to_string(),
    };
    if routes > 0 && (events > 0 || is_override) {
        return Err(AuthoringError::RpcEvent {
            class: class.to_string(),
            function: function.to_string(),
        });
    }
    if events > 1 || routes > 1 || (is_override && events > 0) {
        return Err(conflict());
    }
    if out.flags & FUNC_NET_RELIABLE != 0 && routes == 0 {
        return Err(AuthoringError::SpecifierValue {
            item,
            specifier: "Reliable".into(),
            expected: "Server, Client or NetMulticast alongside it",
        });
    }
    if is_override {
        if out.flags != FUNC_NONE || !out.defaults.is_empty() {
            return Err(conflict());
        }
        out.kind = None;
        return Ok(out);
    }
    if routes > 0 {
        out.kind = Some(FunctionKind::Rpc);
    } else if out.kind.is_none() {
        out.kind = Some(FunctionKind::Callable);
    }
    out.flags |= FUNC_NATIVE;
    Ok(out)
}

/// Rules that need the whole signature.
pub fn function(class: &str, meta: &FunctionMeta) -> Result<(), AuthoringError> {
    if is_rpc(meta.flags) {
        if meta.return_value.is_some() {
            return Err(AuthoringError::RpcReturnValue {
                class: class.to_string(),
                function: meta.rust_name.clone(),
            });
        }
        if meta.is_event() || meta.kind == FunctionKind::Override {
            return Err(AuthoringError::RpcEvent {
                class: class.to_string(),
                function: meta.rust_name.clone(),
            });
        }
    }
    if meta.is_static() && (meta.kind.dispatches_natively() || meta.kind == FunctionKind::Override) {
        return Err(AuthoringError::Signature {
            item: format!("{class}.{}", meta.rust_name),
            problem: "events and remote procedure calls need a `&self` receiver",
        });
    }
    Ok(())
}

/// Constructor shape: `fn(&mut self)`.
pub fn constructor(class: &str, sig: &Signature) -> Result<(), AuthoringError> {
    let item = format!("{class}.{}", sig.ident);
    let receiver_ok = matches!(
        sig.inputs.first(),
        Some(FnArg::Receiver(r)) if r.reference.is_some() && r.mutability.is_some()
    );
    if !receiver_ok || sig.inputs.len() != 1 {
        return Err(AuthoringError::Signature {
            item,
            problem: "constructors take only `&mut self`",
        });
    }
    if !sig.generics.params.is_empty() || sig.asyncness.is_some() || !returns_unit(sig) {
        return Err(AuthoringError::Signature {
            item,
            problem: "constructors are plain `fn(&mut self)`",
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Signature helpers
// ---------------------------------------------------------------------------

pub fn takes_shared_self(sig: &Signature) -> bool {
    matches!(
        sig.inputs.first(),
        Some(FnArg::Receiver(r)) if r.reference.is_some() && r.mutability.is_none()
    )
}

pub fn typed_inputs(sig: &Signature) -> impl Iterator<Item = &Type> {
    sig.inputs.iter().filter_map(|a| match a {
        FnArg::Typed(t) => Some(&*t.ty),
        FnArg::Receiver(_) => None,
    })
}

pub fn returns_unit(sig: &Signature) -> bool {
    match &sig.output {
        ReturnType::Default => true,
        ReturnType::Type(_, ty) => matches!(&**ty, Type::Tuple(t) if t.elems.is_empty()),
    }
}

pub fn same_type(a: &Type, b: &Type) -> bool {
    a.to_token_stream().to_string() == b.to_token_stream().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_specifiers;

    fn specs(attr: syn::Attribute) -> Vec<Specifier> {
        parse_specifiers(&attr).unwrap()
    }

    #[test]
    fn rpc_cannot_be_an_event() {
        let s = specs(syn::parse_quote!(#[ufunction(Server, NativeEvent)]));
        assert!(matches!(
            function_specifiers("Turret", "fire", &s),
            Err(AuthoringError::RpcEvent { .. })
        ));
        let s = specs(syn::parse_quote!(#[ufunction(Client, Override)]));
        assert!(matches!(
            function_specifiers("Turret", "fire", &s),
            Err(AuthoringError::RpcEvent { .. })
        ));
    }

    #[test]
    fn rpc_flags_and_kind() {
        let s = specs(syn::parse_quote!(#[ufunction(Server, Reliable)]));
        let spec = function_specifiers("Turret", "fire", &s).unwrap();
        assert_eq!(spec.kind, Some(FunctionKind::Rpc));
        assert!(is_rpc(spec.flags));
        assert_ne!(spec.flags & FUNC_NET_RELIABLE, 0);

        let s = specs(syn::parse_quote!(#[ufunction(Reliable)]));
        assert!(function_specifiers("Turret", "fire", &s).is_err());
    }

    #[test]
    fn override_stands_alone() {
        let s = specs(syn::parse_quote!(#[ufunction(Override)]));
        assert_eq!(function_specifiers("Turret", "tick", &s).unwrap().kind, None);
        let s = specs(syn::parse_quote!(#[ufunction(Override, BlueprintCallable)]));
        assert!(matches!(
            function_specifiers("Turret", "tick", &s),
            Err(AuthoringError::ConflictingSpecifiers { .. })
        ));
    }

    #[test]
    fn defaults_are_recorded() {
        let s = specs(syn::parse_quote!(#[ufunction(BlueprintCallable, defaults(count = 3, label = "hi"))]));
        let spec = function_specifiers("Turret", "fire", &s).unwrap();
        assert_eq!(spec.defaults, [("count".to_string(), "3".to_string()), ("label".to_string(), "\"hi\"".to_string())]);
        assert_eq!(spec.kind, Some(FunctionKind::Callable));
    }

    #[test]
    fn rpc_with_return_value_is_rejected() {
        let meta = FunctionMeta {
            name: "Fire".into(),
            rust_name: "fire".into(),
            kind: FunctionKind::Rpc,
            flags: FUNC_NET | FUNC_NET_SERVER,
            params: Vec::new(),
            return_value: Some(PropertyKind::Int32),
            declared_by: None,
        };
        assert!(matches!(function("Turret", &meta), Err(AuthoringError::RpcReturnValue { .. })));
    }

    #[test]
    fn replication_rules() {
        let methods = |name: &str| -> Option<Signature> {
            match name {
                "on_rep_health" => Some(syn::parse_quote!(fn on_rep_health(&self, old: f32))),
                "too_many" => Some(syn::parse_quote!(fn too_many(&self, a: f32, b: f32))),
                _ => None,
            }
        };
        let s = specs(syn::parse_quote!(#[uproperty(ReplicatedUsing = "on_rep_health", condition = "OwnerOnly")]));
        let spec = property_specifiers("Turret.health", &s, true).unwrap();
        let rep = replication("Turret", "health", &PropertyKind::Float, &spec, &methods).unwrap().unwrap();
        assert_eq!(rep.condition, "OwnerOnly");
        assert_eq!(rep.notify.as_deref(), Some("on_rep_health"));

        let s = specs(syn::parse_quote!(#[uproperty(ReplicatedUsing = "too_many")]));
        let spec = property_specifiers("Turret.health", &s, true).unwrap();
        assert!(matches!(
            replication("Turret", "health", &PropertyKind::Float, &spec, &methods),
            Err(AuthoringError::ReplicationNotify { .. })
        ));

        let s = specs(syn::parse_quote!(#[uproperty(Replicated, condition = "Sometimes")]));
        let spec = property_specifiers("Turret.health", &s, true).unwrap();
        assert!(matches!(
            replication("Turret", "health", &PropertyKind::Float, &spec, &methods),
            Err(AuthoringError::LifetimeCondition { .. })
        ));

        let s = specs(syn::parse_quote!(#[uproperty(Replicated)]));
        let spec = property_specifiers("Turret.tags", &s, true).unwrap();
        let set = PropertyKind::Set { inner: Box::new(PropertyKind::Name) };
        assert!(matches!(
            replication("Turret", "tags", &set, &spec, &methods),
            Err(AuthoringError::NetworkedKind { .. })
        ));
    }

    #[test]
    fn replication_is_class_only() {
        let s = specs(syn::parse_quote!(#[uproperty(Replicated)]));
        assert!(matches!(
            property_specifiers("Ammo.count", &s, false),
            Err(AuthoringError::UnknownSpecifier { .. })
        ));
    }

    #[test]
    fn accessor_shapes() {
        let ty: Type = syn::parse_quote!(f32);
        let methods = |name: &str| -> Option<Signature> {
            match name {
                "current" => Some(syn::parse_quote!(fn current(&self) -> f32)),
                "wrong" => Some(syn::parse_quote!(fn wrong(&self) -> i32)),
                "apply" => Some(syn::parse_quote!(fn apply(&self, value: f32))),
                _ => None,
            }
        };
        let ok = PropertySpec {
            getter: Some("current".into()),
            setter: Some("apply".into()),
            ..Default::default()
        };
        accessors("Turret", "health", &ty, &ok, &methods).unwrap();
        let bad = PropertySpec {
            getter: Some("wrong".into()),
            ..Default::default()
        };
        assert!(matches!(
            accessors("Turret", "health", &ty, &bad, &methods),
            Err(AuthoringError::AccessorShape { accessor: "getter", .. })
        ));
        let swapped = PropertySpec {
            setter: Some("current".into()),
            ..Default::default()
        };
        assert!(accessors("Turret", "health", &ty, &swapped, &methods).is_err());
    }

    #[test]
    fn constructor_shape() {
        let ok: Signature = syn::parse_quote!(fn init(&mut self));
        constructor("Turret", &ok).unwrap();
        let bad: Signature = syn::parse_quote!(fn init(&self, x: i32));
        assert!(constructor("Turret", &bad).is_err());
    }
}
