// Code generation: rewrites every source file of a module into its woven form.
//
// Files are walked in the order `parse::collect` walked them so impl block
// ordinals line up with the analysis. Each module scope declaring reflected
// types gets a `__umbra_register` function; the crate root gets the module
// cell and `register_assembly`, which reaches every scope.

mod classes;
mod enums;
mod functions;
mod interfaces;
mod rewrite;
mod structs;

use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use proc_macro2::TokenStream;
use quote::{quote, ToTokens};
use syn::{Item, ItemImpl};

use crate::classify::Analysis;
use crate::error::AuthoringError;
use crate::naming::ident;
use crate::parse::{self, Declarations, SourceFile, UCLASS, UENUM, UINTERFACE, USTRUCT};

/// One rewritten source file.
pub struct WovenFile {
    /// Relative to the module's output directory.
    pub relative: PathBuf,
    pub syntax: syn::File,
}

impl WovenFile {
    /// Source text, piped through rustfmt when `format` is set and rustfmt
    /// is available.
    pub fn render(&self, format: bool) -> String {
        let raw = self.syntax.to_token_stream().to_string();
        let body = if format {
            match rustfmt(&raw) {
                Ok(formatted) => formatted,
                Err(e) => {
                    log::warn!("rustfmt unavailable for {}: {e}", self.relative.display());
                    raw
                }
            }
        } else {
            raw
        };
        format!("// @generated by umbra-weaver. Edit the original source instead.\n\n{body}")
    }
}

fn rustfmt(source: &str) -> std::io::Result<String> {
    let mut child = Command::new("rustfmt")
        .args(["--edition", "2024", "--emit", "stdout", "--quiet"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| std::io::Error::other("rustfmt stdin unavailable"))?;
    let output = std::thread::scope(|s| {
        let writer = s.spawn(move || stdin.write_all(source.as_bytes()));
        let output = child.wait_with_output();
        match writer.join() {
            Ok(written) => written.and(output),
            Err(_) => Err(std::io::Error::other("rustfmt writer panicked")),
        }
    })?;
    if !output.status.success() {
        return Err(std::io::Error::other(String::from_utf8_lossy(&output.stderr).trim().to_string()));
    }
    String::from_utf8(output.stdout).map_err(std::io::Error::other)
}

/// Weave every file of `module`.
pub fn emit(
    module: &str,
    files: &[SourceFile],
    decls: &Declarations,
    analysis: &Analysis,
) -> Result<Vec<WovenFile>, AuthoringError> {
    let mut emitter = Emitter {
        module,
        decls,
        analysis,
        targets: decls.impl_targets(),
        ordinal: 0,
    };
    let mut woven = Vec::with_capacity(files.len());
    for file in files {
        let mut items = emitter.items(file.syntax.items.clone(), &file.module_path)?;
        items.extend(emitter.register_fn(&file.module_path));
        if file.module_path.is_empty() {
            items.extend(emitter.root_items());
        }
        woven.push(WovenFile {
            relative: file.relative.clone(),
            syntax: syn::File {
                shebang: file.syntax.shebang.clone(),
                attrs: file.syntax.attrs.clone(),
                items,
            },
        });
    }
    Ok(woven)
}

struct Emitter<'a> {
    module: &'a str,
    decls: &'a Declarations,
    analysis: &'a Analysis,
    targets: Vec<String>,
    /// Next impl block ordinal, counted like `parse::collect` counts them.
    ordinal: usize,
}

impl Emitter<'_> {
    fn items(&mut self, items: Vec<Item>, scope: &[String]) -> Result<Vec<Item>, AuthoringError> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Item::Struct(s) if parse::has_marker(&s.attrs, UCLASS) => {
                    match self.analysis.class(&s.ident.to_string()) {
                        Some(plan) => out.extend(classes::class_items(plan, s)),
                        None => out.push(Item::Struct(s)),
                    }
                }
                Item::Struct(s) if parse::has_marker(&s.attrs, USTRUCT) => {
                    match self.analysis.strukt(&s.ident.to_string()) {
                        Some(plan) => out.extend(structs::struct_items(plan, s)),
                        None => out.push(Item::Struct(s)),
                    }
                }
                Item::Enum(e) if parse::has_marker(&e.attrs, UENUM) => {
                    match self.analysis.enumeration(&e.ident.to_string()) {
                        Some(plan) => out.extend(enums::enum_items(plan, e)),
                        None => out.push(Item::Enum(e)),
                    }
                }
                Item::Trait(t) if parse::has_marker(&t.attrs, UINTERFACE) => {
                    match self.analysis.interface(&t.ident.to_string()) {
                        Some(plan) => out.extend(interfaces::interface_items(plan, t)),
                        None => out.push(Item::Trait(t)),
                    }
                }
                Item::Impl(im) => out.extend(self.impl_block(im)?),
                Item::Mod(mut m) => {
                    if let Some((brace, inner)) = m.content.take() {
                        let mut path = scope.to_vec();
                        path.push(m.ident.to_string());
                        let mut woven = self.items(inner, &path)?;
                        woven.extend(self.register_fn(&path));
                        m.content = Some((brace, woven));
                    }
                    out.push(Item::Mod(m));
                }
                other => out.push(other),
            }
        }
        Ok(out)
    }

    fn impl_block(&mut self, mut im: ItemImpl) -> Result<Vec<Item>, AuthoringError> {
        let Some(name) = parse::type_name(&im.self_ty).filter(|n| self.targets.contains(n)) else {
            return Ok(vec![Item::Impl(im)]);
        };
        let ordinal = self.ordinal;
        self.ordinal += 1;
        match self.analysis.class(&name) {
            Some(plan) => classes::impl_items(plan, ordinal, im),
            None => {
                parse::strip_markers(&mut im.attrs);
                Ok(vec![Item::Impl(im)])
            }
        }
    }

    /// Child scopes of `scope` that lead to reflected types.
    fn child_scopes(&self, scope: &[String]) -> BTreeSet<String> {
        self.decls
            .type_scopes()
            .into_iter()
            .filter(|s| s.len() > scope.len() && s.starts_with(scope))
            .map(|s| s[scope.len()].clone())
            .collect()
    }

    fn register_fn(&self, scope: &[String]) -> Option<Item> {
        let here = |path: &[String]| path == scope;
        let mut calls: Vec<TokenStream> = Vec::new();
        for plan in &self.analysis.classes {
            if here(&self.decls.classes[plan.decl].module_path) {
                let name = ident(&plan.meta.name);
                calls.push(quote! {
                    builder.add_type(#name::__umbra_descriptor());
                    builder.add_startup_job(#name::__umbra_static_init);
                });
            }
        }
        for plan in &self.analysis.structs {
            if here(&self.decls.structs[plan.decl].module_path) {
                let (name, full) = (&plan.meta.name, &plan.meta.full_name);
                let ty = ident(name);
                calls.push(quote! {
                    builder.add_type(::umbra_runtime::TypeDescriptor::new(::umbra_runtime::TypeKind::Struct, #name, #full));
                    builder.add_startup_job(#ty::__umbra_static_init);
                });
            }
        }
        for plan in &self.analysis.enums {
            if here(&self.decls.enums[plan.decl].module_path) {
                let (name, full) = (&plan.meta.name, &plan.meta.full_name);
                calls.push(quote! {
                    builder.add_type(::umbra_runtime::TypeDescriptor::new(::umbra_runtime::TypeKind::Enum, #name, #full));
                });
            }
        }
        for plan in &self.analysis.interfaces {
            if here(&self.decls.interfaces[plan.decl].module_path) {
                let (name, full) = (&plan.meta.name, &plan.meta.full_name);
                calls.push(quote! {
                    builder.add_type(::umbra_runtime::TypeDescriptor::new(::umbra_runtime::TypeKind::Interface, #name, #full));
                });
            }
        }
        for child in self.child_scopes(scope) {
            let child = ident(&child);
            calls.push(quote!(#child::__umbra_register(builder);));
        }
        if calls.is_empty() {
            return None;
        }
        Some(syn::parse_quote! {
            #[doc(hidden)]
            pub(crate) fn __umbra_register(builder: &mut ::umbra_runtime::AssemblyBuilder) {
                #(#calls)*
            }
        })
    }

    fn root_items(&self) -> Vec<Item> {
        let module = self.module;
        let register = (!self.decls.is_empty()).then(|| quote!(__umbra_register(builder);));
        vec![
            syn::parse_quote! {
                #[doc(hidden)]
                static __UMBRA_MODULE: ::umbra_runtime::ModuleCell = ::umbra_runtime::ModuleCell::new(#module);
            },
            syn::parse_quote! {
                /// Registers every reflected type of this crate with `builder`.
                pub fn register_assembly(builder: &mut ::umbra_runtime::AssemblyBuilder) {
                    builder.bind_module_cell(&__UMBRA_MODULE);
                    #register
                }
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::analyze;

    fn file(relative: &str, module_path: &[&str], source: &str) -> SourceFile {
        SourceFile {
            path: PathBuf::from(relative),
            relative: PathBuf::from(relative),
            module_path: module_path.iter().map(|s| s.to_string()).collect(),
            syntax: syn::parse_file(source).unwrap(),
        }
    }

    fn weave(files: &[SourceFile]) -> Vec<String> {
        let decls = parse::collect(files).unwrap();
        let analysis = analyze("Game", &decls, &[]).unwrap();
        emit("Game", files, &decls, &analysis)
            .unwrap()
            .iter()
            .map(|w| w.syntax.to_token_stream().to_string())
            .collect()
    }

    #[test]
    fn registration_reaches_every_scope() {
        let files = [
            file("lib.rs", &[], "mod units; mod plain; pub mod data { #[uenum] pub enum Mode { Idle } }"),
            file("units.rs", &["units"], "#[uclass] pub struct Turret {}"),
            file("plain.rs", &["plain"], "pub fn helper() {}"),
        ];
        let woven = weave(&files);
        let root = &woven[0];
        assert!(root.contains("units :: __umbra_register (builder) ;"));
        assert!(root.contains("data :: __umbra_register (builder) ;"));
        assert!(!root.contains("plain :: __umbra_register"));
        assert!(root.contains("static __UMBRA_MODULE : :: umbra_runtime :: ModuleCell = :: umbra_runtime :: ModuleCell :: new (\"Game\")"));
        assert!(root.contains("builder . bind_module_cell (& __UMBRA_MODULE) ; __umbra_register (builder) ;"));
        assert!(root.contains("TypeKind :: Enum , \"Mode\" , \"Game.Mode\""));

        assert!(woven[1].contains("builder . add_type (Turret :: __umbra_descriptor ()) ;"));
        assert!(woven[1].contains("builder . add_startup_job (Turret :: __umbra_static_init) ;"));
        assert!(!woven[2].contains("__umbra_register"));
    }

    #[test]
    fn impl_ordinals_follow_the_collection_walk() {
        let files = [
            file(
                "lib.rs",
                &[],
                r#"
                mod units;
                #[ustruct] pub struct Ammo { count: i32 }
                impl Ammo { pub fn empty() -> Self { Ammo { count: 0 } } }
                "#,
            ),
            file(
                "units.rs",
                &["units"],
                r#"
                use crate::Ammo;
                #[uclass] pub struct Turret { #[uproperty] ammo: Ammo }
                #[uclass_impl] impl Turret {
                    #[ufunction(BlueprintCallable)]
                    pub fn reload(&self) { self.ammo = Ammo::empty(); }
                }
                "#,
            ),
        ];
        let woven = weave(&files);
        assert!(woven[0].contains("impl Ammo { pub fn empty () -> Self"));
        assert!(woven[1].contains("self . set_ammo (Ammo :: empty ())"));
        assert!(woven[1].contains("pub (crate) fn __umbra_invoke_reload"));
    }

    #[test]
    fn modules_without_types_still_export_a_registration_function() {
        let woven = weave(&[file("lib.rs", &[], "pub fn helper() {}")]);
        assert!(woven[0].contains("pub fn register_assembly"));
        assert!(!woven[0].contains("__umbra_register"));
    }
}
