// Source discovery and declaration collection.
//
// A script crate is read the way rustc reads it: start at `lib.rs` and follow
// every `mod name;` to its file. Items carrying a marker attribute are
// collected together with the module path they were declared in.

use std::path::{Path, PathBuf};

use syn::punctuated::Punctuated;
use syn::{Attribute, Expr, Item, ItemEnum, ItemImpl, ItemStruct, ItemTrait, Lit, Meta, Token};

use crate::error::{WeaveError, WeaveResult};

pub const UCLASS: &str = "uclass";
pub const USTRUCT: &str = "ustruct";
pub const UENUM: &str = "uenum";
pub const UINTERFACE: &str = "uinterface";
pub const UPROPERTY: &str = "uproperty";
pub const UCLASS_IMPL: &str = "uclass_impl";
pub const UFUNCTION: &str = "ufunction";
pub const CONSTRUCTOR: &str = "constructor";

const MARKERS: &[&str] = &[
    UCLASS, USTRUCT, UENUM, UINTERFACE, UPROPERTY, UCLASS_IMPL, UFUNCTION, CONSTRUCTOR,
];

// ---------------------------------------------------------------------------
// Specifiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum SpecValue {
    Flag,
    Str(String),
    Path(String),
    /// Any other expression, as source text.
    Expr(String),
    List(Vec<Specifier>),
}

/// One entry of a marker attribute: `BlueprintCallable`, `parent = Actor`,
/// `condition = "OwnerOnly"`, `defaults(count = 3)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Specifier {
    pub name: String,
    pub value: SpecValue,
}

impl Specifier {
    /// String-ish value: a string literal or a bare path.
    pub fn text(&self) -> Option<&str> {
        match &self.value {
            SpecValue::Str(s) | SpecValue::Path(s) => Some(s),
            _ => None,
        }
    }
}

fn path_text(path: &syn::Path) -> String {
    path.segments
        .iter()
        .map(|s| s.ident.to_string())
        .collect::<Vec<_>>()
        .join("::")
}

fn specifier_from_meta(meta: &Meta) -> syn::Result<Specifier> {
    Ok(match meta {
        Meta::Path(p) => Specifier {
            name: path_text(p),
            value: SpecValue::Flag,
        },
        Meta::NameValue(nv) => {
            let value = match &nv.value {
                Expr::Lit(syn::ExprLit { lit: Lit::Str(s), .. }) => SpecValue::Str(s.value()),
                Expr::Path(p) => SpecValue::Path(path_text(&p.path)),
                other => SpecValue::Expr(quote::quote!(#other).to_string()),
            };
            Specifier {
                name: path_text(&nv.path),
                value,
            }
        }
        Meta::List(list) => {
            let nested = list.parse_args_with(Punctuated::<Meta, Token![,]>::parse_terminated)?;
            Specifier {
                name: path_text(&list.path),
                value: SpecValue::List(nested.iter().map(specifier_from_meta).collect::<syn::Result<_>>()?),
            }
        }
    })
}

/// Specifiers of a marker attribute; `#[uproperty]` without arguments has none.
pub fn parse_specifiers(attr: &Attribute) -> syn::Result<Vec<Specifier>> {
    match &attr.meta {
        Meta::Path(_) => Ok(Vec::new()),
        Meta::List(list) if list.tokens.is_empty() => Ok(Vec::new()),
        _ => {
            let metas = attr.parse_args_with(Punctuated::<Meta, Token![,]>::parse_terminated)?;
            metas.iter().map(specifier_from_meta).collect()
        }
    }
}

pub fn is_marker(attr: &Attribute, name: &str) -> bool {
    attr.path().segments.last().is_some_and(|s| s.ident == name)
}

pub fn find_marker<'a>(attrs: &'a [Attribute], name: &str) -> Option<&'a Attribute> {
    attrs.iter().find(|a| is_marker(a, name))
}

pub fn has_marker(attrs: &[Attribute], name: &str) -> bool {
    find_marker(attrs, name).is_some()
}

/// Remove every weaver marker attribute.
pub fn strip_markers(attrs: &mut Vec<Attribute>) {
    attrs.retain(|a| !MARKERS.iter().any(|m| is_marker(a, m)));
}

// ---------------------------------------------------------------------------
// Source files
// ---------------------------------------------------------------------------

pub struct SourceFile {
    pub path: PathBuf,
    /// Relative to the module's source directory.
    pub relative: PathBuf,
    /// Module path from the crate root (`["combat", "turret"]`).
    pub module_path: Vec<String>,
    pub syntax: syn::File,
}

fn parse_file(path: &Path) -> WeaveResult<syn::File> {
    let text = std::fs::read_to_string(path).map_err(|e| WeaveError::io(path, e))?;
    syn::parse_file(&text).map_err(|e| WeaveError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn path_attr(attrs: &[Attribute]) -> Option<String> {
    attrs.iter().find(|a| a.path().is_ident("path")).and_then(|a| match &a.meta {
        Meta::NameValue(nv) => match &nv.value {
            Expr::Lit(syn::ExprLit { lit: Lit::Str(s), .. }) => Some(s.value()),
            _ => None,
        },
        _ => None,
    })
}

fn is_cfg_gated(attrs: &[Attribute]) -> bool {
    attrs.iter().any(|a| a.path().is_ident("cfg"))
}

struct PendingFile {
    path: PathBuf,
    /// Directory holding this file's child module files.
    child_dir: PathBuf,
    module_path: Vec<String>,
}

/// Read every file of the crate rooted at `source_dir/lib.rs`.
pub fn discover(module: &str, source_dir: &Path) -> WeaveResult<Vec<SourceFile>> {
    let root = source_dir.join("lib.rs");
    let mut pending = vec![PendingFile {
        path: root,
        child_dir: source_dir.to_path_buf(),
        module_path: Vec::new(),
    }];
    let mut files = Vec::new();

    while let Some(next) = pending.pop() {
        let syntax = parse_file(&next.path)?;
        let mut children = Vec::new();
        collect_mod_files(module, &next, &syntax.items, &next.child_dir, &next.module_path, &mut children)?;
        // Depth-first, in declaration order.
        pending.extend(children.into_iter().rev());
        let relative = next
            .path
            .strip_prefix(source_dir)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| next.path.clone());
        files.push(SourceFile {
            path: next.path,
            relative,
            module_path: next.module_path,
            syntax,
        });
    }
    Ok(files)
}

fn collect_mod_files(
    module: &str,
    file: &PendingFile,
    items: &[Item],
    dir: &Path,
    module_path: &[String],
    out: &mut Vec<PendingFile>,
) -> WeaveResult<()> {
    for item in items {
        let Item::Mod(m) = item else { continue };
        let name = m.ident.to_string();
        let mut child_path = module_path.to_vec();
        child_path.push(name.clone());
        match &m.content {
            Some((_, inner)) => {
                collect_mod_files(module, file, inner, &dir.join(&name), &child_path, out)?;
            }
            None => {
                let found = match path_attr(&m.attrs) {
                    Some(p) => {
                        let base = file.path.parent().unwrap_or(Path::new("."));
                        let path = base.join(p);
                        path.is_file().then(|| {
                            let child_dir = path.with_extension("");
                            (path, child_dir)
                        })
                    }
                    None => {
                        let flat = dir.join(format!("{name}.rs"));
                        let nested = dir.join(&name).join("mod.rs");
                        if flat.is_file() {
                            Some((flat, dir.join(&name)))
                        } else if nested.is_file() {
                            Some((nested, dir.join(&name)))
                        } else {
                            None
                        }
                    }
                };
                match found {
                    Some((path, child_dir)) => out.push(PendingFile {
                        path,
                        child_dir,
                        module_path: child_path,
                    }),
                    None if is_cfg_gated(&m.attrs) => {
                        log::debug!("{}: skipping cfg-gated module `{name}`", file.path.display());
                    }
                    None => {
                        return Err(WeaveError::MissingModuleFile {
                            module: module.to_string(),
                            path: file.path.clone(),
                            name,
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// An item together with where it was declared.
#[derive(Clone)]
pub struct Located<T> {
    pub file: usize,
    /// Module path from the crate root, including inline modules.
    pub module_path: Vec<String>,
    pub specifiers: Vec<Specifier>,
    pub item: T,
}

impl<T> Located<T> {
    pub fn has_specifier(&self, name: &str) -> bool {
        self.specifiers.iter().any(|s| s.name == name)
    }
}

/// Impl block of a reflected class or struct.
#[derive(Clone)]
pub struct ImplDecl {
    /// Position among all collected impl blocks, in walk order.
    pub ordinal: usize,
    pub self_name: String,
    pub trait_name: Option<String>,
    /// Carries `#[uclass_impl]`.
    pub woven: bool,
    pub item: ItemImpl,
}

#[derive(Default)]
pub struct Declarations {
    pub classes: Vec<Located<ItemStruct>>,
    pub structs: Vec<Located<ItemStruct>>,
    pub enums: Vec<Located<ItemEnum>>,
    pub interfaces: Vec<Located<ItemTrait>>,
    pub impls: Vec<Located<ImplDecl>>,
}

impl Declarations {
    pub fn type_names(&self) -> impl Iterator<Item = String> + '_ {
        self.classes
            .iter()
            .map(|c| c.item.ident.to_string())
            .chain(self.structs.iter().map(|s| s.item.ident.to_string()))
            .chain(self.enums.iter().map(|e| e.item.ident.to_string()))
            .chain(self.interfaces.iter().map(|i| i.item.ident.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.structs.is_empty() && self.enums.is_empty() && self.interfaces.is_empty()
    }

    /// Types whose impl blocks the weaver collects and rewrites.
    pub fn impl_targets(&self) -> Vec<String> {
        self.classes
            .iter()
            .chain(self.structs.iter())
            .map(|c| c.item.ident.to_string())
            .collect()
    }

    /// Module paths that declare at least one reflected type.
    pub fn type_scopes(&self) -> Vec<&[String]> {
        self.classes
            .iter()
            .map(|c| c.module_path.as_slice())
            .chain(self.structs.iter().map(|s| s.module_path.as_slice()))
            .chain(self.enums.iter().map(|e| e.module_path.as_slice()))
            .chain(self.interfaces.iter().map(|i| i.module_path.as_slice()))
            .collect()
    }
}

/// Last path segment of a type (`crate::units::Turret` -> `Turret`).
pub fn type_name(ty: &syn::Type) -> Option<String> {
    match ty {
        syn::Type::Path(tp) => tp.path.segments.last().map(|s| s.ident.to_string()),
        _ => None,
    }
}

fn marker_specifiers(path: &Path, attr: &Attribute) -> WeaveResult<Vec<Specifier>> {
    parse_specifiers(attr).map_err(|e| WeaveError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Collect every reflected declaration of the crate.
///
/// Impl blocks are matched to classes and structs by name, so all files are
/// scanned for types first.
pub fn collect(files: &[SourceFile]) -> WeaveResult<Declarations> {
    let mut decls = Declarations::default();
    for (index, file) in files.iter().enumerate() {
        collect_types(index, file, &file.syntax.items, &file.module_path, &mut decls)?;
    }
    let targets = decls.impl_targets();
    let mut ordinal = 0;
    for (index, file) in files.iter().enumerate() {
        collect_impls(index, &file.syntax.items, &file.module_path, &targets, &mut ordinal, &mut decls);
    }
    Ok(decls)
}

fn locate<T>(index: usize, file: &SourceFile, module_path: &[String], attr: &Attribute, item: T) -> WeaveResult<Located<T>> {
    Ok(Located {
        file: index,
        module_path: module_path.to_vec(),
        specifiers: marker_specifiers(&file.path, attr)?,
        item,
    })
}

fn collect_types(
    index: usize,
    file: &SourceFile,
    items: &[Item],
    module_path: &[String],
    decls: &mut Declarations,
) -> WeaveResult<()> {
    for item in items {
        match item {
            Item::Struct(s) => {
                if let Some(attr) = find_marker(&s.attrs, UCLASS) {
                    decls.classes.push(locate(index, file, module_path, attr, s.clone())?);
                } else if let Some(attr) = find_marker(&s.attrs, USTRUCT) {
                    decls.structs.push(locate(index, file, module_path, attr, s.clone())?);
                }
            }
            Item::Enum(e) => {
                if let Some(attr) = find_marker(&e.attrs, UENUM) {
                    decls.enums.push(locate(index, file, module_path, attr, e.clone())?);
                }
            }
            Item::Trait(t) => {
                if let Some(attr) = find_marker(&t.attrs, UINTERFACE) {
                    decls.interfaces.push(locate(index, file, module_path, attr, t.clone())?);
                }
            }
            Item::Mod(m) => {
                if let Some((_, inner)) = &m.content {
                    let mut path = module_path.to_vec();
                    path.push(m.ident.to_string());
                    collect_types(index, file, inner, &path, decls)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn collect_impls(
    index: usize,
    items: &[Item],
    module_path: &[String],
    targets: &[String],
    ordinal: &mut usize,
    decls: &mut Declarations,
) {
    for item in items {
        match item {
            Item::Impl(i) => {
                let Some(self_name) = type_name(&i.self_ty) else { continue };
                if !targets.contains(&self_name) {
                    continue;
                }
                let trait_name = i
                    .trait_
                    .as_ref()
                    .and_then(|(_, path, _)| path.segments.last().map(|s| s.ident.to_string()));
                decls.impls.push(Located {
                    file: index,
                    module_path: module_path.to_vec(),
                    specifiers: Vec::new(),
                    item: ImplDecl {
                        ordinal: *ordinal,
                        self_name,
                        trait_name,
                        woven: has_marker(&i.attrs, UCLASS_IMPL),
                        item: i.clone(),
                    },
                });
                *ordinal += 1;
            }
            Item::Mod(m) => {
                if let Some((_, inner)) = &m.content {
                    let mut path = module_path.to_vec();
                    path.push(m.ident.to_string());
                    collect_impls(index, inner, &path, targets, ordinal, decls);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Declarations of a single in-memory `lib.rs`.
    pub(crate) fn declarations(source: &str) -> Declarations {
        let file = SourceFile {
            path: PathBuf::from("lib.rs"),
            relative: PathBuf::from("lib.rs"),
            module_path: Vec::new(),
            syntax: syn::parse_file(source).unwrap(),
        };
        collect(&[file]).unwrap()
    }

    fn write(dir: &Path, rel: &str, text: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    #[test]
    fn specifiers_cover_flags_values_and_lists() {
        let attr: Attribute = syn::parse_quote!(
            #[ufunction(BlueprintCallable, name = "Fire", parent = Actor, defaults(count = 3))]
        );
        let specs = parse_specifiers(&attr).unwrap();
        assert_eq!(specs[0], Specifier { name: "BlueprintCallable".into(), value: SpecValue::Flag });
        assert_eq!(specs[1].text(), Some("Fire"));
        assert_eq!(specs[2].text(), Some("Actor"));
        let SpecValue::List(defaults) = &specs[3].value else { panic!("expected a list") };
        assert_eq!(defaults[0].name, "count");
        assert_eq!(defaults[0].value, SpecValue::Expr("3".into()));

        let bare: Attribute = syn::parse_quote!(#[uproperty]);
        assert!(parse_specifiers(&bare).unwrap().is_empty());
    }

    #[test]
    fn discovery_follows_mod_declarations() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lib.rs", "mod units; mod util { pub mod deep; }");
        write(dir.path(), "units/mod.rs", "pub mod turret;");
        write(dir.path(), "units/turret.rs", "pub struct Turret;");
        write(dir.path(), "util/deep.rs", "");
        write(dir.path(), "orphan.rs", "this is not rust");

        let files = discover("Game", dir.path()).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.module_path.join("::")).collect();
        assert_eq!(paths, ["", "units", "units::turret", "util::deep"]);
        assert_eq!(files[2].relative, Path::new("units/turret.rs"));
    }

    #[test]
    fn missing_module_file_is_an_error_unless_cfg_gated() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lib.rs", "#[cfg(test)] mod tests; mod gone;");
        assert!(matches!(
            discover("Game", dir.path()),
            Err(WeaveError::MissingModuleFile { name, .. }) if name == "gone"
        ));
    }

    #[test]
    fn collect_finds_markers_and_class_impls() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "lib.rs",
            r#"
            mod inner {
                #[uclass(parent = Actor)]
                pub struct Turret { #[uproperty] health: f32 }
            }
            #[ustruct] pub struct Ammo { count: i32 }
            #[uenum] pub enum Mode { Idle, Firing }
            #[uinterface] pub trait Damageable {}
            #[uclass_impl] impl inner::Turret { fn fire(&self) {} }
            impl inner::Turret { fn helper(&self) {} }
            impl Ammo { fn unrelated(&self) {} }
            "#,
        );
        let files = discover("Game", dir.path()).unwrap();
        let decls = collect(&files).unwrap();
        assert_eq!(decls.classes.len(), 1);
        assert_eq!(decls.classes[0].module_path, ["inner"]);
        assert_eq!(decls.classes[0].specifiers[0].text(), Some("Actor"));
        assert_eq!(decls.structs.len(), 1);
        assert_eq!(decls.enums.len(), 1);
        assert_eq!(decls.interfaces.len(), 1);
        assert_eq!(decls.impls.len(), 3);
        assert!(decls.impls[0].item.woven);
        assert!(!decls.impls[1].item.woven);
        assert_eq!(decls.impls[2].item.self_name, "Ammo");
        assert_eq!(decls.impls[2].item.ordinal, 2);
    }
}
