// Method body rewrites.
//
// Reflected class fields no longer exist as Rust fields after weaving, so
// every `self.field` inside the class's impl blocks is turned into accessor
// calls. Renamed event bodies get their self-recursive calls redirected.

use std::collections::HashMap;

use proc_macro2::{Delimiter, Group, Ident, TokenStream, TokenTree};
use quote::quote;
use syn::visit_mut::{self, VisitMut};
use syn::{BinOp, Expr, ExprPath, Member};

use crate::classify::ClassPlan;
use crate::error::AuthoringError;
use crate::model::PropertyKind;
use crate::naming::{ident, setter_name};

fn is_self(expr: &Expr) -> bool {
    matches!(expr, Expr::Path(ExprPath { qself: None, path, .. }) if path.is_ident("self"))
}

struct Accessors {
    getter: Ident,
    setter: Option<Ident>,
}

/// Rewrites reflected field access on `self` into getter and setter calls.
pub struct PropertyAccess {
    class: String,
    properties: HashMap<String, Accessors>,
    error: Option<AuthoringError>,
}

impl PropertyAccess {
    pub fn new(plan: &ClassPlan) -> Self {
        let properties = plan
            .properties
            .iter()
            .map(|p| {
                let field = p.field.to_string();
                let setter = match p.meta.kind {
                    PropertyKind::MulticastDelegate { .. } => None,
                    _ => Some(ident(&setter_name(&field))),
                };
                (
                    field,
                    Accessors {
                        getter: p.field.clone(),
                        setter,
                    },
                )
            })
            .collect();
        PropertyAccess {
            class: plan.meta.name.clone(),
            properties,
            error: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// First error met while rewriting.
    pub fn finish(self) -> Result<(), AuthoringError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// `self.<property>` exactly.
    fn property(&self, expr: &Expr) -> Option<String> {
        let Expr::Field(f) = expr else { return None };
        let Member::Named(name) = &f.member else { return None };
        let name = name.to_string();
        (is_self(&f.base) && self.properties.contains_key(&name)).then_some(name)
    }

    /// Property a place expression projects out of (`self.p.x`, `self.p[0]`).
    fn projected(&self, expr: &Expr) -> Option<String> {
        match expr {
            Expr::Field(f) => self.property(expr).or_else(|| self.projected(&f.base)),
            Expr::Index(i) => self.projected(&i.expr),
            Expr::Paren(p) => self.projected(&p.expr),
            _ => None,
        }
    }

    fn fail(&mut self, property: String) {
        if self.error.is_none() {
            self.error = Some(AuthoringError::PropertyBorrow {
                class: self.class.clone(),
                property,
            });
        }
    }

    /// Tokens inside macro invocations: reads only.
    fn rewrite_tokens(&self, tokens: TokenStream) -> TokenStream {
        let trees: Vec<TokenTree> = tokens.into_iter().collect();
        let mut out = Vec::with_capacity(trees.len());
        let mut i = 0;
        while i < trees.len() {
            if let TokenTree::Group(g) = &trees[i] {
                let mut group = Group::new(g.delimiter(), self.rewrite_tokens(g.stream()));
                group.set_span(g.span());
                out.push(TokenTree::Group(group));
                i += 1;
                continue;
            }
            if let (TokenTree::Ident(this), Some(TokenTree::Punct(dot)), Some(TokenTree::Ident(field))) =
                (&trees[i], trees.get(i + 1), trees.get(i + 2))
            {
                let called = matches!(trees.get(i + 3), Some(TokenTree::Group(g)) if g.delimiter() == Delimiter::Parenthesis);
                if this == "self" && dot.as_char() == '.' && !called && self.properties.contains_key(&field.to_string()) {
                    out.extend(trees[i..i + 3].iter().cloned());
                    out.push(TokenTree::Group(Group::new(Delimiter::Parenthesis, TokenStream::new())));
                    i += 3;
                    continue;
                }
            }
            out.push(trees[i].clone());
            i += 1;
        }
        out.into_iter().collect()
    }
}

fn compound_operator(op: &BinOp) -> Option<TokenStream> {
    Some(match op {
        BinOp::AddAssign(_) => quote!(+),
        BinOp::SubAssign(_) => quote!(-),
        BinOp::MulAssign(_) => quote!(*),
        BinOp::DivAssign(_) => quote!(/),
        BinOp::RemAssign(_) => quote!(%),
        BinOp::BitXorAssign(_) => quote!(^),
        BinOp::BitAndAssign(_) => quote!(&),
        BinOp::BitOrAssign(_) => quote!(|),
        BinOp::ShlAssign(_) => quote!(<<),
        BinOp::ShrAssign(_) => quote!(>>),
        _ => return None,
    })
}

impl VisitMut for PropertyAccess {
    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        match expr {
            Expr::Assign(assign) => {
                if let Some(name) = self.property(&assign.left) {
                    self.visit_expr_mut(&mut assign.right);
                    let Some(setter) = self.properties[&name].setter.clone() else {
                        return self.fail(name);
                    };
                    let value = &assign.right;
                    *expr = syn::parse_quote!(self.#setter(#value));
                    return;
                }
                if let Some(name) = self.projected(&assign.left) {
                    return self.fail(name);
                }
            }
            Expr::Binary(binary) => {
                if let Some(op) = compound_operator(&binary.op) {
                    if let Some(name) = self.property(&binary.left) {
                        self.visit_expr_mut(&mut binary.right);
                        let accessors = &self.properties[&name];
                        let Some(setter) = accessors.setter.clone() else {
                            return self.fail(name);
                        };
                        let getter = &accessors.getter;
                        let value = &binary.right;
                        *expr = syn::parse_quote!(self.#setter(self.#getter() #op (#value)));
                        return;
                    }
                    if let Some(name) = self.projected(&binary.left) {
                        return self.fail(name);
                    }
                }
            }
            Expr::Reference(reference) if reference.mutability.is_some() => {
                if let Some(name) = self.projected(&reference.expr) {
                    return self.fail(name);
                }
            }
            Expr::Field(_) => {
                if let Some(name) = self.property(expr) {
                    let getter = &self.properties[&name].getter;
                    *expr = syn::parse_quote!(self.#getter());
                    return;
                }
            }
            _ => {}
        }
        visit_mut::visit_expr_mut(self, expr);
    }

    fn visit_macro_mut(&mut self, mac: &mut syn::Macro) {
        mac.tokens = self.rewrite_tokens(std::mem::take(&mut mac.tokens));
    }

    // Nested items have their own `self`.
    fn visit_item_mut(&mut self, _item: &mut syn::Item) {}
}

/// Redirects `self.from(..)` and `Self::from(..)` to `to`.
pub struct SelfCalls {
    pub from: Ident,
    pub to: Ident,
}

impl VisitMut for SelfCalls {
    fn visit_expr_method_call_mut(&mut self, call: &mut syn::ExprMethodCall) {
        if is_self(&call.receiver) && call.method == self.from {
            call.method = self.to.clone();
        }
        visit_mut::visit_expr_method_call_mut(self, call);
    }

    fn visit_expr_path_mut(&mut self, path: &mut ExprPath) {
        let segments = &mut path.path.segments;
        if path.qself.is_none() && segments.len() == 2 && segments[0].ident == "Self" && segments[1].ident == self.from {
            segments[1].ident = self.to.clone();
        }
        visit_mut::visit_expr_path_mut(self, path);
    }

    fn visit_item_mut(&mut self, _item: &mut syn::Item) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use quote::ToTokens;

    use crate::classify::analyze;
    use crate::parse::tests::declarations;

    fn class(source: &str) -> ClassPlan {
        let decls = declarations(source);
        analyze("Game", &decls, &[]).unwrap().classes.remove(0)
    }

    fn rewrite(plan: &ClassPlan, body: &str) -> Result<String, AuthoringError> {
        let mut block: syn::Block = syn::parse_str(body).unwrap();
        let mut access = PropertyAccess::new(plan);
        access.visit_block_mut(&mut block);
        access.finish().map(|_| block.to_token_stream().to_string())
    }

    fn tokens(src: &str) -> String {
        src.parse::<TokenStream>().unwrap().to_string()
    }

    const TURRET: &str = "#[uclass] pub struct Turret { #[uproperty] health: f32, #[uproperty] ammo: Vec<i32>, spare: u8 }";

    #[test]
    fn reads_and_writes_become_accessor_calls() {
        let plan = class(TURRET);
        let out = rewrite(&plan, "{ let h = self.health; self.health = h * 2.0; self.health -= 1.0; self.spare = 3; }").unwrap();
        assert_eq!(
            out,
            tokens("{ let h = self.health(); self.set_health(h * 2.0); self.set_health(self.health() - (1.0)); self.spare = 3; }")
        );
    }

    #[test]
    fn macro_arguments_are_read_through_getters() {
        let plan = class(TURRET);
        let out = rewrite(&plan, r#"{ println!("{} {}", self.health, self.spare); }"#).unwrap();
        assert_eq!(out, tokens(r#"{ println!("{} {}", self.health(), self.spare); }"#));
    }

    #[test]
    fn mutable_borrows_of_properties_are_rejected() {
        let plan = class(TURRET);
        assert!(matches!(
            rewrite(&plan, "{ let a = &mut self.ammo; }"),
            Err(AuthoringError::PropertyBorrow { property, .. }) if property == "ammo"
        ));
        assert!(matches!(
            rewrite(&plan, "{ self.ammo[0] = 1; }"),
            Err(AuthoringError::PropertyBorrow { .. })
        ));
    }

    #[test]
    fn self_calls_are_redirected() {
        let mut block: syn::Block =
            syn::parse_str("{ if n > 0 { self.fire(n - 1); Self::fire(self, 0); other.fire(1); } }").unwrap();
        SelfCalls {
            from: ident("fire"),
            to: ident("fire_implementation"),
        }
        .visit_block_mut(&mut block);
        assert_eq!(
            block.to_token_stream().to_string(),
            tokens("{ if n > 0 { self.fire_implementation(n - 1); Self::fire_implementation(self, 0); other.fire(1); } }")
        );
    }
}
