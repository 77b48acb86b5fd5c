// Class weaving.
//
// The authored struct loses its reflected fields (they live in the native
// object) and gains the shadow-object base. Accessors, the type descriptor
// and the startup binding job are generated next to it.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::visit_mut::VisitMut;
use syn::{Fields, ImplItem, Item, ItemImpl, ItemStruct};

use super::functions;
use super::rewrite::{PropertyAccess, SelfCalls};
use crate::classify::{ClassPlan, FunctionPlan, PropertyPlan};
use crate::error::AuthoringError;
use crate::model::PropertyKind;
use crate::naming::{ident, setter_name};
use crate::parse::{self, UPROPERTY};

fn property_fn(p: &PropertyPlan) -> syn::Ident {
    let field = p.field.to_string();
    format_ident!("__umbra_prop_{}", field.strip_prefix("r#").unwrap_or(&field))
}

/// Rewritten struct plus its generated impls.
pub(super) fn class_items(plan: &ClassPlan, mut item: ItemStruct) -> Vec<Item> {
    parse::strip_markers(&mut item.attrs);
    let name = item.ident.clone();

    let kept: Vec<syn::Field> = match std::mem::replace(&mut item.fields, Fields::Unit) {
        Fields::Named(named) => named
            .named
            .into_iter()
            .filter(|f| !parse::has_marker(&f.attrs, UPROPERTY))
            .map(|mut f| {
                parse::strip_markers(&mut f.attrs);
                f
            })
            .collect(),
        _ => Vec::new(),
    };
    let others: Vec<&syn::Ident> = kept.iter().filter_map(|f| f.ident.as_ref()).collect();
    item.fields = Fields::Named(syn::parse_quote!({
        __umbra_base: ::umbra_runtime::ObjectBase,
        #(#kept),*
    }));
    item.semi_token = None;

    let full_name = &plan.meta.full_name;
    let construct = plan.constructor.as_ref().map(|ctor| {
        quote! {
            fn construct(&mut self) {
                self.#ctor();
            }
        }
    });
    let managed: ItemImpl = syn::parse_quote! {
        impl ::umbra_runtime::ManagedClass for #name {
            const FULL_NAME: &'static str = #full_name;

            fn create_shell(base: ::umbra_runtime::ObjectBase) -> Self {
                #name {
                    __umbra_base: base,
                    #(#others: ::core::default::Default::default(),)*
                }
            }

            #construct

            fn object_base(&self) -> &::umbra_runtime::ObjectBase {
                &self.__umbra_base
            }
        }
    };

    let class_name = &plan.meta.name;
    let accessors = plan.properties.iter().map(|p| accessors(p, class_name));
    let descriptor = descriptor(plan);
    let static_init = static_init(plan);
    let generated: ItemImpl = syn::parse_quote! {
        impl #name {
            #[doc(hidden)]
            pub(crate) fn __umbra_class() -> &'static ::umbra_runtime::ClassBinding {
                static CLASS: ::umbra_runtime::ClassBinding =
                    ::umbra_runtime::ClassBinding::new(&crate::__UMBRA_MODULE, #class_name);
                &CLASS
            }

            #(#accessors)*

            #descriptor

            #static_init
        }
    };

    vec![Item::Struct(item), Item::Impl(managed), Item::Impl(generated)]
}

fn accessors(p: &PropertyPlan, class_name: &str) -> TokenStream {
    let binding = property_fn(p);
    let native = &p.meta.native_name;
    let (field, ty, vis, m) = (&p.field, &p.ty, &p.vis, &p.marshaller);
    let binding_fn = quote! {
        #[doc(hidden)]
        pub(crate) fn #binding() -> &'static ::umbra_runtime::PropertyBinding {
            static CLASS: ::umbra_runtime::ClassBinding =
                ::umbra_runtime::ClassBinding::new(&crate::__UMBRA_MODULE, #class_name);
            static PROP: ::umbra_runtime::PropertyBinding =
                ::umbra_runtime::PropertyBinding::of_class(&CLASS, #native);
            &PROP
        }
    };
    if let PropertyKind::MulticastDelegate { .. } = p.meta.kind {
        return quote! {
            #binding_fn

            #vis fn #field(&self) -> #ty {
                <#ty>::new(self.__umbra_base.native_ptr(), Self::#binding().get().property)
            }
        };
    }
    let setter = ident(&setter_name(&field.to_string()));
    quote! {
        #binding_fn

        #vis fn #field(&self) -> #ty {
            ::umbra_runtime::marshal::read_property::<#m>(&self.__umbra_base, Self::#binding())
        }

        #vis fn #setter(&self, value: #ty) {
            ::umbra_runtime::marshal::write_property::<#m>(&self.__umbra_base, Self::#binding(), &value)
        }
    }
}

fn method_body(f: &FunctionPlan) -> TokenStream {
    let invoker = &f.invoker;
    match (f.is_static(), f.is_bare()) {
        (false, true) => quote!(::umbra_runtime::MethodBody::Bare(Self::#invoker)),
        (false, false) => quote!(::umbra_runtime::MethodBody::Buffered(Self::#invoker)),
        (true, true) => quote!(::umbra_runtime::MethodBody::StaticBare(Self::#invoker)),
        (true, false) => quote!(::umbra_runtime::MethodBody::StaticBuffered(Self::#invoker)),
    }
}

fn descriptor(plan: &ClassPlan) -> TokenStream {
    let name = &plan.meta.name;
    let constructor = if plan.is_abstract {
        quote!(abstract_class)
    } else {
        quote!(class)
    };
    let parent = plan.meta.parent.as_ref().map(|p| quote!(.parent(#p)));
    let methods = plan.functions.iter().map(|f| {
        let native = &f.meta.name;
        let body = method_body(f);
        quote!(.method(#native, #body))
    });
    quote! {
        #[doc(hidden)]
        pub(crate) fn __umbra_descriptor() -> ::umbra_runtime::TypeDescriptor {
            ::umbra_runtime::TypeDescriptor::#constructor::<Self>(#name)
                #parent
                #(#methods)*
        }
    }
}

fn static_init(plan: &ClassPlan) -> TokenStream {
    let props = plan.properties.iter().map(property_fn);
    let functions = plan.functions.iter().map(|f| &f.binding_fn);
    quote! {
        /// Resolves every native binding of the class; runs as a startup job.
        #[doc(hidden)]
        pub(crate) fn __umbra_static_init() {
            let resolved = (|| -> ::umbra_runtime::UmbraResult<()> {
                Self::__umbra_class().resolve()?;
                #(Self::#props().resolve()?;)*
                #(Self::#functions().resolve()?;)*
                Ok(())
            })();
            if let Err(err) = resolved {
                ::umbra_runtime::raise(err);
            }
        }
    }
}

/// Rewrite an impl block of a reflected class. Reflected functions declared
/// in it get their glue in a companion impl emitted right after.
pub(super) fn impl_items(plan: &ClassPlan, ordinal: usize, mut im: ItemImpl) -> Result<Vec<Item>, AuthoringError> {
    parse::strip_markers(&mut im.attrs);
    let mut access = PropertyAccess::new(plan);
    if !access.is_empty() {
        access.visit_item_impl_mut(&mut im);
        access.finish()?;
    }

    let functions: Vec<&FunctionPlan> = plan.functions.iter().filter(|f| f.impl_ordinal == ordinal).collect();
    let mut items = Vec::with_capacity(im.items.len() + functions.len());
    for item in std::mem::take(&mut im.items) {
        let ImplItem::Fn(mut f) = item else {
            items.push(item);
            continue;
        };
        let Some(function) = functions.iter().find(|p| p.method == f.sig.ident) else {
            parse::strip_markers(&mut f.attrs);
            items.push(ImplItem::Fn(f));
            continue;
        };
        if function.renamed {
            let stub = functions::stub(function, &f);
            let body = function.body();
            parse::strip_markers(&mut f.attrs);
            SelfCalls {
                from: f.sig.ident.clone(),
                to: body.clone(),
            }
            .visit_block_mut(&mut f.block);
            f.sig.ident = body;
            items.push(ImplItem::Fn(stub));
        } else {
            parse::strip_markers(&mut f.attrs);
        }
        items.push(ImplItem::Fn(f));
    }
    im.items = items;

    let mut out = vec![Item::Impl(im.clone())];
    if !functions.is_empty() {
        let self_ty = &im.self_ty;
        let bindings = functions.iter().map(|f| functions::binding_fn(f));
        let invokers = functions.iter().map(|f| functions::invoker(f));
        out.push(Item::Impl(syn::parse_quote! {
            impl #self_ty {
                #(#bindings)*
                #(#invokers)*
            }
        }));
    }
    Ok(out)
}
