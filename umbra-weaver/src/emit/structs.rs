// Struct weaving: field-by-field copies in and out of native struct memory,
// and the marshaler other reflected code uses for the struct.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{Attribute, Item, ItemStruct};

use crate::classify::{PropertyPlan, StructPlan};
use crate::parse;

fn field_fn(p: &PropertyPlan) -> syn::Ident {
    let field = p.field.to_string();
    format_ident!("__umbra_prop_{}", field.strip_prefix("r#").unwrap_or(&field))
}

fn derives(attrs: &[Attribute], name: &str) -> bool {
    attrs.iter().filter(|a| a.path().is_ident("derive")).any(|a| {
        a.parse_args_with(syn::punctuated::Punctuated::<syn::Path, syn::Token![,]>::parse_terminated)
            .is_ok_and(|paths| paths.iter().any(|p| p.segments.last().is_some_and(|s| s.ident == name)))
    })
}

/// `Clone` and `Copy` derives the enum or struct is missing.
pub(super) fn copy_derives(attrs: &mut Vec<Attribute>) {
    let missing: Vec<syn::Ident> = ["Clone", "Copy"]
        .into_iter()
        .filter(|d| !derives(attrs, d))
        .map(|d| format_ident!("{}", d))
        .collect();
    if !missing.is_empty() {
        attrs.push(syn::parse_quote!(#[derive(#(#missing),*)]));
    }
}

pub(super) fn struct_items(plan: &StructPlan, mut item: ItemStruct) -> Vec<Item> {
    parse::strip_markers(&mut item.attrs);
    for field in item.fields.iter_mut() {
        parse::strip_markers(&mut field.attrs);
    }
    let blittable = plan.meta.blittable;
    if blittable {
        if !item.attrs.iter().any(|a| a.path().is_ident("repr")) {
            item.attrs.push(syn::parse_quote!(#[repr(C)]));
        }
        copy_derives(&mut item.attrs);
    }

    let name = &item.ident;
    let vis = &item.vis;
    let native = &plan.meta.name;
    let marshaller = format_ident!("{}Marshaller", name);

    let field_bindings = plan.properties.iter().map(|p| {
        let binding = field_fn(p);
        let field_native = &p.meta.native_name;
        quote! {
            #[doc(hidden)]
            pub(crate) fn #binding() -> &'static ::umbra_runtime::PropertyBinding {
                static STRUCT: ::umbra_runtime::StructBinding =
                    ::umbra_runtime::StructBinding::new(&crate::__UMBRA_MODULE, #native);
                static PROP: ::umbra_runtime::PropertyBinding =
                    ::umbra_runtime::PropertyBinding::of_struct(&STRUCT, #field_native);
                &PROP
            }
        }
    });
    let reads = plan.properties.iter().map(|p| {
        let (field, m, binding) = (&p.field, &p.marshaller, field_fn(p));
        quote!(#field: ::umbra_runtime::marshal::read_field::<#m>(buffer, Self::#binding()))
    });
    let writes = plan.properties.iter().map(|p| {
        let (field, m, binding) = (&p.field, &p.marshaller, field_fn(p));
        quote!(::umbra_runtime::marshal::write_field::<#m>(buffer, Self::#binding(), &self.#field);)
    });
    let resolves = plan.properties.iter().map(field_fn);

    let inherent: Item = syn::parse_quote! {
        impl #name {
            #[doc(hidden)]
            pub(crate) fn __umbra_struct() -> &'static ::umbra_runtime::StructBinding {
                static STRUCT: ::umbra_runtime::StructBinding =
                    ::umbra_runtime::StructBinding::new(&crate::__UMBRA_MODULE, #native);
                &STRUCT
            }

            #(#field_bindings)*

            /// Copy a value out of native struct memory.
            ///
            /// # Safety
            /// `buffer` must point at an initialised native instance of the struct.
            pub unsafe fn from_native(buffer: *const u8) -> Self {
                unsafe {
                    #name {
                        #(#reads,)*
                    }
                }
            }

            /// Copy this value into native struct memory.
            ///
            /// # Safety
            /// `buffer` must point at an initialised native instance of the struct.
            pub unsafe fn to_native(&self, buffer: *mut u8) {
                unsafe {
                    #(#writes)*
                }
            }

            #[doc(hidden)]
            pub(crate) fn __umbra_static_init() {
                let resolved = (|| -> ::umbra_runtime::UmbraResult<()> {
                    Self::__umbra_struct().resolve()?;
                    #(Self::#resolves().resolve()?;)*
                    Ok(())
                })();
                if let Err(err) = resolved {
                    ::umbra_runtime::raise(err);
                }
            }
        }
    };

    let marshaller_struct: Item = syn::parse_quote! {
        /// Moves values of the struct across the native boundary.
        #vis struct #marshaller;
    };
    let marshaller_inherent: Item = syn::parse_quote! {
        impl #marshaller {
            /// Read element `array_index` of a native array of the struct.
            ///
            /// # Safety
            /// `buffer` must hold at least `array_index + 1` initialised elements.
            pub unsafe fn from_native(buffer: *const u8, array_index: usize) -> #name {
                let stride = #name::__umbra_struct().get().size;
                unsafe { #name::from_native(buffer.add(array_index * stride)) }
            }

            /// Write element `array_index` of a native array of the struct.
            ///
            /// # Safety
            /// `buffer` must hold at least `array_index + 1` initialised elements.
            pub unsafe fn to_native(buffer: *mut u8, array_index: usize, value: &#name) {
                let stride = #name::__umbra_struct().get().size;
                unsafe { value.to_native(buffer.add(array_index * stride)) }
            }
        }
    };
    let marshaller_impl = marshaller_trait_impl(name, &marshaller, blittable);
    let native_struct: Item = syn::parse_quote! {
        impl ::umbra_runtime::NativeStruct for #name {
            type Marshaller = #marshaller;
        }
    };

    let mut items = vec![
        Item::Struct(item.clone()),
        inherent,
        marshaller_struct,
        marshaller_inherent,
        marshaller_impl,
        native_struct,
    ];
    if blittable {
        items.push(syn::parse_quote! {
            unsafe impl ::umbra_runtime::BlittableValue for #name {}
        });
    }
    items
}

fn marshaller_trait_impl(name: &syn::Ident, marshaller: &syn::Ident, blittable: bool) -> Item {
    let body: TokenStream = if blittable {
        // Same layout on both sides: copy whole values, arrays in one go.
        quote! {
            unsafe fn to_native(value: &#name, dst: *mut u8, prop: ::umbra_runtime::NativePropertyPtr) {
                unsafe { <::umbra_runtime::Blittable<#name> as ::umbra_runtime::Marshaller>::to_native(value, dst, prop) }
            }

            unsafe fn from_native(src: *const u8, prop: ::umbra_runtime::NativePropertyPtr) -> #name {
                unsafe { <::umbra_runtime::Blittable<#name> as ::umbra_runtime::Marshaller>::from_native(src, prop) }
            }

            unsafe fn read_elements(
                src: *const u8,
                count: usize,
                stride: usize,
                prop: ::umbra_runtime::NativePropertyPtr,
            ) -> Vec<#name> {
                unsafe {
                    <::umbra_runtime::Blittable<#name> as ::umbra_runtime::Marshaller>::read_elements(src, count, stride, prop)
                }
            }

            unsafe fn write_elements(values: &[#name], dst: *mut u8, stride: usize, prop: ::umbra_runtime::NativePropertyPtr) {
                unsafe {
                    <::umbra_runtime::Blittable<#name> as ::umbra_runtime::Marshaller>::write_elements(values, dst, stride, prop)
                }
            }
        }
    } else {
        quote! {
            unsafe fn to_native(value: &#name, dst: *mut u8, _prop: ::umbra_runtime::NativePropertyPtr) {
                unsafe { value.to_native(dst) }
            }

            unsafe fn from_native(src: *const u8, _prop: ::umbra_runtime::NativePropertyPtr) -> #name {
                unsafe { #name::from_native(src) }
            }
        }
    };
    syn::parse_quote! {
        impl ::umbra_runtime::Marshaller for #marshaller {
            type Value = #name;

            #body
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::analyze;
    use crate::parse::tests::declarations;
    use quote::ToTokens;

    fn woven(source: &str, name: &str) -> Vec<Item> {
        let decls = declarations(source);
        let analysis = analyze("Game", &decls, &[]).unwrap();
        let plan = analysis.strukt(name).unwrap();
        struct_items(plan, decls.structs[plan.decl].item.clone())
    }

    #[test]
    fn blittable_structs_get_c_layout_and_copy() {
        let items = woven("#[ustruct] #[derive(Debug, Clone)] pub struct Ammo { count: i32, spread: f32 }", "Ammo");
        let Item::Struct(s) = &items[0] else { panic!("expected the struct first") };
        let attrs: Vec<String> = s.attrs.iter().map(|a| a.to_token_stream().to_string()).collect();
        assert_eq!(attrs, ["# [derive (Debug , Clone)]", "# [repr (C)]", "# [derive (Copy)]"]);
        let text: String = items.iter().map(|i| i.to_token_stream().to_string()).collect();
        assert!(text.contains("unsafe impl :: umbra_runtime :: BlittableValue for Ammo { }"));
        assert!(text.contains("read_elements (src , count , stride , prop)"));
        assert!(text.contains("impl :: umbra_runtime :: NativeStruct for Ammo { type Marshaller = AmmoMarshaller ; }"));
    }

    #[test]
    fn other_structs_copy_field_by_field() {
        let items = woven("#[ustruct] pub struct Label { #[uproperty(EditAnywhere)] text: String, size: i32 }", "Label");
        let Item::Struct(s) = &items[0] else { panic!("expected the struct first") };
        assert!(s.attrs.is_empty());
        assert!(s.fields.iter().all(|f| f.attrs.is_empty()));
        let text: String = items.iter().map(|i| i.to_token_stream().to_string()).collect();
        assert!(text.contains("text : :: umbra_runtime :: marshal :: read_field :: < :: umbra_runtime :: marshal :: StringMarshaller > (buffer , Self :: __umbra_prop_text ())"));
        assert!(text.contains("PropertyBinding :: of_struct (& STRUCT , \"Size\")"));
        assert!(!text.contains("BlittableValue"));
    }
}
