// Reflected function glue: binding accessors, native dispatch stubs and the
// invokers native code calls back into.

use proc_macro2::{Literal, TokenStream};
use quote::quote;
use syn::{FnArg, ImplItemFn, Pat};

use crate::classify::FunctionPlan;
use crate::model::ParamDirection;
use crate::parse;

fn index(i: usize) -> Literal {
    Literal::usize_unsuffixed(i)
}

/// `fn __umbra_fn_<name>() -> &'static FunctionBinding`.
pub(super) fn binding_fn(plan: &FunctionPlan) -> TokenStream {
    let name = &plan.binding_fn;
    let class = &plan.binding_class;
    let native = &plan.meta.name;
    let params = plan.meta.params.iter().map(|p| &p.native_name);
    let has_return = plan.ret.is_some();
    quote! {
        #[doc(hidden)]
        pub(crate) fn #name() -> &'static ::umbra_runtime::FunctionBinding {
            static CLASS: ::umbra_runtime::ClassBinding =
                ::umbra_runtime::ClassBinding::new(&crate::__UMBRA_MODULE, #class);
            static FUNCTION: ::umbra_runtime::FunctionBinding =
                ::umbra_runtime::FunctionBinding::new(&CLASS, #native, &[#(#params),*], #has_return);
            &FUNCTION
        }
    }
}

/// Entry point native code reaches through the method registry.
pub(super) fn invoker(plan: &FunctionPlan) -> TokenStream {
    let name = &plan.invoker;
    let binding = &plan.binding_fn;
    let body = plan.body();
    let is_static = plan.is_static();

    let args: Vec<TokenStream> = plan
        .params
        .iter()
        .map(|p| {
            let id = &p.ident;
            match p.direction {
                ParamDirection::In => quote!(#id),
                ParamDirection::ConstRef => quote!(&#id),
                ParamDirection::InOut => quote!(&mut #id),
            }
        })
        .collect();
    let call = match (&plan.interface, is_static) {
        (Some(path), _) => quote!(<Self as #path>::#body(__this, #(#args),*)),
        (None, true) => quote!(Self::#body(#(#args),*)),
        (None, false) => quote!(__this.#body(#(#args),*)),
    };

    if plan.is_bare() {
        return if is_static {
            quote! {
                #[doc(hidden)]
                pub(crate) fn #name() {
                    #call;
                }
            }
        } else {
            quote! {
                #[doc(hidden)]
                pub(crate) fn #name(__object: &dyn ::umbra_runtime::ManagedObject) {
                    let __this = ::umbra_runtime::receiver::<Self>(__object);
                    #call;
                }
            }
        };
    }

    let reads = plan.params.iter().enumerate().map(|(i, p)| {
        let (id, m, i) = (&p.ident, &p.marshaller, index(i));
        let mutability = (p.direction == ParamDirection::InOut).then(|| quote!(mut));
        quote! {
            let #mutability #id = unsafe { ::umbra_runtime::invoke::read_arg::<#m>(__args, __function.param(#i)) };
        }
    });
    let writes = plan
        .params
        .iter()
        .enumerate()
        .filter(|(_, p)| p.direction == ParamDirection::InOut)
        .map(|(i, p)| {
            let (id, m, i) = (&p.ident, &p.marshaller, index(i));
            quote! {
                unsafe { ::umbra_runtime::invoke::write_arg::<#m>(__args, __function.param(#i), &#id) };
            }
        });
    let (call, result) = match &plan.ret {
        Some(ret) => {
            let m = &ret.marshaller;
            (
                quote!(let __result = #call;),
                quote!(unsafe { ::umbra_runtime::invoke::write_return::<#m>(__ret, &__function, &__result) };),
            )
        }
        None => (quote!(#call;), TokenStream::new()),
    };
    let (receiver, this) = if is_static {
        (TokenStream::new(), TokenStream::new())
    } else {
        (
            quote!(__object: &dyn ::umbra_runtime::ManagedObject,),
            quote!(let __this = ::umbra_runtime::receiver::<Self>(__object);),
        )
    };

    quote! {
        #[doc(hidden)]
        pub(crate) unsafe fn #name(#receiver __args: *mut u8, __ret: *mut u8) {
            #this
            let __function = Self::#binding().get();
            #(#reads)*
            #call
            #(#writes)*
            #result
        }
    }
}

/// Body replacing a natively dispatched method: marshal the arguments,
/// call through native code, copy out-parameters and the result back.
fn dispatch_body(plan: &FunctionPlan) -> TokenStream {
    let binding = &plan.binding_fn;
    let writes: Vec<TokenStream> = plan
        .params
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let (id, m, i) = (&p.ident, &p.marshaller, index(i));
            let value = match p.direction {
                ParamDirection::In => quote!(&#id),
                ParamDirection::ConstRef => quote!(#id),
                ParamDirection::InOut => quote!(&*#id),
            };
            quote!(__params.write::<#m>(__function.param(#i), #value);)
        })
        .collect();
    let readbacks: Vec<TokenStream> = plan
        .params
        .iter()
        .enumerate()
        .filter(|(_, p)| p.direction == ParamDirection::InOut)
        .map(|(i, p)| {
            let (id, m, i) = (&p.ident, &p.marshaller, index(i));
            quote!(*#id = __params.read::<#m>(__function.param(#i));)
        })
        .collect();
    let writes = (!writes.is_empty()).then(|| quote!(unsafe { #(#writes)* }));
    let readbacks = (!readbacks.is_empty()).then(|| quote!(unsafe { #(#readbacks)* }));
    let result = plan.ret.as_ref().map(|ret| {
        let m = &ret.marshaller;
        quote!(unsafe { __params.read::<#m>(__function.ret()) })
    });

    quote! {{
        let __function = Self::#binding().get();
        let mut __params = ::umbra_runtime::ParamBuffer::new(&__function);
        #writes
        if let Err(err) = ::umbra_runtime::call_native(self.__umbra_base.native_ptr(), &__function, &mut __params) {
            ::umbra_runtime::raise(err);
        }
        #readbacks
        #result
    }}
}

/// Stub keeping the authored name and signature of a renamed method.
pub(super) fn stub(plan: &FunctionPlan, authored: &ImplItemFn) -> ImplItemFn {
    let mut stub = authored.clone();
    parse::strip_markers(&mut stub.attrs);
    // Parameters are only read by the stub.
    for input in &mut stub.sig.inputs {
        if let FnArg::Typed(pt) = input {
            if let Pat::Ident(pi) = &mut *pt.pat {
                pi.mutability = None;
            }
        }
    }
    let body = dispatch_body(plan);
    stub.block = syn::parse_quote!(#body);
    stub
}
