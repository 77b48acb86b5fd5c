// Interface weaving. Interfaces are traits used behind `dyn`; the woven
// trait object knows the native class describing it.

use syn::{Item, ItemTrait, TraitItem};

use crate::classify::InterfacePlan;
use crate::parse;

pub(super) fn interface_items(plan: &InterfacePlan, mut item: ItemTrait) -> Vec<Item> {
    parse::strip_markers(&mut item.attrs);
    for member in &mut item.items {
        if let TraitItem::Fn(f) = member {
            parse::strip_markers(&mut f.attrs);
        }
    }
    let name = &item.ident;
    let native = &plan.meta.name;
    let native_interface: Item = syn::parse_quote! {
        impl ::umbra_runtime::marshal::NativeInterface for dyn #name {
            fn native_class() -> ::umbra_runtime::NativeClassPtr {
                static CLASS: ::umbra_runtime::ClassBinding =
                    ::umbra_runtime::ClassBinding::new(&crate::__UMBRA_MODULE, #native);
                CLASS.get()
            }
        }
    };
    vec![Item::Trait(item), native_interface]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::analyze;
    use crate::parse::tests::declarations;
    use quote::ToTokens;

    #[test]
    fn trait_objects_name_their_native_class() {
        let decls = declarations(
            "#[uinterface] pub trait Damageable { #[ufunction(BlueprintCallable)] fn take_damage(&self, amount: f32); }",
        );
        let analysis = analyze("Game", &decls, &[]).unwrap();
        let items = interface_items(&analysis.interfaces[0], decls.interfaces[0].item.clone());
        let Item::Trait(t) = &items[0] else { panic!("expected the trait first") };
        assert!(t.attrs.is_empty());
        let TraitItem::Fn(f) = &t.items[0] else { panic!("expected a function") };
        assert!(f.attrs.is_empty());
        let text = items[1].to_token_stream().to_string();
        assert!(text.contains("NativeInterface for dyn Damageable"));
        assert!(text.contains("ClassBinding :: new (& crate :: __UMBRA_MODULE , \"Damageable\")"));
    }
}
