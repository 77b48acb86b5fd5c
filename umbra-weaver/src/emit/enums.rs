// Enum weaving: fixed representation and the discriminant conversions.

use proc_macro2::{Literal, TokenStream};
use quote::quote;
use syn::{Item, ItemEnum};

use super::structs::copy_derives;
use crate::classify::EnumPlan;
use crate::parse;

fn discriminant(value: i64) -> TokenStream {
    let magnitude = Literal::u64_unsuffixed(value.unsigned_abs());
    if value < 0 { quote!(-#magnitude) } else { quote!(#magnitude) }
}

pub(super) fn enum_items(plan: &EnumPlan, mut item: ItemEnum) -> Vec<Item> {
    parse::strip_markers(&mut item.attrs);
    let repr = &plan.repr;
    if plan.add_repr {
        item.attrs.push(syn::parse_quote!(#[repr(#repr)]));
    }
    copy_derives(&mut item.attrs);

    let name = &item.ident;
    let arms = plan.variants.iter().map(|(variant, value)| {
        let value = discriminant(*value);
        quote!(#value => Self::#variant,)
    });
    // Validation guarantees at least one variant.
    let fallback = plan.variants.first().map(|(variant, _)| quote!(_ => Self::#variant,));
    let native: Item = syn::parse_quote! {
        impl ::umbra_runtime::NativeEnum for #name {
            type Repr = #repr;

            fn to_repr(self) -> #repr {
                self as #repr
            }

            #[allow(unreachable_patterns)]
            fn from_repr(repr: #repr) -> Self {
                match repr {
                    #(#arms)*
                    #fallback
                }
            }
        }
    };
    vec![Item::Enum(item), native]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::analyze;
    use crate::parse::tests::declarations;
    use quote::ToTokens;

    #[test]
    fn unknown_discriminants_fall_back_to_the_first_variant() {
        let decls = declarations("#[uenum] #[repr(i16)] pub enum Tilt { Left = -1, Level, Right }");
        let analysis = analyze("Game", &decls, &[]).unwrap();
        let items = enum_items(&analysis.enums[0], decls.enums[0].item.clone());
        let Item::Enum(e) = &items[0] else { panic!("expected the enum first") };
        let attrs: Vec<String> = e.attrs.iter().map(|a| a.to_token_stream().to_string()).collect();
        assert_eq!(attrs, ["# [repr (i16)]", "# [derive (Clone , Copy)]"]);

        let text = items[1].to_token_stream().to_string();
        assert!(text.contains("type Repr = i16 ;"));
        assert!(text.contains("- 1 => Self :: Left , 0 => Self :: Level , 1 => Self :: Right , _ => Self :: Left ,"));
    }

    #[test]
    fn default_representation_is_a_byte() {
        let decls = declarations("#[uenum] pub enum Mode { Idle, Firing }");
        let analysis = analyze("Game", &decls, &[]).unwrap();
        let items = enum_items(&analysis.enums[0], decls.enums[0].item.clone());
        let Item::Enum(e) = &items[0] else { panic!("expected the enum first") };
        assert_eq!(e.attrs[0].to_token_stream().to_string(), "# [repr (u8)]");
    }
}
