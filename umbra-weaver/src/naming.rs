// Name conversion utilities for the weaver.

/// Convert a snake_case Rust name to the PascalCase name native code sees.
pub fn to_pascal_case(s: &str) -> String {
    let s = s.strip_prefix("r#").unwrap_or(s);
    s.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(c) => {
                    let upper: String = c.to_uppercase().collect();
                    upper + chars.as_str()
                }
                None => String::new(),
            }
        })
        .collect()
}

/// Convert a PascalCase or UPPER_CASE name to snake_case.
pub fn to_snake_case(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 8);
    let chars: Vec<char> = name.chars().collect();

    for (i, &ch) in chars.iter().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                // "HTTPServer" -> "http_server"
                if prev.is_ascii_lowercase() || prev.is_ascii_digit() {
                    result.push('_');
                } else if prev.is_ascii_uppercase()
                    && i + 1 < chars.len()
                    && chars[i + 1].is_ascii_lowercase()
                {
                    result.push('_');
                }
            }
            result.push(ch.to_ascii_lowercase());
        } else {
            result.push(ch);
        }
    }

    result
}

/// Native name of a reflected field: `is_alive` -> `bIsAlive` for booleans,
/// `max_health` -> `MaxHealth` otherwise.
pub fn property_native_name(rust_name: &str, is_bool: bool) -> String {
    let pascal = to_pascal_case(rust_name);
    if is_bool { format!("b{pascal}") } else { pascal }
}

/// Name of the managed body behind an event or override.
pub fn implementation_name(rust_name: &str) -> String {
    format!("{}_implementation", rust_name.strip_prefix("r#").unwrap_or(rust_name))
}

/// Name of the generated native-calls-managed entry point for a method.
pub fn invoker_name(rust_name: &str) -> String {
    format!("__umbra_invoke_{}", rust_name.strip_prefix("r#").unwrap_or(rust_name))
}

/// Setter generated for a reflected class property.
pub fn setter_name(rust_name: &str) -> String {
    format!("set_{}", rust_name.strip_prefix("r#").unwrap_or(rust_name))
}

const RESERVED_WORDS: &[&str] = &[
    "as", "break", "const", "continue", "crate", "else", "enum", "extern", "false",
    "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move",
    "mut", "pub", "ref", "return", "self", "Self", "static", "struct", "super",
    "trait", "true", "type", "unsafe", "use", "where", "while", "async",
    "await", "dyn", "abstract", "become", "box", "do", "final", "macro",
    "override", "priv", "typeof", "unsized", "virtual", "yield", "try", "gen",
];

/// Check if a name is a Rust reserved word.
pub fn is_reserved(name: &str) -> bool {
    RESERVED_WORDS.contains(&name)
}

/// Identifier for a generated name, escaping reserved words with `r#`.
pub fn ident(name: &str) -> syn::Ident {
    let span = proc_macro2::Span::call_site();
    if is_reserved(name) && !matches!(name, "self" | "Self" | "super" | "crate") {
        syn::Ident::new_raw(name, span)
    } else {
        syn::Ident::new(name, span)
    }
}

/// FNV-1a hash of a string, used to fingerprint manifests.
pub fn fnv1a_hash(s: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut hash = FNV_OFFSET;
    for &b in s.as_bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pascal_and_snake_case() {
        assert_eq!(to_pascal_case("receive_begin_play"), "ReceiveBeginPlay");
        assert_eq!(to_pascal_case("r#type"), "Type");
        assert_eq!(to_snake_case("ReceiveBeginPlay"), "receive_begin_play");
        assert_eq!(to_snake_case("HTTPServer"), "http_server");
    }

    #[test]
    fn bool_properties_get_the_b_prefix() {
        assert_eq!(property_native_name("is_alive", true), "bIsAlive");
        assert_eq!(property_native_name("max_health", false), "MaxHealth");
    }

    #[test]
    fn generated_names() {
        assert_eq!(implementation_name("fire"), "fire_implementation");
        assert_eq!(invoker_name("r#move"), "__umbra_invoke_move");
        assert_eq!(setter_name("health"), "set_health");
        assert_eq!(ident("move").to_string(), "r#move");
    }

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(fnv1a_hash(""), 0xcbf29ce484222325);
        assert_ne!(fnv1a_hash("a"), fnv1a_hash("b"));
    }
}
