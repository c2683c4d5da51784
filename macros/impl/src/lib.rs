//! Procedural macro implementations for `anchor-macros`.

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{parse_macro_input, AttributeArgs, Ident, ItemFn, Lit, Meta, NestedMeta};

/// Levels accepted by `#[test_traced(level = "...")]`.
const LEVELS: [&str; 5] = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];

/// Run a test function with a scoped `tracing` subscriber that writes to the
/// test harness output.
///
/// The default level is `DEBUG`. Use `#[test_traced(level = "INFO")]` to
/// raise it.
#[proc_macro_attribute]
pub fn test_traced(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as AttributeArgs);
    let input = parse_macro_input!(item as ItemFn);

    // Parse arguments
    let mut level = String::from("DEBUG");
    for arg in args {
        match arg {
            NestedMeta::Meta(Meta::NameValue(nv)) if nv.path.is_ident("level") => match nv.lit {
                Lit::Str(value) => level = value.value().to_uppercase(),
                other => {
                    return syn::Error::new_spanned(other, "`level` must be a string literal")
                        .to_compile_error()
                        .into()
                }
            },
            other => {
                return syn::Error::new_spanned(other, "expected `level = \"...\"`")
                    .to_compile_error()
                    .into()
            }
        }
    }
    if !LEVELS.contains(&level.as_str()) {
        return syn::Error::new(
            Span::call_site(),
            format!("unknown level `{}`, expected one of {:?}", level, LEVELS),
        )
        .to_compile_error()
        .into();
    }
    let level = Ident::new(&level, Span::call_site());

    // Wrap the body in a subscriber scoped to this test
    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let expanded = quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let subscriber = anchor_macros::tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(anchor_macros::tracing::Level::#level)
                .with_line_number(true)
                .finish();
            let dispatch = anchor_macros::tracing::Dispatch::new(subscriber);
            anchor_macros::tracing::dispatcher::with_default(&dispatch, || #block)
        }
    };
    TokenStream::from(expanded)
}
