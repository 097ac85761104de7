mod variant;

use proc_macro::TokenStream;

/// Derive closed-set dispatch for an enum of single-field tuple variants.
///
/// Generates `Variant`, a matching `Perform<C>` implementation and a `From`
/// conversion for every wrapped worker type.
#[proc_macro_derive(Variant)]
pub fn derive_variant(item: TokenStream) -> TokenStream {
    variant::derive_variant(item)
}
