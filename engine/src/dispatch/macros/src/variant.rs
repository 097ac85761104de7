use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, Type, parse_macro_input, parse_quote};

pub fn derive_variant(input: TokenStream) -> TokenStream {
    // Parse the input tokens into a syntax tree
    let ast = parse_macro_input!(input as DeriveInput);

    match expand(&ast) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => TokenStream::from(err.to_compile_error()),
    }
}

fn expand(ast: &DeriveInput) -> syn::Result<TokenStream2> {
    let enum_name = &ast.ident;

    let Data::Enum(data) = &ast.data else {
        return Err(syn::Error::new_spanned(
            enum_name,
            "Variant can only be derived for enums",
        ));
    };

    if data.variants.is_empty() {
        return Err(syn::Error::new_spanned(
            enum_name,
            "Variant requires at least one worker kind",
        ));
    }

    // Every kind wraps exactly one worker value: `Kind(Worker)`.
    let mut idents: Vec<&Ident> = Vec::with_capacity(data.variants.len());
    let mut types: Vec<&Type> = Vec::with_capacity(data.variants.len());
    for variant in &data.variants {
        match &variant.fields {
            Fields::Unnamed(fields) if fields.unnamed.len() == 1 => {
                idents.push(&variant.ident);
                types.push(&fields.unnamed[0].ty);
            }
            _ => {
                return Err(syn::Error::new_spanned(
                    variant,
                    "each worker kind must wrap exactly one worker, e.g. `Resize(ResizeWorker)`",
                ));
            }
        }
    }
    let kinds: Vec<String> = idents.iter().map(|ident| ident.to_string()).collect();

    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();

    // `Perform` is generic over the caller's context type, so the impl gets one extra
    // parameter and requires every wrapped worker to accept that context.
    let ctx = Ident::new("__SwitchyardCtx", Span::call_site());
    let mut perform_generics = ast.generics.clone();
    perform_generics.params.push(parse_quote!(#ctx: ?Sized));
    {
        let predicates = &mut perform_generics.make_where_clause().predicates;
        for ty in &types {
            predicates.push(parse_quote!(#ty: ::switchyard::dispatch::Perform<#ctx>));
        }
    }
    let (perform_impl_generics, _, perform_where_clause) = perform_generics.split_for_impl();

    // Two kinds wrapping the same worker type would make `From` ambiguous; those get
    // constructed explicitly instead.
    let type_keys: Vec<String> = types.iter().map(|ty| quote!(#ty).to_string()).collect();
    let from_impls = idents
        .iter()
        .zip(&types)
        .zip(&type_keys)
        .filter(|(_, key)| type_keys.iter().filter(|other| other == key).count() == 1)
        .map(|((ident, ty), _)| {
            quote! {
                impl #impl_generics ::core::convert::From<#ty> for #enum_name #ty_generics #where_clause {
                    #[inline]
                    fn from(worker: #ty) -> Self {
                        Self::#ident(worker)
                    }
                }
            }
        });

    // Use ::switchyard::... which works both inside and outside the crate.
    // Inside the crate, this works because of `extern crate self as switchyard;` in lib.rs
    Ok(quote! {
        impl #impl_generics ::switchyard::dispatch::Variant for #enum_name #ty_generics #where_clause {
            const KINDS: &'static [&'static str] = &[#(#kinds),*];

            #[inline]
            fn kind(&self) -> &'static str {
                match self {
                    #(Self::#idents(_) => #kinds,)*
                }
            }
        }

        impl #perform_impl_generics ::switchyard::dispatch::Perform<#ctx> for #enum_name #ty_generics #perform_where_clause {
            #[inline]
            fn perform(&self, ctx: &#ctx) -> ::core::result::Result<(), ::switchyard::Failure> {
                match self {
                    #(Self::#idents(worker) => ::switchyard::dispatch::Perform::<#ctx>::perform(worker, ctx),)*
                }
            }
        }

        #(#from_impls)*
    })
}
