//! # rpc3 Procedural Macros
//!
//! ## `#[derive(Parameter)]`
//!
//! Implements `rpc3::Parameter` for a struct by encoding its fields in
//! declaration order with their own `Parameter` implementations.
//!
//! ```rust,ignore
//! #[derive(rpc3::Parameter)]
//! pub struct Vector3 {
//!     pub x: f32,
//!     pub y: f32,
//!     pub z: f32,
//! }
//! ```
//!
//! Fields marked `#[parameter(skip)]` are not sent. They are set to
//! `Default::default()` when a value is decoded and left untouched when an
//! existing value is updated in place.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Field, Fields, Index, parse_macro_input, parse_quote};

/// Derives `rpc3::Parameter` for structs.
///
/// # Panics
///
/// Panics at compile time if applied to an enum or a union.
#[proc_macro_derive(Parameter, attributes(parameter))]
pub fn derive_parameter(input: TokenStream) -> TokenStream {
    let mut input = parse_macro_input!(input as DeriveInput);
    let krate = get_crate_name();

    let type_params: Vec<_> = input.generics.type_params().map(|p| p.ident.clone()).collect();
    let where_clause = input.generics.make_where_clause();
    for ident in type_params {
        where_clause
            .predicates
            .push(parse_quote! { #ident: #krate::Parameter });
    }

    let name = &input.ident;
    let Data::Struct(data) = &input.data else {
        panic!("`Parameter` can only be derived for structs.");
    };

    let sent_types: Vec<_> = data
        .fields
        .iter()
        .filter(|field| !is_skipped(field))
        .map(|field| &field.ty)
        .collect();

    let (encode, decode, decode_in_place) = match &data.fields {
        Fields::Named(fields) => {
            let mut encode = vec![];
            let mut decode = vec![];
            let mut update = vec![];
            for field in &fields.named {
                let ident = &field.ident;
                if is_skipped(field) {
                    decode.push(quote! { #ident: ::core::default::Default::default(), });
                } else {
                    encode.push(quote! { w.write(&self.#ident)?; });
                    decode.push(quote! { #ident: r.read()?, });
                    update.push(quote! { #krate::Parameter::decode_in_place(&mut self.#ident, r)?; });
                }
            }
            (
                quote! { #(#encode)* },
                quote! { Self { #(#decode)* } },
                quote! { #(#update)* },
            )
        }
        Fields::Unnamed(fields) => {
            let mut encode = vec![];
            let mut decode = vec![];
            let mut update = vec![];
            for (i, field) in fields.unnamed.iter().enumerate() {
                let index = Index::from(i);
                let var = format_ident!("field_{i}");
                if is_skipped(field) {
                    decode.push(quote! { let #var = ::core::default::Default::default(); });
                } else {
                    encode.push(quote! { w.write(&self.#index)?; });
                    decode.push(quote! { let #var = r.read()?; });
                    update.push(quote! { #krate::Parameter::decode_in_place(&mut self.#index, r)?; });
                }
            }
            let vars = (0..fields.unnamed.len()).map(|i| format_ident!("field_{i}"));
            (
                quote! { #(#encode)* },
                quote! { { #(#decode)* Self(#(#vars),*) } },
                quote! { #(#update)* },
            )
        }
        Fields::Unit => (quote! {}, quote! { Self }, quote! {}),
    };

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    quote! {
        impl #impl_generics #krate::Parameter for #name #ty_generics #where_clause {
            const MIN_BITS: usize = 0 #(+ <#sent_types as #krate::Parameter>::MIN_BITS)*;

            #[allow(unused_variables)]
            fn encode(&self, w: &mut #krate::ParamWriter<'_>) -> #krate::Result<()> {
                #encode
                Ok(())
            }

            #[allow(unused_variables)]
            fn decode(r: &mut #krate::ParamReader<'_>) -> #krate::Result<Self> {
                Ok(#decode)
            }

            #[allow(unused_variables)]
            fn decode_in_place(&mut self, r: &mut #krate::ParamReader<'_>) -> #krate::Result<()> {
                #decode_in_place
                Ok(())
            }
        }
    }
    .into()
}

fn is_skipped(field: &Field) -> bool {
    field.attrs.iter().any(|attr| {
        attr.path().is_ident("parameter")
            && attr
                .parse_args::<syn::Ident>()
                .is_ok_and(|arg| arg == "skip")
    })
}

/// Gets the path the generated code should use for rpc3.
///
/// Inside rpc3 itself this is `::rpc3`, which the library aliases to itself
/// so that unit and integration tests resolve it the same way.
pub(crate) fn get_crate_name() -> proc_macro2::TokenStream {
    match proc_macro_crate::crate_name("rpc3") {
        Ok(proc_macro_crate::FoundCrate::Name(name)) => {
            let ident = syn::Ident::new(&name, proc_macro2::Span::call_site());
            quote! { ::#ident }
        }
        _ => quote! { ::rpc3 },
    }
}
