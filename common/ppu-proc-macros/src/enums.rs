use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields};

fn fieldless_variants<'a>(
    ast: &'a DeriveInput,
    macro_name: &str,
) -> impl Iterator<Item = &'a syn::Ident> {
    let name = &ast.ident;
    let Data::Enum(data) = &ast.data else {
        panic!("{macro_name} derive macro can only be applied to enums; {name} is not an enum");
    };

    data.variants.iter().map(move |variant| {
        let variant_name = &variant.ident;
        assert!(
            matches!(variant.fields, Fields::Unit),
            "{macro_name} only supports enums with fieldless variants; {name}::{variant_name} has fields",
        );
        variant_name
    })
}

pub fn enum_display(input: TokenStream) -> TokenStream {
    let ast: DeriveInput = syn::parse(input).expect("unable to parse input");

    let name = &ast.ident;
    let match_arms: Vec<_> = fieldless_variants(&ast, "EnumDisplay")
        .map(|variant_name| {
            let variant_name_str = variant_name.to_string();
            quote! {
                Self::#variant_name => #variant_name_str
            }
        })
        .collect();

    let expanded = quote! {
        impl #name {
            #[must_use]
            pub fn to_str(&self) -> &'static str {
                match self {
                    #(#match_arms,)*
                }
            }
        }

        impl ::std::fmt::Display for #name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                ::std::write!(f, "{}", self.to_str())
            }
        }
    };

    expanded.into()
}

pub fn enum_all(input: TokenStream) -> TokenStream {
    let ast: DeriveInput = syn::parse(input).expect("unable to parse input");

    let name = &ast.ident;
    let variant_constructors: Vec<_> = fieldless_variants(&ast, "EnumAll")
        .map(|variant_name| quote! { Self::#variant_name })
        .collect();

    let num_variants = variant_constructors.len();
    let expanded = quote! {
        impl #name {
            pub const ALL: [Self; #num_variants] = [#(#variant_constructors,)*];
        }
    };

    expanded.into()
}

pub fn custom_value_enum(input: TokenStream) -> TokenStream {
    let ast: DeriveInput = syn::parse(input).expect("unable to parse input");

    let name = &ast.ident;
    let expanded = quote! {
        impl ::clap::ValueEnum for #name {
            fn value_variants<'a>() -> &'a [Self] {
                &Self::ALL
            }

            fn to_possible_value(&self) -> ::std::option::Option<::clap::builder::PossibleValue> {
                ::std::option::Option::Some(::clap::builder::PossibleValue::new(self.to_str()))
            }
        }
    };

    expanded.into()
}
