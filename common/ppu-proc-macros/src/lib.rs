mod config;
mod enums;

use proc_macro::TokenStream;

/// Implement `Display` for a struct by writing one indented `field: value` line per field.
///
/// Fields can be annotated with `#[cfg_display(skip)]` or `#[cfg_display(debug_fmt)]`.
#[proc_macro_derive(ConfigDisplay, attributes(cfg_display))]
pub fn config_display(input: TokenStream) -> TokenStream {
    config::config_display(input)
}

/// Implement `to_str()` and `Display` for a fieldless enum using the variant names.
#[proc_macro_derive(EnumDisplay)]
pub fn enum_display(input: TokenStream) -> TokenStream {
    enums::enum_display(input)
}

/// Add an `ALL` constant array containing every variant of a fieldless enum, in declaration
/// order.
#[proc_macro_derive(EnumAll)]
pub fn enum_all(input: TokenStream) -> TokenStream {
    enums::enum_all(input)
}

/// Implement `clap::ValueEnum` on top of the `ALL` and `to_str()` items generated by
/// [`EnumAll`] and [`EnumDisplay`].
#[proc_macro_derive(CustomValueEnum)]
pub fn custom_value_enum(input: TokenStream) -> TokenStream {
    enums::custom_value_enum(input)
}
