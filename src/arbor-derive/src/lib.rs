mod attrs;
mod impls;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use syn::Result as SynResult;

/// Implements `arbor::provider::Injectable` from the constructor of an
/// `impl` block annotated with `#[inject]`.
///
/// Accepted options are `async_ready` (the type implements
/// `AsyncInjectable`), `close` (the type implements `Close`) and
/// `provides(Type, ...)` listing further targets the type answers for.
#[proc_macro_attribute]
pub fn injectable(attr: TokenStream, item: TokenStream) -> TokenStream {
    match injectable_impl(attr, item) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.into_compile_error().into(),
    }
}

fn injectable_impl(attr: TokenStream, item: TokenStream) -> SynResult<TokenStream2> {
    let attr_data = attrs::parse_attributes(attr)?;
    let expanded = impls::expand_implementation(item, attr_data)?;
    Ok(expanded)
}
