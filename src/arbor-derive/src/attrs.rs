use proc_macro::TokenStream;
use syn::meta::{self, ParseNestedMeta};
use syn::parse::{Parse, Parser};
use syn::{parenthesized, Result as SynResult, Token, Type};

#[derive(Debug, Default)]
pub struct AttributeData {
    pub async_ready: bool,
    pub close: bool,
    pub provides: Vec<Type>,
}

impl AttributeData {
    fn parse(&mut self, meta: ParseNestedMeta) -> SynResult<()> {
        if meta.path.is_ident("async_ready") {
            self.async_ready = true;
            Ok(())
        } else if meta.path.is_ident("close") {
            self.close = true;
            Ok(())
        } else if meta.path.is_ident("provides") {
            let content;
            parenthesized!(content in meta.input);
            let types = content.parse_terminated(Type::parse, Token![,])?;
            self.provides.extend(types);
            Ok(())
        } else {
            Err(meta.error("expects `async_ready`, `close` or `provides(...)`"))
        }
    }
}

pub fn parse_attributes(attr: TokenStream) -> SynResult<AttributeData> {
    let mut data = AttributeData::default();
    if attr.is_empty() {
        return Ok(data);
    }

    let parser = meta::parser(|meta| data.parse(meta));
    parser.parse(attr)?;
    Ok(data)
}
