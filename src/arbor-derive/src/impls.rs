use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{quote, quote_spanned};
use syn::spanned::Spanned;
use syn::visit_mut::{self, VisitMut};
use syn::{
    AngleBracketedGenericArguments, Attribute, Error as SynError, Expr, FnArg, GenericArgument,
    Ident, ImplItem, ImplItemFn, ItemImpl, LitStr, Meta, Pat, PatType, PathArguments,
    Result as SynResult, ReturnType, Signature, Type, TypePath,
};

use crate::attrs::AttributeData;

const RETURN_TYPE_MESSAGE: &str = "a constructor's return type should be `Self` or `Result<Self, E>`";

const ARGUMENT_TYPE_MESSAGE: &str = "an injected argument should be `Arc<T>`, `Option<Arc<T>>`, `Injector`, `AsyncInjector` or `Arguments`";

const CUSTOM_ATTRIBUTES: [&str; 4] = ["inject", "named", "key", "constructor_only"];

#[derive(Debug)]
struct ConstructorData {
    identifier: Ident,
    asyncness: bool,
    arguments: Vec<ArgumentData>,
    return_type: ReturnTypeData,
}

#[derive(Debug)]
struct ArgumentData {
    span: Span,
    name: String,
    kind: ArgumentKind,
    key: KeyData,
    constructor_only: bool,
}

#[derive(Debug)]
enum ArgumentKind {
    Required(Type),
    Optional(Type),
    Injector,
    AsyncInjector,
    Arguments,
}

#[derive(Debug)]
enum KeyData {
    Default,
    Named(LitStr),
    Key(Expr),
}

#[derive(Debug)]
enum ReturnTypeData {
    Infallible,
    Result,
}

struct AttributeRemovalVisitor;

impl AttributeRemovalVisitor {
    fn is_custom_attribute(attr: &Attribute) -> bool {
        CUSTOM_ATTRIBUTES
            .iter()
            .any(|name| attr.meta.path().is_ident(name))
    }
}

impl VisitMut for AttributeRemovalVisitor {
    fn visit_attributes_mut(&mut self, attrs: &mut Vec<Attribute>) {
        attrs.retain(|attr| !Self::is_custom_attribute(attr));
        attrs
            .iter_mut()
            .for_each(|attr| visit_mut::visit_attribute_mut(self, attr));
    }
}

pub fn expand_implementation(
    impls: TokenStream,
    attr_data: AttributeData,
) -> SynResult<TokenStream2> {
    let mut impls = match syn::parse::<ItemImpl>(impls) {
        Ok(impls) => impls,
        Err(err) => {
            return Err(SynError::new(
                err.span(),
                "`#[injectable]` should be annotated on the `impl` block",
            ))
        }
    };

    if let Some((_, path, _)) = &impls.trait_ {
        return Err(SynError::new(
            path.span(),
            "`#[injectable]` should be annotated on an inherent `impl` block",
        ));
    }

    let self_type = get_self_type(&impls)?;
    let signature = get_constructor_signature(&impls.items, impls.span())?;
    let ctor_data = parse_constructor(&self_type, signature)?;

    let expanded = expand_injectable_implementation(&self_type, ctor_data, attr_data);

    let mut visitor = AttributeRemovalVisitor;
    visitor.visit_item_impl_mut(&mut impls);

    Ok(quote! {
        #impls
        #expanded
    })
}

fn get_self_type(impls: &ItemImpl) -> SynResult<TypePath> {
    if let Type::Path(ty) = impls.self_ty.as_ref() {
        Ok(ty.clone())
    } else {
        Err(SynError::new(impls.self_ty.span(), "invalid self type"))
    }
}

fn get_constructor_signature(items: &[ImplItem], impl_span: Span) -> SynResult<Signature> {
    let ctors: Vec<_> = items
        .iter()
        .filter_map(filter_and_map_item_fn)
        .filter(is_annotated_with_inject)
        .collect();

    let signature = match ctors.as_slice() {
        [ctor] => ctor.sig.clone(),
        [] => {
            return Err(SynError::new(
                impl_span,
                "no associated function is annotated with `#[inject]`",
            ))
        }
        _ => {
            return Err(SynError::new(
                impl_span,
                "only one associated function can be annotated with `#[inject]`",
            ))
        }
    };

    if let Some(FnArg::Receiver(rec)) = signature.inputs.first() {
        return Err(SynError::new(
            rec.span(),
            "method is not allowed to be annotated with `#[inject]`",
        ));
    }

    Ok(signature)
}

fn filter_and_map_item_fn(item: &ImplItem) -> Option<&ImplItemFn> {
    if let ImplItem::Fn(impl_fn) = item {
        Some(impl_fn)
    } else {
        None
    }
}

fn is_annotated_with_inject(item_fn: &&ImplItemFn) -> bool {
    item_fn
        .attrs
        .iter()
        .any(|attr| matches!(&attr.meta, Meta::Path(path) if path.is_ident("inject")))
}

fn parse_constructor(self_type: &TypePath, signature: Signature) -> SynResult<ConstructorData> {
    let asyncness = signature.asyncness.is_some();
    let arguments = signature
        .inputs
        .into_iter()
        .enumerate()
        .filter_map(|(index, arg)| match arg {
            FnArg::Typed(arg) => Some(parse_constructor_argument(index, arg)),
            FnArg::Receiver(_) => None,
        })
        .collect::<SynResult<Vec<_>>>()?;
    let return_type = parse_constructor_return_type(signature.output, self_type)?;

    Ok(ConstructorData {
        identifier: signature.ident,
        asyncness,
        arguments,
        return_type,
    })
}

fn parse_constructor_argument(index: usize, arg: PatType) -> SynResult<ArgumentData> {
    let span = arg.span();
    let name = match arg.pat.as_ref() {
        Pat::Ident(ident) => ident.ident.to_string(),
        _ => format!("arg{index}"),
    };
    let kind = parse_argument_type(&arg.ty)?;

    let mut key = KeyData::Default;
    let mut constructor_only = false;
    for attr in &arg.attrs {
        let path = attr.meta.path();
        if path.is_ident("named") || path.is_ident("key") {
            if !matches!(key, KeyData::Default) {
                return Err(SynError::new(
                    attr.span(),
                    "only one attribute of `#[named(...)]` or `#[key(...)]` is allowed",
                ));
            }
            key = if path.is_ident("named") {
                KeyData::Named(attr.parse_args().map_err(|err| {
                    SynError::new(err.span(), "expects `#[named(...)]` to receive a string literal")
                })?)
            } else {
                KeyData::Key(attr.parse_args().map_err(|err| {
                    SynError::new(err.span(), "expects `#[key(...)]` to receive an expression")
                })?)
            };
        } else if path.is_ident("constructor_only") {
            attr.meta.require_path_only()?;
            constructor_only = true;
        }
    }

    if matches!(kind, ArgumentKind::Arguments)
        && (!matches!(key, KeyData::Default) || constructor_only)
    {
        return Err(SynError::new(
            span,
            "the `Arguments` record is not a dependency and takes no attribute",
        ));
    }

    Ok(ArgumentData {
        span,
        name,
        kind,
        key,
        constructor_only,
    })
}

fn last_segment_argument<'a>(path: &'a TypePath, ident: &str) -> Option<&'a Type> {
    let segment = path.path.segments.last()?;
    if segment.ident != ident {
        return None;
    }
    let PathArguments::AngleBracketed(AngleBracketedGenericArguments { args, .. }) =
        &segment.arguments
    else {
        return None;
    };
    match args.first() {
        Some(GenericArgument::Type(ty)) if args.len() == 1 => Some(ty),
        _ => None,
    }
}

fn parse_argument_type(ty: &Type) -> SynResult<ArgumentKind> {
    let Type::Path(path) = ty else {
        return Err(SynError::new(ty.span(), ARGUMENT_TYPE_MESSAGE));
    };

    if let Some(inner) = last_segment_argument(path, "Arc") {
        return Ok(ArgumentKind::Required(inner.clone()));
    }
    if let Some(Type::Path(option)) = last_segment_argument(path, "Option") {
        if let Some(inner) = last_segment_argument(option, "Arc") {
            return Ok(ArgumentKind::Optional(inner.clone()));
        }
    }

    match path.path.segments.last() {
        Some(segment) if segment.arguments.is_empty() && segment.ident == "Injector" => {
            Ok(ArgumentKind::Injector)
        }
        Some(segment) if segment.arguments.is_empty() && segment.ident == "AsyncInjector" => {
            Ok(ArgumentKind::AsyncInjector)
        }
        Some(segment) if segment.arguments.is_empty() && segment.ident == "Arguments" => {
            Ok(ArgumentKind::Arguments)
        }
        _ => Err(SynError::new(ty.span(), ARGUMENT_TYPE_MESSAGE)),
    }
}

fn parse_constructor_return_type(
    output: ReturnType,
    self_type: &TypePath,
) -> SynResult<ReturnTypeData> {
    let ReturnType::Type(_, return_type) = output else {
        return Err(SynError::new(output.span(), RETURN_TYPE_MESSAGE));
    };
    let Type::Path(return_type) = *return_type else {
        return Err(SynError::new(return_type.span(), RETURN_TYPE_MESSAGE));
    };

    if is_self_type(&return_type, self_type) {
        return Ok(ReturnTypeData::Infallible);
    }

    let segments = &return_type.path.segments;
    let is_result = match segments.len() {
        1 => segments[0].ident == "Result",
        3 => {
            (segments[0].ident == "std" || segments[0].ident == "core")
                && segments[1].ident == "result"
                && segments[2].ident == "Result"
        }
        _ => false,
    };
    if !is_result {
        return Err(SynError::new(return_type.span(), RETURN_TYPE_MESSAGE));
    }

    let Some(segment) = segments.last() else {
        return Err(SynError::new(return_type.span(), RETURN_TYPE_MESSAGE));
    };
    let PathArguments::AngleBracketed(AngleBracketedGenericArguments { args, .. }) =
        &segment.arguments
    else {
        return Err(SynError::new(segment.span(), RETURN_TYPE_MESSAGE));
    };
    match args.first() {
        Some(GenericArgument::Type(Type::Path(first))) if args.len() == 2 => {
            if is_self_type(first, self_type) {
                Ok(ReturnTypeData::Result)
            } else {
                Err(SynError::new(first.span(), RETURN_TYPE_MESSAGE))
            }
        }
        _ => Err(SynError::new(args.span(), RETURN_TYPE_MESSAGE)),
    }
}

fn is_self_type(ty: &TypePath, self_type: &TypePath) -> bool {
    ty == self_type || ty.path.is_ident("Self")
}

fn expand_dependency(arg: &ArgumentData) -> Option<TokenStream2> {
    let target = match &arg.kind {
        ArgumentKind::Required(ty) | ArgumentKind::Optional(ty) => quote! { #ty },
        ArgumentKind::Injector => quote! { ::arbor::container::Injector },
        ArgumentKind::AsyncInjector => quote! { ::arbor::container::AsyncInjector },
        ArgumentKind::Arguments => return None,
    };

    let key = match &arg.key {
        KeyData::Default => quote! { ::arbor::key::InjectionKey::of::<#target>() },
        KeyData::Named(name) => quote! { ::arbor::key::InjectionKey::named(#name) },
        KeyData::Key(expr) => quote! { ::arbor::key::InjectionKey::from(#expr) },
    };
    let key = if let ArgumentKind::Optional(_) = &arg.kind {
        quote! { #key.optional() }
    } else {
        key
    };

    let name = &arg.name;
    let method = if arg.constructor_only {
        quote! { with_constructor_only }
    } else {
        quote! { with }
    };
    Some(quote_spanned! { arg.span=> .#method(#name, #key) })
}

fn expand_extraction(index: usize, arg: &ArgumentData) -> TokenStream2 {
    let var = Ident::new(&format!("dep{index}"), arg.span);
    let name = &arg.name;
    let extracted = match &arg.kind {
        ArgumentKind::Required(ty) => quote! { arguments.get::<#ty>(#name) },
        ArgumentKind::Optional(ty) => quote! { arguments.optional::<#ty>(#name) },
        ArgumentKind::Injector => quote! { arguments.injector(#name) },
        ArgumentKind::AsyncInjector => quote! { arguments.async_injector(#name) },
        ArgumentKind::Arguments => return quote! { let #var = arguments.clone(); },
    };
    quote_spanned! { arg.span=>
        let #var = match #extracted {
            ::std::result::Result::Ok(value) => value,
            ::std::result::Result::Err(err) => {
                return ::arbor::provider::Construction::failed(err);
            }
        };
    }
}

fn expand_construction(ctor_data: &ConstructorData) -> TokenStream2 {
    let constructor = &ctor_data.identifier;
    let dep_args = ctor_data
        .arguments
        .iter()
        .enumerate()
        .map(|(i, arg)| {
            let dep = Ident::new(&format!("dep{i}"), arg.span);
            quote! { #dep, }
        })
        .collect::<TokenStream2>();

    match (ctor_data.asyncness, &ctor_data.return_type) {
        (false, ReturnTypeData::Infallible) => quote! {
            ::arbor::provider::Construction::ready(Self::#constructor(#dep_args))
        },
        (false, ReturnTypeData::Result) => quote! {
            match Self::#constructor(#dep_args) {
                ::std::result::Result::Ok(object) => ::arbor::provider::Construction::ready(object),
                ::std::result::Result::Err(err) => ::arbor::provider::Construction::failed(err),
            }
        },
        (true, ReturnTypeData::Infallible) => quote! {
            ::arbor::provider::Construction::deferred(async move {
                ::std::result::Result::Ok::<_, ::arbor::provider::BoxError>(
                    Self::#constructor(#dep_args).await,
                )
            })
        },
        (true, ReturnTypeData::Result) => quote! {
            ::arbor::provider::Construction::deferred(async move {
                Self::#constructor(#dep_args)
                    .await
                    .map_err(::std::convert::Into::<::arbor::provider::BoxError>::into)
            })
        },
    }
}

fn expand_injectable_implementation(
    self_type: &TypePath,
    ctor_data: ConstructorData,
    attr_data: AttributeData,
) -> TokenStream2 {
    let dependencies = ctor_data
        .arguments
        .iter()
        .filter_map(expand_dependency)
        .collect::<TokenStream2>();

    let extractions = ctor_data
        .arguments
        .iter()
        .enumerate()
        .map(|(i, arg)| expand_extraction(i, arg))
        .collect::<TokenStream2>();

    let construction = expand_construction(&ctor_data);

    let into_instance = if attr_data.async_ready || attr_data.close {
        let base = if attr_data.async_ready {
            quote! { ::arbor::provider::Instance::async_injectable(::std::sync::Arc::clone(&this)) }
        } else {
            quote! { ::arbor::provider::Instance::new(::std::sync::Arc::clone(&this)) }
        };
        let instance = if attr_data.close {
            quote! { #base.with_close(this) }
        } else {
            base
        };
        quote! {
            fn into_instance(this: ::std::sync::Arc<Self>) -> ::arbor::provider::Instance {
                #instance
            }
        }
    } else {
        TokenStream2::new()
    };

    let also_provides = if attr_data.provides.is_empty() {
        TokenStream2::new()
    } else {
        let targets = attr_data.provides.iter();
        quote! {
            fn also_provides() -> ::std::vec::Vec<::arbor::key::Target> {
                ::std::vec![#(::arbor::key::Target::of::<#targets>()),*]
            }
        }
    };

    quote! {
        impl ::arbor::provider::Injectable for #self_type {
            fn dependencies() -> ::arbor::provider::Dependencies {
                ::arbor::provider::Dependencies::new()
                    #dependencies
            }

            #[allow(unused_variables)]
            fn construct(
                arguments: ::arbor::provider::Arguments,
            ) -> ::arbor::provider::Construction<Self> {
                #extractions
                #construction
            }

            #into_instance
            #also_provides
        }
    }
}
