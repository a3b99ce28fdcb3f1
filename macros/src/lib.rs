use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::spanned::Spanned;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, Ident, LitStr, Type};
use treebind_core::{Datatype, EnumTable};

/// Derive the binder stub (`Configured`) and the typed conversion
/// (`FromBound`) for a struct with named fields.
///
/// Every field is an attribute unless marked `#[element]`. Names default to
/// the kebab-case field name; the element name defaults to the kebab-case
/// type name.
///
/// Usage:
/// ```rust,ignore
/// #[derive(Configured)]
/// #[configured(key = "name", ignore_unknown)]
/// struct Server {
///     name: String,
///     #[attribute(default = "8080")]
///     port: i32,
///     #[attribute(leaf)]
///     config_ref: Option<String>,
///     #[element("listener")]
///     listeners: Vec<Listener>,
/// }
/// ```
///
/// Container options: `element = ".."`, `target = ".."`, `key = "<field>"`,
/// `keyed_as = "<Type>"`, `ignore_unknown`.
///
/// Attribute options: `name = ".."`, `optional`, `required`, `leaf`,
/// `default = ".."`, `datatype = ".."`, `skip`. Without `datatype` the type
/// comes from the field's `FromValue` impl, and `Option<T>` fields are
/// optional.
///
/// Element options: `#[element("name")]` or `#[element(name = "..")]`.
/// `Option<T>` maps to one optional child, `Vec<T>` to a collection,
/// `IndexMap<String, T>` to a keyed collection and a plain `T` to exactly
/// one child.
#[proc_macro_derive(Configured, attributes(configured, attribute, element))]
pub fn derive_configured(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_configured(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Derive `ConfigEnum` and `FromValue` for a fieldless enum.
///
/// Usage:
/// ```rust,ignore
/// #[derive(ConfigEnum)]
/// #[config(name = "LogLevel")]
/// enum LogLevel {
///     Debug,
///     Info,
///     #[config(rename = "warn")]
///     Warning,
/// }
/// ```
///
/// Variants are spelled in kebab-case unless renamed. The first variant is
/// the zero value of the datatype.
#[proc_macro_derive(ConfigEnum, attributes(config))]
pub fn derive_config_enum(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_config_enum(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_configured(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let ident = &input.ident;
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new(
            input.generics.span(),
            "Configured cannot be derived for generic types",
        ));
    }
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new(input.span(), "Configured can only be derived for structs"));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new(
            data.fields.span(),
            "Configured needs a struct with named fields",
        ));
    };

    let container = match find_attr(&input.attrs, "configured") {
        Some(attr) => attr.parse_args::<ContainerArgs>()?,
        None => ContainerArgs::default(),
    };
    let element = container
        .element
        .clone()
        .unwrap_or_else(|| kebab_case(&ident.to_string()));
    let target = container.target.clone().unwrap_or_else(|| ident.to_string());

    let mut specs = Vec::with_capacity(fields.named.len());
    for field in &fields.named {
        let Some(field_ident) = &field.ident else {
            continue;
        };
        specs.push(FieldSpec::from_field(field_ident, &field.ty, &field.attrs)?);
    }

    let key_attribute = match &container.key {
        Some(key) => Some(key_attribute(&specs, key)?),
        None => None,
    };

    let mut rule_pushes = Vec::new();
    let mut enum_collects = Vec::new();
    let mut dependencies = Vec::new();
    let mut initializers = Vec::new();

    for spec in &specs {
        let field = &spec.ident;
        let ty = &spec.ty;
        match &spec.kind {
            FieldKind::Skip => {
                initializers.push(quote! { #field: ::core::default::Default::default() });
            }
            FieldKind::Attribute(args) => {
                let name = &args.name;
                let datatype = match &args.datatype {
                    Some(datatype) => quote! { #datatype },
                    None => quote! { <#ty as ::treebind_core::FromValue>::datatype() },
                };
                rule_pushes.push(quote! {
                    rules.push(format!("@{}=datatype:{}", #name, #datatype));
                });
                if let Some(default) = &args.default {
                    rule_pushes.push(quote! {
                        rules.push(format!("@{}=default:{}", #name, #default));
                    });
                }
                if args.required {
                    rule_pushes.push(quote! { rules.push(format!("@{}=required", #name)); });
                } else if args.optional {
                    rule_pushes.push(quote! { rules.push(format!("@{}=optional", #name)); });
                } else if args.default.is_none() {
                    rule_pushes.push(quote! {
                        if <#ty as ::treebind_core::FromValue>::OPTIONAL {
                            rules.push(format!("@{}=optional", #name));
                        }
                    });
                }
                if args.leaf {
                    rule_pushes.push(quote! { rules.push(format!("@{}=leaf", #name)); });
                }

                enum_collects.push(quote! {
                    if let Some(declaration) = <#ty as ::treebind_core::FromValue>::enum_declaration() {
                        enums.push(declaration);
                    }
                });
                initializers.push(quote! {
                    #field: ::treebind_core::extract::attribute::<#ty>(instance, path, #name)?
                });
            }
            FieldKind::Element { name, grouped } => {
                if *grouped {
                    let item = quote! { <#ty as ::treebind_core::FromChildren>::Item };
                    rule_pushes.push(quote! {
                        rules.push(match <#ty as ::treebind_core::FromChildren>::MULTIPLICITY {
                            ::treebind_core::Multiplicity::Single => format!(
                                "<{}>={}", #name, <#item as ::treebind_core::Configured>::TARGET
                            ),
                            ::treebind_core::Multiplicity::Collection => format!(
                                "<{}>=collection:{}", #name, <#item as ::treebind_core::Configured>::TARGET
                            ),
                        });
                    });
                    dependencies.push(quote! { builder.register_tree::<#item>()?; });
                    initializers.push(quote! {
                        #field: ::treebind_core::extract::children::<#ty>(instance, path, #name)?
                    });
                } else {
                    rule_pushes.push(quote! {
                        rules.push(format!(
                            "<{}>={}", #name, <#ty as ::treebind_core::Configured>::TARGET
                        ));
                    });
                    dependencies.push(quote! { builder.register_tree::<#ty>()?; });
                    initializers.push(quote! {
                        #field: ::treebind_core::extract::required_child::<#ty>(instance, path, #name)?
                    });
                }
            }
        }
    }

    if let Some(key) = &key_attribute {
        rule_pushes.push(quote! { rules.push(format!("key=@{}", #key)); });
    }
    if let Some(keyed_as) = &container.keyed_as {
        rule_pushes.push(quote! { rules.push(format!("keyed-as={}", #keyed_as)); });
    }
    if container.ignore_unknown {
        rule_pushes.push(quote! { rules.push(::std::string::String::from("<*>=ignore")); });
    }

    Ok(quote! {
        impl ::treebind_core::Configured for #ident {
            const ELEMENT: &'static str = #element;
            const TARGET: &'static str = #target;

            fn declaration() -> ::treebind_core::Declaration {
                let mut rules: ::std::vec::Vec<::std::string::String> =
                    ::std::vec![format!("target={}", #target)];
                #(#rule_pushes)*
                ::treebind_core::Declaration::new(#element, rules)
            }

            fn enums() -> ::std::vec::Vec<::treebind_core::EnumDeclaration> {
                #[allow(unused_mut)]
                let mut enums = ::std::vec::Vec::new();
                #(#enum_collects)*
                enums
            }

            fn register_dependencies(
                #[allow(unused_variables)] builder: &mut ::treebind_core::RegistryBuilder,
            ) -> ::core::result::Result<(), ::treebind_core::DeclarationError> {
                #(#dependencies)*
                Ok(())
            }
        }

        impl ::treebind_core::FromBound for #ident {
            fn from_bound_at(
                #[allow(unused_variables)] instance: &::treebind_core::BoundInstance,
                #[allow(unused_variables)] path: &mut ::treebind_core::ElementPath,
            ) -> ::core::result::Result<Self, ::treebind_core::BindingError> {
                Ok(#ident {
                    #(#initializers,)*
                })
            }
        }
    })
}

/// Attribute name of the field named as key, which must be a bound attribute.
fn key_attribute(specs: &[FieldSpec], key: &LitStr) -> syn::Result<String> {
    let field = specs
        .iter()
        .find(|spec| spec.ident == key.value().as_str())
        .ok_or_else(|| syn::Error::new(key.span(), format!("no field named `{}`", key.value())))?;
    match &field.kind {
        FieldKind::Attribute(args) if args.default.is_some() => Err(syn::Error::new(
            key.span(),
            "the key attribute cannot have a default",
        )),
        FieldKind::Attribute(args) => Ok(args.name.clone()),
        _ => Err(syn::Error::new(key.span(), "the key must be an attribute field")),
    }
}

struct FieldSpec {
    ident: Ident,
    ty: Type,
    kind: FieldKind,
}

enum FieldKind {
    Attribute(AttributeArgs),
    /// `grouped` fields convert through `FromChildren`; plain fields hold exactly one child.
    Element { name: String, grouped: bool },
    Skip,
}

impl FieldSpec {
    fn from_field(ident: &Ident, ty: &Type, attrs: &[Attribute]) -> syn::Result<Self> {
        let default_name = kebab_case(&ident.to_string());

        let attribute = find_attr(attrs, "attribute");
        let element = find_attr(attrs, "element");
        if let (Some(_), Some(element)) = (attribute, element) {
            return Err(syn::Error::new(
                element.span(),
                "a field is either an attribute or an element",
            ));
        }

        let kind = if let Some(element) = element {
            let args = element.parse_args::<ElementArgs>()?;
            FieldKind::Element {
                name: args.name.unwrap_or(default_name),
                grouped: is_grouped(ty),
            }
        } else {
            let mut args = match attribute {
                Some(attr) => attr.parse_args::<AttributeArgs>()?,
                None => AttributeArgs::default(),
            };
            if args.skip {
                FieldKind::Skip
            } else {
                if args.name.is_empty() {
                    args.name = default_name;
                }
                FieldKind::Attribute(args)
            }
        };

        Ok(FieldSpec {
            ident: ident.clone(),
            ty: ty.clone(),
            kind,
        })
    }
}

/// `Option`, `Vec` and `IndexMap` fields go through `FromChildren`.
fn is_grouped(ty: &Type) -> bool {
    match ty {
        Type::Path(type_path) => type_path
            .path
            .segments
            .last()
            .is_some_and(|segment| matches!(segment.ident.to_string().as_str(), "Option" | "Vec" | "IndexMap")),
        _ => false,
    }
}

fn find_attr<'a>(attrs: &'a [Attribute], name: &str) -> Option<&'a Attribute> {
    attrs.iter().find(|attr| attr.path().is_ident(name))
}

#[derive(Default)]
struct ContainerArgs {
    element: Option<String>,
    target: Option<String>,
    key: Option<LitStr>,
    keyed_as: Option<String>,
    ignore_unknown: bool,
}

impl syn::parse::Parse for ContainerArgs {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let mut args = ContainerArgs::default();

        while !input.is_empty() {
            let key: Ident = input.parse()?;
            let key_str = key.to_string();

            if key_str == "ignore_unknown" {
                args.ignore_unknown = true;
            } else {
                let _eq: syn::Token![=] = input.parse()?;
                let lit: LitStr = input.parse()?;
                match key_str.as_str() {
                    "element" => args.element = Some(non_empty(&lit)?),
                    "target" => args.target = Some(non_empty(&lit)?),
                    "keyed_as" => args.keyed_as = Some(non_empty(&lit)?),
                    "key" => args.key = Some(lit),
                    _ => {
                        return Err(syn::Error::new(key.span(), format!("Unknown argument: {}", key_str)));
                    }
                }
            }

            if !input.is_empty() {
                let _comma: syn::Token![,] = input.parse()?;
            }
        }

        Ok(args)
    }
}

#[derive(Default)]
struct AttributeArgs {
    name: String,
    optional: bool,
    required: bool,
    leaf: bool,
    skip: bool,
    default: Option<String>,
    /// Canonical form of an explicit `datatype`.
    datatype: Option<String>,
}

impl syn::parse::Parse for AttributeArgs {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let mut args = AttributeArgs::default();
        let mut default_span = None;

        while !input.is_empty() {
            let key: Ident = input.parse()?;
            let key_str = key.to_string();

            match key_str.as_str() {
                "optional" => args.optional = true,
                "required" => args.required = true,
                "leaf" => args.leaf = true,
                "skip" => args.skip = true,
                "name" | "default" | "datatype" => {
                    let _eq: syn::Token![=] = input.parse()?;
                    let lit: LitStr = input.parse()?;
                    match key_str.as_str() {
                        "name" => args.name = non_empty(&lit)?,
                        "default" => {
                            default_span = Some(lit.span());
                            args.default = Some(lit.value());
                        }
                        _ => {
                            let datatype = Datatype::parse(&lit.value()).ok_or_else(|| {
                                syn::Error::new(lit.span(), format!("unknown datatype `{}`", lit.value()))
                            })?;
                            args.datatype = Some(datatype.to_string());
                        }
                    }
                }
                _ => {
                    return Err(syn::Error::new(key.span(), format!("Unknown argument: {}", key_str)));
                }
            }

            if !input.is_empty() {
                let _comma: syn::Token![,] = input.parse()?;
            }
        }

        if args.optional && args.required {
            return Err(input.error("an attribute cannot be both `optional` and `required`"));
        }
        if let (Some(default), Some(span)) = (&args.default, default_span) {
            if args.required {
                return Err(syn::Error::new(span, "a required attribute cannot have a default"));
            }
            // Enum defaults need the enum's variants and are checked at registration.
            if let Some(datatype) = args.datatype.as_deref().and_then(Datatype::parse) {
                if !matches!(datatype, Datatype::Enum(_)) {
                    if let Err(err) = datatype.coerce(default, &EnumTable::default()) {
                        return Err(syn::Error::new(
                            span,
                            format!("default `{default}` is not a valid {datatype}: {err}"),
                        ));
                    }
                }
            }
        }

        Ok(args)
    }
}

struct ElementArgs {
    name: Option<String>,
}

impl syn::parse::Parse for ElementArgs {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        if input.peek(LitStr) {
            let lit: LitStr = input.parse()?;
            return Ok(ElementArgs {
                name: Some(non_empty(&lit)?),
            });
        }

        let mut name = None;
        while !input.is_empty() {
            let key: Ident = input.parse()?;
            if key != "name" {
                return Err(syn::Error::new(key.span(), format!("Unknown argument: {}", key)));
            }
            let _eq: syn::Token![=] = input.parse()?;
            let lit: LitStr = input.parse()?;
            name = Some(non_empty(&lit)?);

            if !input.is_empty() {
                let _comma: syn::Token![,] = input.parse()?;
            }
        }
        Ok(ElementArgs { name })
    }
}

fn expand_config_enum(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let ident = &input.ident;
    let Data::Enum(data) = &input.data else {
        return Err(syn::Error::new(input.span(), "ConfigEnum can only be derived for enums"));
    };
    if data.variants.is_empty() {
        return Err(syn::Error::new(input.span(), "ConfigEnum needs at least one variant"));
    }

    let name = match find_attr(&input.attrs, "config") {
        Some(attr) => attr
            .parse_args::<EnumArgs>()?
            .name
            .unwrap_or_else(|| ident.to_string()),
        None => ident.to_string(),
    };

    let mut idents = Vec::with_capacity(data.variants.len());
    let mut spellings: Vec<String> = Vec::with_capacity(data.variants.len());
    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(syn::Error::new(variant.span(), "ConfigEnum variants cannot carry data"));
        }
        let spelling = match find_attr(&variant.attrs, "config") {
            Some(attr) => attr.parse_args::<EnumArgs>()?.rename,
            None => None,
        }
        .unwrap_or_else(|| kebab_case(&variant.ident.to_string()));
        if spellings.contains(&spelling) {
            return Err(syn::Error::new(
                variant.span(),
                format!("variant spelling `{spelling}` is used twice"),
            ));
        }
        idents.push(&variant.ident);
        spellings.push(spelling);
    }

    Ok(quote! {
        impl ::treebind_core::ConfigEnum for #ident {
            const NAME: &'static str = #name;
            const VARIANTS: &'static [&'static str] = &[#(#spellings),*];

            fn from_variant(variant: &str) -> ::core::option::Option<Self> {
                match variant {
                    #(#spellings => ::core::option::Option::Some(#ident::#idents),)*
                    _ => ::core::option::Option::None,
                }
            }

            fn variant(&self) -> &'static str {
                match self {
                    #(#ident::#idents => #spellings,)*
                }
            }
        }

        impl ::treebind_core::FromValue for #ident {
            fn datatype() -> ::treebind_core::Datatype {
                ::treebind_core::Datatype::Enum(
                    <Self as ::treebind_core::ConfigEnum>::NAME.to_string(),
                )
            }

            fn enum_declaration() -> ::core::option::Option<::treebind_core::EnumDeclaration> {
                ::core::option::Option::Some(<Self as ::treebind_core::ConfigEnum>::declaration())
            }

            fn from_value(
                value: &::treebind_core::AttributeValue,
            ) -> ::core::result::Result<Self, ::std::string::String> {
                match &value.value {
                    ::treebind_core::Value::Enum(variant) => {
                        <Self as ::treebind_core::ConfigEnum>::from_variant(variant).ok_or_else(|| {
                            format!(
                                "`{}` is not a variant of {}",
                                variant,
                                <Self as ::treebind_core::ConfigEnum>::NAME
                            )
                        })
                    }
                    other => Err(format!(
                        "expected enum:{}, found `{}`",
                        <Self as ::treebind_core::ConfigEnum>::NAME,
                        other
                    )),
                }
            }
        }
    })
}

#[derive(Default)]
struct EnumArgs {
    name: Option<String>,
    rename: Option<String>,
}

impl syn::parse::Parse for EnumArgs {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let mut args = EnumArgs::default();

        while !input.is_empty() {
            let key: Ident = input.parse()?;
            let _eq: syn::Token![=] = input.parse()?;
            let lit: LitStr = input.parse()?;
            match key.to_string().as_str() {
                "name" => args.name = Some(non_empty(&lit)?),
                "rename" => args.rename = Some(non_empty(&lit)?),
                other => {
                    return Err(syn::Error::new(key.span(), format!("Unknown argument: {}", other)));
                }
            }

            if !input.is_empty() {
                let _comma: syn::Token![,] = input.parse()?;
            }
        }

        Ok(args)
    }
}

fn non_empty(lit: &LitStr) -> syn::Result<String> {
    let value = lit.value();
    if value.trim().is_empty() {
        return Err(syn::Error::new(lit.span(), "value cannot be empty"));
    }
    Ok(value)
}

/// `HttpServer` -> `http-server`, `request_timeout` -> `request-timeout`.
fn kebab_case(name: &str) -> String {
    let name = name.strip_prefix("r#").unwrap_or(name);
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c == '_' {
            if !out.is_empty() && !out.ends_with('-') {
                out.push('-');
            }
            continue;
        }
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower) {
                if !out.ends_with('-') {
                    out.push('-');
                }
            }
        }
        out.extend(c.to_lowercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::kebab_case;

    #[test]
    fn kebab_case_names() {
        assert_eq!(kebab_case("Server"), "server");
        assert_eq!(kebab_case("HttpServer"), "http-server");
        assert_eq!(kebab_case("HTTPServer"), "http-server");
        assert_eq!(kebab_case("request_timeout"), "request-timeout");
        assert_eq!(kebab_case("r#type"), "type");
        assert_eq!(kebab_case("Ipv4"), "ipv4");
    }
}
