use crate::utils::{apply_derives, ensure_leading_field};
use proc_macro::TokenStream;
use quote::{ToTokens, format_ident, quote};
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Item, Result, Token, Type, parse::Parse, parse::ParseStream, parse_macro_input};

/// #[event] 宏实现
/// - 仅支持具名字段结构体
/// - 缺少 `meta` 字段时补上 `#[serde(flatten)] meta: EventMeta`（位于最前）
/// - 合并派生：Debug, Clone, Serialize, Deserialize（克隆沿用同一 `meta.id`，即同一逻辑事件）
/// - 生成 `::event_dispatch::event::Event` 实现（id/created_at/event_type/schema_version/to_json）
/// - 支持：`#[event(name = "...", version = N)]`
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let cfg = parse_macro_input!(attr as EventAttrConfig);
    let mut input = parse_macro_input!(item as Item);

    let st = match &mut input {
        Item::Struct(s) => s,
        other => {
            return syn::Error::new(other.span(), "#[event] can only be used on structs")
                .to_compile_error()
                .into();
        }
    };

    let fields_named = match &mut st.fields {
        syn::Fields::Named(f) => f,
        other => {
            return syn::Error::new(
                other.span(),
                "#[event] supports only named-field structs, e.g., struct E { x: T }",
            )
            .to_compile_error()
            .into();
        }
    };

    let meta_ident = format_ident!("meta");
    let meta_ty: Type = syn::parse_quote! { ::event_dispatch::event::EventMeta };
    let flatten: syn::Attribute = syn::parse_quote! { #[serde(flatten)] };
    ensure_leading_field(fields_named, &meta_ident, &meta_ty, &[flatten]);

    let required: Vec<syn::Path> = vec![
        syn::parse_quote!(Debug),
        syn::parse_quote!(Clone),
        syn::parse_quote!(::event_dispatch::__private::serde::Serialize),
        syn::parse_quote!(::event_dispatch::__private::serde::Deserialize),
    ];
    apply_derives(&mut st.attrs, required);
    st.attrs
        .push(syn::parse_quote!(#[serde(crate = "::event_dispatch::__private::serde")]));

    let ident = st.ident.clone();
    let generics = st.generics.clone();
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let event_type_fn = cfg.name.as_ref().map(|name| {
        quote! {
            fn event_type(&self) -> &'static str {
                #name
            }
        }
    });
    let version = cfg
        .version
        .unwrap_or_else(|| syn::LitInt::new("1", proc_macro2::Span::call_site()));

    let out = quote! {
        #input

        impl #impl_generics ::event_dispatch::event::Event for #ident #ty_generics #where_clause {
            fn id(&self) -> ::event_dispatch::__private::uuid::Uuid {
                self.meta.id()
            }

            fn created_at(
                &self,
            ) -> ::event_dispatch::__private::chrono::DateTime<::event_dispatch::__private::chrono::Utc> {
                self.meta.created_at()
            }

            #event_type_fn

            fn schema_version(&self) -> u32 {
                #version
            }

            fn to_json(
                &self,
            ) -> ::event_dispatch::__private::serde_json::Result<::event_dispatch::__private::serde_json::Value> {
                ::event_dispatch::__private::serde_json::to_value(self)
            }
        }
    };

    TokenStream::from(out)
}

// 结构体级配置：类型名、结构版本
struct EventAttrConfig {
    name: Option<syn::LitStr>,
    version: Option<syn::LitInt>,
}

impl Parse for EventAttrConfig {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut name: Option<syn::LitStr> = None;
        let mut version: Option<syn::LitInt> = None;

        if input.is_empty() {
            return Ok(Self { name, version });
        }

        let pairs = Punctuated::<syn::ExprAssign, Token![,]>::parse_terminated(input)?;

        for assign in pairs {
            let key = match *assign.left {
                syn::Expr::Path(p) if p.path.segments.len() == 1 => {
                    p.path.segments[0].ident.clone()
                }
                other => return Err(syn::Error::new(other.span(), "invalid attribute key")),
            };
            match key.to_string().as_str() {
                "name" => {
                    if name.is_some() {
                        return Err(syn::Error::new(key.span(), "duplicate key 'name'"));
                    }
                    let lit: syn::LitStr = syn::parse2(assign.right.to_token_stream())?;
                    if lit.value().trim().is_empty() {
                        return Err(syn::Error::new(lit.span(), "event name cannot be empty"));
                    }
                    name = Some(lit);
                }
                "version" => {
                    if version.is_some() {
                        return Err(syn::Error::new(key.span(), "duplicate key 'version'"));
                    }
                    let lit: syn::LitInt = syn::parse2(assign.right.to_token_stream())?;
                    if !lit.suffix().is_empty() {
                        return Err(syn::Error::new(
                            lit.span(),
                            "version must be an unsuffixed integer literal, e.g. `version = 2`",
                        ));
                    }
                    lit.base10_parse::<u32>()?;
                    version = Some(lit);
                }
                _ => {
                    return Err(syn::Error::new(
                        key.span(),
                        "unknown key; expected 'name' | 'version'",
                    ));
                }
            }
        }

        Ok(Self { name, version })
    }
}
