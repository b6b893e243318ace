use quote::ToTokens;
use syn::{Attribute, Field, FieldsNamed, Token, Type, punctuated::Punctuated};

// 提取非 derive 属性与已有 derive 列表
pub(crate) fn split_derives(attrs: &[Attribute]) -> (Vec<Attribute>, Vec<syn::Path>) {
    let mut retained = Vec::new();
    let mut existing = Vec::new();
    for attr in attrs.iter() {
        if attr.path().is_ident("derive") {
            if let Ok(list) =
                attr.parse_args_with(Punctuated::<syn::Path, Token![,]>::parse_terminated)
            {
                existing.extend(list);
            }
        } else {
            retained.push(attr.clone());
        }
    }
    (retained, existing)
}

// 合并必需与已有 derive（去重，必需的在前）
pub(crate) fn merge_derives(existing: Vec<syn::Path>, required: Vec<syn::Path>) -> Attribute {
    let mut seen = std::collections::HashSet::<String>::new();
    let list: Vec<syn::Path> = required
        .into_iter()
        .chain(existing)
        .filter(|p| seen.insert(derive_key(p)))
        .collect();
    syn::parse_quote!(#[derive(#(#list),*)])
}

// 以末段名作为 key，`Serialize` 与 `serde::Serialize` 视为同一个
pub(crate) fn derive_key(p: &syn::Path) -> String {
    match p.segments.last() {
        Some(last) => match last.ident.to_string().as_str() {
            name @ ("Serialize" | "Deserialize") => format!("serde::{name}"),
            name => name.to_string(),
        },
        None => p.to_token_stream().to_string(),
    }
}

pub(crate) fn apply_derives(attrs: &mut Vec<Attribute>, required: Vec<syn::Path>) {
    let (retained, existing) = split_derives(attrs);
    let merged = merge_derives(existing, required);
    *attrs = std::iter::once(merged).chain(retained).collect();
}

/// 缺失时在最前面补上字段，返回是否新增
pub(crate) fn ensure_leading_field(
    fields_named: &mut FieldsNamed,
    name: &syn::Ident,
    ty: &Type,
    attrs: &[Attribute],
) -> bool {
    if has_field_named(&fields_named.named, name) {
        return false;
    }

    let field: Field = syn::parse_quote! { #(#attrs)* #name: #ty };
    let mut named: Punctuated<Field, Token![,]> = Punctuated::new();
    named.push(field);
    named.extend(fields_named.named.clone());
    fields_named.named = named;
    true
}

pub(crate) fn has_field_named(named: &Punctuated<Field, Token![,]>, name: &syn::Ident) -> bool {
    named
        .iter()
        .any(|f| f.ident.as_ref().is_some_and(|i| i == name))
}
