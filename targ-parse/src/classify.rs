//! Classification of parsed declarations into the command catalog.

use crate::{CommandInfo, CommandKind};

use std::collections::BTreeMap;
use std::path::Path;
use syn::{
    Attribute, Fields, FnArg, ImplItem, Item, ItemFn, ItemImpl, ItemStruct,
    Meta, ReturnType, Type, Visibility,
};

/// Signature flags shared by run methods and bare functions.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct SignatureShape {
    pub uses_ctx: bool,
    pub returns_error: bool,
}

/// Run through the items of a parsed file and produce its commands, in
/// declaration order.
///
/// Returns `Err(())` only for the `fn main` misuse; the caller attaches the
/// path. Non-conforming declarations are not errors, they are simply not
/// commands.
pub(crate) fn classify_file(
    file: &syn::File,
    path: &Path,
) -> Result<Vec<CommandInfo>, ()> {
    if declares_main(file) {
        return Err(());
    }

    // First pass: collect run-method shapes per struct name. A struct with a
    // malformed run signature is remembered as disqualified.
    let mut run_shapes: BTreeMap<String, Option<SignatureShape>> =
        BTreeMap::new();
    for item in &file.items {
        if let Item::Impl(item_impl) = item {
            collect_run_shape(item_impl, &mut run_shapes);
        }
    }

    let mut commands = Vec::new();
    for item in &file.items {
        match item {
            Item::Struct(item_struct) => {
                if let Some(command) =
                    classify_struct(item_struct, &run_shapes, path)
                {
                    commands.push(command);
                }
            }
            Item::Fn(item_fn) => {
                if let Some(command) = classify_fn(item_fn, path) {
                    commands.push(command);
                }
            }
            _ => {}
        }
    }
    Ok(commands)
}

/// File-level (`//!`) doc text.
pub(crate) fn file_doc(file: &syn::File) -> String {
    doc_text(&file.attrs)
}

fn declares_main(file: &syn::File) -> bool {
    file.items.iter().any(|item| {
        matches!(item, Item::Fn(item_fn) if item_fn.sig.ident == "main")
    })
}

fn collect_run_shape(
    item_impl: &ItemImpl,
    run_shapes: &mut BTreeMap<String, Option<SignatureShape>>,
) {
    if item_impl.trait_.is_some() {
        return;
    }
    let type_name = match &*item_impl.self_ty {
        Type::Path(type_path) if type_path.qself.is_none() => {
            match type_path.path.get_ident() {
                Some(ident) => ident.to_string(),
                None => return,
            }
        }
        _ => return,
    };
    for impl_item in &item_impl.items {
        let ImplItem::Fn(method) = impl_item else {
            continue;
        };
        if method.sig.ident != "run" {
            continue;
        }
        if !matches!(method.vis, Visibility::Public(_)) {
            run_shapes.insert(type_name.clone(), None);
            continue;
        }
        let shape = method_shape(&method.sig);
        run_shapes.insert(type_name.clone(), shape);
    }
}

fn classify_struct(
    item_struct: &ItemStruct,
    run_shapes: &BTreeMap<String, Option<SignatureShape>>,
    path: &Path,
) -> Option<CommandInfo> {
    if !matches!(item_struct.vis, Visibility::Public(_)) {
        return None;
    }
    let name = item_struct.ident.to_string();
    let has_subcommands = has_subcommand_field(&item_struct.fields);
    let run = run_shapes.get(&name).copied();

    let (has_run, shape) = match run {
        Some(Some(shape)) => (true, shape),
        // A malformed run signature disqualifies the struct outright.
        Some(None) => return None,
        None => (false, SignatureShape::default()),
    };

    // Struct targets carry no state. A field-bearing struct participates
    // only through subcommand tags.
    if has_run && !is_fieldless(&item_struct.fields) {
        return None;
    }
    if !has_run && !has_subcommands {
        return None;
    }

    Some(CommandInfo {
        name: name.clone(),
        kind: CommandKind::Struct,
        file: path.to_path_buf(),
        description: strip_ident_prefix(&doc_text(&item_struct.attrs), &name),
        uses_ctx: shape.uses_ctx,
        returns_error: shape.returns_error,
        has_run,
        has_subcommands,
    })
}

fn classify_fn(item_fn: &ItemFn, path: &Path) -> Option<CommandInfo> {
    if !matches!(item_fn.vis, Visibility::Public(_)) {
        return None;
    }
    if item_fn.sig.asyncness.is_some()
        || item_fn.sig.unsafety.is_some()
        || !item_fn.sig.generics.params.is_empty()
    {
        return None;
    }
    let shape = args_shape(item_fn.sig.inputs.iter())?;
    let returns_error = output_shape(&item_fn.sig.output)?;
    let name = item_fn.sig.ident.to_string();
    Some(CommandInfo {
        name: name.clone(),
        kind: CommandKind::Func,
        file: path.to_path_buf(),
        description: strip_ident_prefix(&doc_text(&item_fn.attrs), &name),
        uses_ctx: shape,
        returns_error,
        has_run: true,
        has_subcommands: false,
    })
}

/// The four permitted shapes, receiver `&self` exactly. Anything else is
/// `None`.
fn method_shape(sig: &syn::Signature) -> Option<SignatureShape> {
    if sig.asyncness.is_some()
        || sig.unsafety.is_some()
        || !sig.generics.params.is_empty()
    {
        return None;
    }
    let mut inputs = sig.inputs.iter();
    match inputs.next() {
        Some(FnArg::Receiver(receiver))
            if receiver.reference.is_some()
                && receiver.mutability.is_none() => {}
        _ => return None,
    }
    let uses_ctx = args_shape(inputs)?;
    let returns_error = output_shape(&sig.output)?;
    Some(SignatureShape {
        uses_ctx,
        returns_error,
    })
}

/// Zero non-receiver parameters, or exactly one `&Ctx`.
fn args_shape<'a>(
    mut inputs: impl Iterator<Item = &'a FnArg>,
) -> Option<bool> {
    let first = match inputs.next() {
        None => return Some(false),
        Some(arg) => arg,
    };
    if inputs.next().is_some() {
        return None;
    }
    let FnArg::Typed(pat_type) = first else {
        return None;
    };
    let Type::Reference(reference) = &*pat_type.ty else {
        return None;
    };
    if reference.mutability.is_some() {
        return None;
    }
    let Type::Path(type_path) = &*reference.elem else {
        return None;
    };
    let is_ctx = type_path
        .path
        .segments
        .last()
        .map_or(false, |segment| segment.ident == "Ctx");
    if is_ctx {
        Some(true)
    } else {
        None
    }
}

/// No return, `()`, or a path ending in `Result`.
fn output_shape(output: &ReturnType) -> Option<bool> {
    match output {
        ReturnType::Default => Some(false),
        ReturnType::Type(_, ty) => match &**ty {
            Type::Tuple(tuple) if tuple.elems.is_empty() => Some(false),
            Type::Path(type_path) => {
                let is_result = type_path
                    .path
                    .segments
                    .last()
                    .map_or(false, |segment| segment.ident == "Result");
                if is_result {
                    Some(true)
                } else {
                    None
                }
            }
            _ => None,
        },
    }
}

fn is_fieldless(fields: &Fields) -> bool {
    match fields {
        Fields::Unit => true,
        Fields::Named(named) => named.named.is_empty(),
        Fields::Unnamed(_) => false,
    }
}

fn has_subcommand_field(fields: &Fields) -> bool {
    fields.iter().any(|field| {
        field.attrs.iter().any(|attr| {
            if !attr.path().is_ident("dispatch") {
                return false;
            }
            let mut found = false;
            let _ = attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("subcommand") {
                    found = true;
                }
                Ok(())
            });
            found
        })
    })
}

fn doc_text(attrs: &[Attribute]) -> String {
    let mut lines = Vec::new();
    for attr in attrs {
        if !attr.path().is_ident("doc") {
            continue;
        }
        if let Meta::NameValue(name_value) = &attr.meta {
            if let syn::Expr::Lit(expr_lit) = &name_value.value {
                if let syn::Lit::Str(lit_str) = &expr_lit.lit {
                    lines.push(lit_str.value().trim().to_string());
                }
            }
        }
    }
    lines.join("\n").trim().to_string()
}

/// "Build compiles the project." -> "compiles the project." when the doc
/// leads with the declared identifier.
fn strip_ident_prefix(doc: &str, ident: &str) -> String {
    match doc.strip_prefix(ident) {
        Some(rest) if rest.starts_with(' ') => rest.trim_start().to_string(),
        _ => doc.to_string(),
    }
}
