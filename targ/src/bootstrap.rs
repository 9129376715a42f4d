//! Emits the dispatch main program for one module group.
//!
//! The emission is pure string templating over [`BootstrapData`]; no
//! runtime introspection of user types is required. The compiler validates
//! the bootstrap on every run, which is itself a form of type check.

use crate::error::Error;
use crate::module::ModuleGroup;
use crate::namespace::{
    cli_name, FieldSpec, FieldTarget, NameCounter, NamespaceNode,
    NamespaceTree,
};
use crate::wrapper::WrapperSet;

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use targ_parse::{CommandInfo, CommandKind};

/// One `#[path]` module block, covering one package directory.
#[derive(Clone, Debug)]
pub struct PkgMod {
    pub ident: String,
    /// Directory the block points at; the mirror directory for fallback
    /// builds.
    pub dir: PathBuf,
    /// `(file base name, module identifier)` pairs.
    pub files: Vec<(String, String)>,
}

/// One `impl targ_rt::Target` adapter for a leaf command.
#[derive(Clone, Debug)]
pub struct Adapter {
    pub type_path: String,
    pub cli: String,
    pub summary: String,
    pub source_file: PathBuf,
    pub uses_ctx: bool,
    pub returns_error: bool,
}

/// One emitted namespace struct.
#[derive(Clone, Debug)]
pub struct NodeDecl {
    pub type_name: String,
    pub var_name: String,
    pub cli: String,
    pub explicit_name: Option<String>,
    pub description: String,
    pub source_file: Option<PathBuf>,
    pub fields: Vec<FieldDecl>,
}

#[derive(Clone, Debug)]
pub struct FieldDecl {
    pub ident: String,
    pub tag_name: Option<String>,
    pub ty: String,
    pub value: String,
}

/// The template input. A short-lived projection of the catalog, the
/// namespace tree and the wrapper set.
#[derive(Clone, Debug, Default)]
pub struct BootstrapData {
    pub pkg_mods: Vec<PkgMod>,
    pub adapters: Vec<Adapter>,
    /// Children before parents, so instantiation order is valid.
    pub nodes: Vec<NodeDecl>,
    /// Expressions handed to the dispatcher as roots.
    pub roots: Vec<String>,
    pub banner_lit: Option<String>,
    pub description: Option<String>,
    pub allow_default: bool,
    pub uses_ctx: bool,
}

/// Collect the template input and render the bootstrap source.
pub fn emit(
    group: &ModuleGroup,
    tree: &NamespaceTree,
    wrappers: &WrapperSet,
    counter: &mut NameCounter,
    map_dir: &dyn Fn(&Path) -> PathBuf,
) -> Result<String, Error> {
    let data = collect(group, tree, wrappers, counter, map_dir)?;
    Ok(render(&data))
}

pub fn collect(
    group: &ModuleGroup,
    tree: &NamespaceTree,
    wrappers: &WrapperSet,
    counter: &mut NameCounter,
    map_dir: &dyn Fn(&Path) -> PathBuf,
) -> Result<BootstrapData, Error> {
    // Package module blocks, one per package directory.
    let mut pkg_idents: BTreeMap<PathBuf, String> = BTreeMap::new();
    let mut file_idents: BTreeMap<PathBuf, String> = BTreeMap::new();
    let mut pkg_mods = Vec::new();
    for package in &group.packages {
        let ident = counter.claim(&format!("pkg_{}", package.package));
        pkg_idents.insert(package.dir.clone(), ident.clone());
        let mut files = Vec::new();
        for file in &package.files {
            files.push((file.base.clone(), file.mod_name.clone()));
            file_idents.insert(file.path.clone(), file.mod_name.clone());
        }
        if let Some(wrapper_file) = wrappers.files_in(&package.dir) {
            files.push((
                crate::wrapper::WRAPPER_FILE_NAME.to_string(),
                wrapper_file.mod_name.clone(),
            ));
        }
        pkg_mods.push(PkgMod {
            ident,
            dir: map_dir(&package.dir),
            files,
        });
    }

    let type_path = |command: &CommandInfo| -> Result<String, Error> {
        let dir = command.file.parent().unwrap_or(Path::new(""));
        let pkg = pkg_idents.get(dir).ok_or_else(|| {
            Error::InputMisuse(format!(
                "{}: no package module for command {}",
                command.file.display(),
                command.name
            ))
        })?;
        match command.kind {
            CommandKind::Func => {
                let (wrapper_file, wrapper) =
                    wrappers.lookup(command).ok_or_else(|| {
                        Error::InputMisuse(format!(
                            "{}: no wrapper generated for function {}",
                            command.file.display(),
                            command.name
                        ))
                    })?;
                Ok(format!(
                    "{pkg}::{}::{}",
                    wrapper_file.mod_name, wrapper.type_name
                ))
            }
            CommandKind::Struct => {
                let file_mod =
                    file_idents.get(&command.file).ok_or_else(|| {
                        Error::InputMisuse(format!(
                            "{}: file missing from catalog",
                            command.file.display()
                        ))
                    })?;
                Ok(format!("{pkg}::{file_mod}::{}", command.name))
            }
        }
    };

    // Adapters for every command with a run method; user-authored
    // dispatch structs bring their own Target impl through their derive.
    let mut adapters = Vec::new();
    let mut uses_ctx = false;
    for package in &group.packages {
        for command in &package.commands {
            uses_ctx |= command.uses_ctx;
            if !command.has_run {
                continue;
            }
            adapters.push(Adapter {
                type_path: type_path(command)?,
                cli: cli_name(&command.name),
                summary: command.description.clone(),
                source_file: command.file.clone(),
                uses_ctx: command.uses_ctx,
                returns_error: command.returns_error,
            });
        }
    }

    // Namespace structs, children before parents.
    let mut nodes = Vec::new();
    for node in tree.root.postorder() {
        nodes.push(node_decl(node, &type_path)?);
    }

    let roots = root_exprs(&tree.root, &type_path)?;

    let (banner_lit, description) = match &group.packages[..] {
        [only] if !only.doc.is_empty() => {
            let first_line =
                only.doc.lines().next().unwrap_or_default().to_string();
            (Some(only.doc.clone()), Some(first_line))
        }
        _ => (None, None),
    };

    Ok(BootstrapData {
        pkg_mods,
        adapters,
        nodes,
        roots,
        banner_lit,
        description,
        allow_default: false,
        uses_ctx,
    })
}

fn node_decl(
    node: &NamespaceNode,
    type_path: &dyn Fn(&CommandInfo) -> Result<String, Error>,
) -> Result<NodeDecl, Error> {
    let mut fields = Vec::new();
    for field in &node.fields {
        fields.push(field_decl(field, type_path)?);
    }
    Ok(NodeDecl {
        type_name: node.type_name.clone(),
        var_name: node.var_name.clone(),
        cli: cli_name(&node.name),
        explicit_name: (cli_name(&node.name) != node.name)
            .then(|| node.name.clone()),
        description: node.doc.clone(),
        source_file: node.file.clone(),
        fields,
    })
}

fn field_decl(
    field: &FieldSpec,
    type_path: &dyn Fn(&CommandInfo) -> Result<String, Error>,
) -> Result<FieldDecl, Error> {
    match &field.target {
        FieldTarget::Node {
            type_name,
            var_name,
        } => Ok(FieldDecl {
            ident: field.ident.clone(),
            tag_name: field.explicit_name.clone(),
            ty: format!("Box<{type_name}>"),
            value: format!("Box::new({var_name})"),
        }),
        FieldTarget::Command(command) => {
            let path = type_path(command)?;
            Ok(FieldDecl {
                ident: field.ident.clone(),
                tag_name: field.explicit_name.clone(),
                ty: path.clone(),
                value: instantiation(command, &path),
            })
        }
    }
}

/// Fieldless run targets build with a struct literal; user dispatch
/// structs are `Default`-constructed.
fn instantiation(command: &CommandInfo, path: &str) -> String {
    if command.has_run || command.kind == CommandKind::Func {
        format!("{path} {{}}")
    } else {
        format!("{path}::default()")
    }
}

fn root_exprs(
    root: &NamespaceNode,
    type_path: &dyn Fn(&CommandInfo) -> Result<String, Error>,
) -> Result<Vec<String>, Error> {
    let mut exprs = Vec::new();
    for field in &root.fields {
        let expr = match &field.target {
            FieldTarget::Node { var_name, .. } => {
                format!("Box::new({var_name})")
            }
            FieldTarget::Command(command) => {
                let path = type_path(command)?;
                format!("Box::new({})", instantiation(command, &path))
            }
        };
        exprs.push(expr);
    }
    Ok(exprs)
}

/// A Rust string literal for `text`.
fn lit(text: &str) -> String {
    format!("{text:?}")
}

pub fn render(data: &BootstrapData) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "//! Dispatch entry point generated by targ; do not edit.");
    let _ = writeln!(out);

    for pkg in &data.pkg_mods {
        let _ = writeln!(out, "#[path = {}]", lit(&pkg.dir.to_string_lossy()));
        let _ = writeln!(out, "mod {} {{", pkg.ident);
        for (base, mod_name) in &pkg.files {
            let _ = writeln!(out, "    #[path = {}]", lit(base));
            let _ = writeln!(out, "    pub mod {mod_name};");
        }
        let _ = writeln!(out, "}}");
        let _ = writeln!(out);
    }

    if let Some(banner) = &data.banner_lit {
        let _ = writeln!(out, "const BANNER: &str = {};", lit(banner));
        let _ = writeln!(out);
    }

    for adapter in &data.adapters {
        let _ = writeln!(out, "impl targ_rt::Target for {} {{", adapter.type_path);
        let _ = writeln!(out, "    fn name(&self) -> &'static str {{");
        let _ = writeln!(out, "        {}", lit(&adapter.cli));
        let _ = writeln!(out, "    }}");
        let _ = writeln!(out);
        let _ = writeln!(out, "    fn summary(&self) -> &'static str {{");
        let _ = writeln!(out, "        {}", lit(&adapter.summary));
        let _ = writeln!(out, "    }}");
        let _ = writeln!(out);
        let _ = writeln!(out, "    fn source_file(&self) -> &'static str {{");
        let _ = writeln!(
            out,
            "        {}",
            lit(&adapter.source_file.to_string_lossy())
        );
        let _ = writeln!(out, "    }}");
        let _ = writeln!(out);
        let ctx_param = if adapter.uses_ctx { "ctx" } else { "_ctx" };
        let _ = writeln!(
            out,
            "    fn invoke(&self, {ctx_param}: &targ_rt::Ctx) -> Result<(), targ_rt::Failure> {{"
        );
        let call = if adapter.uses_ctx {
            "self.run(ctx)"
        } else {
            "self.run()"
        };
        if adapter.returns_error {
            let _ = writeln!(out, "        targ_rt::check({call})");
        } else {
            let _ = writeln!(out, "        {call};");
            let _ = writeln!(out, "        Ok(())");
        }
        let _ = writeln!(out, "    }}");
        let _ = writeln!(out, "}}");
        let _ = writeln!(out);
    }

    for node in &data.nodes {
        let _ = writeln!(out, "#[derive(targ_rt::Dispatch)]");
        let mut tags = vec![format!("name = {}", lit(&node.cli))];
        if let Some(explicit) = &node.explicit_name {
            tags[0] = format!("name = {}", lit(explicit));
        }
        if !node.description.is_empty() {
            tags.push(format!("description = {}", lit(&node.description)));
        }
        if let Some(source) = &node.source_file {
            tags.push(format!("source = {}", lit(&source.to_string_lossy())));
        }
        let _ = writeln!(out, "#[dispatch({})]", tags.join(", "));
        let _ = writeln!(out, "struct {} {{", node.type_name);
        for field in &node.fields {
            match &field.tag_name {
                Some(tag) => {
                    let _ = writeln!(
                        out,
                        "    #[dispatch(subcommand, name = {})]",
                        lit(tag)
                    );
                }
                None => {
                    let _ = writeln!(out, "    #[dispatch(subcommand)]");
                }
            }
            let _ = writeln!(out, "    {}: {},", field.ident, field.ty);
        }
        let _ = writeln!(out, "}}");
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "fn main() {{");
    let _ = writeln!(out, "    targ_rt::enable_cleanup();");
    if data.banner_lit.is_some() {
        let _ = writeln!(out, "    if targ_rt::wants_banner() {{");
        let _ = writeln!(out, "        println!(\"{{BANNER}}\");");
        let _ = writeln!(out, "    }}");
    }
    for node in &data.nodes {
        let _ = writeln!(out, "    let {} = {} {{", node.var_name, node.type_name);
        for field in &node.fields {
            let _ = writeln!(out, "        {}: {},", field.ident, field.value);
        }
        let _ = writeln!(out, "    }};");
    }
    let _ = writeln!(out, "    let roots: Vec<Box<dyn targ_rt::Target>> = vec![");
    for root in &data.roots {
        let _ = writeln!(out, "        {root},");
    }
    let _ = writeln!(out, "    ];");
    let _ = writeln!(out, "    targ_rt::dispatch(roots, targ_rt::Options {{");
    let _ = writeln!(out, "        allow_default: {},", data.allow_default);
    match &data.description {
        Some(description) => {
            let _ = writeln!(
                out,
                "        description: Some({}),",
                lit(description)
            );
        }
        None => {
            let _ = writeln!(out, "        description: None,");
        }
    }
    let _ = writeln!(out, "        cancel_on_signal: {},", data.uses_ctx);
    let _ = writeln!(out, "    }});");
    let _ = writeln!(out, "}}");
    out
}
