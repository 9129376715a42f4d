//! Synthesizes the CLI subcommand tree from file paths and mints the
//! identifiers the bootstrap declares.
//!
//! Path segments relative to the start directory become a trie; the longest
//! common leading segment sequence is trimmed (an irrelevant deep root
//! contributes nothing to disambiguation) and pass-through interior
//! directories are compressed away. Sibling ordering is always sorted, so
//! the emitted bootstrap is deterministic.

use crate::discovery::PackageInfo;
use crate::error::Error;

use heck::{ToSnakeCase, ToUpperCamelCase};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use targ_parse::{CommandInfo, FileInfo};

/// Mints collision-free identifiers: the first claim of a base is returned
/// bare, later claims get a sequence suffix. Explicitly threaded through the
/// generator; never a process-wide singleton.
#[derive(Debug, Default)]
pub struct NameCounter {
    counts: HashMap<String, usize>,
    taken: HashSet<String>,
}

impl NameCounter {
    pub fn new() -> Self {
        NameCounter::default()
    }

    /// Mark a name as in use without claiming it, e.g. identifiers that
    /// already exist in the surrounding scope.
    pub fn reserve(&mut self, name: &str) {
        self.taken.insert(name.to_string());
    }

    pub fn claim(&mut self, base: &str) -> String {
        let mut n = self.counts.get(base).copied().unwrap_or(0);
        loop {
            n += 1;
            let candidate = if n == 1 {
                base.to_string()
            } else {
                format!("{base}{n}")
            };
            if self.taken.insert(candidate.clone()) {
                self.counts.insert(base.to_string(), n);
                return candidate;
            }
        }
    }
}

/// A node in the subcommand tree. The root has no name; every other node
/// carries its path segment.
#[derive(Clone, Debug, Default)]
pub struct NamespaceNode {
    pub name: String,
    /// Non-empty at leaves: the source file whose commands populate this
    /// node.
    pub file: Option<PathBuf>,
    pub doc: String,
    pub commands: Vec<CommandInfo>,
    pub children: BTreeMap<String, NamespaceNode>,
    pub type_name: String,
    pub var_name: String,
    pub fields: Vec<FieldSpec>,
}

impl NamespaceNode {
    fn named(name: &str) -> Self {
        NamespaceNode {
            name: name.to_string(),
            ..NamespaceNode::default()
        }
    }

    /// Nodes in emission order: children before parents, siblings sorted.
    pub fn postorder(&self) -> Vec<&NamespaceNode> {
        let mut nodes = Vec::new();
        for child in self.children.values() {
            nodes.extend(child.postorder());
        }
        if !self.name.is_empty() {
            nodes.push(self);
        }
        nodes
    }
}

/// One emitted struct field: either a nested namespace node or a leaf
/// command.
#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub ident: String,
    /// The CLI segment, the kebab-cased field identifier.
    pub cli: String,
    /// `name = "..."` tag directive, present when the kebab form differs
    /// from the on-disk segment.
    pub explicit_name: Option<String>,
    pub target: FieldTarget,
}

#[derive(Clone, Debug)]
pub enum FieldTarget {
    Node {
        type_name: String,
        var_name: String,
    },
    Command(CommandInfo),
}

#[derive(Clone, Debug, Default)]
pub struct NamespaceTree {
    pub root: NamespaceNode,
}

/// Build the namespace tree for one module group's packages.
pub fn synthesize(
    packages: &[PackageInfo],
    start_dir: &Path,
    counter: &mut NameCounter,
) -> Result<NamespaceTree, Error> {
    let mut entries: Vec<(Vec<String>, &FileInfo)> = Vec::new();
    for package in packages {
        for file in &package.files {
            if file.commands.is_empty() {
                continue;
            }
            entries.push((relative_segments(&file.path, start_dir), file));
        }
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let prefix_len = common_prefix_len(&entries);
    let mut root = NamespaceNode::default();
    for (segments, file) in &entries {
        insert(&mut root, &segments[prefix_len..], file);
    }
    compress(&mut root)?;
    mint(&mut root, counter);
    build_fields(&mut root)?;
    Ok(NamespaceTree { root })
}

/// Directory components plus the file stem, relative to the start
/// directory.
pub fn relative_segments(path: &Path, start_dir: &Path) -> Vec<String> {
    let rel = path.strip_prefix(start_dir).unwrap_or(path);
    let mut segments: Vec<String> = rel
        .parent()
        .map(|parent| {
            parent
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    if let Some(stem) = rel.file_stem() {
        segments.push(stem.to_string_lossy().into_owned());
    }
    segments
}

fn common_prefix_len(entries: &[(Vec<String>, &FileInfo)]) -> usize {
    let Some((first, _)) = entries.first() else {
        return 0;
    };
    let mut len = first.len();
    for (segments, _) in &entries[1..] {
        let shared = first
            .iter()
            .zip(segments.iter())
            .take_while(|(a, b)| a == b)
            .count();
        len = len.min(shared);
    }
    len
}

fn insert(root: &mut NamespaceNode, segments: &[String], file: &FileInfo) {
    let mut node = root;
    for segment in segments {
        node = node
            .children
            .entry(segment.clone())
            .or_insert_with(|| NamespaceNode::named(segment));
    }
    if !segments.is_empty() {
        node.file = Some(file.path.clone());
        node.doc = file.doc.clone();
    }
    node.commands.extend(file.commands.iter().cloned());
}

/// Iteratively replace pass-through interior nodes (exactly one child, no
/// file, no commands) by their child.
fn compress(node: &mut NamespaceNode) -> Result<(), Error> {
    let children = std::mem::take(&mut node.children);
    for (_, mut child) in children {
        compress(&mut child)?;
        while child.children.len() == 1
            && child.file.is_none()
            && child.commands.is_empty()
        {
            let (_, grandchild) = child.children.pop_first().expect("len checked");
            child = grandchild;
        }
        if node.children.contains_key(&child.name) {
            return Err(Error::InputMisuse(format!(
                "namespace segment {:?} is claimed twice after compression",
                child.name
            )));
        }
        node.children.insert(child.name.clone(), child);
    }
    Ok(())
}

fn mint(node: &mut NamespaceNode, counter: &mut NameCounter) {
    for child in node.children.values_mut() {
        child.type_name = counter.claim(&camel_ident(&child.name));
        child.var_name = var_ident(&child.type_name);
        mint(child, counter);
    }
}

fn build_fields(node: &mut NamespaceNode) -> Result<(), Error> {
    let mut fields = Vec::new();
    let mut seen = HashSet::new();
    let owner = if node.name.is_empty() {
        "the root namespace".to_string()
    } else {
        format!("namespace {:?}", node.name)
    };

    for command in &node.commands {
        let ident = snake_ident(&command.name);
        if !seen.insert(ident.clone()) {
            return Err(duplicate_field(&owner, &ident, Some(command)));
        }
        fields.push(FieldSpec {
            cli: ident.replace('_', "-"),
            ident,
            explicit_name: None,
            target: FieldTarget::Command(command.clone()),
        });
    }
    for child in node.children.values() {
        let ident = snake_ident(&child.name);
        if !seen.insert(ident.clone()) {
            return Err(duplicate_field(&owner, &ident, None));
        }
        let cli = ident.replace('_', "-");
        fields.push(FieldSpec {
            explicit_name: (cli != child.name).then(|| child.name.clone()),
            ident,
            cli,
            target: FieldTarget::Node {
                type_name: child.type_name.clone(),
                var_name: child.var_name.clone(),
            },
        });
    }
    node.fields = fields;

    for child in node.children.values_mut() {
        build_fields(child)?;
    }
    Ok(())
}

fn duplicate_field(
    owner: &str,
    ident: &str,
    command: Option<&CommandInfo>,
) -> Error {
    let suffix = command
        .map(|c| format!(" (declared in {})", c.file.display()))
        .unwrap_or_default();
    Error::InputMisuse(format!(
        "duplicate subcommand {ident:?} under {owner}{suffix}"
    ))
}

/// The CLI name of a declared identifier: kebab-cased.
pub fn cli_name(name: &str) -> String {
    name.to_snake_case().replace('_', "-")
}

/// A valid snake_case Rust identifier derived from an arbitrary segment.
pub fn snake_ident(segment: &str) -> String {
    let cleaned: String = segment
        .to_snake_case()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    let cleaned = cleaned.trim_matches('_').to_string();
    if cleaned.is_empty() {
        return "x".to_string();
    }
    if cleaned.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return format!("n{cleaned}");
    }
    if is_keyword(&cleaned) {
        return format!("{cleaned}_");
    }
    cleaned
}

/// An UpperCamelCase type identifier derived from an arbitrary segment:
/// non-alphanumerics discarded, `Node`-prefixed when empty or digit-leading.
pub fn camel_ident(segment: &str) -> String {
    let cleaned: String = segment
        .to_upper_camel_case()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();
    if cleaned.is_empty()
        || cleaned.chars().next().is_some_and(|c| c.is_ascii_digit())
    {
        return format!("Node{cleaned}");
    }
    if cleaned == "Self" {
        return "NodeSelf".to_string();
    }
    cleaned
}

/// The variable identifier: the lowercase-first form of the type
/// identifier.
fn var_ident(type_name: &str) -> String {
    let mut chars = type_name.chars();
    let lowered = match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    };
    if is_keyword(&lowered) {
        format!("{lowered}_")
    } else {
        lowered
    }
}

fn is_keyword(word: &str) -> bool {
    matches!(
        word,
        "as" | "async" | "await" | "box" | "break" | "const" | "continue"
            | "crate" | "dyn" | "else" | "enum" | "extern" | "false" | "fn"
            | "for" | "gen" | "if" | "impl" | "in" | "let" | "loop" | "match"
            | "mod" | "move" | "mut" | "pub" | "ref" | "return" | "self"
            | "static" | "struct" | "super" | "trait" | "true" | "try"
            | "type" | "unsafe" | "use" | "where" | "while" | "yield"
    )
}

#[cfg(test)]
mod namespace_tests {
    use super::*;

    use rstest::*;
    use targ_parse::CommandKind;

    fn command(name: &str, file: &str) -> CommandInfo {
        CommandInfo {
            name: name.to_string(),
            kind: CommandKind::Struct,
            file: PathBuf::from(file),
            description: String::new(),
            uses_ctx: false,
            returns_error: false,
            has_run: true,
            has_subcommands: false,
        }
    }

    fn file_info(path: &str, commands: &[&str]) -> FileInfo {
        FileInfo {
            path: PathBuf::from(path),
            base: Path::new(path)
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned(),
            doc: String::new(),
            mod_name: String::new(),
            commands: commands.iter().map(|name| command(name, path)).collect(),
        }
    }

    fn package(dir: &str, files: Vec<FileInfo>) -> PackageInfo {
        let commands = files
            .iter()
            .flat_map(|file| file.commands.iter().cloned())
            .collect();
        PackageInfo {
            package: crate::discovery::package_ident(Path::new(dir)),
            dir: PathBuf::from(dir),
            doc: String::new(),
            files,
            commands,
        }
    }

    #[test]
    fn single_file_commands_land_at_the_root_test() {
        let packages = vec![package(
            "/proj",
            vec![file_info("/proj/tasks.rs", &["Build"])],
        )];

        let tree = synthesize(&packages, Path::new("/proj"), &mut NameCounter::new())
            .unwrap();

        assert!(tree.root.children.is_empty());
        assert_eq!(tree.root.commands.len(), 1);
        assert_eq!(tree.root.fields.len(), 1);
        assert_eq!(tree.root.fields[0].cli, "build");
    }

    #[test]
    fn prefix_trim_and_compression_test() {
        let packages = vec![
            package(
                "/proj/tools/issues",
                vec![file_info("/proj/tools/issues/issues.rs", &["List"])],
            ),
            package(
                "/proj/tools/other",
                vec![
                    file_info("/proj/tools/other/bar.rs", &["Ship"]),
                    file_info("/proj/tools/other/foo.rs", &["Thing"]),
                ],
            ),
        ];

        let tree = synthesize(&packages, Path::new("/proj"), &mut NameCounter::new())
            .unwrap();

        // common prefix `tools/` is trimmed, the pass-through `issues`
        // directory collapses into its file node
        let names: Vec<&String> = tree.root.children.keys().collect();
        assert_eq!(names, vec!["issues", "other"]);

        let issues = &tree.root.children["issues"];
        assert_eq!(issues.file.as_deref(), Some(Path::new("/proj/tools/issues/issues.rs")));
        assert_eq!(issues.commands.len(), 1);

        let other = &tree.root.children["other"];
        assert!(other.file.is_none());
        let other_children: Vec<&String> = other.children.keys().collect();
        assert_eq!(other_children, vec!["bar", "foo"]);
    }

    #[test]
    fn chain_compression_is_iterative_test() {
        let packages = vec![package(
            "/proj/a/b/c",
            vec![
                file_info("/proj/a/b/c/deep.rs", &["One"]),
                file_info("/proj/top.rs", &["Two"]),
            ],
        )];

        let tree = synthesize(&packages, Path::new("/proj"), &mut NameCounter::new())
            .unwrap();

        // `a/b/c` all collapse into the `deep` file node
        let names: Vec<&String> = tree.root.children.keys().collect();
        assert_eq!(names, vec!["deep", "top"]);
    }

    #[test]
    fn minted_type_names_are_unique_test() {
        let packages = vec![package(
            "/proj",
            vec![
                file_info("/proj/ab/list.rs", &["One"]),
                file_info("/proj/ab/other.rs", &["Two"]),
                file_info("/proj/cd/list.rs", &["Three"]),
                file_info("/proj/cd/misc.rs", &["Four"]),
            ],
        )];

        let tree = synthesize(&packages, Path::new("/proj"), &mut NameCounter::new())
            .unwrap();

        let ab_list = &tree.root.children["ab"].children["list"];
        let cd_list = &tree.root.children["cd"].children["list"];
        assert_eq!(ab_list.type_name, "List");
        assert_eq!(cd_list.type_name, "List2");
        assert_eq!(cd_list.var_name, "list2");
    }

    #[test]
    fn compression_collisions_are_fatal_test() {
        // both pass-through directories collapse to a `list` node
        let packages = vec![package(
            "/proj",
            vec![
                file_info("/proj/ab/list.rs", &["One"]),
                file_info("/proj/cd/list.rs", &["Two"]),
            ],
        )];

        let result =
            synthesize(&packages, Path::new("/proj"), &mut NameCounter::new());

        assert!(matches!(result, Err(Error::InputMisuse(_))));
    }

    #[test]
    fn duplicate_sibling_fields_are_fatal_test() {
        let packages = vec![package(
            "/proj",
            vec![file_info("/proj/tasks.rs", &["Build", "Build"])],
        )];

        let result =
            synthesize(&packages, Path::new("/proj"), &mut NameCounter::new());

        assert!(matches!(result, Err(Error::InputMisuse(_))));
    }

    #[test]
    fn explicit_name_tag_when_kebab_differs_test() {
        let packages = vec![package(
            "/proj",
            vec![
                file_info("/proj/myDir/a.rs", &["One"]),
                file_info("/proj/myDir/b.rs", &["Two"]),
                file_info("/proj/plain/c.rs", &["Three"]),
                file_info("/proj/plain/d.rs", &["Four"]),
            ],
        )];

        let tree = synthesize(&packages, Path::new("/proj"), &mut NameCounter::new())
            .unwrap();

        let my_dir_field = tree
            .root
            .fields
            .iter()
            .find(|field| field.ident == "my_dir")
            .unwrap();
        assert_eq!(my_dir_field.cli, "my-dir");
        assert_eq!(my_dir_field.explicit_name.as_deref(), Some("myDir"));

        let plain_field = tree
            .root
            .fields
            .iter()
            .find(|field| field.ident == "plain")
            .unwrap();
        assert!(plain_field.explicit_name.is_none());
    }

    #[test]
    fn name_counter_never_reissues_test() {
        let mut counter = NameCounter::new();
        assert_eq!(counter.claim("Foo"), "Foo");
        assert_eq!(counter.claim("Foo2"), "Foo2");
        assert_eq!(counter.claim("Foo"), "Foo3");
        counter.reserve("Bar");
        assert_eq!(counter.claim("Bar"), "Bar2");
    }

    #[rstest(
        segment,
        expected,
        case("other", "Other"),
        case("my-dir", "MyDir"),
        case("9to5", "Node9to5"),
        case("---", "Node"),
        case("self", "NodeSelf")
    )]
    fn camel_ident_test(segment: &str, expected: &str) {
        assert_eq!(camel_ident(segment), expected);
    }

    #[rstest(
        segment,
        expected,
        case("other", "other"),
        case("myDir", "my_dir"),
        case("9to5", "n9to5"),
        case("loop", "loop_"),
        case("", "x")
    )]
    fn snake_ident_test(segment: &str, expected: &str) {
        assert_eq!(snake_ident(segment), expected);
    }

    #[test]
    fn cli_name_test() {
        assert_eq!(cli_name("Build"), "build");
        assert_eq!(cli_name("ConfigGen"), "config-gen");
    }

    #[test]
    fn ordering_is_deterministic_test() {
        let make = || {
            vec![package(
                "/proj",
                vec![
                    file_info("/proj/z/one.rs", &["A"]),
                    file_info("/proj/a/two.rs", &["B"]),
                ],
            )]
        };

        let tree_a =
            synthesize(&make(), Path::new("/proj"), &mut NameCounter::new())
                .unwrap();
        let tree_b =
            synthesize(&make(), Path::new("/proj"), &mut NameCounter::new())
                .unwrap();

        let names_a: Vec<String> = tree_a
            .root
            .postorder()
            .iter()
            .map(|node| node.type_name.clone())
            .collect();
        let names_b: Vec<String> = tree_b
            .root
            .postorder()
            .iter()
            .map(|node| node.type_name.clone())
            .collect();
        assert_eq!(names_a, names_b);
    }
}
