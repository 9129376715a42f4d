use serde::{Deserialize, Serialize};

/// One dispatchable command of a compiled bootstrap binary.
///
/// `name` is the full space-separated CLI path of the command, e.g.
/// `"other foo thing"` for a command nested two namespaces deep.
#[derive(Clone, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub struct CommandEntry {
    pub name: String,
    /// Cleaned doc text, possibly empty.
    #[serde(default)]
    pub description: String,
}

impl CommandEntry {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        CommandEntry {
            name: name.into(),
            description: description.into(),
        }
    }

    /// The space-separated tokens of the command path.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.name.split(' ')
    }
}

/// Report emitted by a bootstrap binary in response to `__list`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct CommandReport {
    pub commands: Vec<CommandEntry>,
}

impl CommandReport {
    pub fn new(commands: Vec<CommandEntry>) -> Self {
        CommandReport { commands }
    }

    /// True if `requested` addresses a command in this report.
    ///
    /// A match is a token-wise prefix in either direction: the request may
    /// name a namespace (`other`) containing commands, or a command followed
    /// by its own arguments (`clean --force`).
    pub fn matches(&self, requested: &[String]) -> bool {
        if requested.is_empty() {
            return false;
        }
        self.commands.iter().any(|entry| {
            let listed: Vec<&str> = entry.tokens().collect();
            listed
                .iter()
                .zip(requested.iter())
                .all(|(l, r)| *l == r.as_str())
        })
    }

    /// Merge several reports into one listing, sorted by command name.
    pub fn merged(reports: &[CommandReport]) -> Vec<CommandEntry> {
        let mut all: Vec<CommandEntry> = reports
            .iter()
            .flat_map(|r| r.commands.iter().cloned())
            .collect();
        all.sort();
        all.dedup();
        all
    }
}

#[cfg(test)]
mod report_tests {
    use super::*;

    #[test]
    fn serialize_report_test() {
        let report = CommandReport::new(vec![
            CommandEntry::new("build", "compiles the project."),
            CommandEntry::new("other ship", ""),
        ]);

        let json = serde_json::to_string(&report).unwrap();

        assert_eq!(
            json,
            r#"{"commands":[{"name":"build","description":"compiles the project."},{"name":"other ship","description":""}]}"#
        );
    }

    #[test]
    fn deserialize_report_without_description_test() {
        let report: CommandReport =
            serde_json::from_str(r#"{"commands":[{"name":"clean"}]}"#).unwrap();

        assert_eq!(report.commands.len(), 1);
        assert_eq!(report.commands[0].name, "clean");
        assert_eq!(report.commands[0].description, "");
    }

    #[test]
    fn matches_request_prefix_test() {
        let report = CommandReport::new(vec![CommandEntry::new(
            "other foo thing",
            "",
        )]);

        assert!(report.matches(&["other".to_string()]));
        assert!(report.matches(&[
            "other".to_string(),
            "foo".to_string(),
            "thing".to_string(),
        ]));
        assert!(!report.matches(&["build".to_string()]));
        assert!(!report.matches(&[]));
    }

    #[test]
    fn matches_command_with_trailing_args_test() {
        let report = CommandReport::new(vec![CommandEntry::new("clean", "")]);

        assert!(report.matches(&["clean".to_string(), "--force".to_string()]));
    }

    #[test]
    fn merged_sorts_and_dedups_test() {
        let a = CommandReport::new(vec![
            CommandEntry::new("zeta", ""),
            CommandEntry::new("alpha", "first"),
        ]);
        let b = CommandReport::new(vec![CommandEntry::new("alpha", "first")]);

        let merged = CommandReport::merged(&[a, b]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "alpha");
        assert_eq!(merged[1].name, "zeta");
    }
}
