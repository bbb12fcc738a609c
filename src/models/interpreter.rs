//! Interpreter models
//!
//! Describes the JavaScript implementation a test file is run through.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported interpreter implementations
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InterpreterKind {
    #[default]
    #[value(name = "jsref")]
    JsRef,
    Node,
    #[value(name = "spidermonkey")]
    SpiderMonkey,
}

impl InterpreterKind {
    /// Name used on the command line and in the registry
    pub fn as_str(&self) -> &'static str {
        match self {
            InterpreterKind::JsRef => "jsref",
            InterpreterKind::Node => "node",
            InterpreterKind::SpiderMonkey => "spidermonkey",
        }
    }

    /// Binary used when no `--interp-path` is given
    pub fn default_path(&self) -> &'static str {
        match self {
            InterpreterKind::JsRef => "interp/run_js",
            InterpreterKind::Node => "node",
            InterpreterKind::SpiderMonkey => "js",
        }
    }
}

impl fmt::Display for InterpreterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSRef-only switches
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsRefOptions {
    pub parser: Option<String>,
    pub no_parasite: bool,
    pub simp: bool,
    pub stats: bool,
    pub byte: bool,
}

/// Interpreter descriptor stored with each job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interpreter {
    pub kind: InterpreterKind,
    pub path: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub jsref: JsRefOptions,
}

impl Interpreter {
    pub fn new(kind: InterpreterKind) -> Self {
        Self {
            kind,
            path: None,
            version: None,
            jsref: JsRefOptions::default(),
        }
    }

    pub fn with_path(mut self, path: Option<String>) -> Self {
        self.path = path.filter(|p| !p.is_empty());
        self
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version.filter(|v| !v.is_empty());
        self
    }

    pub fn with_jsref(mut self, options: JsRefOptions) -> Self {
        self.jsref = options;
        self
    }

    /// Resolved binary path
    pub fn program(&self) -> &str {
        self.path
            .as_deref()
            .unwrap_or_else(|| self.kind.default_path())
    }

    /// Program and arguments that run one test file
    pub fn command_for(&self, test_file: &str) -> (String, Vec<String>) {
        let mut args = Vec::new();

        match self.kind {
            InterpreterKind::JsRef => {
                if let Some(parser) = &self.jsref.parser {
                    args.push("-jsparser".to_string());
                    args.push(parser.clone());
                }
                if self.jsref.no_parasite {
                    args.push("-no-parasite".to_string());
                }
                if self.jsref.simp {
                    args.push("-simp".to_string());
                }
                if self.jsref.stats {
                    args.push("-stats".to_string());
                }
                if self.jsref.byte {
                    args.push("-byte".to_string());
                }
                args.push("-file".to_string());
                args.push(test_file.to_string());
            }
            InterpreterKind::Node => args.push(test_file.to_string()),
            InterpreterKind::SpiderMonkey => {
                args.push("-f".to_string());
                args.push(test_file.to_string());
            }
        }

        (self.program().to_string(), args)
    }
}

impl fmt::Display for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind, self.program())?;
        if let Some(version) = &self.version {
            write!(f, " v{version}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        assert_eq!(Interpreter::new(InterpreterKind::JsRef).program(), "interp/run_js");
        assert_eq!(
            Interpreter::new(InterpreterKind::Node)
                .with_path(Some("/opt/node/bin/node".to_string()))
                .program(),
            "/opt/node/bin/node"
        );
        assert_eq!(
            Interpreter::new(InterpreterKind::Node)
                .with_path(Some(String::new()))
                .program(),
            "node"
        );
    }

    #[test]
    fn test_jsref_command() {
        let interp = Interpreter::new(InterpreterKind::JsRef).with_jsref(JsRefOptions {
            parser: Some("parser/run.sh".to_string()),
            stats: true,
            ..Default::default()
        });

        let (program, args) = interp.command_for("t/a.js");
        assert_eq!(program, "interp/run_js");
        assert_eq!(
            args,
            vec!["-jsparser", "parser/run.sh", "-stats", "-file", "t/a.js"]
        );
    }

    #[test]
    fn test_node_ignores_jsref_options() {
        let interp = Interpreter::new(InterpreterKind::Node).with_jsref(JsRefOptions {
            stats: true,
            ..Default::default()
        });
        let (_, args) = interp.command_for("t/a.js");
        assert_eq!(args, vec!["t/a.js"]);
    }
}
