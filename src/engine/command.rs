//! Command templates for external processes
//!
//! A template is a program plus arguments containing `{name}` placeholders.
//! An argument that is exactly `{list}` for a list placeholder is replaced by
//! the whole list, so capability flags and input files can be spliced in.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::process::Stdio;
use tokio::process::Command;

/// External command with placeholder arguments
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Expand placeholders into the final argument list
    pub fn render(&self, vars: &Placeholders) -> Vec<String> {
        let mut rendered = Vec::with_capacity(self.args.len());

        for arg in &self.args {
            if let Some(list) = vars.list_for(arg) {
                rendered.extend(list.iter().cloned());
            } else {
                rendered.push(vars.substitute(arg));
            }
        }

        rendered
    }

    /// Build a process command; output is inherited when `verbose`
    pub fn to_command(&self, vars: &Placeholders, verbose: bool) -> Command {
        let mut command = Command::new(vars.substitute(&self.program));
        command.args(self.render(vars)).stdin(Stdio::null());

        if verbose {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        command
    }

    /// Render for logging
    pub fn display(&self, vars: &Placeholders) -> String {
        let mut parts = vec![vars.substitute(&self.program)];
        parts.extend(self.render(vars));
        parts.join(" ")
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Values substituted into a [`CommandTemplate`]
#[derive(Clone, Debug, Default)]
pub struct Placeholders {
    values: BTreeMap<String, String>,
    lists: BTreeMap<String, Vec<String>>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn with_list(mut self, name: &str, values: Vec<String>) -> Self {
        self.lists.insert(name.to_string(), values);
        self
    }

    fn list_for(&self, arg: &str) -> Option<&Vec<String>> {
        let name = arg.strip_prefix('{')?.strip_suffix('}')?;
        self.lists.get(name)
    }

    /// Replace every known `{name}` in one pass; substituted values are not
    /// scanned again and unknown placeholders stay as written
    pub fn substitute(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let tail = &rest[open + 1..];
            let known = tail
                .find('}')
                .and_then(|close| self.values.get(&tail[..close]).map(|v| (v, close)));

            match known {
                Some((value, close)) => {
                    out.push_str(value);
                    rest = &tail[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = tail;
                }
            }
        }

        out.push_str(rest);
        out
    }
}

/// Expand a per-entry template once for every `(key, value)` pair
pub fn expand_pairs<'a>(
    template: &[String],
    pairs: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> Vec<String> {
    let mut out = Vec::new();
    for (key, value) in pairs {
        let vars = Placeholders::new().with("key", key).with("value", value);
        out.extend(template.iter().map(|arg| vars.substitute(arg)));
    }
    out
}
