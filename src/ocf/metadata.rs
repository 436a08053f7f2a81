//! Agent self-description: parameter and action tables, rendered as OCF
//! resource-agent XML for `meta-data`.

use std::fmt::{self, Write};

/// One declared agent parameter
#[derive(Debug, Clone, Copy)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub required: bool,
    /// Must differ between instances of the agent
    pub unique: bool,
    pub default: Option<&'static str>,
    pub shortdesc: &'static str,
    pub longdesc: &'static str,
}

/// One advertised action with its default timeout
#[derive(Debug, Clone, Copy)]
pub struct ActionSpec {
    pub name: &'static str,
    pub timeout_secs: u32,
    pub interval_secs: Option<u32>,
    pub depth: Option<u32>,
    pub role: Option<&'static str>,
}

impl ActionSpec {
    pub const fn new(name: &'static str, timeout_secs: u32) -> Self {
        ActionSpec {
            name,
            timeout_secs,
            interval_secs: None,
            depth: None,
            role: None,
        }
    }

    pub const fn monitor(timeout_secs: u32, interval_secs: u32, role: Option<&'static str>) -> Self {
        ActionSpec {
            name: "monitor",
            timeout_secs,
            interval_secs: Some(interval_secs),
            depth: Some(0),
            role,
        }
    }
}

/// Timeouts shared by both agents
pub const VALIDATE_ALL_ACTION: ActionSpec = ActionSpec::new("validate-all", 10);
pub const META_DATA_ACTION: ActionSpec = ActionSpec::new("meta-data", 5);

#[derive(Debug, Clone, Copy)]
pub struct AgentMetadata {
    pub name: &'static str,
    pub shortdesc: &'static str,
    pub longdesc: &'static str,
    pub parameters: &'static [ParameterSpec],
    pub actions: &'static [ActionSpec],
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

impl AgentMetadata {
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn usage(&self) -> String {
        let mut names: Vec<&str> = self.actions.iter().map(|a| a.name).collect();
        names.dedup();
        format!("usage: {} {{{}}}\n", self.name, names.join("|"))
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        // Formatting into a String cannot fail
        let _ = self.write_xml(&mut xml);
        xml
    }

    fn write_xml(&self, xml: &mut String) -> fmt::Result {
        writeln!(xml, "<?xml version=\"1.0\"?>")?;
        writeln!(xml, "<!DOCTYPE resource-agent SYSTEM \"ra-api-1.dtd\">")?;
        writeln!(
            xml,
            "<resource-agent name=\"{}\" version=\"{}\">",
            escape(self.name),
            env!("CARGO_PKG_VERSION")
        )?;
        writeln!(xml, "  <version>1.0</version>")?;
        writeln!(xml, "  <longdesc lang=\"en\">{}</longdesc>", escape(self.longdesc))?;
        writeln!(xml, "  <shortdesc lang=\"en\">{}</shortdesc>", escape(self.shortdesc))?;

        writeln!(xml, "  <parameters>")?;
        for p in self.parameters {
            writeln!(
                xml,
                "    <parameter name=\"{}\" required=\"{}\" unique=\"{}\">",
                escape(p.name),
                u8::from(p.required),
                u8::from(p.unique)
            )?;
            writeln!(xml, "      <longdesc lang=\"en\">{}</longdesc>", escape(p.longdesc))?;
            writeln!(xml, "      <shortdesc lang=\"en\">{}</shortdesc>", escape(p.shortdesc))?;
            match p.default {
                Some(default) => writeln!(
                    xml,
                    "      <content type=\"string\" default=\"{}\"/>",
                    escape(default)
                )?,
                None => writeln!(xml, "      <content type=\"string\"/>")?,
            }
            writeln!(xml, "    </parameter>")?;
        }
        writeln!(xml, "  </parameters>")?;

        writeln!(xml, "  <actions>")?;
        for a in self.actions {
            write!(xml, "    <action name=\"{}\" timeout=\"{}s\"", a.name, a.timeout_secs)?;
            if let Some(interval) = a.interval_secs {
                write!(xml, " interval=\"{}s\"", interval)?;
            }
            if let Some(depth) = a.depth {
                write!(xml, " depth=\"{}\"", depth)?;
            }
            if let Some(role) = a.role {
                write!(xml, " role=\"{}\"", role)?;
            }
            writeln!(xml, " />")?;
        }
        writeln!(xml, "  </actions>")?;
        writeln!(xml, "</resource-agent>")
    }
}
