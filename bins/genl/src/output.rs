//! Text and JSON output for command results.

use std::io::{self, Write};

use nlwire::netlink::genl::FamilyInfo;

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Output options.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputOptions {
    /// Show operations and multicast groups.
    pub details: bool,
    /// Pretty print JSON.
    pub pretty: bool,
}

/// Something that can be printed as text or JSON.
pub trait Printable {
    /// Print as plain text.
    fn print_text<W: Write>(&self, w: &mut W, opts: &OutputOptions) -> io::Result<()>;

    /// Convert to JSON value.
    fn to_json(&self) -> serde_json::Value;
}

/// Print a list of items in the specified format.
pub fn print_all<T: Printable>(
    items: &[T],
    format: OutputFormat,
    opts: &OutputOptions,
) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    match format {
        OutputFormat::Text => {
            for item in items {
                item.print_text(&mut stdout, opts)?;
            }
        }
        OutputFormat::Json => {
            let json: Vec<_> = items.iter().map(|i| i.to_json()).collect();
            if opts.pretty {
                serde_json::to_writer_pretty(&mut stdout, &json)?;
            } else {
                serde_json::to_writer(&mut stdout, &json)?;
            }
            writeln!(stdout)?;
        }
    }
    Ok(())
}

impl Printable for FamilyInfo {
    fn print_text<W: Write>(&self, w: &mut W, opts: &OutputOptions) -> io::Result<()> {
        writeln!(
            w,
            "Name: {}\n\tID: {:#x}  Version: {:#x}  header size: {}  max attribs: {}",
            self.name, self.id, self.version, self.hdr_size, self.max_attr
        )?;
        if !opts.details {
            return Ok(());
        }
        if !self.ops.is_empty() {
            writeln!(w, "\tcommands supported:")?;
            for op in &self.ops {
                let flags: Vec<&str> = op.flags.flags.iter().map(String::as_str).collect();
                writeln!(w, "\t\t#{}: ID-{:#x}  <{}>", op.id, op.id, flags.join(","))?;
            }
        }
        if !self.mcast_groups.is_empty() {
            writeln!(w, "\tmulticast groups:")?;
            for (name, id) in &self.mcast_groups {
                writeln!(w, "\t\tID-{:#x}  name: {}", id, name)?;
            }
        }
        Ok(())
    }

    fn to_json(&self) -> serde_json::Value {
        let ops: Vec<_> = self
            .ops
            .iter()
            .map(|op| {
                serde_json::json!({
                    "id": op.id,
                    "flags": op.flags.flags,
                })
            })
            .collect();
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "version": self.version,
            "hdrsize": self.hdr_size,
            "maxattr": self.max_attr,
            "ops": ops,
            "mcast_groups": self.mcast_groups,
        })
    }
}
