//! Convert uncompressed NDF binary files to XML and back.
//!
//! Usage:
//!   ndfbin to-xml INPUT.ndfbin OUTPUT.xml
//!   ndfbin to-bin INPUT.xml OUTPUT.ndfbin
//!
//! Logging goes to stderr; set `RUST_LOG=trace` to see every node visit.

use anyhow::{bail, Context as _};
use bingrammar::{ndf, Tree, XmlElement};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use tracing_subscriber::EnvFilter;

const ROOT_ELEMENT: &str = "NdfBin";

fn usage() -> ! {
    eprintln!("Usage: ndfbin <to-xml|to-bin> <input> <output>");
    std::process::exit(2);
}

fn log_header(tree: &Tree) -> anyhow::Result<()> {
    for key in ["compressed", "toc0offset", "headerSize", "size", "uncompressedSize"] {
        tracing::info!("{key}: {}", tree.get(key)?);
    }
    tracing::info!("objects: {}", tree.len("toc0header.OBJE.objects")?);
    Ok(())
}

fn to_xml(input: &str, output: &str) -> anyhow::Result<()> {
    let file = File::open(input).with_context(|| format!("opening {input}"))?;
    let mut tree = Tree::new(ndf::file_grammar());
    tree.parse(&mut BufReader::new(file))
        .with_context(|| format!("parsing {input}"))?;
    log_header(&tree)?;
    let xml = tree.build_xml(ROOT_ELEMENT)?.to_xml_string()?;
    fs::write(output, xml).with_context(|| format!("writing {output}"))?;
    tracing::info!(nodes = tree.node_count(), "wrote {output}");
    Ok(())
}

fn to_bin(input: &str, output: &str) -> anyhow::Result<()> {
    let text = fs::read_to_string(input).with_context(|| format!("reading {input}"))?;
    let document = XmlElement::parse(&text)?;
    if document.name != ROOT_ELEMENT {
        bail!("{input}: root element is <{}>, expected <{ROOT_ELEMENT}>", document.name);
    }
    let mut tree = Tree::new(ndf::file_grammar());
    tree.parse_xml(&document)
        .with_context(|| format!("importing {input}"))?;
    let mut out = BufWriter::new(File::create(output).with_context(|| format!("creating {output}"))?);
    tree.build(&mut out).with_context(|| format!("building {output}"))?;
    out.flush()?;
    log_header(&tree)?;
    tracing::info!("wrote {output}");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [command, input, output] = args.as_slice() else {
        usage();
    };
    match command.as_str() {
        "to-xml" => to_xml(input, output),
        "to-bin" => to_bin(input, output),
        other => bail!("unknown command '{other}'"),
    }
}
