use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use pdfkernel::{Document, MemoryStore, NodeKind, ObjectId, ObjectSource, OpenMode, PdfError};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pdfkernel",
    about = "Inspect and edit the page tree of document snapshots",
    version,
    author
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show revisions, page count and page tree root
    Info {
        /// Input snapshot
        input: PathBuf,
    },

    /// List every page position with its object reference
    Pages {
        /// Input snapshot
        input: PathBuf,
    },

    /// Remove a page and save the result
    Remove {
        /// Input snapshot
        input: PathBuf,

        /// Page to remove (1-based)
        #[arg(short, long)]
        page: usize,

        /// Output snapshot
        #[arg(short, long)]
        output: PathBuf,

        /// Save the change as a new incremental revision
        #[arg(long)]
        incremental: bool,
    },

    /// Copy a page from another snapshot into this one
    Insert {
        /// Input snapshot
        input: PathBuf,

        /// Snapshot to take the page from
        #[arg(short, long)]
        from: PathBuf,

        /// Page of the source snapshot (1-based)
        #[arg(short, long)]
        page: usize,

        /// Position the page should end up at (1-based, past the end appends)
        #[arg(short, long)]
        at: usize,

        /// Output snapshot
        #[arg(short, long)]
        output: PathBuf,

        /// Save the change as a new incremental revision
        #[arg(long)]
        incremental: bool,
    },

    /// Report Count entries that disagree with the tree and ambiguous pages
    Check {
        /// Input snapshot
        input: PathBuf,
    },
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn open_snapshot(path: &Path, mode: OpenMode) -> Result<Document> {
    let store = MemoryStore::open(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    Document::open(store, mode).with_context(|| format!("Failed to open {}", path.display()))
}

fn write_snapshot(doc: &Document, path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
    );
    doc.clone_to(&mut writer)?;
    writer.flush()?;
    tracing::info!("wrote {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Info { input } => {
            let doc = open_snapshot(&input, OpenMode::ReadOnly)?;
            println!("Snapshot: {}", input.display());
            println!("Revisions: {}", doc.revision_count());
            println!(
                "Linearized: {}",
                if doc.is_linearized() { "yes" } else { "no" }
            );
            match doc.page_tree_root() {
                Some(root) => println!("Page tree root: {root}"),
                None => println!("Page tree root: none"),
            }
            println!("Pages: {}", doc.page_count());
        }

        Commands::Pages { input } => {
            let doc = open_snapshot(&input, OpenMode::ReadOnly)?;
            for position in 1..=doc.page_count() {
                let page = doc.get_page(position)?;
                println!("Page {position}: {}", page.id());
            }
        }

        Commands::Remove {
            input,
            page,
            output,
            incremental,
        } => {
            let mut doc = open_snapshot(&input, OpenMode::ReadWrite)?;
            doc.remove_page(page)
                .with_context(|| format!("Failed to remove page {page}"))?;
            doc.save(incremental)?;
            write_snapshot(&doc, &output)?;
            println!(
                "Removed page {page}, {} page(s) left, written to {}",
                doc.page_count(),
                output.display()
            );
        }

        Commands::Insert {
            input,
            from,
            page,
            at,
            output,
            incremental,
        } => {
            let source = open_snapshot(&from, OpenMode::ReadOnly)?;
            let source_page = source
                .get_page(page)
                .with_context(|| format!("{} has no page {page}", from.display()))?;
            let dict = source
                .resolve(source_page.id())
                .as_dict()
                .cloned()
                .with_context(|| format!("page {page} of {} is not a dictionary", from.display()))?;

            let mut doc = open_snapshot(&input, OpenMode::ReadWrite)?;
            let inserted =
                doc.insert_page(&dict, ObjectSource::foreign(&source, source_page.id()), at)?;
            let position = doc.page_position(&inserted)?;
            doc.save(incremental)?;
            write_snapshot(&doc, &output)?;
            println!(
                "Inserted page {page} of {} at position {position} as {}, written to {}",
                from.display(),
                inserted.id(),
                output.display()
            );
        }

        Commands::Check { input } => {
            let doc = open_snapshot(&input, OpenMode::ReadOnly)?;
            let problems = check(&doc)?;
            if problems.is_empty() {
                println!("No problems found");
            } else {
                for problem in &problems {
                    println!("{problem}");
                }
                bail!("{} problem(s) found", problems.len());
            }
        }
    }

    Ok(())
}

/// Lists wrong Count entries and pages listed more than once in one Kids array.
fn check(doc: &Document) -> Result<Vec<String>> {
    let mut problems = Vec::new();
    let Some(root) = doc.page_tree_root() else {
        return Ok(problems);
    };
    let locator = doc.locator();

    let mut visited = HashSet::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if !visited.insert(node) || !locator.classify(node).is_inner() {
            continue;
        }
        let real = locator.count_descendant_leaves(node, None);
        let stored = doc
            .resolve(node)
            .as_dict()
            .and_then(|dict| dict.get("Count"))
            .and_then(|count| count.as_integer());
        if stored != Some(real as i64) {
            problems.push(format!(
                "{node}: Count is {}, should be {real}",
                stored.map_or_else(|| "missing".to_string(), |count| count.to_string())
            ));
        }
        stack.extend(locator.kid_refs(node));
    }

    tracing::debug!("checked {} page tree node(s)", visited.len());

    let mut reported: HashSet<ObjectId> = HashSet::new();
    for position in 1..=doc.page_count() {
        let page = doc.get_page(position)?;
        if locator.classify(page.id()) != NodeKind::Leaf || reported.contains(&page.id()) {
            continue;
        }
        match doc.page_position(&page) {
            Ok(_) => {}
            Err(PdfError::AmbiguousPageTree) => {
                reported.insert(page.id());
                problems.push(format!("{}: listed more than once in one Kids array", page.id()));
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(problems)
}
