use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use prompts::config::{DEFAULT_FILE, StoreConfig};
use prompts::{Controller, DocumentStore, ErrorKind, JsonFileStore, NoticeKind, StoreError};

#[derive(Debug, Parser)]
#[command(
    name = "prompts",
    about = "Browse and edit a categorized prompt library stored as JSON",
    version
)]
struct Cli {
    /// JSON file holding the prompt library.
    #[arg(long, global = true, default_value = DEFAULT_FILE)]
    file: PathBuf,
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List categories in file order.
    Categories(CategoriesArgs),

    /// List the keys of a category, sorted, optionally filtered.
    List(ListArgs),

    /// Print the prompt stored under a key.
    Show(EntryArgs),

    /// Add a new prompt to a category (created if missing).
    Add(AddArgs),

    /// Replace a prompt's value, optionally renaming its key.
    Update(UpdateArgs),

    /// Delete a prompt after confirmation.
    Delete(DeleteArgs),

    /// Interactive editor driven by one command per line.
    Shell,
}

#[derive(Debug, Args)]
struct CategoriesArgs {
    /// Emit JSON instead of one name per line.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct ListArgs {
    category: String,
    /// Case-insensitive substring filter on keys.
    #[arg(long)]
    search: Option<String>,
    /// Emit JSON instead of one key per line.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct EntryArgs {
    category: String,
    key: String,
}

#[derive(Debug, Args)]
struct AddArgs {
    category: String,
    key: String,
    value: String,
}

#[derive(Debug, Args)]
struct UpdateArgs {
    category: String,
    key: String,
    value: String,
    /// Store the value under this key instead, removing the old one.
    #[arg(long)]
    rename: Option<String>,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    category: String,
    key: String,
    /// Skip the confirmation prompt.
    #[arg(long)]
    yes: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    prompts::logging::init(cli.verbose).context("initializing logging")?;
    let store = JsonFileStore::new(StoreConfig::new(cli.file));
    match cli.command {
        Commands::Categories(args) => handle_categories(store, args),
        Commands::List(args) => handle_list(store, args),
        Commands::Show(args) => handle_show(store, args),
        Commands::Add(args) => handle_add(store, args),
        Commands::Update(args) => handle_update(store, args),
        Commands::Delete(args) => handle_delete(store, args),
        Commands::Shell => {
            let stdin = io::stdin();
            let stdout = io::stdout();
            let mut controller = Controller::open(store);
            run_shell(&mut controller, stdin.lock(), stdout.lock())
        }
    }
}

/// Loads for a one-shot command. A missing file is only acceptable when the command is
/// about to create it; any other load failure aborts so a bad file is never overwritten.
fn open_controller<S: DocumentStore>(store: S, creating: bool) -> Result<Controller<S>> {
    match store.load() {
        Ok(document) => Ok(Controller::with_document(store, document)),
        Err(StoreError::FileMissing { .. }) if creating => {
            Ok(Controller::with_document(store, Default::default()))
        }
        Err(err) => Err(err).context("loading prompt library"),
    }
}

fn handle_categories<S: DocumentStore>(store: S, args: CategoriesArgs) -> Result<()> {
    let controller = open_controller(store, false)?;
    let categories = controller.categories();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&categories)?);
    } else {
        for name in categories {
            println!("{name}");
        }
    }
    Ok(())
}

fn handle_list<S: DocumentStore>(store: S, args: ListArgs) -> Result<()> {
    let ListArgs {
        category,
        search,
        json,
    } = args;
    let mut controller = open_controller(store, false)?;
    enter_category(&mut controller, &category)?;
    if let Some(text) = search {
        controller.search(&text);
    }
    let keys = controller.visible_keys();
    if json {
        println!("{}", serde_json::to_string_pretty(keys)?);
    } else {
        for key in keys {
            println!("{key}");
        }
    }
    Ok(())
}

fn handle_show<S: DocumentStore>(store: S, args: EntryArgs) -> Result<()> {
    let mut controller = open_controller(store, false)?;
    enter_category(&mut controller, &args.category)?;
    controller.select_item(&args.key)?;
    let value = &controller.draft().value;
    print!("{value}");
    if !value.ends_with('\n') {
        println!();
    }
    Ok(())
}

fn handle_add<S: DocumentStore>(store: S, args: AddArgs) -> Result<()> {
    let mut controller = open_controller(store, true)?;
    controller.select_category(&args.category);
    let outcome = controller
        .add(&args.key, &args.value)
        .with_context(|| format!("adding to '{}'", args.category))?;
    println!("{outcome}");
    Ok(())
}

fn handle_update<S: DocumentStore>(store: S, args: UpdateArgs) -> Result<()> {
    let UpdateArgs {
        category,
        key,
        value,
        rename,
    } = args;
    let mut controller = open_controller(store, false)?;
    enter_category(&mut controller, &category)?;
    controller.select_item(&key)?;
    let new_key = rename.as_deref().unwrap_or(&key);
    let outcome = controller
        .update(new_key, &value)
        .with_context(|| format!("updating '{category}' -> '{key}'"))?;
    println!("{outcome}");
    Ok(())
}

fn handle_delete<S: DocumentStore>(store: S, args: DeleteArgs) -> Result<()> {
    let DeleteArgs { category, key, yes } = args;
    let mut controller = open_controller(store, false)?;
    enter_category(&mut controller, &category)?;
    controller.select_item(&key)?;

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut stderr = io::stderr();
    let outcome = controller.delete_with(|selection| {
        yes || confirm(
            &mut input,
            &mut stderr,
            &format!("Delete '{}' -> '{}'?", selection.category, selection.key),
        )
        .unwrap_or(false)
    })?;
    println!("{outcome}");
    Ok(())
}

fn enter_category<S: DocumentStore>(controller: &mut Controller<S>, name: &str) -> Result<()> {
    if controller.document().category(name).is_none() {
        anyhow::bail!("no category named '{name}'");
    }
    controller.select_category(name);
    Ok(())
}

fn confirm(input: &mut impl BufRead, output: &mut impl Write, question: &str) -> io::Result<bool> {
    write!(output, "{question} [y/N] ")?;
    output.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

/* ---------------------------------- Shell ---------------------------------- */

#[derive(Debug, Clone, PartialEq, Eq)]
enum ShellCommand {
    Categories,
    Category(String),
    Search(String),
    Select(String),
    Key(String),
    Value(String),
    Clear,
    Add,
    Update,
    Delete,
    Show,
    Flush,
    Reload,
    Help,
    Quit,
}

const SHELL_HELP: &str = "\
commands:
  categories          list categories
  category NAME       switch category (clears search and draft)
  search [TEXT]       filter keys; empty TEXT shows all
  select KEY          load an entry into the draft
  key TEXT            set the draft key
  value TEXT          set the draft value (\\n for a newline, \\\\ for a backslash)
  clear               empty the draft and drop the selection
  add                 store the draft as a new entry
  update              store the draft over the selected entry
  delete              delete the selected entry (asks first)
  show                print the current view
  flush               retry writing the file
  reload              re-read the file
  help                this text
  quit                leave";

fn parse_shell_line(line: &str) -> Result<Option<ShellCommand>, String> {
    let line = line.trim_start();
    if line.trim().is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_end_matches(['\r', '\n'])),
        None => (line.trim_end(), ""),
    };
    let required = |what: &str| -> Result<String, String> {
        let arg = rest.trim();
        if arg.is_empty() {
            Err(format!("'{word}' needs {what}"))
        } else {
            Ok(arg.to_owned())
        }
    };
    let command = match word {
        "categories" | "cats" => ShellCommand::Categories,
        "category" | "cat" => ShellCommand::Category(required("a category name")?),
        "search" | "find" => ShellCommand::Search(rest.trim().to_owned()),
        "select" | "sel" => ShellCommand::Select(required("a key")?),
        "key" => ShellCommand::Key(rest.trim().to_owned()),
        "value" | "val" => ShellCommand::Value(unescape(rest)),
        "clear" => ShellCommand::Clear,
        "add" => ShellCommand::Add,
        "update" => ShellCommand::Update,
        "delete" | "del" => ShellCommand::Delete,
        "show" | "ls" => ShellCommand::Show,
        "flush" | "save" => ShellCommand::Flush,
        "reload" => ShellCommand::Reload,
        "help" | "?" => ShellCommand::Help,
        "quit" | "exit" | "q" => ShellCommand::Quit,
        other => return Err(format!("unknown command '{other}' (try 'help')")),
    };
    Ok(Some(command))
}

/// `\n` becomes a newline and `\\` a single backslash; any other backslash is kept.
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn run_shell<S: DocumentStore>(
    controller: &mut Controller<S>,
    mut input: impl BufRead,
    mut output: impl Write,
) -> Result<()> {
    print_notice(controller, &mut output)?;
    render(controller, &mut output)?;

    loop {
        write!(output, "> ")?;
        output.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        let command = match parse_shell_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                writeln!(output, "! {message}")?;
                continue;
            }
        };
        tracing::debug!(?command, "shell command");

        // Failures are surfaced through the controller's notice.
        match command {
            ShellCommand::Quit => break,
            ShellCommand::Help => {
                writeln!(output, "{SHELL_HELP}")?;
                continue;
            }
            ShellCommand::Categories => {
                for name in controller.categories() {
                    writeln!(output, "  {name}")?;
                }
                continue;
            }
            ShellCommand::Show => {}
            ShellCommand::Category(name) => controller.select_category(&name),
            ShellCommand::Search(text) => controller.search(&text),
            ShellCommand::Select(key) => {
                let _ = controller.select_item(&key);
            }
            ShellCommand::Key(key) => {
                let value = controller.draft().value.clone();
                controller.edit_draft(&key, &value);
            }
            ShellCommand::Value(value) => {
                let key = controller.draft().key.clone();
                controller.edit_draft(&key, &value);
            }
            ShellCommand::Clear => controller.clear(),
            ShellCommand::Add => {
                let draft = controller.draft().clone();
                let _ = controller.add(&draft.key, &draft.value);
            }
            ShellCommand::Update => {
                let draft = controller.draft().clone();
                let _ = controller.update(&draft.key, &draft.value);
            }
            ShellCommand::Delete => {
                let _ = controller.delete_with(|selection| {
                    confirm(
                        &mut input,
                        &mut output,
                        &format!("Delete '{}' -> '{}'?", selection.category, selection.key),
                    )
                    .unwrap_or(false)
                });
            }
            ShellCommand::Flush => {
                let _ = controller.flush();
            }
            ShellCommand::Reload => {
                let _ = controller.reload();
            }
        }
        print_notice(controller, &mut output)?;
        render(controller, &mut output)?;
    }

    if controller.has_unsaved_changes() {
        writeln!(
            output,
            "! the last save failed; changes since then are not on disk"
        )?;
    }
    Ok(())
}

fn print_notice<S: DocumentStore>(
    controller: &mut Controller<S>,
    output: &mut impl Write,
) -> io::Result<()> {
    let Some(notice) = controller.take_notice() else {
        return Ok(());
    };
    match notice.kind {
        NoticeKind::Success => writeln!(output, "ok: {}", notice.message),
        NoticeKind::Info => writeln!(output, "-- {}", notice.message),
        NoticeKind::Error(kind) => writeln!(output, "! {}: {}", label(kind), notice.message),
    }
}

fn label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::FileMissing | ErrorKind::FileRead | ErrorKind::FileCorrupt => "load error",
        ErrorKind::FileWrite => "save error",
        _ => "warning",
    }
}

fn render<S: DocumentStore>(controller: &Controller<S>, output: &mut impl Write) -> io::Result<()> {
    let view = controller.snapshot();
    let category = view.active_category.as_deref().unwrap_or("-");
    if view.search.is_empty() {
        writeln!(output, "[{category}]")?;
    } else {
        writeln!(output, "[{category}] search: {}", view.search)?;
    }
    let selected = view.selection.as_ref().map(|s| s.key.as_str());
    for key in &view.visible_keys {
        let marker = if Some(key.as_str()) == selected { '*' } else { ' ' };
        writeln!(output, " {marker} {key}")?;
    }
    if !view.draft.is_empty() {
        writeln!(output, "key:   {}", view.draft.key)?;
        writeln!(output, "value: {}", view.draft.value)?;
    }
    Ok(())
}
