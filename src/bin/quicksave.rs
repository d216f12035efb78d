//! Quicksave CLI - save, name and restore versions of individual files
//!
//! # Usage
//!
//! ```bash
//! # Create (or load) a database and remember it for later commands
//! quicksave init ~/.quicksave-db
//!
//! # Start tracking a file
//! quicksave register notes.txt -a notes
//!
//! # Save the current content as a new state
//! quicksave save notes.txt before-refactor
//!
//! # Go back to an earlier state (current content is kept under ~stash)
//! quicksave revert notes.txt before-refactor
//!
//! # Inspect the database
//! quicksave list
//! quicksave list -k notes -a
//! quicksave status notes.txt
//!
//! # Repair and prune
//! quicksave clean --clean-all
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use quicksave::utils::{self, format_bytes};
use quicksave::{
    AliasOutcome, AliasRequest, CleanOptions, DeleteOptions, GlobalConfig, Quicksave, QuicksaveBuilder,
    QuicksaveError, RegisterOptions, RevertOptions, SaveOptions, ShowResult,
};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

/// Quicksave - lightweight versioning for individual files
#[derive(Parser)]
#[command(name = "quicksave")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Global config file (defaults to the platform config directory)
    #[arg(long, global = true, env = "QUICKSAVE_CONFIG")]
    config: Option<PathBuf>,

    /// Database to operate on (defaults to the one recorded by `init`)
    #[arg(long, global = true, env = "QUICKSAVE_DB")]
    database: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a database, or load an existing one, and make it the default
    #[command(alias = "load-db")]
    Init {
        /// Database directory
        path: PathBuf,
    },

    /// Start tracking a file
    Register {
        /// File to register
        file: PathBuf,

        /// Aliases for the new file key
        #[arg(short = 'a', long = "alias")]
        aliases: Vec<String>,

        /// Aliases for the initial state
        #[arg(short = 's', long = "state-alias")]
        state_aliases: Vec<String>,

        /// Register even if the path already names a file key
        #[arg(long)]
        ignore_filepath: bool,
    },

    /// Save the current content of a file as a new state
    Save {
        /// File to save
        file: PathBuf,

        /// Aliases for the new state
        aliases: Vec<String>,

        /// File key (inferred from the path when omitted)
        #[arg(short = 'k', long)]
        file_key: Option<String>,

        /// Overwrite existing state aliases
        #[arg(short, long)]
        force: bool,

        /// Save even if identical content is already stored
        #[arg(long)]
        allow_duplicate: bool,
    },

    /// Restore a file to an earlier state
    Revert {
        /// File to overwrite
        file: PathBuf,

        /// State key or alias to restore
        state: String,

        /// File key (inferred from the path when omitted)
        #[arg(short = 'k', long)]
        file_key: Option<String>,

        /// Do not keep the current content under ~stash
        #[arg(long)]
        no_stash: bool,

        /// Revert even if the file already matches the state
        #[arg(short, long)]
        force: bool,
    },

    /// Create, repoint or delete an alias
    ///
    /// `alias <link> <target>` aliases a file key, `alias <link> <target> <filekey>`
    /// aliases a state key. With `-d`, `alias -d <link> [filekey]` removes one.
    Alias {
        /// Alias name
        link: String,

        /// Target key, or the owning file key when deleting a state alias
        second: Option<String>,

        /// Owning file key of a state alias
        third: Option<String>,

        /// Delete the alias instead of creating it
        #[arg(short, long)]
        delete: bool,
    },

    /// List file keys, or the states of one file key
    #[command(alias = "ls")]
    List {
        /// List the states of this file key
        #[arg(short = 'k', long)]
        file_key: Option<String>,

        /// Only show this key and its aliases
        target: Option<String>,

        /// Include aliases
        #[arg(short, long)]
        aliases: bool,
    },

    /// Delete a file key, or a state key of a file key
    DeleteKey {
        /// Owning file key; the target is then a state key
        #[arg(short = 'k', long)]
        file_key: Option<String>,

        /// Authoritative key to delete
        target: String,

        /// Destroy the key instead of moving it to ~trash
        #[arg(long)]
        no_save: bool,

        /// Drop the aliases of the ~trash entry being replaced
        #[arg(short = 'c', long)]
        clean_aliases: bool,
    },

    /// Resolve an alias to its authoritative key
    Lookup {
        /// Look up a state of this file key
        #[arg(short = 'k', long)]
        file_key: Option<String>,

        /// Key or alias to resolve
        target: String,
    },

    /// Restore the most recently deleted file key from ~trash
    Recover {
        /// Aliases for the recovered file key
        aliases: Vec<String>,
    },

    /// Check the database and prune what is no longer needed
    Clean {
        /// Purge ~trash file and state slots
        #[arg(short, long)]
        trash: bool,

        /// Collapse states with identical content
        #[arg(short, long)]
        deduplicate: bool,

        /// Reconcile the database directory with the manifest
        #[arg(short, long)]
        walk: bool,

        /// Remove aliases that no longer resolve
        #[arg(short, long)]
        aliases: bool,

        /// Remove states whose file key is gone
        #[arg(short, long)]
        states: bool,

        /// Rebuild the data file index
        #[arg(short, long)]
        rebuild: bool,

        /// Run every pass
        #[arg(long)]
        clean_all: bool,
    },

    /// Show which state, if any, a file currently matches
    Status {
        /// File to check
        file: PathBuf,

        /// File key (inferred from the path when omitted)
        #[arg(short = 'k', long)]
        file_key: Option<String>,
    },

    /// Read or change configuration flags
    Config {
        /// Flag name
        key: Option<String>,

        /// New value
        value: Option<String>,

        /// Use the global config file instead of the database
        #[arg(short, long)]
        global: bool,

        /// Clear the flag
        #[arg(short, long)]
        delete: bool,

        /// List every flag that is set
        #[arg(short, long)]
        list: bool,
    },

    /// Show details of a file key or one of its states
    Show {
        /// File key or alias
        file_key: String,

        /// State key or alias
        state: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        let message = match e.downcast_ref::<QuicksaveError>() {
            Some(err) => err.user_message(),
            None => format!("{:#}", e),
        };
        eprintln!("{}: {}", "Error".red().bold(), message);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => GlobalConfig::default_path()?,
    };
    let global = GlobalConfig::load(&config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    let session = Session { global, database: cli.database, json: cli.json };

    match cli.command {
        Commands::Init { path } => cmd_init(session, path),
        Commands::Register { file, aliases, state_aliases, ignore_filepath } => {
            let options = RegisterOptions {
                file_aliases: aliases,
                state_aliases,
                allow_duplicate_path: ignore_filepath,
            };
            cmd_register(session, file, options)
        }
        Commands::Save { file, aliases, file_key, force, allow_duplicate } => {
            let options = SaveOptions { file_key, aliases, force, allow_duplicate };
            cmd_save(session, file, options)
        }
        Commands::Revert { file, state, file_key, no_stash, force } => {
            let options = RevertOptions { file_key, stash: !no_stash, force };
            cmd_revert(session, file, state, options)
        }
        Commands::Alias { link, second, third, delete } => {
            cmd_alias(session, AliasRequest::from_args(link, second, third, delete)?)
        }
        Commands::List { file_key, target, aliases } => cmd_list(session, file_key, target, aliases),
        Commands::DeleteKey { file_key, target, no_save, clean_aliases } => {
            let options = DeleteOptions { save_to_trash: !no_save, clean_trash_aliases: clean_aliases };
            cmd_delete(session, file_key, target, options)
        }
        Commands::Lookup { file_key, target } => cmd_lookup(session, file_key, target),
        Commands::Recover { aliases } => cmd_recover(session, aliases),
        Commands::Clean { trash, deduplicate, walk, aliases, states, rebuild, clean_all } => {
            let options = if clean_all {
                CleanOptions::all()
            } else {
                CleanOptions {
                    orphan_states: states,
                    dangling_aliases: aliases,
                    rebuild_index: rebuild,
                    walk,
                    trash,
                    deduplicate,
                }
            };
            cmd_clean(session, options)
        }
        Commands::Status { file, file_key } => cmd_status(session, file, file_key),
        Commands::Config { key, value, global, delete, list } => cmd_config(session, key, value, global, delete, list),
        Commands::Show { file_key, state } => cmd_show(session, file_key, state),
    }
}

/// Shared state for every command
struct Session {
    global: GlobalConfig,
    database: Option<PathBuf>,
    json: bool,
}

impl Session {
    /// Open the database named on the command line, or the configured one
    fn open(self) -> Result<(Quicksave, bool)> {
        let builder = QuicksaveBuilder::new().global_config(self.global);
        let db = match self.database {
            Some(path) => builder.open(path)?,
            None => builder.open_configured()?,
        };
        Ok((db, self.json))
    }
}

/// Print `value` as JSON when requested, otherwise run `human`
fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".dimmed().to_string()
    } else {
        items.join(", ")
    }
}

/// Create or load a database and record it in the global config
fn cmd_init(session: Session, path: PathBuf) -> Result<()> {
    let path = utils::absolute_path(&path)?;
    let db = QuicksaveBuilder::new().global_config(session.global).init(path.clone())?;

    let mut global = db.global_config().clone();
    global.database = Some(path.clone());
    global.save()?;

    #[derive(Serialize)]
    struct InitOutput<'a> {
        database: &'a std::path::Path,
        file_keys: usize,
    }
    let file_keys = db.catalog().files.iter().filter(|(_, e)| e.is_authoritative()).count();
    let output = InitOutput { database: db.root(), file_keys };
    emit(session.json, &output, |out| {
        println!("{} Loaded database {}", "✓".green().bold(), out.database.display().to_string().cyan());
        println!("  File keys: {}", out.file_keys.to_string().cyan());
    })
}

/// Register a file
///
/// Mints a file key, aliases it by path and basename, and stores the
/// initial state.
fn cmd_register(session: Session, file: PathBuf, options: RegisterOptions) -> Result<()> {
    let (mut db, json) = session.open()?;
    let result = db.register(&file, options)?;
    emit(json, &result, |r| {
        println!("{} Registered {}", "✓".green().bold(), r.file_key.yellow().bold());
        println!("  File aliases: {}", list_or_none(&r.file_aliases));
        println!("  Initial state: {}", r.state_key.yellow());
        println!("  State aliases: {}", list_or_none(&r.state_aliases));
    })
}

fn cmd_save(session: Session, file: PathBuf, options: SaveOptions) -> Result<()> {
    let (mut db, json) = session.open()?;
    let result = db.save(&file, options)?;
    emit(json, &result, |r| {
        println!("{} Saved state {}", "✓".green().bold(), r.state_key.yellow().bold());
        if r.inferred {
            println!("  File key: {}", r.file_key.cyan());
        }
        println!("  Aliases: {}", list_or_none(&r.aliases));
    })
}

/// Restore a file to an earlier state
///
/// Unless `--no-stash` is given (or `revert.stash` is off), the content
/// being overwritten is kept under `~stash` first.
fn cmd_revert(session: Session, file: PathBuf, state: String, options: RevertOptions) -> Result<()> {
    let (mut db, json) = session.open()?;
    let result = db.revert(&file, &state, options)?;
    emit(json, &result, |r| {
        println!("{} Reverted to {}", "✓".green().bold(), r.state.yellow().bold());
        if r.inferred {
            println!("  File key: {}", r.file_key.cyan());
        }
        if r.stashed {
            println!("  Previous content kept as {}", "~stash".cyan());
        }
    })
}

fn cmd_alias(session: Session, request: AliasRequest) -> Result<()> {
    let (mut db, json) = session.open()?;
    let outcome = db.alias(request)?;
    emit(json, &outcome, |o| match o {
        AliasOutcome::Created { link, target, file_key } => match file_key {
            Some(fk) => println!("{} {} -> {}:{}", "✓".green().bold(), link.yellow(), fk.cyan(), target.cyan()),
            None => println!("{} {} -> {}", "✓".green().bold(), link.yellow(), target.cyan()),
        },
        AliasOutcome::Deleted { link, file_key } => match file_key {
            Some(fk) => println!("{} Deleted {}:{}", "✓".green().bold(), fk.cyan(), link.yellow()),
            None => println!("{} Deleted {}", "✓".green().bold(), link.yellow()),
        },
    })
}

fn cmd_list(session: Session, file_key: Option<String>, target: Option<String>, aliases: bool) -> Result<()> {
    let (db, json) = session.open()?;
    let rows = db.list(file_key.as_deref(), target.as_deref(), aliases)?;
    emit(json, &rows, |rows| {
        if rows.is_empty() {
            println!("{}", "No keys found".yellow());
            return;
        }
        for row in rows {
            match &row.alias_of {
                Some(link) => println!("  {} {} {}", row.name, "->".dimmed(), link.dimmed()),
                None => println!("  {}", row.name.yellow()),
            }
        }
    })
}

/// Delete a file key or a state key
///
/// Deleted keys go to `~trash` unless `--no-save` is given (or
/// `delete.trash` is off).
fn cmd_delete(session: Session, file_key: Option<String>, target: String, options: DeleteOptions) -> Result<()> {
    let (mut db, json) = session.open()?;
    let result = db.delete_key(file_key.as_deref(), &target, options)?;
    emit(json, &result, |r| {
        let what = match &r.state {
            Some(state) => format!("{}:{}", r.file_key, state),
            None => r.file_key.clone(),
        };
        println!("{} Deleted {}", "✓".green().bold(), what.yellow().bold());
        if r.trashed {
            println!("  Kept as {}", "~trash".cyan());
        }
    })
}

fn cmd_lookup(session: Session, file_key: Option<String>, target: String) -> Result<()> {
    let (db, json) = session.open()?;
    let key = db.lookup(file_key.as_deref(), &target)?;
    emit(json, &serde_json::json!({ "key": key }), |_| println!("{}", key))
}

fn cmd_recover(session: Session, aliases: Vec<String>) -> Result<()> {
    let (mut db, json) = session.open()?;
    let result = db.recover(&aliases)?;
    emit(json, &result, |r| {
        println!("{} Recovered as {}", "✓".green().bold(), r.file_key.yellow().bold());
        println!("  Migrated aliases: {}", list_or_none(&r.migrated));
        println!("  New aliases: {}", list_or_none(&r.aliases));
    })
}

/// Check the database and prune what is no longer needed
///
/// Passes run in a fixed order; each one only touches what the previous
/// ones left behind.
fn cmd_clean(session: Session, options: CleanOptions) -> Result<()> {
    if options.is_empty() {
        return Err(QuicksaveError::NoCleanOperationSelected.into());
    }
    let (mut db, json) = session.open()?;

    let progress = if json {
        None
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
        pb.set_message("Cleaning database...");
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    };

    let report = db.clean(options);
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    let report = report?;

    emit(json, &report, |r| {
        if r.is_clean() {
            println!("{} Database is clean", "✓".green().bold());
        } else {
            println!("{} Clean complete", "✓".green().bold());
        }
        let lines: [(&str, &[String]); 7] = [
            ("Orphaned states", &r.states),
            ("Dangling file aliases", &r.file_aliases),
            ("Dangling state aliases", &r.state_aliases),
            ("Untracked folders", &r.prune_folders),
            ("Untracked files", &r.prune_files),
            ("File keys without folder", &r.prune_filekeys),
            ("State keys without data", &r.prune_statekeys),
        ];
        for (label, items) in lines {
            if !items.is_empty() {
                println!("  {}: {}", label, items.join(", ").yellow());
            }
        }
        if r.rebuilt > 0 {
            println!("  Indexes rebuilt: {}", r.rebuilt.to_string().cyan());
        }
        if let Some(aliases) = r.trash_file {
            println!("  Purged ~trash file key ({} aliases)", aliases.to_string().cyan());
        }
        if let Some(trash) = r.trash_state {
            println!(
                "  Purged ~trash states: {} keys, {} aliases",
                trash.keys.to_string().cyan(),
                trash.aliases.to_string().cyan()
            );
        }
        for (removed, kept) in &r.deduplicate {
            println!("  Merged {} into {}", removed.yellow(), kept.cyan());
        }
        if r.forwarded > 0 {
            println!("  Aliases forwarded: {}", r.forwarded.to_string().cyan());
        }
        println!("  Time: {}", format_duration(Duration::from_millis(r.duration_ms)).to_string().cyan());
    })
}

fn cmd_status(session: Session, file: PathBuf, file_key: Option<String>) -> Result<()> {
    let (db, json) = session.open()?;
    let status = db.status(&file, file_key.as_deref())?;
    emit(json, &status, |s| {
        println!("File key: {}", s.file_key.yellow());
        match &s.state {
            Some(state) => println!("State: {}", state.green().bold()),
            None => println!("State: {}", "modified (not saved)".red()),
        }
    })
}

/// Read or change configuration flags
///
/// Without arguments (or with `--list`) every flag set at either tier is
/// shown. Values are written to the database unless `--global` is given.
fn cmd_config(
    session: Session,
    key: Option<String>,
    value: Option<String>,
    global: bool,
    delete: bool,
    list: bool,
) -> Result<()> {
    // Global-only edits do not need a database
    if global && !list {
        if let Some(key) = &key {
            let mut config = session.global.clone();
            return match (value, delete) {
                (Some(value), false) => {
                    config.flags.insert(key.clone(), value);
                    config.save()?;
                    Ok(())
                }
                (None, true) => {
                    if config.flags.remove(key).is_none() {
                        return Err(QuicksaveError::ConfigKeyNotSet {
                            key: key.clone(),
                            scope: "global",
                        }
                        .into());
                    }
                    config.save()?;
                    Ok(())
                }
                (None, false) => {
                    let value = config.flags.get(key).cloned();
                    print_config_value(session.json, key, value)
                }
                (Some(_), true) => Err(QuicksaveError::invalid_arguments("cannot set and delete a value at once").into()),
            };
        }
    }

    let (mut db, json) = session.open()?;
    match (key, value, delete) {
        (Some(key), Some(value), false) if !list => db.config_set(&key, &value, global).map_err(Into::into),
        (Some(key), None, true) if !list => db.config_clear(&key, global).map_err(Into::into),
        (Some(key), None, false) if !list => {
            let value = db.config_get(&key, false).or_else(|| db.config_get(&key, true));
            print_config_value(json, &key, value)
        }
        (None, None, false) => print_config_list(json, &db),
        (_, _, _) if list => print_config_list(json, &db),
        _ => Err(QuicksaveError::invalid_arguments("expected `config [key [value]] [--delete] [--global]`").into()),
    }
}

fn print_config_value(json: bool, key: &str, value: Option<String>) -> Result<()> {
    emit(json, &serde_json::json!({ "key": key, "value": value }), |_| match &value {
        Some(value) => println!("{}", value),
        None => println!("{}", "(not set)".dimmed()),
    })
}

fn print_config_list(json: bool, db: &Quicksave) -> Result<()> {
    let entries = db.config_list();
    emit(json, &entries, |entries| {
        if entries.is_empty() {
            println!("{}", "No flags set".dimmed());
        }
        for entry in entries {
            let effective = entry.database.as_ref().or(entry.global.as_ref());
            let scope = if entry.database.is_some() { "database" } else { "global" };
            if let Some(value) = effective {
                println!("  {} = {} {}", entry.key.yellow(), value.cyan(), format!("({})", scope).dimmed());
            }
        }
    })
}

/// Show details of a file key or one of its states
fn cmd_show(session: Session, file_key: String, state: Option<String>) -> Result<()> {
    let (db, json) = session.open()?;
    let details = db.show(&file_key, state.as_deref())?;
    emit(json, &details, |details| match details {
        ShowResult::File(f) => {
            println!("{}", format!("File key {}", f.file_key).blue().bold());
            println!("  Folder: {}", f.folder.display().to_string().cyan());
            println!("  Aliases: {}", list_or_none(&f.aliases));
            println!("  States: {}", list_or_none(&f.states));
            println!("  Data files: {}", f.datafiles);
        }
        ShowResult::State(s) => {
            println!("{}", format!("State {}:{}", s.file_key, s.state).blue().bold());
            println!("  Data file: {}", s.datafile.display().to_string().cyan());
            println!("  Size: {}", format_bytes(s.size).cyan());
            println!("  Created: {}", s.created_at.format("%Y-%m-%d %H:%M:%S"));
            println!("  Aliases: {}", list_or_none(&s.aliases));
        }
    })
}
