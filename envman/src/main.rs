//! Environment variable manager.
//!
//! Reads and writes machine-wide and per-user variables through `reg.exe`
//! and keeps value history, variable groups and settings in a local data
//! directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use envman::apply::{apply_scheme, capture_scheme, rename_var, set_and_record};
use envman::core::parser::EnvVarRecord;
use envman::core::scope::Scope;
use envman::error::RegistryError;
use envman::exit_codes;
use envman::io::alternatives::AlternativesStore;
use envman::io::config::{AppConfig, CONFIG_FILE_NAME, default_data_dir, load_config};
use envman::io::groups::{GroupPatch, GroupsStore};
use envman::io::kv::JsonFileStore;
use envman::io::process::RegExeInvoker;
use envman::io::registry::{EnvSnapshot, EnvironmentRepository};
use envman::io::settings::{Settings, SettingsStore};
use envman::io::transfer::{export_snapshot, import_snapshot};
use envman::logging;

const MASK: &str = "********";

#[derive(Parser)]
#[command(
    name = "envman",
    version,
    about = "Manage system and user environment variables"
)]
struct Cli {
    /// Config file (default: `<data dir>/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding value history, groups and settings.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print variables of both scopes (or one with --system / --user).
    List {
        #[arg(long, conflicts_with = "user")]
        system: bool,
        #[arg(long)]
        user: bool,
        /// Emit JSON instead of NAME=VALUE lines.
        #[arg(long)]
        json: bool,
        /// Do not mask values of sensitive variables.
        #[arg(long)]
        show_secrets: bool,
    },
    /// Set a variable (stored as REG_EXPAND_SZ) and remember the value.
    Set {
        name: String,
        value: String,
        #[arg(long)]
        system: bool,
        /// Note to attach to the remembered value.
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Delete a variable.
    Delete {
        name: String,
        #[arg(long)]
        system: bool,
    },
    /// Rename a variable, carrying its value history along.
    Rename {
        old: String,
        new: String,
        #[arg(long)]
        system: bool,
    },
    /// Exit 0 when elevated, 3 otherwise.
    CheckAdmin,
    /// Write all variables to a JSON file.
    Export { path: PathBuf },
    /// Read a JSON file written by `export`; with --apply, set every variable in it.
    Import {
        path: PathBuf,
        #[arg(long)]
        apply: bool,
    },
    /// Remembered values per variable.
    #[command(subcommand)]
    Alt(AltCommand),
    /// Variable groups and their schemes.
    #[command(subcommand)]
    Group(GroupCommand),
    /// Application settings.
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Subcommand)]
enum AltCommand {
    List {
        name: String,
        #[arg(long)]
        system: bool,
    },
    Add {
        name: String,
        value: String,
        #[arg(long, default_value = "")]
        note: String,
        #[arg(long)]
        system: bool,
    },
    Remove {
        name: String,
        value: String,
        #[arg(long)]
        system: bool,
    },
    Clear {
        name: String,
        #[arg(long)]
        system: bool,
    },
}

#[derive(Subcommand)]
enum GroupCommand {
    List,
    Add {
        name: String,
        #[arg(long)]
        system: bool,
        /// Variable to include; repeatable.
        #[arg(long = "var")]
        vars: Vec<String>,
    },
    Delete {
        id: String,
    },
    /// Save the group's current registry values as a new scheme.
    Capture {
        group: String,
        name: String,
    },
    SchemeDelete {
        group: String,
        scheme: String,
    },
    /// Write a scheme's values to the registry and mark it active.
    Apply {
        group: String,
        scheme: String,
    },
}

#[derive(Subcommand)]
enum SettingsCommand {
    Show,
    /// Keys: theme, layout, sensitive-fields, sensitive-keywords, export-path, auto-open-folder.
    Set {
        key: String,
        value: String,
    },
    Reset,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_code_for(&err));
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let denied = err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<RegistryError>(),
            Some(RegistryError::Permission { .. })
        )
    });
    if denied {
        exit_codes::PERMISSION_DENIED
    } else {
        exit_codes::FAILED
    }
}

/// Resolved paths, config and storage for one invocation.
struct App {
    config: AppConfig,
    kv: JsonFileStore,
}

impl App {
    fn open(cli: &Cli) -> Result<Self> {
        let config_path = match (&cli.config, &cli.data_dir) {
            (Some(path), _) => path.clone(),
            (None, Some(dir)) => dir.join(CONFIG_FILE_NAME),
            (None, None) => default_data_dir()?.join(CONFIG_FILE_NAME),
        };
        let config = load_config(&config_path)?;
        let data_dir = config.resolve_data_dir(cli.data_dir.as_deref())?;
        Ok(Self {
            config,
            kv: JsonFileStore::new(data_dir),
        })
    }

    fn repo(&self) -> EnvironmentRepository<RegExeInvoker> {
        EnvironmentRepository::new(self.config.registry.invoker())
    }

    fn alternatives(&self) -> Result<AlternativesStore<&JsonFileStore>> {
        AlternativesStore::load(&self.kv).context("load alternatives")
    }

    fn groups(&self) -> Result<GroupsStore<&JsonFileStore>> {
        GroupsStore::load(&self.kv).context("load groups")
    }

    fn settings(&self) -> Result<SettingsStore<&JsonFileStore>> {
        SettingsStore::load(&self.kv).context("load settings")
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let app = App::open(&cli)?;
    match cli.command {
        Command::List {
            system,
            user,
            json,
            show_secrets,
        } => cmd_list(&app, system, user, json, show_secrets)?,
        Command::Set {
            name,
            value,
            system,
            note,
        } => {
            let mut alternatives = app.alternatives()?;
            set_and_record(
                &app.repo(),
                &mut alternatives,
                Scope::from_is_system(system),
                &name,
                &value,
                &note,
            )?;
        }
        Command::Delete { name, system } => {
            app.repo().delete_var(&name, Scope::from_is_system(system))?;
        }
        Command::Rename { old, new, system } => {
            let mut alternatives = app.alternatives()?;
            rename_var(
                &app.repo(),
                &mut alternatives,
                Scope::from_is_system(system),
                &old,
                &new,
            )?;
        }
        Command::CheckAdmin => {
            let elevated = app.repo().check_admin_privileges();
            println!("{elevated}");
            if !elevated {
                return Ok(exit_codes::NOT_ELEVATED);
            }
        }
        Command::Export { path } => {
            let snapshot = app.repo().query_all()?;
            export_snapshot(&path, &snapshot)?;
            println!("{}", path.display());
        }
        Command::Import { path, apply } => cmd_import(&app, &path, apply)?,
        Command::Alt(command) => cmd_alt(&app, command)?,
        Command::Group(command) => cmd_group(&app, command)?,
        Command::Settings(command) => cmd_settings(&app, command)?,
    }
    Ok(exit_codes::OK)
}

fn cmd_list(app: &App, system: bool, user: bool, json: bool, show_secrets: bool) -> Result<()> {
    let settings = app.settings()?;
    let mut snapshot = app.repo().query_all()?;
    if !show_secrets {
        mask_sensitive(&mut snapshot, settings.settings());
    }
    if system {
        snapshot.user_vars.clear();
    }
    if user {
        snapshot.system_vars.clear();
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&snapshot).context("serialize snapshot")?
        );
        return Ok(());
    }
    for scope in Scope::ALL {
        let vars = snapshot.vars(scope);
        if (scope.is_system() && user) || (!scope.is_system() && system) {
            continue;
        }
        println!("[{scope}]");
        for EnvVarRecord { name, value } in vars {
            println!("{name}={value}");
        }
    }
    Ok(())
}

fn mask_sensitive(snapshot: &mut EnvSnapshot, settings: &Settings) {
    for record in snapshot
        .system_vars
        .iter_mut()
        .chain(snapshot.user_vars.iter_mut())
    {
        if settings.is_sensitive(&record.name) {
            record.value = MASK.to_string();
        }
    }
}

fn cmd_import(app: &App, path: &Path, apply: bool) -> Result<()> {
    let snapshot = import_snapshot(path)?;
    if !apply {
        for scope in Scope::ALL {
            for record in snapshot.vars(scope) {
                println!("would set [{scope}] {}", record.name);
            }
        }
        return Ok(());
    }
    let repo = app.repo();
    let mut alternatives = app.alternatives()?;
    for scope in Scope::ALL {
        for record in snapshot.vars(scope) {
            set_and_record(
                &repo,
                &mut alternatives,
                scope,
                &record.name,
                &record.value,
                "imported",
            )?;
        }
    }
    Ok(())
}

fn cmd_alt(app: &App, command: AltCommand) -> Result<()> {
    let mut alternatives = app.alternatives()?;
    match command {
        AltCommand::List { name, system } => {
            for item in alternatives.get_alternatives(Scope::from_is_system(system), &name) {
                if item.note.is_empty() {
                    println!("{}", item.value);
                } else {
                    println!("{}\t# {}", item.value, item.note);
                }
            }
        }
        AltCommand::Add {
            name,
            value,
            note,
            system,
        } => alternatives.add_alternative(Scope::from_is_system(system), &name, &value, &note)?,
        AltCommand::Remove {
            name,
            value,
            system,
        } => alternatives.remove_alternative(Scope::from_is_system(system), &name, &value)?,
        AltCommand::Clear { name, system } => {
            alternatives.remove_all_alternatives(Scope::from_is_system(system), &name)?;
        }
    }
    Ok(())
}

fn cmd_group(app: &App, command: GroupCommand) -> Result<()> {
    let mut groups = app.groups()?;
    match command {
        GroupCommand::List => {
            for group in groups.groups() {
                let active = group.active_scheme().map_or("-", |s| s.name.as_str());
                println!(
                    "{}\t{}\t[{}]\tvars: {}\tactive: {}",
                    group.id,
                    group.name,
                    group.scope,
                    group.variables.join(","),
                    active
                );
                for scheme in &group.schemes {
                    println!("  {}\t{}", scheme.id, scheme.name);
                }
            }
        }
        GroupCommand::Add { name, system, vars } => {
            let id = groups.add_group(GroupPatch {
                scope: Some(Scope::from_is_system(system)),
                variables: Some(vars),
                ..GroupPatch::named(name)
            })?;
            println!("{id}");
        }
        GroupCommand::Delete { id } => groups.delete_group(&id)?,
        GroupCommand::Capture { group, name } => {
            let id = capture_scheme(&app.repo(), &mut groups, &group, &name)?;
            println!("{id}");
        }
        GroupCommand::SchemeDelete { group, scheme } => groups.delete_scheme(&group, &scheme)?,
        GroupCommand::Apply { group, scheme } => {
            let mut alternatives = app.alternatives()?;
            let report = apply_scheme(&app.repo(), &mut groups, &mut alternatives, &group, &scheme)?;
            for name in &report.written {
                println!("set [{}] {name}", report.scope);
            }
            for name in &report.missing {
                eprintln!("scheme has no value for {name}, left unchanged");
            }
        }
    }
    Ok(())
}

fn cmd_settings(app: &App, command: SettingsCommand) -> Result<()> {
    let mut settings = app.settings()?;
    match command {
        SettingsCommand::Show => {
            println!(
                "{}",
                serde_json::to_string_pretty(settings.settings()).context("serialize settings")?
            );
        }
        SettingsCommand::Set { key, value } => match key.as_str() {
            "theme" => settings.set_theme(value.parse().map_err(|e: String| anyhow!(e))?)?,
            "layout" => settings.set_layout_mode(value.parse().map_err(|e: String| anyhow!(e))?)?,
            "sensitive-fields" => settings.set_sensitive_fields_enabled(parse_bool(&value)?)?,
            "sensitive-keywords" => settings.set_sensitive_keywords(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect(),
            )?,
            "export-path" => settings.set_export_path(value)?,
            "auto-open-folder" => settings.set_auto_open_folder(parse_bool(&value)?)?,
            other => return Err(anyhow!("unknown setting {other:?}")),
        },
        SettingsCommand::Reset => settings.reset_to_default()?,
    }
    Ok(())
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw {
        "true" | "on" | "1" | "yes" => Ok(true),
        "false" | "off" | "0" | "no" => Ok(false),
        other => Err(anyhow!("expected true or false, got {other:?}")),
    }
}
