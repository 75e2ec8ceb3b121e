use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use file_workspace::config::{AppConfig, ServiceConfig, ViewConfig};
use file_workspace::event::EventHandler;
use file_workspace::remote::http::HttpDirectory;
use file_workspace::remote::DirectoryService;
use file_workspace::{logging, Entry, EntryId, Result, Signal, Workspace, WorkspaceError};

/// Command-line client for a remote file workspace.
#[derive(Parser, Debug)]
#[command(name = "fmw", version, about)]
struct Cli {
    /// Explicit config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory service base URL (overrides config)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Folder to operate in, as a slash-separated path of names
    #[arg(long = "in", global = true, default_value = "")]
    folder: String,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the folder, or search the whole store
    Ls {
        #[arg(long)]
        search: Option<String>,
        /// Sort key: updated, name, size, type
        #[arg(long)]
        sort: Option<String>,
        /// Only starred entries
        #[arg(long)]
        starred: bool,
    },
    /// Create a folder
    Mkdir { name: String },
    /// Rename an entry
    Rename { name: String, new_name: String },
    /// Toggle the star on entries
    Star { names: Vec<String> },
    /// Delete entries
    Rm { names: Vec<String> },
    /// Move entries to another folder (the root when `--to` is omitted)
    Mv {
        names: Vec<String>,
        #[arg(long, default_value = "")]
        to: String,
    },
    /// Export a folder as a zip archive
    Export {
        name: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

/// A workspace plus the channel its background tasks report on.
struct Session {
    ws: Workspace,
    events: EventHandler,
}

impl Session {
    /// Run until every background task has reported back.
    ///
    /// Returns the signals emitted on the way; the first refusal becomes an error.
    async fn settle(&mut self) -> Result<Vec<Signal>> {
        while !self.ws.is_idle() {
            let event = self.events.next().await?;
            self.ws.handle_event(event);
        }
        let signals = self.ws.take_signals();
        let refusal = signals.iter().find_map(|signal| match signal {
            Signal::Error(report) => Some(report),
            Signal::MutationFailed { failures, .. } => failures.first().map(|(_, r)| r),
            _ => None,
        });
        if let Some(report) = refusal {
            return Err(WorkspaceError::from_code(
                &report.code,
                Some(report.message.as_str()),
            ));
        }
        Ok(signals)
    }

    /// Open the folder at `path`, walking it one name at a time.
    async fn open_path(&mut self, path: &str) -> Result<()> {
        self.ws.open();
        self.settle().await?;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let folder = self.find(segment)?;
            self.ws.enter_folder(&folder.id)?;
            self.settle().await?;
        }
        Ok(())
    }

    /// Find a listed entry by stored or displayed name.
    fn find(&self, name: &str) -> Result<Entry> {
        self.ws
            .entries()
            .iter()
            .find(|e| e.name == name)
            .or_else(|| self.ws.entries().iter().find(|e| e.display_name() == name))
            .cloned()
            .ok_or_else(|| WorkspaceError::NotFound(name.to_string()))
    }

    fn find_all(&self, names: &[String]) -> Result<Vec<EntryId>> {
        names.iter().map(|n| self.find(n).map(|e| e.id)).collect()
    }

    /// Browse the destination picker to `path` and move the selection there.
    async fn move_selection_to(&mut self, path: &str) -> Result<()> {
        self.ws.open_picker();
        self.settle().await?;
        if self.ws.picker_breadcrumb(0) {
            self.settle().await?;
        }
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let id = self
                .ws
                .picker()
                .and_then(|p| p.folders().iter().find(|f| f.name == segment))
                .map(|f| f.id.clone())
                .ok_or_else(|| WorkspaceError::NotFound(segment.to_string()))?;
            self.ws.picker_enter(&id);
            self.settle().await?;
        }
        self.ws.confirm_picker()?;
        self.settle().await?;
        Ok(())
    }
}

fn print_listing(ws: &Workspace) {
    for entry in ws.visible().items() {
        let kind = if entry.is_folder() { "d" } else { "-" };
        let star = if entry.starred { "*" } else { " " };
        let size = entry
            .size_bytes
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}{} {:>10}  {}  {}  {}",
            kind,
            star,
            size,
            entry.updated_at.format("%Y-%m-%d %H:%M"),
            entry.id,
            entry.name
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let overrides = AppConfig {
        service: ServiceConfig {
            base_url: cli.base_url.clone(),
            ..Default::default()
        },
        view: match &cli.command {
            Commands::Ls { sort, starred, .. } => ViewConfig {
                sort_by: sort.clone(),
                star_only: starred.then_some(true),
                ..Default::default()
            },
            _ => ViewConfig::default(),
        },
        ..Default::default()
    };
    let config = AppConfig::load(cli.config.as_deref(), Some(&overrides));

    let base_url = config
        .base_url()
        .ok_or_else(|| WorkspaceError::Config("no service base_url configured".into()))?;
    let token = config.token();
    if token.is_none() {
        warn!(env = config.token_env(), "no token configured, sending anonymous requests");
    }
    let service: Arc<dyn DirectoryService> = Arc::new(HttpDirectory::new(
        base_url,
        token.as_deref(),
        config.timeout(),
    )?);
    debug!(base_url, "directory service ready");

    let events = EventHandler::new();
    let ws = Workspace::new(service, events.sender(), config.workspace_settings());
    let mut session = Session { ws, events };
    session.open_path(&cli.folder).await?;

    match cli.command {
        Commands::Ls { search, .. } => {
            if let Some(query) = search {
                session.ws.set_search(&query);
                session.settle().await?;
            }
            print_listing(&session.ws);
        }
        Commands::Mkdir { name } => {
            session.ws.create_folder(&name)?;
            session.settle().await?;
            print_listing(&session.ws);
        }
        Commands::Rename { name, new_name } => {
            let entry = session.find(&name)?;
            if session.ws.rename(&entry.id, &new_name)?.is_none() {
                info!(%name, "name unchanged");
            }
            session.settle().await?;
        }
        Commands::Star { names } => {
            for id in session.find_all(&names)? {
                session.ws.toggle_star(&id)?;
            }
            session.settle().await?;
        }
        Commands::Rm { names } => {
            let ids = session.find_all(&names)?;
            session.ws.delete_entries(ids)?;
            session.settle().await?;
        }
        Commands::Mv { names, to } => {
            session.ws.clear_selection();
            for id in session.find_all(&names)? {
                session.ws.toggle_select(id);
            }
            session.move_selection_to(&to).await?;
        }
        Commands::Export { name, out } => {
            let folder = session.find(&name)?;
            session.ws.export(&folder.id)?;
            let signals = session.settle().await?;
            for signal in signals {
                match signal {
                    Signal::ExportProgress(update) => {
                        debug!(file = %update.current_file, done = update.current, "exporting")
                    }
                    Signal::ExportReady(archive) => {
                        for skipped in &archive.skipped {
                            warn!(path = %skipped.path, reason = %skipped.reason.message, "skipped");
                        }
                        let dir = out.clone().unwrap_or_else(|| config.output_dir());
                        let path = archive.save(&dir)?;
                        println!("{}", path.display());
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(())
}
