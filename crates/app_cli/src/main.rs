use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use config::{AppConfig, ConfigStore, default_data_dir};
use core_controller::{ControllerError, DraftAutosave, ImportMode, NotesController, load_draft};
use core_types::{Note, NoteDraft, NoteValidationError, UiLanguage};
use i18n::I18n;
use kv_store::{FileStore, KeyValueStore, StorageKey};
use note_query::{CategoryFilter, NoteQuery, SortOrder};
use note_repository::{ImportError, NoteRepository, RepositoryError};
use text_assist::{ImproveError, OpenAiTextImprover};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "noteapp", version, about = "Local notes with categories, search and statistics")]
struct Cli {
    /// Directory holding the note store, logs and config.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Overrides the configured interface language.
    #[arg(long, global = true, value_enum)]
    lang: Option<LangArg>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LangArg {
    Es,
    En,
}

impl From<LangArg> for UiLanguage {
    fn from(value: LangArg) -> Self {
        match value {
            LangArg::Es => UiLanguage::Es,
            LangArg::En => UiLanguage::En,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a note. Without --content the body is read from stdin and
    /// autosaved as a draft while typing.
    Add {
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// Start from the draft left by an interrupted session.
        #[arg(long)]
        resume: bool,
    },
    /// Replace a note; omitted fields keep their current value.
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    Delete {
        id: String,
    },
    List {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value = "date")]
        sort: SortOrder,
    },
    Stats,
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    Import {
        file: PathBuf,
        /// Append notes with unknown ids instead of replacing the collection.
        #[arg(long)]
        merge: bool,
        /// Read records in the early numeric-id format.
        #[arg(long)]
        legacy: bool,
    },
    Clear,
    /// Ask the text service for a clearer rewrite of a note.
    Improve {
        id: String,
        /// Store the rewrite as the note's new content.
        #[arg(long)]
        apply: bool,
    },
    Categories,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let _log_guard = init_local_logger(&data_dir.join("logs"));

    let config_store = match &cli.data_dir {
        Some(dir) => Ok(ConfigStore::from_dir(dir.join("config"))),
        None => ConfigStore::from_default_location(),
    };
    let config = match config_store.and_then(|store| store.load_or_init()) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to load config: {err:#}");
            AppConfig::default()
        }
    };

    let language = cli.lang.map(UiLanguage::from).unwrap_or(config.language);
    let i18n = I18n::new(language);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to create tokio runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    let shell = Shell {
        store: Arc::new(FileStore::in_dir(&data_dir, &config.storage.file_name)),
        config,
        i18n,
    };
    match runtime.block_on(shell.run(cli.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<ControllerError>() {
                Some(controller_err) => {
                    error!(error = %controller_err, "command failed");
                    eprintln!("{}", localized_message(&shell.i18n, controller_err));
                }
                None => {
                    error!("command failed: {err:#}");
                    eprintln!("{err:#}");
                }
            }
            ExitCode::FAILURE
        }
    }
}

struct Shell {
    store: Arc<dyn KeyValueStore>,
    config: AppConfig,
    i18n: I18n,
}

impl Shell {
    fn notes_key(&self) -> StorageKey {
        StorageKey::new(&self.config.storage.namespace, &self.config.storage.notes_key)
    }

    fn draft_key(&self) -> StorageKey {
        StorageKey::new(&self.config.storage.namespace, &self.config.storage.draft_key)
    }

    async fn controller(&self) -> NotesController {
        let repository = NoteRepository::new(Arc::clone(&self.store), self.notes_key());
        NotesController::open(repository, self.config.categories.clone()).await
    }

    async fn run(&self, command: Command) -> Result<()> {
        let mut controller = self.controller().await;
        match command {
            Command::Add {
                title,
                content,
                category,
                resume,
            } => {
                let mut draft = if resume {
                    load_draft(self.store.as_ref(), &self.draft_key())
                        .await
                        .unwrap_or_default()
                } else {
                    NoteDraft::default()
                };
                if let Some(title) = title {
                    draft.title = title;
                }
                if let Some(category) = category {
                    draft.category = category;
                }
                if draft.category.is_empty() {
                    draft.category = self.default_category();
                }

                let note = match content {
                    Some(content) => {
                        draft.content = content;
                        controller.add(draft).await?
                    }
                    None => self.add_from_stdin(&mut controller, draft).await?,
                };
                info!(id = %note.id, "note created from shell");
                println!("{} ({})", self.i18n.t("notes.saved"), note.id);
            }
            Command::Edit {
                id,
                title,
                content,
                category,
            } => {
                let current = controller
                    .get(&id)
                    .ok_or_else(|| ControllerError::NotFound(id.clone()))?;
                let mut draft = NoteDraft::from_note(current);
                if let Some(title) = title {
                    draft.title = title;
                }
                if let Some(content) = content {
                    draft.content = content;
                }
                if let Some(category) = category {
                    draft.category = category;
                }
                controller.update(&id, draft).await?;
                println!("{}", self.i18n.t("notes.updated"));
            }
            Command::Delete { id } => {
                controller.delete(&id).await?;
                println!("{}", self.i18n.t("notes.deleted"));
            }
            Command::List {
                category,
                search,
                sort,
            } => {
                let query = NoteQuery::default()
                    .with_category(
                        category
                            .as_deref()
                            .map(CategoryFilter::from_selection)
                            .unwrap_or_default(),
                    )
                    .with_search(search.unwrap_or_default())
                    .with_sort(sort);
                let view = controller.view(&query);
                if view.is_empty() {
                    println!("{}", self.i18n.t("notes.empty"));
                }
                for note in view {
                    println!("{}", render_note(note));
                }
            }
            Command::Stats => self.print_statistics(&controller),
            Command::Export { out } => {
                let text = controller.export()?;
                match out {
                    Some(path) => {
                        fs::write(&path, text)
                            .with_context(|| format!("failed to write {}", path.display()))?;
                        println!("{} ({})", self.i18n.t("notes.exported"), path.display());
                    }
                    None => println!("{text}"),
                }
            }
            Command::Import {
                file,
                merge,
                legacy,
            } => {
                let text = fs::read_to_string(&file)
                    .with_context(|| format!("failed to read {}", file.display()))?;
                let mode = if merge {
                    ImportMode::Merge
                } else {
                    ImportMode::Replace
                };
                let taken = if legacy {
                    controller.import_legacy(&text, mode).await?
                } else {
                    controller.import(&text, mode).await?
                };
                println!("{} ({taken})", self.i18n.t("notes.imported"));
            }
            Command::Clear => {
                controller.clear_all().await?;
                println!("{}", self.i18n.t("notes.cleared"));
            }
            Command::Improve { id, apply } => {
                if !self.config.ai.enabled {
                    anyhow::bail!("{}", self.i18n.t("ai.disabled"));
                }
                let improver = OpenAiTextImprover::new(self.config.ai.clone());
                let improved = controller.improve(&id, &improver).await?;
                println!("{}:\n{improved}", self.i18n.t("ai.improved"));

                if apply {
                    let current = controller
                        .get(&id)
                        .ok_or_else(|| ControllerError::NotFound(id.clone()))?;
                    let mut draft = NoteDraft::from_note(current);
                    draft.content = improved;
                    controller.update(&id, draft).await?;
                    println!("{}", self.i18n.t("notes.updated"));
                }
            }
            Command::Categories => {
                for category in controller.categories() {
                    println!("{} ({})", category.name, category.icon);
                }
            }
        }
        Ok(())
    }

    fn default_category(&self) -> String {
        self.config
            .categories
            .first()
            .map(|category| category.name.clone())
            .unwrap_or_else(|| "General".to_string())
    }

    /// Reads the note body line by line while an autosave task keeps the
    /// latest draft in the store. The draft is dropped once the note is
    /// committed and kept if committing fails.
    async fn add_from_stdin(
        &self,
        controller: &mut NotesController,
        mut draft: NoteDraft,
    ) -> Result<Note> {
        let autosave = DraftAutosave::start(
            Arc::clone(&self.store),
            &self.draft_key(),
            self.config.autosave.interval(),
        );

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
            if !draft.content.is_empty() {
                draft.content.push('\n');
            }
            draft.content.push_str(&line);
            autosave.update(draft.clone());
        }

        match controller.add(draft).await {
            Ok(note) => {
                autosave
                    .finish()
                    .await
                    .context("failed to remove autosaved draft")?;
                Ok(note)
            }
            Err(err) => {
                autosave.cancel();
                Err(err.into())
            }
        }
    }

    fn print_statistics(&self, controller: &NotesController) {
        let stats = controller.statistics();
        let t = |key: &'static str| self.i18n.t(key);
        println!("{}", t("stats.title"));
        println!("{}: {}", t("stats.total"), stats.total);
        println!("{}:", t("stats.by_category"));
        for (category, count) in &stats.by_category {
            println!("  {category}: {count}");
        }
        for (label, note) in [
            ("stats.longest", &stats.longest),
            ("stats.shortest", &stats.shortest),
        ] {
            if let Some(note) = note {
                println!(
                    "{}: {} ({} {})",
                    t(label),
                    display_title(note),
                    note.content_len(),
                    t("stats.chars")
                );
            }
        }
    }
}

fn message_key(err: &ControllerError) -> &'static str {
    match err {
        ControllerError::Validation(NoteValidationError::EmptyTitle) => "validation.title",
        ControllerError::Validation(NoteValidationError::EmptyContent) => "validation.content",
        ControllerError::Validation(NoteValidationError::UnknownCategory(_)) => {
            "validation.category"
        }
        ControllerError::NotFound(_) => "notes.not_found",
        ControllerError::Repository(RepositoryError::StorageWrite { .. })
        | ControllerError::Repository(RepositoryError::Serialize(_)) => "error.write",
        ControllerError::Import(ImportError::Parse(_)) => "error.import.parse",
        ControllerError::Import(ImportError::NotAnArray) => "error.import.not_array",
        ControllerError::Import(ImportError::BadRecordShape { .. }) => "error.import.bad_shape",
        ControllerError::Improve(err) => improve_message_key(err),
    }
}

fn improve_message_key(err: &ImproveError) -> &'static str {
    match err {
        ImproveError::MissingApiKey => "ai.missing_key",
        ImproveError::Authentication { .. } => "ai.auth",
        ImproveError::RateLimited { .. } => "ai.rate_limited",
        ImproveError::ServerUnavailable { .. } => "ai.server",
        ImproveError::EmptyResponse => "ai.empty",
        ImproveError::Api { .. } | ImproveError::Transport(_) => "ai.failed",
    }
}

/// Localized text for a failed command, followed by the service detail when
/// the text service reported one.
fn localized_message(i18n: &I18n, err: &ControllerError) -> String {
    let text = i18n.t(message_key(err));
    match err {
        ControllerError::Improve(
            ImproveError::Authentication { detail, .. }
            | ImproveError::RateLimited { detail }
            | ImproveError::ServerUnavailable { detail, .. }
            | ImproveError::Api { detail, .. },
        ) => format!("{text}: {detail}"),
        ControllerError::Improve(ImproveError::Transport(source)) => format!("{text}: {source}"),
        _ => text.to_string(),
    }
}

fn display_title(note: &Note) -> &str {
    if note.title.is_empty() {
        note.content.lines().next().unwrap_or_default()
    } else {
        &note.title
    }
}

fn render_note(note: &Note) -> String {
    let when = DateTime::<Utc>::from_timestamp_millis(note.timestamp)
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| note.timestamp.to_string());
    let preview: String = note.content.chars().take(80).collect();
    format!(
        "{}  [{}]  {}  {}\n    {}",
        note.id,
        note.category,
        when,
        display_title(note),
        preview.replace('\n', " ")
    )
}

fn init_local_logger(log_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    if let Err(err) = fs::create_dir_all(log_dir) {
        eprintln!("failed to create log dir `{}`: {err}", log_dir.display());
    }
    let file_appender = tracing_appender::rolling::daily(log_dir, "noteapp.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,noteapp=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_writer(writer)
        .init();

    guard
}
