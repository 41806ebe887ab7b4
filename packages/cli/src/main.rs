mod app;
mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "shuati", about = "Local quiz banks, wrong-question notebooks and cloud backup", version)]
struct Cli {
    /// Data directory (default: platform data dir)
    #[arg(long, global = true, env = "SHUATI_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Question bank management
    #[command(subcommand)]
    Bank(BankCommand),

    /// Wrong-question notebooks
    #[command(subcommand)]
    Notebook(NotebookCommand),

    /// Wrong-question records
    #[command(subcommand)]
    Wrong(WrongCommand),

    /// Exam scoring and timed exams
    #[command(subcommand)]
    Exam(ExamCommand),

    /// Saved practice progress
    #[command(subcommand)]
    Progress(ProgressCommand),

    /// Export a complete backup archive
    Export {
        /// Output file (default: quiz_data_<date>.zip)
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Leave question banks out of the archive
        #[arg(long)]
        no_banks: bool,
    },

    /// Import a backup (complete .zip or user_data .db); replaces local user data
    Import {
        file: PathBuf,
        /// Skip the overwrite confirmation
        #[arg(long, short)]
        yes: bool,
    },

    /// Settings
    #[command(subcommand)]
    Settings(SettingsCommand),

    /// Cloud backup
    #[command(subcommand)]
    Sync(SyncCommand),

    /// Delete all local data
    Clear {
        #[arg(long, short)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum BankCommand {
    /// Import one or more bank archives
    Import { files: Vec<PathBuf> },
    /// List imported banks
    List,
    /// Delete a bank
    Delete { bank_id: String },
    /// Export a bank archive
    Export {
        bank_id: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum NotebookCommand {
    /// List notebooks with record counts
    List,
    /// Create a notebook
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Show the records of a notebook (id or name)
    Show { notebook: String },
    /// Delete a notebook and its records
    Delete { notebook: String },
}

#[derive(Subcommand)]
enum WrongCommand {
    /// Add a question to a notebook (increments the error count if already recorded)
    Add {
        question_id: String,
        /// Notebook id or name (default: the default notebook)
        #[arg(long)]
        notebook: Option<String>,
        /// Last answer, comma separated for multi-answer questions
        #[arg(long)]
        answer: Option<String>,
        #[arg(long)]
        remark: Option<String>,
        /// unknown | vague | mastered
        #[arg(long)]
        mastery: Option<String>,
    },
    /// Remove a record
    Remove { id: i64 },
    /// Edit the remark, error reason or mastery of a record
    Remark {
        id: i64,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        mastery: Option<String>,
    },
}

#[derive(Subcommand)]
enum ExamCommand {
    /// Score answers (QUESTION_ID=A or QUESTION_ID=A,C) against the given banks
    Score {
        /// Bank ids that make up the exam
        #[arg(long = "bank", required = true)]
        banks: Vec<String>,
        /// Answers as QUESTION_ID=LABELS
        #[arg(long = "answer")]
        answers: Vec<String>,
        /// Add wrongly answered questions to the default notebook and update stats
        #[arg(long)]
        record: bool,
    },
    /// Start a timed exam on one bank; it stays saved until submitted
    Start {
        bank_id: String,
        /// Time limit in minutes (default: the bank's own limit)
        #[arg(long)]
        minutes: Option<i64>,
    },
    /// Answer questions of the saved exam
    Answer {
        /// Answers as QUESTION_ID=LABELS
        #[arg(required = true)]
        answers: Vec<String>,
        /// Seconds spent since the last save
        #[arg(long)]
        elapsed: Option<i64>,
    },
    /// Score the saved exam and discard it
    Submit {
        #[arg(long)]
        record: bool,
    },
}

#[derive(Subcommand)]
enum ProgressCommand {
    /// Show saved progress and practice statistics
    Show,
    /// Discard the automatically saved practice
    Clear,
    /// Keep the current practice as manually saved progress
    Save,
    /// Restore manually saved progress
    Load {
        #[arg(long, short)]
        yes: bool,
    },
    /// Discard manually saved progress
    Discard,
}

#[derive(Subcommand)]
enum SettingsCommand {
    Get { key: String },
    /// Set a value (parsed as JSON, otherwise stored as a string)
    Set { key: String, value: String },
    List,
}

#[derive(Subcommand)]
enum SyncCommand {
    /// Save the server address and API key
    Configure { url: String, api_key: String },
    /// Upload a complete backup
    Push,
    /// Download the latest backup and import it
    Pull {
        #[arg(long, short)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut app = app::App::open(cli.data_dir)?;
    let format = &cli.format;

    match cli.command {
        Command::Bank(cmd) => match cmd {
            BankCommand::Import { files } => commands::bank::run_import(&mut app, &files, format)?,
            BankCommand::List => commands::bank::run_list(&app, format)?,
            BankCommand::Delete { bank_id } => commands::bank::run_delete(&mut app, &bank_id)?,
            BankCommand::Export { bank_id, output } => {
                commands::bank::run_export(&app, &bank_id, output)?
            }
        },
        Command::Notebook(cmd) => match cmd {
            NotebookCommand::List => commands::notebook::run_list(&app, format)?,
            NotebookCommand::Create { name, description } => {
                commands::notebook::run_create(&app, &name, &description, format)?
            }
            NotebookCommand::Show { notebook } => commands::notebook::run_show(&app, &notebook, format)?,
            NotebookCommand::Delete { notebook } => commands::notebook::run_delete(&app, &notebook)?,
        },
        Command::Wrong(cmd) => match cmd {
            WrongCommand::Add {
                question_id,
                notebook,
                answer,
                remark,
                mastery,
            } => commands::wrong::run_add(
                &app,
                &question_id,
                notebook.as_deref(),
                answer.as_deref(),
                remark,
                mastery.as_deref(),
            )?,
            WrongCommand::Remove { id } => commands::wrong::run_remove(&app, id)?,
            WrongCommand::Remark {
                id,
                text,
                reason,
                mastery,
            } => commands::wrong::run_remark(&app, id, text, reason, mastery.as_deref())?,
        },
        Command::Exam(cmd) => match cmd {
            ExamCommand::Score {
                banks,
                answers,
                record,
            } => commands::exam::run_score(&app, &banks, &answers, record, format)?,
            ExamCommand::Start { bank_id, minutes } => {
                commands::exam::run_start(&app, &bank_id, minutes, format)?
            }
            ExamCommand::Answer { answers, elapsed } => {
                commands::exam::run_answer(&app, &answers, elapsed, format)?
            }
            ExamCommand::Submit { record } => commands::exam::run_submit(&app, record, format)?,
        },
        Command::Progress(cmd) => match cmd {
            ProgressCommand::Show => commands::progress::run_show(&app, format)?,
            ProgressCommand::Clear => commands::progress::run_clear(&app)?,
            ProgressCommand::Save => commands::progress::run_save(&app)?,
            ProgressCommand::Load { yes } => commands::progress::run_load(&app, yes)?,
            ProgressCommand::Discard => commands::progress::run_discard(&app)?,
        },
        Command::Export { output, no_banks } => commands::data::run_export(&app, output, !no_banks)?,
        Command::Import { file, yes } => commands::data::run_import(&mut app, &file, yes, format)?,
        Command::Settings(cmd) => match cmd {
            SettingsCommand::Get { key } => commands::settings::run_get(&app, &key)?,
            SettingsCommand::Set { key, value } => commands::settings::run_set(&app, &key, &value)?,
            SettingsCommand::List => commands::settings::run_list(&app, format)?,
        },
        Command::Sync(cmd) => match cmd {
            SyncCommand::Configure { url, api_key } => {
                commands::sync::run_configure(&app, &url, &api_key)?
            }
            SyncCommand::Push => commands::sync::run_push(&app, format).await?,
            SyncCommand::Pull { yes } => commands::sync::run_pull(&mut app, yes, format).await?,
        },
        Command::Clear { yes } => commands::data::run_clear(&mut app, yes)?,
    }

    Ok(())
}
