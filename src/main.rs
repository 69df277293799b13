mod card_cmd;
mod config;
mod context;
mod feedback;
mod git;
mod inject;
mod knowledge;
mod tokenizer;
mod write_core;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use config::Config;
use knowledge::{split_csv, NewCard};

#[derive(Parser)]
#[command(
    name = "feedfwd",
    version,
    about = "FeedFwd - surface reusable technique cards into coding sessions",
    long_about = "Keeps a small knowledge base of technique cards, injects the most relevant ones at session start, and adjusts their scores from what the session actually changed."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Session-start hook: print the injection block for a project
    Inject {
        /// Project directory (defaults to current directory)
        project_dir: Option<PathBuf>,
    },

    /// Session-end hook: score injected cards against the session's changes
    Feedback,

    /// Create a card (refuses duplicates unless --force)
    Add {
        /// Kebab-case card name
        #[arg(long)]
        name: String,

        /// Category directory, e.g. python, workflow
        #[arg(short, long)]
        category: String,

        /// URL, "pasted-text" or "screenshot"
        #[arg(short, long, default_value = "pasted-text")]
        source: String,

        /// Comma-separated keywords
        #[arg(short, long, default_value = "")]
        keywords: String,

        /// Comma-separated file globs, e.g. "*.py,pyproject.toml"
        #[arg(long, default_value = "")]
        file_patterns: String,

        /// Comma-separated task types
        #[arg(long, default_value = "")]
        task_types: String,

        #[arg(long, default_value = "")]
        insight: String,

        /// Text injected into sessions
        #[arg(short, long)]
        injection_text: String,

        #[arg(long, default_value = "")]
        example: String,

        /// Initial score (default 0.50)
        #[arg(long)]
        score: Option<f64>,

        /// Write even when a duplicate is detected
        #[arg(short, long)]
        force: bool,
    },

    /// Check whether a proposed card duplicates an existing one
    CheckDup {
        #[arg(long)]
        name: Option<String>,

        /// Comma-separated keywords
        #[arg(long)]
        keywords: Option<String>,

        /// Keyword overlap threshold (default from config)
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Count tokens in text
    CountTokens {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },

    /// Index maintenance
    Index {
        #[command(subcommand)]
        command: IndexCommands,
    },

    /// List cards grouped by category
    List,

    /// Search card metadata and content
    Search {
        #[arg(required = true)]
        term: Vec<String>,
    },

    /// Show a card in full
    Show { name: String },

    /// Delete a card and its index entry
    Remove { name: String },

    /// Knowledge base statistics
    Stats,

    /// Show or create configuration file
    Config {
        /// Create default config file
        #[arg(long)]
        init: bool,
    },
}

#[derive(Subcommand)]
enum IndexCommands {
    /// Parse a card file and (re)index it
    Add { path: PathBuf },
    /// Drop an index entry
    Remove { name: String },
    /// Regenerate the index from card files
    Rebuild,
    /// Print index entries
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { init } = cli.command {
        if init {
            let path = Config::create_default()?;
            println!("Created config: {}", path.display());
        } else {
            config::show_config()?;
        }
        return Ok(());
    }

    let config = Config::load()?;
    if !config.display.colors {
        colored::control::set_override(false);
    }
    let store = card_cmd::open_store(&config, cli.verbose);

    match cli.command {
        Commands::Inject { project_dir } => {
            inject::run(&store, project_dir, &config, cli.verbose)?;
        }

        Commands::Feedback => {
            feedback::run(&store, &config, cli.verbose)?;
        }

        Commands::Add {
            name,
            category,
            source,
            keywords,
            file_patterns,
            task_types,
            insight,
            injection_text,
            example,
            score,
            force,
        } => {
            let new = NewCard {
                name,
                source,
                category,
                insight,
                injection_text,
                example,
                keywords: split_csv(&keywords),
                file_patterns: split_csv(&file_patterns),
                task_types: split_csv(&task_types),
                score,
            };
            card_cmd::add(
                &store,
                new,
                force,
                config.duplicate.threshold,
                config.inject.max_injection_tokens,
            )?;
        }

        Commands::CheckDup {
            name,
            keywords,
            threshold,
        } => {
            card_cmd::check_dup(
                &store,
                name.as_deref(),
                keywords.as_deref(),
                threshold.unwrap_or(config.duplicate.threshold),
            )?;
        }

        Commands::CountTokens { text } => {
            card_cmd::count(&text, config.inject.max_injection_tokens)?;
        }

        Commands::Index { command } => match command {
            IndexCommands::Add { path } => {
                card_cmd::index_add(&store, &path, config.inject.max_injection_tokens)?;
            }
            IndexCommands::Remove { name } => {
                card_cmd::index_remove(&store, &name)?;
            }
            IndexCommands::Rebuild => {
                card_cmd::index_rebuild(&store)?;
            }
            IndexCommands::List => {
                card_cmd::index_list(&store)?;
            }
        },

        Commands::List => {
            card_cmd::list(&store, &config.display)?;
        }

        Commands::Search { term } => {
            card_cmd::search(&store, &term, &config.display)?;
        }

        Commands::Show { name } => {
            card_cmd::show(&store, &name, &config.display)?;
        }

        Commands::Remove { name } => {
            card_cmd::remove(&store, &name, &config.display)?;
        }

        Commands::Stats => {
            card_cmd::stats(&store, &config.display)?;
        }

        Commands::Config { .. } => unreachable!("handled before loading config"),
    }

    Ok(())
}
