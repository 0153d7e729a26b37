//! doctree CLI tool
//!
//! Command-line access to a doctree-core workspace. Every command prints its result as JSON on
//! stdout; logs go to stderr (`RUST_LOG` controls the level, default `info`).

use clap::{Parser, Subcommand};
use doctree_core::{
    config::EngineConfig,
    impact::AnalysisMode,
    project::Workspace,
    properties::{CreateNodeRequest, DependencyType, DocumentType},
    search::SearchOptions,
};
use serde::Serialize;
use std::{fs, path::PathBuf};

#[derive(Parser)]
#[command(name = "doctree")]
#[command(author, version, about = "Manage hierarchical, versioned project documents", long_about = None)]
struct Cli {
    /// Projects root directory (overrides the config file)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "doctree.toml")]
    config: PathBuf,

    /// Project id
    #[arg(short, long, global = true, default_value = "default")]
    project: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a document node
    Create {
        #[arg(long)]
        title: String,

        /// feature_list, architecture, tech_design, background, requirements, meeting or task
        #[arg(long = "type")]
        doc_type: DocumentType,

        #[arg(long)]
        parent: Option<String>,

        /// File holding the initial body
        #[arg(long)]
        content_file: Option<PathBuf>,
    },

    /// Print the document tree
    Tree {
        #[arg(long)]
        root_id: Option<String>,

        #[arg(long, default_value_t = 5)]
        depth: usize,
    },

    /// Print a node's metadata and body
    Show { id: String },

    /// Replace a node's body, given the version it was read at
    Write {
        id: String,
        file: PathBuf,

        #[arg(long)]
        version: u64,
    },

    /// List a node's version history
    History {
        id: String,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Diff two versions of a node (0 = current)
    Diff { id: String, from: u64, to: u64 },

    /// Full-text search
    Search {
        query: String,

        #[arg(long)]
        case_sensitive: bool,

        #[arg(long)]
        whole_word: bool,

        #[arg(long)]
        regex: bool,

        /// Restrict to these document types
        #[arg(long = "type")]
        types: Vec<DocumentType>,

        #[arg(long, default_value_t = 0)]
        max: usize,
    },

    /// Suggest search terms
    Suggest {
        query: String,

        #[arg(long, default_value_t = 0)]
        limit: usize,
    },

    /// Add a dependency edge between two nodes
    Relate {
        from: String,
        to: String,

        /// data, interface or config
        #[arg(long, default_value = "data")]
        dependency: DependencyType,
    },

    /// Analyze which documents a change to this node affects
    Impact {
        id: String,

        /// parents, children, references, dependencies or all
        #[arg(long = "mode", default_value = "all")]
        modes: Vec<AnalysisMode>,
    },

    /// Delete a node
    Delete {
        id: String,

        /// Also delete every descendant
        #[arg(long)]
        cascade: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = EngineConfig::load(&cli.config)?;
    if let Some(root) = cli.root {
        config.projects_root = root;
    }
    let workspace = Workspace::new(config);
    let project = workspace.open_project(&cli.project)?;

    match cli.command {
        Commands::Create {
            title,
            doc_type,
            parent,
            content_file,
        } => {
            let content = match content_file {
                Some(path) => fs::read_to_string(path)?,
                None => String::new(),
            };
            let meta = project.tree().create_node(CreateNodeRequest {
                parent_id: parent,
                title,
                doc_type,
                content,
            })?;
            print_json(&meta)?;
        }

        Commands::Tree { root_id, depth } => {
            print_json(&project.tree().get_tree(root_id.as_deref(), depth)?)?;
        }

        Commands::Show { id } => {
            print_json(&project.tree().get_content(&id)?)?;
        }

        Commands::Write { id, file, version } => {
            let content = fs::read_to_string(file)?;
            let next = project.tree().update_content(&id, &content, version)?;
            print_json(&serde_json::json!({ "id": id, "version": next }))?;
        }

        Commands::History { id, limit } => {
            print_json(&project.tree().get_version_history(&id, limit)?)?;
        }

        Commands::Diff { id, from, to } => {
            print_json(&project.tree().compare_versions(&id, from, to)?)?;
        }

        Commands::Search {
            query,
            case_sensitive,
            whole_word,
            regex,
            types,
            max,
        } => {
            let options = SearchOptions {
                query,
                case_sensitive,
                whole_word,
                use_regex: regex,
                max_results: max,
                document_types: types,
                context_chars: 0,
            };
            print_json(&project.search().search_documents(&options)?)?;
        }

        Commands::Suggest { query, limit } => {
            print_json(&project.search().get_search_suggestions(&query, limit)?)?;
        }

        Commands::Relate {
            from,
            to,
            dependency,
        } => {
            print_json(
                &project
                    .relations()
                    .add_implicit_relation(&from, &to, dependency)?,
            )?;
        }

        Commands::Impact { id, modes } => {
            print_json(&project.impact().analyze(&id, &modes)?)?;
        }

        Commands::Delete { id, cascade } => {
            let removed = project.delete_node(&id, cascade)?;
            print_json(&serde_json::json!({ "deleted": removed }))?;
        }
    }

    Ok(())
}
