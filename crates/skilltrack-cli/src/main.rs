//! skilltrack CLI — authoring and dry-run tooling for quiz and training
//! definitions.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "skilltrack",
    version,
    about = "Quiz grading and training progress engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate quiz and training TOML files
    Validate {
        /// Path to a definition file or directory
        #[arg(long)]
        path: PathBuf,
    },

    /// Grade a set of answers against a quiz
    Grade {
        /// Quiz definition file
        #[arg(long)]
        quiz: PathBuf,

        /// JSON file mapping question ids to an option id or a list of ids
        #[arg(long)]
        answers: PathBuf,

        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Walk a learner through a training, passing every quiz
    Simulate {
        /// Training definition file
        #[arg(long)]
        training: PathBuf,

        /// Directory holding the quizzes the training references
        #[arg(long)]
        quizzes: PathBuf,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create starter config and example definitions
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("skilltrack=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { path } => commands::validate::execute(path),
        Commands::Grade {
            quiz,
            answers,
            format,
        } => commands::grade::execute(quiz, answers, format),
        Commands::Simulate {
            training,
            quizzes,
            config,
        } => commands::simulate::execute(training, quizzes, config).await,
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
