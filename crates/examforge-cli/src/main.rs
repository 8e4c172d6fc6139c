//! examforge CLI: the user-facing command-line interface.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use examforge_core::model::Difficulty;

mod commands;

#[derive(Parser)]
#[command(name = "examforge", version, about = "Adaptive exam practice engine")]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store file (overrides `store_path` from the config)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// User whose progress is read and written
    #[arg(long, global = true, default_value = "local")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a starter config
    Init,

    /// Check the config file for problems
    ValidateConfig,

    /// List configured backends, routes and models
    ListModels {
        /// Filter to a specific backend
        #[arg(long)]
        backend: Option<String>,
    },

    /// Run the repair pipeline over generated text (file or stdin)
    Parse {
        /// File holding the raw generator output; stdin when omitted
        file: Option<PathBuf>,

        /// Print the parsed question as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate and store a question
    Ask {
        #[arg(long)]
        exam: String,

        #[arg(long, default_value = "medium")]
        difficulty: Difficulty,

        #[arg(long)]
        subject: Option<String>,

        #[arg(long)]
        topic: Option<String>,

        /// Model to generate with (default: `default_model` from the config)
        #[arg(long)]
        model: Option<String>,

        /// Print generated text as it arrives
        #[arg(long)]
        stream: bool,

        /// Print the stored question as JSON
        #[arg(long)]
        json: bool,
    },

    /// Start a mock-test session
    Start {
        #[arg(long)]
        exam: String,

        #[arg(long, default_value = "medium")]
        difficulty: Difficulty,

        #[arg(long)]
        model: Option<String>,

        /// Print the session as JSON
        #[arg(long)]
        json: bool,
    },

    /// Answer a question inside a session
    Answer {
        #[arg(long)]
        session: Uuid,

        #[arg(long)]
        question: Uuid,

        /// A-D or 1-4
        #[arg(long)]
        answer: String,

        /// Seconds spent on the question
        #[arg(long, default_value = "0")]
        time: u64,
    },

    /// Complete a session
    Finish {
        #[arg(long)]
        session: Uuid,
    },

    /// Show accuracy, subject breakdown and streak
    Stats {
        #[arg(long)]
        exam: String,

        #[arg(long)]
        json: bool,
    },

    /// Predict the chance of reaching a target rank
    Predict {
        #[arg(long)]
        exam: String,

        #[arg(long)]
        target_rank: u32,

        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("examforge=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let opts = commands::GlobalOpts {
        config: cli.config,
        store: cli.store,
        user: cli.user,
    };

    let result = match cli.command {
        Commands::Init => commands::init::execute(),
        Commands::ValidateConfig => commands::validate_config::execute(&opts),
        Commands::ListModels { backend } => commands::list_models::execute(&opts, backend).await,
        Commands::Parse { file, json } => commands::parse::execute(file, json),
        Commands::Ask {
            exam,
            difficulty,
            subject,
            topic,
            model,
            stream,
            json,
        } => {
            commands::ask::execute(
                &opts,
                commands::ask::AskArgs {
                    exam,
                    difficulty,
                    subject,
                    topic,
                    model,
                    stream,
                    json,
                },
            )
            .await
        }
        Commands::Start {
            exam,
            difficulty,
            model,
            json,
        } => commands::session::start(&opts, exam, difficulty, model, json).await,
        Commands::Answer {
            session,
            question,
            answer,
            time,
        } => commands::session::answer(&opts, session, question, answer, time).await,
        Commands::Finish { session } => commands::session::finish(&opts, session).await,
        Commands::Stats { exam, json } => commands::stats::execute(&opts, exam, json).await,
        Commands::Predict {
            exam,
            target_rank,
            json,
        } => commands::predict::execute(&opts, exam, target_rank, json).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
