use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "podpool", version, about = "Run commands in reusable per-user worker pods")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run a command in a worker pod, starting one if none can be reused.
    Run {
        #[arg(short, long)]
        image: String,

        /// Run as this uid (default: the caller's).
        #[arg(long)]
        uid: Option<u32>,

        /// Worker pods are named after this user (default: the caller's).
        #[arg(long)]
        user: Option<String>,

        /// Print the runtime commands instead of running them.
        #[arg(long)]
        dry_run: bool,

        /// Command to run inside the pod.
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// Find and lock a reusable worker pod and print its UUID.
    GetWorker {
        image: String,
        uid: u32,

        #[arg(long)]
        user: Option<String>,
    },
    /// Attach to a pod by app name once it is running.
    Attach {
        app_name: String,

        /// File to create once attached.
        #[arg(long, value_name = "PATH")]
        done_path: Option<String>,
    },
    /// Stop idle worker pods.
    Gc {
        /// Minimum pod age, e.g. `10m` or `1h30m` (default from config).
        #[arg(long, value_name = "DURATION")]
        grace_period: Option<String>,

        #[arg(long)]
        dry_run: bool,
    },
    /// List every pod the runtime knows about.
    List,
}
