mod build;
mod control;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub const DEFAULT_ADDR: &str = "127.0.0.1:7455";

#[derive(Parser)]
#[command(
    name = "buildlink",
    version,
    about = "Out-of-process incremental build service",
    long_about = "Buildlink runs a long-lived build server that keeps per-project dirty-file \
                  and timestamp state, and recompiles only what changed. The same binary also \
                  acts as the client that submits build requests over the wire."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the build server
    Serve {
        /// Address to listen on
        #[arg(long, default_value = DEFAULT_ADDR)]
        addr: String,
        /// Directory for build bookkeeping. Defaults to ~/.buildlink/data.
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Project roots to watch for source changes
        #[arg(long, value_name = "PROJECT_PATH")]
        watch: Vec<PathBuf>,
        /// javac executable used by the Java builder
        #[arg(long)]
        javac: Option<PathBuf>,
    },
    /// Submit a build request for a project
    Build {
        /// Path to the project root (contains project.json)
        #[arg(value_name = "PROJECT_PATH")]
        project: PathBuf,
        /// Restrict the build to these modules; repeatable
        #[arg(short, long)]
        module: Vec<String>,
        /// Rebuild everything from scratch
        #[arg(long, conflicts_with_all = ["force", "clean"])]
        rebuild: bool,
        /// Recompile the requested scope ignoring timestamps
        #[arg(long, conflicts_with = "clean")]
        force: bool,
        /// Remove recorded outputs for the scope instead of compiling
        #[arg(long)]
        clean: bool,
        /// Server address
        #[arg(long, default_value = DEFAULT_ADDR)]
        addr: String,
    },
    /// Push global path variables and libraries to the server
    Setup {
        /// NAME=VALUE path variable; repeatable
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,
        /// NAME=PATH[,PATH...] global library; repeatable
        #[arg(long = "library", value_name = "NAME=PATHS")]
        libraries: Vec<String>,
        /// Server address
        #[arg(long, default_value = DEFAULT_ADDR)]
        addr: String,
    },
    /// Ask the server to shut down
    Shutdown {
        /// Cancel builds that are still running instead of letting them finish
        #[arg(long)]
        cancel_running: bool,
        /// Server address
        #[arg(long, default_value = DEFAULT_ADDR)]
        addr: String,
    },
}

/// Runs the CLI and returns the process exit code.
pub fn run() -> Result<i32, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let component = match &cli.command {
        Commands::Serve { .. } => "server",
        _ => "cli",
    };
    let _guard = buildlink_core::logging::init_logging(component, true);

    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Serve {
            addr,
            data_dir,
            watch,
            javac,
        } => {
            rt.block_on(serve::run(addr, data_dir, watch, javac))?;
            Ok(0)
        }
        Commands::Build {
            project,
            module,
            rebuild,
            force,
            clean,
            addr,
        } => {
            let build_type = if rebuild {
                buildlink_proto::BuildType::Rebuild
            } else if force {
                buildlink_proto::BuildType::ForcedCompilation
            } else if clean {
                buildlink_proto::BuildType::Clean
            } else {
                buildlink_proto::BuildType::Make
            };
            rt.block_on(build::run(project, module, build_type, addr))
        }
        Commands::Setup {
            vars,
            libraries,
            addr,
        } => {
            rt.block_on(control::setup(vars, libraries, addr))?;
            Ok(0)
        }
        Commands::Shutdown {
            cancel_running,
            addr,
        } => {
            rt.block_on(control::shutdown(cancel_running, addr))?;
            Ok(0)
        }
    }
}
