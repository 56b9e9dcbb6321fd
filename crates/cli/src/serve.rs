use std::path::{Path, PathBuf};
use std::sync::Arc;

use buildlink_core::BuildService;
use buildlink_core::compiler::{BatchCompiler, JavacCompiler};
use buildlink_server::{BuildServer, spawn_watcher};
use tokio::net::TcpListener;
use tracing::info;

pub async fn run(
    addr: String,
    data_dir: Option<PathBuf>,
    watch: Vec<PathBuf>,
    javac: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = data_dir.unwrap_or_else(default_data_dir);
    let compiler: Arc<dyn BatchCompiler> = match javac {
        Some(executable) => Arc::new(JavacCompiler::with_executable(executable)),
        None => Arc::new(JavacCompiler::default()),
    };

    let service = Arc::new(BuildService::new(data_dir, compiler));
    let server = BuildServer::new(Arc::clone(&service));

    for root in watch {
        spawn_watcher(root, Arc::clone(&service), server.shutdown_token())?;
    }

    // Ctrl-C stops the accept loop; running builds finish on their own.
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    let listener = TcpListener::bind(&addr).await?;
    server.serve(listener).await?;
    Ok(())
}

fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".buildlink/data")
}
