use std::path::PathBuf;

use buildlink_client::{BuildClient, SessionEvent};
use buildlink_proto::{BuildType, ExitCode, MessageKind};
use nu_ansi_term::Color;

pub async fn run(
    project: PathBuf,
    modules: Vec<String>,
    build_type: BuildType,
    addr: String,
) -> Result<i32, Box<dyn std::error::Error>> {
    let project = project.canonicalize().unwrap_or(project);

    let client = BuildClient::new();
    client.connect(&addr).await?;

    let mut session = client
        .send_compile_request(&project.to_string_lossy(), &modules, build_type)
        .await?;

    let mut exit = 1;
    while let Some(event) = session.next_event().await {
        match event {
            SessionEvent::Message(message) => {
                let (color, label) = match message.kind {
                    MessageKind::Error => (Color::Red, "error"),
                    MessageKind::Warning => (Color::Yellow, "warning"),
                    MessageKind::Info => (Color::Cyan, "info"),
                };
                let location = match (&message.source_path, message.line) {
                    (Some(path), Some(line)) => format!("{path}:{line}: "),
                    (Some(path), None) => format!("{path}: "),
                    _ => String::new(),
                };
                println!(
                    "{}{}: {}",
                    location,
                    color.paint(label),
                    message.text
                );
            }
            SessionEvent::Progress(text) => {
                println!("{}", Color::DarkGray.paint(text));
            }
            SessionEvent::Failure(failure) => {
                eprintln!("{}: {}", Color::Red.paint("failed"), failure.description);
                break;
            }
            SessionEvent::Finished(code) => {
                exit = match code {
                    ExitCode::Ok => {
                        println!("{}", Color::Green.paint("Build finished"));
                        0
                    }
                    ExitCode::Errors => {
                        eprintln!("{}", Color::Red.paint("Build failed"));
                        1
                    }
                    ExitCode::Canceled => {
                        eprintln!("{}", Color::Yellow.paint("Build canceled"));
                        1
                    }
                };
                break;
            }
            SessionEvent::Terminated => {
                eprintln!("{}", Color::Red.paint("Connection to the build server was lost"));
                break;
            }
        }
    }

    client.disconnect().await?;
    Ok(exit)
}
