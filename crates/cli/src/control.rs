use std::collections::HashMap;

use buildlink_client::BuildClient;
use buildlink_proto::{GlobalLibrary, SetupRequest};

pub async fn setup(
    vars: Vec<String>,
    libraries: Vec<String>,
    addr: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut path_variables = HashMap::new();
    for var in vars {
        let (name, value) = split_assignment(&var)?;
        path_variables.insert(name.to_string(), value.to_string());
    }

    let mut parsed_libraries = Vec::new();
    for library in libraries {
        let (name, paths) = split_assignment(&library)?;
        parsed_libraries.push(GlobalLibrary {
            name: name.to_string(),
            paths: paths.split(',').map(str::to_string).collect(),
            home_path: None,
        });
    }

    let client = BuildClient::new();
    client.connect(&addr).await?;
    client
        .send_setup_request(SetupRequest {
            path_variables,
            libraries: parsed_libraries,
        })
        .await?;
    client.disconnect().await?;
    println!("Global configuration updated");
    Ok(())
}

pub async fn shutdown(
    cancel_running: bool,
    addr: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = BuildClient::new();
    client.connect(&addr).await?;
    client.send_shutdown_request(cancel_running).await?;
    client.disconnect().await?;
    println!("Shutdown requested");
    Ok(())
}

fn split_assignment(raw: &str) -> Result<(&str, &str), Box<dyn std::error::Error>> {
    raw.split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'").into())
}
