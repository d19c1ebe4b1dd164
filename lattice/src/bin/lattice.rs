//! lattice - command line client for the latticed API
//!
//! Usage: `lattice <resource> <action> [--key=value ...]`

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;

use lattice::errors::LatticeError;
use lattice::http::ApiClient;
use serde::Serialize;

const DEFAULT_API: &str = "http://127.0.0.1:8080";
const ENV_API: &str = "LATTICE_API";

const USAGE: &str = "usage: lattice <resource> <action> [--key=value ...]

  systems    create --id= --definition-url= | list | get --system= | delete --system=
  builds     create --system= (--version= | --path=) | list --system= | get --system= --build=
             logs --system= --build= --path= [--sidecar=]
  deploys    create --system= (--build= | --path= | --version=) | list --system= | get --system= --deploy=
  teardowns  create --system= | list --system= | get --system= --teardown=
  secrets    list --system= | get --system= --secret= | set --system= --secret= --value=
             unset --system= --secret=
  services   list --system= | get --system= --service= | logs --system= --service=

  --api=<url> (or LATTICE_API) selects the daemon, default http://127.0.0.1:8080";

enum Output {
    Json(serde_json::Value),
    Text(String),
    Empty,
}

struct Args {
    positional: Vec<String>,
    flags: HashMap<String, String>,
}

impl Args {
    fn parse() -> Self {
        let mut positional = Vec::new();
        let mut flags = HashMap::new();
        for arg in env::args().skip(1) {
            if let Some(flag) = arg.strip_prefix("--") {
                match flag.split_once('=') {
                    Some((key, value)) => flags.insert(key.to_string(), value.to_string()),
                    None => flags.insert(flag.to_string(), "true".to_string()),
                };
            } else {
                positional.push(arg);
            }
        }
        Self { positional, flags }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.flags.get(key).map(String::as_str)
    }

    fn require(&self, key: &str) -> Result<&str, LatticeError> {
        self.get(key)
            .ok_or_else(|| LatticeError::ConfigError(format!("missing required flag --{}", key)))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if args.get("help").is_some() || args.positional.len() < 2 {
        eprintln!("{}", USAGE);
        return ExitCode::FAILURE;
    }

    let api = args
        .get("api")
        .map(str::to_string)
        .or_else(|| env::var(ENV_API).ok())
        .unwrap_or_else(|| DEFAULT_API.to_string());
    let client = match ApiClient::new(&api) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match dispatch(&client, &args).await {
        Ok(Output::Json(value)) => {
            match serde_json::to_string_pretty(&value) {
                Ok(json) => println!("{}", json),
                Err(_) => println!("{}", value),
            }
            ExitCode::SUCCESS
        }
        Ok(Output::Text(text)) => {
            print!("{}", text);
            ExitCode::SUCCESS
        }
        Ok(Output::Empty) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn json<T: Serialize>(value: T) -> Result<Output, LatticeError> {
    Ok(Output::Json(serde_json::to_value(value)?))
}

async fn dispatch(client: &ApiClient, args: &Args) -> Result<Output, LatticeError> {
    let resource = args.positional[0].as_str();
    let action = args.positional[1].as_str();

    match (resource, action) {
        ("systems", "create") => {
            json(client.create_system(args.require("id")?, args.require("definition-url")?).await?)
        }
        ("systems", "list") => json(client.list_systems().await?),
        ("systems", "get") => json(client.get_system(args.require("system")?).await?),
        ("systems", "delete") => {
            client.delete_system(args.require("system")?).await?;
            Ok(Output::Empty)
        }

        ("builds", "create") => {
            let system = args.require("system")?;
            match (args.get("version"), args.get("path")) {
                (Some(version), None) => json(client.create_build_from_version(system, version).await?),
                (None, Some(path)) => json(client.create_build_from_path(system, path).await?),
                _ => Err(LatticeError::ConfigError(
                    "exactly one of --version or --path is required".to_string(),
                )),
            }
        }
        ("builds", "list") => json(client.list_builds(args.require("system")?).await?),
        ("builds", "get") => {
            json(client.get_build(args.require("system")?, args.require("build")?).await?)
        }
        ("builds", "logs") => {
            let logs = client
                .build_logs(
                    args.require("system")?,
                    args.require("build")?,
                    args.require("path")?,
                    args.get("sidecar"),
                )
                .await?;
            Ok(Output::Text(logs))
        }

        ("deploys", "create") => {
            let system = args.require("system")?;
            match (args.get("build"), args.get("path"), args.get("version")) {
                (Some(build), None, None) => json(client.create_deploy_from_build(system, build).await?),
                (None, Some(path), None) => json(client.create_deploy_from_path(system, path).await?),
                (None, None, Some(version)) => {
                    json(client.create_deploy_from_version(system, version).await?)
                }
                _ => Err(LatticeError::ConfigError(
                    "exactly one of --build, --path or --version is required".to_string(),
                )),
            }
        }
        ("deploys", "list") => json(client.list_deploys(args.require("system")?).await?),
        ("deploys", "get") => {
            json(client.get_deploy(args.require("system")?, args.require("deploy")?).await?)
        }

        ("teardowns", "create") => json(client.create_teardown(args.require("system")?).await?),
        ("teardowns", "list") => json(client.list_teardowns(args.require("system")?).await?),
        ("teardowns", "get") => {
            json(client.get_teardown(args.require("system")?, args.require("teardown")?).await?)
        }

        ("secrets", "list") => json(client.list_secrets(args.require("system")?).await?),
        ("secrets", "get") => {
            json(client.get_secret(args.require("system")?, args.require("secret")?).await?)
        }
        ("secrets", "set") => {
            client
                .set_secret(args.require("system")?, args.require("secret")?, args.require("value")?)
                .await?;
            Ok(Output::Empty)
        }
        ("secrets", "unset") => {
            client
                .unset_secret(args.require("system")?, args.require("secret")?)
                .await?;
            Ok(Output::Empty)
        }

        ("services", "list") => json(client.list_services(args.require("system")?).await?),
        ("services", "get") => {
            json(client.get_service(args.require("system")?, args.require("service")?).await?)
        }
        ("services", "logs") => {
            let logs = client
                .service_logs(args.require("system")?, args.require("service")?)
                .await?;
            Ok(Output::Text(logs))
        }

        _ => Err(LatticeError::ConfigError(format!(
            "unknown command {} {}\n\n{}",
            resource, action, USAGE
        ))),
    }
}
