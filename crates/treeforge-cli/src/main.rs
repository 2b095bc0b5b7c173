//! treeforge command line
//!
//! `build` turns a file of extracted proposals into a tree and prints it;
//! `serve` exposes the proposal service over HTTP.

#![warn(unreachable_pub)]

mod app;
mod http;

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use treeforge_core::{ProjectId, UserId};

fn cli() -> Command {
    Command::new("treeforge")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Turn reviewed proposals into experiment trees")
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .env("TREEFORGE_CONFIG")
                .value_parser(value_parser!(PathBuf))
                .help("Pipeline configuration (TOML)"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("build")
                .about("Build a tree from a JSON file of proposals and print it")
                .arg(
                    Arg::new("proposals")
                        .long("proposals")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON array of extracted node payloads"),
                )
                .arg(
                    Arg::new("project-id")
                        .long("project-id")
                        .value_parser(value_parser!(ProjectId))
                        .help("Project to build under (random if omitted)"),
                )
                .arg(
                    Arg::new("pretty")
                        .long("pretty")
                        .action(ArgAction::SetTrue)
                        .help("Pretty-print the output"),
                ),
        )
        .subcommand(
            Command::new("serve")
                .about("Serve the proposals API")
                .arg(
                    Arg::new("addr")
                        .long("addr")
                        .env("TREEFORGE_ADDR")
                        .default_value("127.0.0.1:8080")
                        .value_parser(value_parser!(SocketAddr))
                        .help("Listen address"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(err) = installed {
        eprintln!("tracing already initialized: {err}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let config = app::load_config(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;

    match matches.subcommand() {
        Some(("build", args)) => build(args, config).await,
        Some(("serve", args)) => {
            let addr = args
                .get_one::<SocketAddr>("addr")
                .copied()
                .context("missing listen address")?;
            serve(addr, config).await
        }
        _ => Ok(()),
    }
}

async fn build(args: &ArgMatches, config: treeforge_pipeline::PipelineConfig) -> anyhow::Result<()> {
    let path = args
        .get_one::<PathBuf>("proposals")
        .context("--proposals is required")?;
    let project_id = args
        .get_one::<ProjectId>("project-id")
        .copied()
        .unwrap_or_default();
    let user_id = UserId::new();

    let proposals = app::read_proposals(path, project_id, user_id)?;
    tracing::info!(path = %path.display(), proposals = proposals.len(), "building tree");

    let app = app::App::new(config);
    let output = app.build_once(project_id, user_id, proposals).await?;

    let rendered = if args.get_flag("pretty") {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{rendered}");
    Ok(())
}

async fn serve(addr: SocketAddr, config: treeforge_pipeline::PipelineConfig) -> anyhow::Result<()> {
    let app = app::App::new(config);
    let routes = http::routes(app.service().clone());

    let (bound, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(addr, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
        })
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %bound, "treeforge listening");
    server.await;
    tracing::info!("treeforge stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn build_arguments_parse() {
        let project = ProjectId::new();
        let id = project.to_string();
        let matches = cli()
            .try_get_matches_from([
                "treeforge",
                "build",
                "--proposals",
                "nodes.json",
                "--project-id",
                id.as_str(),
                "--pretty",
            ])
            .unwrap();
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "build");
        assert_eq!(args.get_one::<ProjectId>("project-id"), Some(&project));
        assert!(args.get_flag("pretty"));
    }

    #[test]
    fn serve_defaults_to_localhost() {
        let matches = cli().try_get_matches_from(["treeforge", "serve"]).unwrap();
        let (_, args) = matches.subcommand().unwrap();
        assert_eq!(
            args.get_one::<SocketAddr>("addr").copied(),
            Some("127.0.0.1:8080".parse().unwrap())
        );
    }
}
