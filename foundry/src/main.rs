use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use foundry::{
    BuildOrchestrator, BuildRequest, ClusterGateway, Ctx, DeployReconciler, DeployRequest, Error,
    KubeGateway, LifecycleController, Observer, SecretManager, Settings, status::LogStatusStore,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "foundry", version, about = "Foundry control plane operations")]
struct Cli {
    /// Settings file (YAML). Defaults apply when omitted.
    #[arg(long, env = "FOUNDRY_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the settings file schema.
    Schema,
    /// Build a project and deploy it once the build succeeds.
    Build {
        #[arg(long)]
        project: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        repo: String,
        #[arg(long, default_value = "main")]
        branch: String,
        #[arg(long, env = "FOUNDRY_GIT_TOKEN", hide_env_values = true)]
        credential: String,
        #[arg(long, default_value_t = 80)]
        port: i32,
        /// Configuration entry, KEY=VALUE. Repeatable.
        #[arg(long = "env", value_parser = parse_key_val)]
        env: Vec<(String, String)>,
    },
    /// Reconcile the deployed resources of an already built project.
    Deploy {
        #[arg(long)]
        project: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = 80)]
        port: i32,
        #[arg(long = "env", value_parser = parse_key_val)]
        env: Vec<(String, String)>,
    },
    Start { project: String },
    Stop { project: String },
    /// Remove every cluster resource of a project.
    Delete { project: String },
    Logs { project: String },
    Stats { project: String },
    /// Create or update the secret of a reusable environment group.
    EnvSecret {
        #[arg(long)]
        environment: String,
        #[arg(long)]
        owner: String,
        #[arg(long = "env", value_parser = parse_key_val)]
        env: Vec<(String, String)>,
    },
    /// Delete the secret of a reusable environment group.
    EnvDelete { environment: String },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))?;
    if k.is_empty() {
        return Err(format!("empty key in `{s}`"));
    }
    Ok((k.to_string(), v.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if let Command::Schema = cli.command {
        println!("{}", Settings::schema_yaml()?);
        return Ok(());
    }

    let settings = Settings::load(cli.config.as_deref())?;

    let cluster: Option<Arc<dyn ClusterGateway>> = match KubeGateway::connect().await {
        Ok(gateway) => {
            info!(namespace = %settings.namespace, "connected to cluster");
            Some(Arc::new(gateway))
        }
        Err(e) => {
            warn!(error = %e, "no cluster connection, cluster operations are unavailable");
            None
        }
    };
    let ctx = Ctx::new(cluster, Arc::new(LogStatusStore), settings)?;

    match cli.command {
        Command::Schema => {}
        Command::Build {
            project,
            owner,
            name,
            repo,
            branch,
            credential,
            port,
            env,
        } => {
            let req = BuildRequest {
                project_id: project,
                owner_id: owner,
                name,
                repo_url: repo,
                branch,
                credential,
                config: env.into_iter().collect::<BTreeMap<_, _>>(),
                port,
            };
            let watcher = BuildOrchestrator::new(ctx.clone()).trigger(req).await?;
            match watcher.await {
                Ok(outcome) => info!(%outcome, "build watcher finished"),
                Err(e) => warn!(error = %e, "build watcher aborted"),
            }
            print!("{}", ctx.metrics.render()?);
        }
        Command::Deploy {
            project,
            owner,
            name,
            port,
            env,
        } => {
            let req = DeployRequest {
                project_id: project,
                owner_id: owner,
                name,
                config: env.into_iter().collect(),
                port,
            };
            let url = DeployReconciler::new(ctx).deploy(&req).await?;
            println!("{url}");
        }
        Command::Start { project } => {
            let status = LifecycleController::new(ctx).apply_action(&project, "start").await?;
            println!("{status}");
        }
        Command::Stop { project } => {
            let status = LifecycleController::new(ctx).apply_action(&project, "stop").await?;
            println!("{status}");
        }
        Command::Delete { project } => LifecycleController::new(ctx).delete(&project).await?,
        Command::Logs { project } => println!("{}", Observer::new(ctx).logs(&project).await?),
        Command::Stats { project } => {
            let stats = Observer::new(ctx).stats(&project).await?;
            println!("{}", serde_json::to_string(&stats)?);
        }
        Command::EnvSecret {
            environment,
            owner,
            env,
        } => {
            let values = env.into_iter().collect();
            match SecretManager::new(ctx)
                .upsert_environment_secret(&environment, &owner, &values)
                .await?
            {
                Some(name) => println!("{name}"),
                None => info!(environment = %environment, "no variables, nothing to materialize"),
            }
        }
        Command::EnvDelete { environment } => {
            SecretManager::new(ctx)
                .delete_environment_secret(&environment)
                .await?
        }
    }

    Ok(())
}
