//! Binary entry point for the flotilla CLI.

mod cli;

use std::io::{self, Write};
use std::process;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use flotilla::{
    ArmClient, AzureConfig, ConfigError, ContainerGroupProvider, ContainerGroupSpec,
    ContainerGroupState, ContainerGroupsApi, ProviderError, SpecError, StateStore,
    StateStoreError, replacement_reasons, schema, spec,
};

use cli::{ApplyCommand, Cli, Command, ImportCommand, TagCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to read {path}: {message}")]
    Document { path: Utf8PathBuf, message: String },
    #[error("{path}: {source}")]
    Spec {
        path: Utf8PathBuf,
        #[source]
        source: SpecError,
    },
    #[error(transparent)]
    State(#[from] StateStoreError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(
        "{path} does not record a container group; run `flotilla apply` or `flotilla import` first"
    )]
    NothingManaged { path: Utf8PathBuf },
    #[error("{path} already manages {id}; destroy it or use another --state file")]
    AlreadyManaged { path: Utf8PathBuf, id: String },
    #[error("the change requires replacing the container group ({reasons}); rerun with --replace")]
    ReplacementRequired { reasons: String },
    #[error("invalid tag {0:?}: expected KEY=VALUE")]
    InvalidTag(String),
    #[error("failed to render output: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flotilla=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let store = StateStore::new(cli.state);
    match cli.command {
        Command::Schema => write_schema(io::stdout().lock()),
        Command::Apply(args) => {
            let desired = read_document(&args.document)?;
            let provider = connect()?;
            let state = apply(&provider, &store, &desired, &args).await?;
            write_summary(io::stdout().lock(), &state);
            Ok(())
        }
        Command::Refresh => {
            let provider = connect()?;
            match refresh(&provider, &store).await? {
                Some(state) => write_summary(io::stdout().lock(), &state),
                None => info!("container group no longer exists; state cleared"),
            }
            Ok(())
        }
        Command::Tag(args) => {
            let provider = connect()?;
            let state = tag(&provider, &store, &args).await?;
            write_summary(io::stdout().lock(), &state);
            Ok(())
        }
        Command::Destroy => {
            let provider = connect()?;
            destroy(&provider, &store).await
        }
        Command::Import(args) => {
            let provider = connect()?;
            let state = import(&provider, &store, &args).await?;
            write_summary(io::stdout().lock(), &state);
            Ok(())
        }
    }
}

fn connect() -> Result<ContainerGroupProvider<ArmClient>, CliError> {
    let config = AzureConfig::load_without_cli_args()?;
    config.validate()?;
    Ok(
        ContainerGroupProvider::new(ArmClient::from_config(&config), config.subscription_id.clone())
            .with_timeouts(config.timeouts())
            .with_operation_poll_interval(config.operation_poll_interval()),
    )
}

fn read_document(raw_path: &str) -> Result<ContainerGroupSpec, CliError> {
    let path = Utf8Path::new(raw_path);
    let io_error = |err: io::Error| CliError::Document {
        path: path.to_path_buf(),
        message: err.to_string(),
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let file_name = path.file_name().ok_or_else(|| CliError::Document {
        path: path.to_path_buf(),
        message: String::from("document path is missing a filename"),
    })?;
    let contents = Dir::open_ambient_dir(parent, ambient_authority())
        .and_then(|dir| dir.read_to_string(file_name))
        .map_err(io_error)?;
    spec::decode(&contents).map_err(|source| CliError::Spec {
        path: path.to_path_buf(),
        source,
    })
}

fn managed(store: &StateStore) -> Result<ContainerGroupState, CliError> {
    store.load()?.ok_or_else(|| CliError::NothingManaged {
        path: store.path().to_path_buf(),
    })
}

async fn apply<A: ContainerGroupsApi>(
    provider: &ContainerGroupProvider<A>,
    store: &StateStore,
    desired: &ContainerGroupSpec,
    args: &ApplyCommand,
) -> Result<ContainerGroupState, CliError> {
    let state = match store.load()? {
        None => provider.create(desired, true).await?,
        Some(prior) => {
            let reasons = replacement_reasons(&prior.spec, desired);
            if !reasons.is_empty() {
                let joined = reasons.join(", ");
                if !args.replace {
                    return Err(CliError::ReplacementRequired { reasons: joined });
                }
                info!(reasons = %joined, "replacing container group");
                provider.delete(&prior.id).await?;
                store.save(None)?;
                provider.create(desired, true).await?
            } else if prior.spec.tags == desired.tags {
                match provider.read(&prior.id, Some(desired)).await? {
                    Some(current) => current,
                    None => provider.create(desired, true).await?,
                }
            } else {
                provider.update(&prior.id, desired).await?
            }
        }
    };
    store.save(Some(&state))?;
    Ok(state)
}

async fn refresh<A: ContainerGroupsApi>(
    provider: &ContainerGroupProvider<A>,
    store: &StateStore,
) -> Result<Option<ContainerGroupState>, CliError> {
    let prior = managed(store)?;
    let current = provider.read(&prior.id, Some(&prior.spec)).await?;
    store.save(current.as_ref())?;
    Ok(current)
}

fn parse_tag(raw: &str) -> Result<(String, String), CliError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.to_owned()))
        }
        _ => Err(CliError::InvalidTag(raw.to_owned())),
    }
}

async fn tag<A: ContainerGroupsApi>(
    provider: &ContainerGroupProvider<A>,
    store: &StateStore,
    args: &TagCommand,
) -> Result<ContainerGroupState, CliError> {
    let prior = managed(store)?;
    let mut desired = prior.spec.clone();
    for raw in &args.tags {
        let (key, value) = parse_tag(raw)?;
        if value.is_empty() {
            desired.tags.remove(&key);
        } else {
            desired.tags.insert(key, value);
        }
    }
    let state = provider.update(&prior.id, &desired).await?;
    store.save(Some(&state))?;
    Ok(state)
}

async fn destroy<A: ContainerGroupsApi>(
    provider: &ContainerGroupProvider<A>,
    store: &StateStore,
) -> Result<(), CliError> {
    let prior = managed(store)?;
    provider.delete(&prior.id).await?;
    store.save(None)?;
    info!(id = %prior.id, "container group destroyed");
    Ok(())
}

async fn import<A: ContainerGroupsApi>(
    provider: &ContainerGroupProvider<A>,
    store: &StateStore,
    args: &ImportCommand,
) -> Result<ContainerGroupState, CliError> {
    if let Some(existing) = store.load()? {
        return Err(CliError::AlreadyManaged {
            path: store.path().to_path_buf(),
            id: existing.id.to_string(),
        });
    }
    let state = provider.import(&args.id).await?;
    store.save(Some(&state))?;
    Ok(state)
}

fn write_schema(mut target: impl Write) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(schema::attributes())
        .map_err(|err| CliError::Output(err.to_string()))?;
    writeln!(target, "{rendered}").map_err(|err| CliError::Output(err.to_string()))
}

fn write_summary(mut target: impl Write, state: &ContainerGroupState) {
    writeln!(target, "{}", state.id).ok();
    if let Some(ip) = &state.ip_address {
        writeln!(target, "  ip_address: {ip}").ok();
    }
    if let Some(fqdn) = &state.fqdn {
        writeln!(target, "  fqdn: {fqdn}").ok();
    }
    if let Some(principal) = &state.principal_id {
        writeln!(target, "  principal_id: {principal}").ok();
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
