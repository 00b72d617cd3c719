pub mod alert;
pub mod buckets;
pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod render;
pub mod storage;
pub mod store;
pub mod task;
pub mod workspace;

use std::ffi::OsString;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting kindred CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.kindredrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let mut store =
    store::TaskStore::open(&data_dir)
      .with_context(|| {
        format!(
          "failed to open task store at \
           {}",
          data_dir.display()
        )
      })?;
  let storage: Arc<
    dyn storage::KeyValueStore
  > = Arc::new(
    storage::FileStore::open(
      &data_dir
    )?
  );

  let renderer =
    render::Renderer::new(&cfg)?;
  let inv = cli::Invocation::parse(
    &cfg, cli.rest
  )?;

  let mut session = commands::Session {
    store:    &mut store,
    storage,
    cfg:      &cfg,
    renderer: &renderer,
    tz:       datetime::project_timezone(),
    now:      Utc::now()
  };
  let mut out = std::io::stdout().lock();
  commands::dispatch(
    &mut session,
    &mut out,
    inv
  )?;

  info!("done");
  Ok(())
}
