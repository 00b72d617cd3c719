use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::cache::{
    ApiCache, CacheOptions, DEFAULT_CLEANUP_PATTERNS, DEFAULT_MAX_AGE_DAYS, cleanup_old_caches,
    limit_array_size, storage_stats,
};
use crate::cli::Invocation;
use crate::config::Config;
use crate::datetime::{parse_date_expr_in, to_date_in};
use crate::render::Renderer;
use crate::storage::KeyValueStore;
use crate::store::TaskStore;
use crate::workspace::{SortDirection, SortOption, WorkspaceFilters, WorkspaceState};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "day",
        "calendar",
        "list",
        "import",
        "workspace",
        "cache",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

/// Everything a command needs besides its arguments.
pub struct Session<'a> {
    pub store: &'a mut TaskStore,
    pub storage: Arc<dyn KeyValueStore>,
    pub cfg: &'a Config,
    pub renderer: &'a Renderer,
    pub tz: &'a Tz,
    pub now: DateTime<Utc>,
}

#[instrument(skip(session, out, inv), fields(command = %inv.command))]
pub fn dispatch<W: Write>(session: &mut Session<'_>, out: &mut W, inv: Invocation) -> anyhow::Result<()> {
    debug!(args = ?inv.args, "dispatching command");

    match inv.command.as_str() {
        "day" => cmd_day(session, out, &inv.args),
        "calendar" => cmd_calendar(session, out, &inv.args),
        "list" => cmd_list(session, out, &inv.args),
        "import" => cmd_import(session, out, &inv.args),
        "workspace" => cmd_workspace(session, out, &inv.args),
        "cache" => cmd_cache(session, out, &inv.args),
        "help" => cmd_help(out),
        "version" => {
            writeln!(out, "{}", env!("CARGO_PKG_VERSION"))?;
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

fn selected_date(session: &Session<'_>, args: &[String]) -> anyhow::Result<DateTime<Utc>> {
    match args {
        [] => Ok(session.now),
        [expr] => parse_date_expr_in(expr, session.now, session.tz)
            .with_context(|| format!("invalid date: {expr}")),
        _ => bail!("expected at most one DATE, got {}", args.join(" ")),
    }
}

#[instrument(skip(session, out, args))]
fn cmd_day<W: Write>(session: &mut Session<'_>, out: &mut W, args: &[String]) -> anyhow::Result<()> {
    let selected = selected_date(session, args)?;
    let buckets = session.store.buckets_in(selected, session.now, session.tz);
    session.renderer.print_day(
        out,
        to_date_in(selected, session.tz),
        &buckets,
        to_date_in(session.now, session.tz),
        session.tz,
    )
}

#[instrument(skip(session, out, args))]
fn cmd_calendar<W: Write>(session: &mut Session<'_>, out: &mut W, args: &[String]) -> anyhow::Result<()> {
    let selected = selected_date(session, args)?;
    let buckets = session.store.buckets_in(selected, session.now, session.tz);
    session.renderer.print_calendar(
        out,
        to_date_in(selected, session.tz),
        &buckets.tasks_with_specific_time,
        session.tz,
    )
}

#[instrument(skip(session, out, args))]
fn cmd_list<W: Write>(session: &mut Session<'_>, out: &mut W, args: &[String]) -> anyhow::Result<()> {
    if !args.is_empty() {
        bail!("list takes no arguments");
    }
    let buckets = session.store.buckets_in(session.now, session.now, session.tz);
    session
        .renderer
        .print_list(out, &buckets, to_date_in(session.now, session.tz), session.tz)
}

#[instrument(skip(session, out, args))]
fn cmd_import<W: Write>(session: &mut Session<'_>, out: &mut W, args: &[String]) -> anyhow::Result<()> {
    let [file] = args else {
        bail!("usage: import FILE");
    };
    let count = session.store.import_file(Path::new(file))?;
    info!(count, "command import");
    writeln!(out, "Imported {count} tasks.")?;
    Ok(())
}

/// `workspace NAME` prints the view state and the tasks it lets through.
/// `sort`, `filter`, `visibility` and `reset` change the stored state first.
#[instrument(skip(session, out, args))]
fn cmd_workspace<W: Write>(session: &mut Session<'_>, out: &mut W, args: &[String]) -> anyhow::Result<()> {
    let Some((name, rest)) = args.split_first() else {
        bail!("usage: workspace NAME [sort OPTION [ascending|descending] | filter FLAG... | visibility public|private | reset]");
    };
    let storage = session.storage.as_ref();
    let mut state = WorkspaceState::load(storage, name);

    if let Some((action, values)) = rest.split_first() {
        match action.as_str() {
            "sort" => {
                let [option, direction @ ..] = values else {
                    bail!("usage: workspace NAME sort OPTION [ascending|descending]");
                };
                state.sort = Some(option.parse::<SortOption>()?);
                state.sort_direction = match direction {
                    [] => None,
                    [dir] => Some(dir.parse::<SortDirection>()?),
                    _ => bail!("too many sort arguments"),
                };
            }
            "filter" => {
                let mut filters = WorkspaceFilters::default();
                for flag in values {
                    filters.enable(flag)?;
                }
                state.filters = Some(filters);
            }
            "visibility" => {
                state.is_public = match values {
                    [v] if v == "public" => true,
                    [v] if v == "private" => false,
                    _ => bail!("usage: workspace NAME visibility public|private"),
                };
            }
            "reset" => state = WorkspaceState::default(),
            other => bail!("unknown workspace action: {other}"),
        }
        state.save(storage, name)?;
        info!(workspace = %name, action = %action, "workspace state updated");
    }

    let visible = state.apply_filters(session.store.tasks(), session.now, session.tz);
    session.renderer.print_workspace(
        out,
        name,
        &state,
        &visible,
        to_date_in(session.now, session.tz),
        session.tz,
    )
}

#[instrument(skip(session, out, args))]
fn cmd_cache<W: Write>(session: &mut Session<'_>, out: &mut W, args: &[String]) -> anyhow::Result<()> {
    let storage = session.storage.as_ref();
    match args {
        [action] if action == "stats" => {
            let stats = storage_stats(storage)?;
            session.renderer.print_storage_stats(out, &stats)
        }
        [action] if action == "cleanup" => {
            let days = match session.cfg.get_u64("cache.max_age_days")? {
                Some(days) => i64::try_from(days).context("cache.max_age_days is too large")?,
                None => DEFAULT_MAX_AGE_DAYS,
            };
            let removed = cleanup_old_caches(
                storage,
                Duration::days(days),
                &DEFAULT_CLEANUP_PATTERNS,
                session.now,
            )?;
            writeln!(out, "Removed {removed} stale cache entries.")?;
            Ok(())
        }
        [action, key] if action == "clear" => {
            let options = CacheOptions::from_config(session.cfg, key.as_str())?;
            let mut cache: ApiCache<Value> = ApiCache::new(options, Arc::clone(&session.storage));
            cache.clear();
            writeln!(out, "Cleared {key}.")?;
            Ok(())
        }
        [action, key, max] if action == "trim" => {
            let max: usize = max
                .parse()
                .with_context(|| format!("invalid item count: {max}"))?;
            if limit_array_size(storage, key, max, true)? {
                writeln!(out, "Trimmed {key} to {max} items.")?;
            } else {
                writeln!(out, "{key} already within {max} items.")?;
            }
            Ok(())
        }
        _ => bail!("usage: cache stats | cache cleanup | cache clear KEY | cache trim KEY MAX"),
    }
}

fn cmd_help<W: Write>(out: &mut W) -> anyhow::Result<()> {
    writeln!(out, "Commands: day [DATE], calendar [DATE], list, import FILE, workspace NAME [...], cache stats|cleanup|clear KEY|trim KEY MAX")?;
    writeln!(out, "DATE: today, tomorrow, yesterday, a weekday name, +Nd/-Nd, YYYY-MM-DD or RFC 3339")?;
    Ok(())
}
