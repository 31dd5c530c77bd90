use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use mediainfo_core::api::{MediaType, RepoApiClient, RepoApiClientConfig};
use mediainfo_core::config::{ConfigPatch, MediaInfoConfig, load_config, patch_config};
use mediainfo_core::ledger::{SyncLedger, scan_documents};
use mediainfo_core::runtime::{
    InitOptions, LayoutPart, PathOverrides, ResolvedPaths, init_layout, inspect_runtime,
    normalize_for_display, require_sync_layout, resolve_paths,
};
use mediainfo_core::search::{DEFAULT_SEARCH_LIMIT, SearchStore};
use mediainfo_core::sync::{
    DiffReport, PullOptions, PullReport, PushOptions, PushReport, ShowReport, TitleResult,
    diff_local_against_ledger, language_catalog, pull_from_remote, push_to_remote,
    show_from_remote,
};

#[derive(Debug, Parser)]
#[command(
    name = "mediainfo",
    version,
    about = "Edit captions and statements of wiki file pages from local documents"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, global = true, help = "Print reports as JSON")]
    json: bool,
    #[arg(short, long, global = true, action = ArgAction::Count, help = "Raise log verbosity")]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
    json: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
            json: cli.json,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the documents directory, state directory and config.
    Init(InitArgs),
    /// Show the runtime layout and what changed locally.
    Status,
    /// Fetch structured data of file pages into local documents.
    Pull(PullArgs),
    /// Compare local documents with the last synced snapshot.
    Diff,
    /// Send local caption and statement edits to the wiki.
    Push(PushArgs),
    /// Print captions and statements of one file.
    Show(ShowArgs),
    /// Search files and categories.
    Search(SearchArgs),
    /// List the caption languages.
    Languages(LanguagesArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
    #[arg(long, help = "Skip writing .mediainfo/config.toml")]
    no_config: bool,
    #[arg(long, value_name = "URL", help = "Set [wiki].url in the config")]
    url: Option<String>,
    #[arg(long, value_name = "URL", help = "Set [wiki].api_url in the config")]
    api_url: Option<String>,
    #[arg(
        long = "user-language",
        value_name = "CODE",
        help = "Set [captions].user_languages (repeatable)"
    )]
    user_languages: Vec<String>,
}

#[derive(Debug, Args)]
struct PullArgs {
    /// File titles; defaults to every tracked file.
    titles: Vec<String>,
    #[arg(long, help = "Overwrite locally modified documents during pull")]
    overwrite_local: bool,
}

#[derive(Debug, Args)]
struct PushArgs {
    /// Limit the push to these file titles.
    titles: Vec<String>,
    #[arg(short, long, value_name = "TEXT", help = "Edit summary")]
    summary: Option<String>,
    #[arg(long, help = "Report what would be sent without editing")]
    dry_run: bool,
    #[arg(long, help = "Push even when the remote entity changed since last sync")]
    force: bool,
}

#[derive(Debug, Args)]
struct ShowArgs {
    title: String,
}

#[derive(Debug, Args)]
struct SearchArgs {
    term: String,
    #[arg(long = "type", value_name = "TYPE", help = "bitmap, audio, video or category")]
    media_type: Vec<String>,
    #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
    limit: usize,
    #[arg(long, default_value_t = 1, help = "Number of result pages to load per type")]
    pages: usize,
}

#[derive(Debug, Args)]
struct LanguagesArgs {
    /// Only list languages whose code or name contains this text.
    filter: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Pull(args)) => run_pull(&runtime, args),
        Some(Commands::Diff) => run_diff(&runtime),
        Some(Commands::Push(args)) => run_push(&runtime, args),
        Some(Commands::Show(ShowArgs { title })) => run_show(&runtime, &title),
        Some(Commands::Search(args)) => run_search(&runtime, args),
        Some(Commands::Languages(LanguagesArgs { filter })) => {
            run_languages(&runtime, filter.as_deref())
        }
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "mediainfo=info,mediainfo_core=info",
        1 => "mediainfo=debug,mediainfo_core=debug",
        _ => "mediainfo=trace,mediainfo_core=trace",
    };
    let filter = if verbose > 0 {
        EnvFilter::new(default)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(filter)
        .init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            materialize_config: !args.no_config,
            force: args.force,
        },
    )?;
    let patch = ConfigPatch {
        set_url: args.url,
        set_api_url: args.api_url,
        set_user_languages: (!args.user_languages.is_empty()).then_some(args.user_languages),
    };
    let patched = patch_config(&paths.config_path, &patch)?;

    println!("Initialized mediainfo runtime layout");
    for part in LayoutPart::ALL {
        println!("{}: {}", part.key(), normalize_for_display(part.path(&paths)));
    }
    println!("created_dirs: {}", report.created.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("patched_config: {}", patched);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    let documents = scan_documents(&paths)?.len();
    let tracked = if status.exists(LayoutPart::Database) {
        Some(SyncLedger::open(&paths)?.count()?)
    } else {
        None
    };
    let diff = diff_local_against_ledger(&paths)?;

    println!("runtime status");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    for part in &status.parts {
        println!("{}_exists: {}", part.part.key(), format_flag(part.exists));
    }
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    let config = load_runtime_config(&paths)?;
    println!("wiki_url: {}", config.wiki_url().unwrap_or_else(|| "<unset>".to_string()));
    println!(
        "api_url: {}",
        config.api_url_owned().unwrap_or_else(|| "<unset>".to_string())
    );
    println!("documents: {documents}");
    println!(
        "tracked: {}",
        tracked
            .map(|count| count.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    if let Some(diff) = &diff {
        println!("modified: {}", diff.modified);
        println!("untracked: {}", diff.untracked);
        println!("deleted_local: {}", diff.deleted_local);
    }
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_pull(runtime: &RuntimeOptions, args: PullArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    require_sync_layout(&paths)?;
    let config = load_runtime_config(&paths)?;

    let report = pull_from_remote(
        &paths,
        &config,
        &PullOptions {
            titles: args.titles,
            overwrite_local: args.overwrite_local,
        },
    )?;
    if runtime.json {
        print_json(&report)?;
    } else {
        print_pull_report(&report);
    }
    print_diagnostics(runtime, &paths);
    if !report.success {
        bail!("pull finished with {} error(s)", report.errors.len());
    }
    Ok(())
}

fn run_diff(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let Some(report) = diff_local_against_ledger(&paths)? else {
        println!("ledger: <not synced> (run `mediainfo pull <titles>`)");
        return Ok(());
    };
    if runtime.json {
        print_json(&report)?;
    } else {
        print_diff_report(&report);
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_push(runtime: &RuntimeOptions, args: PushArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    require_sync_layout(&paths)?;
    let config = load_runtime_config(&paths)?;

    let summary = args
        .summary
        .or_else(|| config.edit.summary.clone())
        .unwrap_or_default();
    let report = push_to_remote(
        &paths,
        &config,
        &PushOptions {
            summary,
            dry_run: args.dry_run,
            force: args.force,
            titles: args.titles,
        },
    )?;
    if runtime.json {
        print_json(&report)?;
    } else {
        print_push_report(&report);
    }
    print_diagnostics(runtime, &paths);
    if !report.success {
        bail!(
            "push finished with {} conflict(s) and {} error(s)",
            report.conflicts.len(),
            report.errors.len()
        );
    }
    Ok(())
}

fn run_show(runtime: &RuntimeOptions, title: &str) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_runtime_config(&paths)?;
    let report = show_from_remote(&paths, &config, title)?;
    if runtime.json {
        print_json(&report)?;
    } else {
        print_show_report(&report);
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

#[derive(Debug, Serialize)]
struct SearchOutput {
    term: String,
    media_type: MediaType,
    has_more: bool,
    results: Vec<mediainfo_core::api::SearchHit>,
}

fn run_search(runtime: &RuntimeOptions, args: SearchArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_runtime_config(&paths)?;
    let types = if args.media_type.is_empty() {
        MediaType::ALL.to_vec()
    } else {
        args.media_type
            .iter()
            .map(|value| {
                MediaType::parse(value)
                    .ok_or_else(|| anyhow::anyhow!("unknown media type `{value}`"))
            })
            .collect::<Result<Vec<_>>>()?
    };

    let mut client = RepoApiClient::new(RepoApiClientConfig::from_config(&config))?;
    let mut store = SearchStore::new(args.limit);
    store.reset(&args.term);
    let mut outputs = Vec::new();
    for media_type in types {
        for _ in 0..args.pages.max(1) {
            if !store.has_more(media_type) {
                break;
            }
            store.search_more(&mut client, media_type)?;
        }
        outputs.push(SearchOutput {
            term: store.term().to_string(),
            media_type,
            has_more: store.has_more(media_type),
            results: store.sorted_results(media_type),
        });
    }
    debug!(requests = mediainfo_core::api::RepoReadApi::request_count(&client), "search done");

    if runtime.json {
        print_json(&outputs)?;
    } else {
        println!("search");
        println!("term: {}", store.term());
        for output in &outputs {
            let prefix = output.media_type.as_str();
            println!("{prefix}.count: {}", output.results.len());
            println!("{prefix}.has_more: {}", format_flag(output.has_more));
            if store.no_results(output.media_type) {
                println!("{prefix}.results: <none>");
            }
            for hit in &output.results {
                println!("{prefix}.result: {} (page {})", hit.title, hit.page_id);
            }
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

#[derive(Debug, Serialize)]
struct LanguageRow {
    code: String,
    name: Option<String>,
    dir: String,
}

fn run_languages(runtime: &RuntimeOptions, filter: Option<&str>) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_runtime_config(&paths)?;
    let catalog = language_catalog(&config)?;
    let needle = filter.map(|value| value.trim().to_lowercase());
    let rows: Vec<LanguageRow> = catalog
        .codes()
        .filter(|code| {
            needle.as_deref().is_none_or(|needle| {
                code.contains(needle)
                    || catalog
                        .name(code)
                        .is_some_and(|name| name.to_lowercase().contains(needle))
            })
        })
        .map(|code| LanguageRow {
            code: code.to_string(),
            name: catalog.name(code).map(ToString::to_string),
            dir: catalog.direction(code).as_str().to_string(),
        })
        .collect();

    if runtime.json {
        print_json(&rows)?;
    } else {
        println!("languages.count: {}", rows.len());
        for row in &rows {
            println!(
                "language: {} {} ({})",
                row.code,
                row.name.as_deref().unwrap_or("?"),
                row.dir
            );
        }
    }
    Ok(())
}

fn print_pull_report(report: &PullReport) {
    println!("pull");
    println!("requested: {}", report.requested);
    println!("pulled: {}", report.pulled);
    println!("created: {}", report.created);
    println!("updated: {}", report.updated);
    println!("unchanged: {}", report.unchanged);
    println!("skipped: {}", report.skipped);
    println!("missing: {}", report.missing);
    print_title_results(&report.titles);
    print_errors(&report.errors);
    println!("request_count: {}", report.request_count);
}

fn print_diff_report(report: &DiffReport) {
    println!("diff");
    println!("modified: {}", report.modified);
    println!("untracked: {}", report.untracked);
    println!("deleted_local: {}", report.deleted_local);
    if report.changes.is_empty() {
        println!("changes: <none>");
    }
    for change in &report.changes {
        println!(
            "change: {} [{}] {}",
            change.title,
            serde_json::to_value(change.change_type)
                .ok()
                .and_then(|value| value.as_str().map(ToString::to_string))
                .unwrap_or_default(),
            change.relative_path
        );
        for caption in &change.captions {
            match (&caption.inline, &caption.after) {
                (Some(inline), _) => println!("  caption.{}: {inline}", caption.language),
                (None, Some(after)) => {
                    println!("  caption.{}: {} {after}", caption.language, caption.kind)
                }
                (None, None) => println!("  caption.{}: {}", caption.language, caption.kind),
            }
        }
        for property in &change.statements {
            for guid in &property.changed {
                println!("  statement.{}: changed {guid}", property.property);
            }
            for guid in &property.removed {
                println!("  statement.{}: removed {guid}", property.property);
            }
        }
    }
}

fn print_push_report(report: &PushReport) {
    println!("push");
    println!("dry_run: {}", report.dry_run);
    println!("pushed: {}", report.pushed);
    println!("partial: {}", report.partial);
    println!("unchanged: {}", report.unchanged);
    println!("captions_saved: {}", report.captions_saved);
    println!("captions_removed: {}", report.captions_removed);
    println!("statements_saved: {}", report.statements_saved);
    println!("statements_removed: {}", report.statements_removed);
    for title in &report.conflicts {
        println!("conflict: {title}");
    }
    print_title_results(&report.titles);
    print_errors(&report.errors);
    println!("request_count: {}", report.request_count);
}

fn print_show_report(report: &ShowReport) {
    println!("show");
    println!("title: {}", report.title);
    println!("entity_id: {}", report.entity_id);
    println!("exists: {}", format_flag(report.exists));
    println!(
        "last_revision: {}",
        report
            .last_revision
            .map(|revision| revision.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    for caption in &report.captions {
        let marker = if caption.shown { "" } else { " (more languages)" };
        let text = if caption.text.is_empty() {
            "<no caption>"
        } else {
            caption.text.as_str()
        };
        println!("caption.{}: {text}{marker}", caption.language);
    }
    println!("captions.hidden: {}", report.hidden_captions);
    for property in &report.properties {
        println!("property.{}: {}", property.property, property.label);
        if property.statements.is_empty() {
            println!("  <no values>");
        }
        for statement in &property.statements {
            println!("  [{}] {}", statement.rank, statement.value);
            for qualifier in &statement.qualifiers {
                println!("    {qualifier}");
            }
        }
    }
    println!("request_count: {}", report.request_count);
}

fn print_title_results(results: &[TitleResult]) {
    for result in results {
        match &result.detail {
            Some(detail) => println!("{}: {} ({detail})", result.action, result.title),
            None => println!("{}: {}", result.action, result.title),
        }
    }
}

fn print_errors(errors: &[String]) {
    if errors.is_empty() {
        return;
    }
    println!("errors:");
    for error in errors {
        println!("  - {error}");
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn load_runtime_config(paths: &ResolvedPaths) -> Result<MediaInfoConfig> {
    load_config(&paths.config_path)
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&overrides)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
