use std::env;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::debug;

pub const STATE_DIR_NAME: &str = ".mediainfo";
pub const DOCUMENTS_DIR_NAME: &str = "structured_data";
pub const DB_FILENAME: &str = "mediainfo.db";

const ENV_PROJECT_ROOT: &str = "MEDIAINFO_PROJECT_ROOT";
const ENV_DATA_DIR: &str = "MEDIAINFO_DATA_DIR";
const ENV_CONFIG: &str = "MEDIAINFO_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

/// Paths given on the command line.
#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub documents_dir: PathBuf,
    pub state_dir: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub data_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    /// Layout rooted at `project_root` with every path at its default.
    pub fn under(project_root: &Path) -> Self {
        let state_dir = project_root.join(STATE_DIR_NAME);
        let data_dir = state_dir.join("data");
        Self {
            project_root: project_root.to_path_buf(),
            documents_dir: project_root.join(DOCUMENTS_DIR_NAME),
            db_path: data_dir.join(DB_FILENAME),
            config_path: state_dir.join("config.toml"),
            state_dir,
            data_dir,
            root_source: ValueSource::Flag,
            data_source: ValueSource::Default,
            config_source: ValueSource::Default,
        }
    }

    pub fn diagnostics(&self) -> String {
        let mut lines = Vec::new();
        for part in LayoutPart::ALL {
            let path = normalize_for_display(part.path(self));
            match part.source(self) {
                Some(source) => lines.push(format!("{}={path} ({})", part.key(), source.as_str())),
                None => lines.push(format!("{}={path}", part.key())),
            }
        }
        lines.join("\n")
    }
}

/// One piece of the on-disk layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutPart {
    ProjectRoot,
    DocumentsDir,
    StateDir,
    DataDir,
    Database,
    Config,
}

impl LayoutPart {
    pub const ALL: [LayoutPart; 6] = [
        LayoutPart::ProjectRoot,
        LayoutPart::DocumentsDir,
        LayoutPart::StateDir,
        LayoutPart::DataDir,
        LayoutPart::Database,
        LayoutPart::Config,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::ProjectRoot => "project_root",
            Self::DocumentsDir => "documents_dir",
            Self::StateDir => "state_dir",
            Self::DataDir => "data_dir",
            Self::Database => "db_path",
            Self::Config => "config_path",
        }
    }

    pub fn path(self, paths: &ResolvedPaths) -> &Path {
        match self {
            Self::ProjectRoot => &paths.project_root,
            Self::DocumentsDir => &paths.documents_dir,
            Self::StateDir => &paths.state_dir,
            Self::DataDir => &paths.data_dir,
            Self::Database => &paths.db_path,
            Self::Config => &paths.config_path,
        }
    }

    fn source(self, paths: &ResolvedPaths) -> Option<ValueSource> {
        match self {
            Self::ProjectRoot => Some(paths.root_source),
            Self::DataDir => Some(paths.data_source),
            Self::Config => Some(paths.config_source),
            _ => None,
        }
    }

    /// Directories `init` creates.
    fn is_created_by_init(self) -> bool {
        matches!(self, Self::DocumentsDir | Self::StateDir | Self::DataDir)
    }

    /// Parts pull and push cannot run without. The database is created on demand.
    fn is_required_for_sync(self) -> bool {
        matches!(self, Self::DocumentsDir | Self::StateDir)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PartStatus {
    pub part: LayoutPart,
    pub path: String,
    pub exists: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub parts: Vec<PartStatus>,
    pub db_size_bytes: Option<u64>,
    pub warnings: Vec<String>,
}

impl RuntimeStatus {
    pub fn exists(&self, part: LayoutPart) -> bool {
        self.parts
            .iter()
            .any(|status| status.part == part && status.exists)
    }

    fn missing_for_sync(&self) -> Vec<&PartStatus> {
        self.parts
            .iter()
            .filter(|status| status.part.is_required_for_sync() && !status.exists)
            .collect()
    }
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let parts: Vec<PartStatus> = LayoutPart::ALL
        .into_iter()
        .map(|part| PartStatus {
            part,
            path: normalize_for_display(part.path(paths)),
            exists: part.path(paths).exists(),
        })
        .collect();

    let db_size_bytes = match fs::metadata(&paths.db_path) {
        Ok(metadata) => Some(metadata.len()),
        Err(error) if error.kind() == ErrorKind::NotFound => None,
        Err(error) => {
            return Err(error)
                .with_context(|| format!("failed to inspect {}", paths.db_path.display()));
        }
    };

    let mut warnings = Vec::new();
    for status in &parts {
        if status.exists {
            continue;
        }
        if status.part.is_required_for_sync() {
            warnings.push(format!(
                "{} is missing; run `mediainfo init` before sync commands",
                status.path
            ));
        } else if status.part == LayoutPart::Config {
            warnings.push("config.toml is missing; built-in defaults are in effect".to_string());
        }
    }

    Ok(RuntimeStatus {
        parts,
        db_size_bytes,
        warnings,
    })
}

/// Fails unless `init` has laid out the directories pull and push write to.
pub fn require_sync_layout(paths: &ResolvedPaths) -> Result<()> {
    let status = inspect_runtime(paths)?;
    let missing = status.missing_for_sync();
    if missing.is_empty() {
        return Ok(());
    }
    let listed: Vec<String> = missing
        .iter()
        .map(|status| format!("  - {} ({})", status.part.key(), status.path))
        .collect();
    bail!(
        "project is not initialized for sync; missing:\n{}\nrun: mediainfo init --project-root {}",
        listed.join("\n"),
        normalize_for_display(&paths.project_root)
    );
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub materialize_config: bool,
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            materialize_config: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub created: Vec<LayoutPart>,
    pub wrote_config: bool,
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created = Vec::new();
    for part in LayoutPart::ALL
        .into_iter()
        .filter(|part| part.is_created_by_init())
    {
        let dir = part.path(paths);
        if dir.is_dir() {
            continue;
        }
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        debug!(dir = %dir.display(), "created layout directory");
        created.push(part);
    }

    let wrote_config = options.materialize_config
        && write_config_template(&paths.config_path, options.force)?;

    Ok(InitReport {
        created,
        wrote_config,
    })
}

fn write_config_template(path: &Path, force: bool) -> Result<bool> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut open = OpenOptions::new();
    open.write(true);
    if force {
        open.create(true).truncate(true);
    } else {
        open.create_new(true);
    }
    let mut file = match open.open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(error) => {
            return Err(error).with_context(|| format!("failed to open {}", path.display()));
        }
    };
    file.write_all(render_materialized_config().as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn render_materialized_config() -> String {
    format!(
        "# mediainfo configuration (materialized by `mediainfo init`)\n\n[wiki]\n# api_url = \"https://commons.example.org/w/api.php\"\n# user_agent = \"{agent}\"\n\n[captions]\ninterface_language = \"{language}\"\nfallback_languages = []\nuser_languages = []\nmax_caption_length = {max}\nwarn_within_max_caption_length = {warn}\n\n[statements]\ndefault_properties = []\n\n[statements.property_types]\n# P180 = \"wikibase-item\"\n\n[edit]\n# summary = \"structured data update\"\ntags = []\nbot = true\n",
        agent = crate::config::DEFAULT_USER_AGENT,
        language = crate::config::DEFAULT_INTERFACE_LANGUAGE,
        max = crate::config::DEFAULT_MAX_CAPTION_LENGTH,
        warn = crate::config::DEFAULT_WARN_WITHIN_MAX_CAPTION_LENGTH,
    )
}

/// Resolves the layout for the current process: flag, then environment, then
/// the nearest ancestor of the working directory that already holds a layout.
pub fn resolve_paths(overrides: &PathOverrides) -> Result<ResolvedPaths> {
    let cwd = env::current_dir().context("failed to read current directory")?;
    Ok(resolve_paths_in(&cwd, overrides, |key| env::var(key).ok()))
}

fn resolve_paths_in<F>(cwd: &Path, overrides: &PathOverrides, lookup_env: F) -> ResolvedPaths
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) =
        pick_path(overrides.project_root.as_deref(), ENV_PROJECT_ROOT, cwd, &lookup_env)
            .unwrap_or_else(|| (find_layout_root(cwd), ValueSource::Heuristic));

    let mut paths = ResolvedPaths::under(&project_root);
    paths.root_source = root_source;
    if let Some((data_dir, source)) = pick_path(
        overrides.data_dir.as_deref(),
        ENV_DATA_DIR,
        &project_root,
        &lookup_env,
    ) {
        paths.db_path = data_dir.join(DB_FILENAME);
        paths.data_dir = data_dir;
        paths.data_source = source;
    }
    if let Some((config_path, source)) = pick_path(
        overrides.config.as_deref(),
        ENV_CONFIG,
        &project_root,
        &lookup_env,
    ) {
        paths.config_path = config_path;
        paths.config_source = source;
    }
    paths
}

fn pick_path<F>(
    flag: Option<&Path>,
    env_key: &str,
    base: &Path,
    lookup_env: &F,
) -> Option<(PathBuf, ValueSource)>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = flag {
        return Some((base.join(path), ValueSource::Flag));
    }
    lookup_env(env_key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(|value| (base.join(value), ValueSource::Env))
}

fn find_layout_root(cwd: &Path) -> PathBuf {
    cwd.ancestors()
        .find(|candidate| {
            candidate.join(STATE_DIR_NAME).is_dir() || candidate.join(DOCUMENTS_DIR_NAME).is_dir()
        })
        .unwrap_or(cwd)
        .to_path_buf()
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn flag_wins_over_env_for_project_root() {
        let temp = tempdir().expect("tempdir");
        let flag_root = temp.path().join("flag-root");
        let env = HashMap::from([(
            ENV_PROJECT_ROOT.to_string(),
            temp.path().join("env-root").display().to_string(),
        )]);
        let overrides = PathOverrides {
            project_root: Some(flag_root.clone()),
            ..PathOverrides::default()
        };

        let paths = resolve_paths_in(temp.path(), &overrides, |key| env.get(key).cloned());
        assert_eq!(paths.project_root, flag_root);
        assert_eq!(paths.root_source, ValueSource::Flag);
        assert_eq!(paths.documents_dir, flag_root.join(DOCUMENTS_DIR_NAME));
    }

    #[test]
    fn relative_env_data_dir_hangs_off_project_root() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        let env = HashMap::from([(ENV_DATA_DIR.to_string(), " cache/db ".to_string())]);
        let overrides = PathOverrides {
            project_root: Some(root.clone()),
            ..PathOverrides::default()
        };

        let paths = resolve_paths_in(temp.path(), &overrides, |key| env.get(key).cloned());
        assert_eq!(paths.data_source, ValueSource::Env);
        assert_eq!(paths.db_path, root.join("cache").join("db").join(DB_FILENAME));
        assert_eq!(paths.config_source, ValueSource::Default);
    }

    #[test]
    fn blank_env_value_is_ignored() {
        let temp = tempdir().expect("tempdir");
        let env = HashMap::from([(ENV_CONFIG.to_string(), "  ".to_string())]);
        let paths = resolve_paths_in(temp.path(), &PathOverrides::default(), |key| {
            env.get(key).cloned()
        });
        assert_eq!(paths.config_source, ValueSource::Default);
    }

    #[test]
    fn nearest_ancestor_with_layout_becomes_root() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        let nested = root.join("notes").join("deep");
        fs::create_dir_all(root.join(STATE_DIR_NAME)).expect("state dir");
        fs::create_dir_all(&nested).expect("nested");

        let paths = resolve_paths_in(&nested, &PathOverrides::default(), |_| None);
        assert_eq!(paths.project_root, root);
        assert_eq!(paths.root_source, ValueSource::Heuristic);

        let bare = temp.path().join("elsewhere");
        fs::create_dir_all(&bare).expect("bare");
        assert_eq!(
            resolve_paths_in(&bare, &PathOverrides::default(), |_| None).project_root,
            bare
        );
    }

    #[test]
    fn init_creates_layout_once() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::under(&temp.path().join("project"));

        let report = init_layout(&paths, &InitOptions::default()).expect("init");
        assert_eq!(
            report.created,
            vec![
                LayoutPart::DocumentsDir,
                LayoutPart::StateDir,
                LayoutPart::DataDir
            ]
        );
        assert!(report.wrote_config);
        let config = crate::config::load_config(&paths.config_path).expect("config parses");
        assert_eq!(config.max_caption_length(), 250);

        fs::write(&paths.config_path, "[edit]\nbot = false\n").expect("edit config");
        let again = init_layout(&paths, &InitOptions::default()).expect("init again");
        assert!(again.created.is_empty());
        assert!(!again.wrote_config);
        assert_eq!(
            fs::read_to_string(&paths.config_path).expect("read"),
            "[edit]\nbot = false\n"
        );

        let forced = init_layout(
            &paths,
            &InitOptions {
                materialize_config: true,
                force: true,
            },
        )
        .expect("forced");
        assert!(forced.wrote_config);
    }

    #[test]
    fn sync_requires_initialized_layout() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::under(temp.path());

        let status = inspect_runtime(&paths).expect("inspect");
        assert!(status.exists(LayoutPart::ProjectRoot));
        assert!(!status.exists(LayoutPart::Database));
        assert_eq!(status.db_size_bytes, None);
        assert_eq!(status.warnings.len(), 3);

        let err = require_sync_layout(&paths).expect_err("must fail");
        let message = err.to_string();
        assert!(message.contains("not initialized for sync"));
        assert!(message.contains("documents_dir"));

        init_layout(
            &paths,
            &InitOptions {
                materialize_config: false,
                force: false,
            },
        )
        .expect("init");
        require_sync_layout(&paths).expect("ready after init");
    }
}
