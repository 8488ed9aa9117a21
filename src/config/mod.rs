//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "wiki-comments";
const ENV_PREFIX: &str = "WIKI_COMMENTS";
const DEFAULT_LAYOUT_TYPE: &str = "growi";
const DEFAULT_VISIBLE_REPLIES: usize = 2;

/// Command-line arguments for the wiki-comments binary.
#[derive(Debug, Parser)]
#[command(name = "wiki-comments", version, about = "Render wiki page comments")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "WIKI_COMMENTS_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Render one markdown comment body and print the committed HTML.
    Render(RenderArgs),
    /// Render a JSON comment thread and print the grouped result as JSON.
    Thread(ThreadArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Skip HTML sanitisation (diagnostics only).
    #[arg(long = "no-sanitize", action = clap::ArgAction::SetTrue)]
    pub no_sanitize: bool,

    /// Do not wrap tables with the edit button.
    #[arg(long = "no-table-decoration", action = clap::ArgAction::SetTrue)]
    pub no_table_decoration: bool,

    /// Override whether single newlines become line breaks.
    #[arg(
        long = "render-line-breaks",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub line_breaks: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub overrides: RenderOverrides,

    /// Markdown file to render.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct ThreadArgs {
    #[command(flatten)]
    pub overrides: RenderOverrides,

    /// Override the page layout type used to order replies.
    #[arg(long = "layout-type", value_name = "NAME")]
    pub layout_type: Option<String>,

    /// Override how many trailing replies stay visible.
    #[arg(long = "visible-replies", value_name = "COUNT")]
    pub visible_replies: Option<usize>,

    /// JSON thread document.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub render: RenderSettings,
    pub thread: ThreadSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub sanitize: bool,
    pub decorate_tables: bool,
    pub line_breaks: bool,
}

#[derive(Debug, Clone)]
pub struct ThreadSettings {
    pub layout_type: String,
    pub visible_replies: usize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    raw.apply_logging_overrides(&cli.logging);
    match &cli.command {
        Command::Render(args) => raw.apply_render_overrides(&args.overrides),
        Command::Thread(args) => raw.apply_thread_overrides(args),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    render: RawRenderSettings,
    thread: RawThreadSettings,
}

impl RawSettings {
    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        if overrides.no_sanitize {
            self.render.sanitize = Some(false);
        }
        if overrides.no_table_decoration {
            self.render.decorate_tables = Some(false);
        }
        if let Some(line_breaks) = overrides.line_breaks {
            self.render.line_breaks = Some(line_breaks);
        }
    }

    fn apply_thread_overrides(&mut self, args: &ThreadArgs) {
        self.apply_render_overrides(&args.overrides);
        if let Some(layout) = args.layout_type.as_ref() {
            self.thread.layout_type = Some(layout.clone());
        }
        if let Some(count) = args.visible_replies {
            self.thread.visible_replies = Some(count);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            render,
            thread,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            render: build_render_settings(render),
            thread: build_thread_settings(thread)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_render_settings(render: RawRenderSettings) -> RenderSettings {
    RenderSettings {
        sanitize: render.sanitize.unwrap_or(true),
        decorate_tables: render.decorate_tables.unwrap_or(true),
        line_breaks: render.line_breaks.unwrap_or(true),
    }
}

fn build_thread_settings(thread: RawThreadSettings) -> Result<ThreadSettings, LoadError> {
    let layout_type = thread
        .layout_type
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_LAYOUT_TYPE.to_string());
    if layout_type.is_empty() {
        return Err(LoadError::invalid(
            "thread.layout_type",
            "must not be empty",
        ));
    }

    let visible_replies = thread.visible_replies.unwrap_or(DEFAULT_VISIBLE_REPLIES);
    if visible_replies == 0 {
        return Err(LoadError::invalid(
            "thread.visible_replies",
            "must be greater than zero",
        ));
    }

    Ok(ThreadSettings {
        layout_type,
        visible_replies,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    sanitize: Option<bool>,
    decorate_tables: Option<bool>,
    line_breaks: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawThreadSettings {
    layout_type: Option<String>,
    visible_replies: Option<usize>,
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
