use std::{path::Path, process, sync::Arc};

use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;
use wiki_comments::{
    application::{
        error::AppError,
        interceptor::{InterceptorManager, register_bundled},
        render::{
            ComrakCommentRenderer, CommentRendererOptions, RenderPipeline, Renderer, WatchDisplay,
            comment_renderer,
        },
        thread::{ThreadDocument, ThreadRenderer},
    },
    config,
    infra::{error::InfraError, telemetry},
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    let pipeline = build_pipeline(&settings);

    match cli_args.command {
        config::Command::Render(args) => run_render(pipeline, &args.file).await,
        config::Command::Thread(args) => run_thread(pipeline, &settings, &args.file).await,
    }
}

fn build_pipeline(settings: &config::Settings) -> RenderPipeline {
    let mut interceptors = InterceptorManager::new();
    register_bundled(&mut interceptors);

    let options = CommentRendererOptions::from(&settings.render);
    let renderer: Arc<dyn Renderer> = if options == CommentRendererOptions::default() {
        comment_renderer()
    } else {
        Arc::new(ComrakCommentRenderer::new(options))
    };
    RenderPipeline::new(Arc::new(interceptors), renderer)
}

async fn run_render(pipeline: RenderPipeline, file: &Path) -> Result<(), AppError> {
    let markdown = tokio::fs::read_to_string(file)
        .await
        .map_err(InfraError::from)?;

    let display = WatchDisplay::new();
    let outcome = pipeline.run(markdown, &display).await?;
    info!(
        target = "wiki_comments::cli",
        file = %file.display(),
        bytes = outcome.html.len(),
        "comment rendered"
    );

    println!("{}", display.current());

    // a trailing failure is already logged and never undoes the commit
    let _ = outcome.trailing.wait().await;
    Ok(())
}

async fn run_thread(
    pipeline: RenderPipeline,
    settings: &config::Settings,
    file: &Path,
) -> Result<(), AppError> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .map_err(InfraError::from)?;
    let document: ThreadDocument = serde_json::from_str(&raw).map_err(InfraError::from)?;

    let renderer = ThreadRenderer::new(pipeline, &settings.thread);
    let entries = renderer.render(&document).await?;
    info!(
        target = "wiki_comments::cli",
        file = %file.display(),
        threads = entries.len(),
        "thread rendered"
    );

    let output = serde_json::to_string_pretty(&entries).map_err(InfraError::from)?;
    println!("{output}");
    Ok(())
}
