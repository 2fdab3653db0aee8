//! The standard task set: compile, lint, package, serve and watch.
//!
//! | Task             | Does                                                   |
//! |------------------|--------------------------------------------------------|
//! | `clean`          | remove the distributable root                          |
//! | `compileStyles`  | lint, compile and prefix `.scss`, inject into browsers |
//! | `compileScripts` | lint and bundle scripts (minified in production)       |
//! | `compileMarkup`  | lint and copy `.html`                                  |
//! | `compressAssets` | optimise images                                        |
//! | `compile`        | the four compile tasks in parallel                     |
//! | `build`          | switch to production, then `compile`                   |
//! | `lint`           | `lintStyles`, `lintScripts`, `lintMarkup` in parallel  |
//! | `compress`       | zip the distributable root                             |
//! | `package`        | `clean`, `build`, `compress` in series                 |
//! | `server`         | start the dev server                                   |
//! | `watch`          | re-run compile tasks on change                         |
//! | `start`          | `server`, `watch`, `compile` in parallel               |

use super::{BoxError, Dependencies, TaskError, TaskRegistry, TaskRunner};
use crate::build::assets::AssetOptimizer;
use crate::build::package::{clean_dir, create_archive};
use crate::build::scripts::{MinifyScript, TranspileScript};
use crate::build::styles::StyleCompiler;
use crate::build::{BuildContext, BuildMode, InitSourceMap, Pipeline, PipelineReport, Rename};
use crate::lint::{
    self, lint_files, load_rules, LintConfigError, LintStage, Linter, MarkupLinter, RuleSet,
    ScriptLinter, Severity, StyleLinter,
};
use crate::session::Session;
use crate::watch::WatchCoordinator;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Stylesheet pipeline: source maps, lint, compile, rename.
pub fn styles_pipeline(context: &BuildContext, rules: RuleSet) -> Pipeline {
    let config = &context.config().styles;
    let src = context.src_dir();
    let include_paths = config.include_paths.iter().map(|p| context.resolve_src(p)).collect();
    let compiler = StyleCompiler::new(src.clone(), include_paths, &config.browsers);

    Pipeline::new("styles", src, config.pattern.clone(), context.resolve_dist(&config.out_dir))
        .stage(InitSourceMap)
        .stage(LintStage::new(StyleLinter::new(rules)))
        .stage(compiler)
        .stage(Rename::suffix(config.suffix.clone()))
}

/// First-party script pipeline; minify and transpile only in production.
pub fn scripts_pipeline(context: &BuildContext, mode: BuildMode, rules: RuleSet) -> Pipeline {
    let config = &context.config().scripts;
    let production = mode.is_production();
    let dest = context.resolve_dist(&config.out_dir);

    Pipeline::new("scripts", context.src_dir(), config.pattern.clone(), dest)
        .stage(InitSourceMap)
        .stage(LintStage::new(ScriptLinter::new(rules)))
        .stage_if(production, MinifyScript)
        .stage_if(production, TranspileScript)
        .concat(config.bundle.clone())
        .stage(Rename::suffix(config.suffix.clone()))
}

/// Vendor script pipeline; minify only in production.
pub fn vendor_scripts_pipeline(context: &BuildContext, mode: BuildMode) -> Pipeline {
    let config = &context.config().scripts;

    Pipeline::new(
        "vendor scripts",
        context.src_dir(),
        config.vendor_pattern.clone(),
        context.resolve_dist(&config.vendor_out_dir),
    )
    .stage(InitSourceMap)
    .stage_if(mode.is_production(), MinifyScript)
    .concat(config.vendor_bundle.clone())
    .stage(Rename::suffix(config.suffix.clone()))
}

/// Markup pipeline: lint, then copy unchanged.
pub fn markup_pipeline(context: &BuildContext, rules: RuleSet) -> Pipeline {
    let config = &context.config().markup;
    Pipeline::new("markup", context.src_dir(), config.pattern.clone(), context.dist_dir())
        .stage(LintStage::new(MarkupLinter::new(rules)))
}

/// Asset pipeline: lossless image optimisation.
pub fn assets_pipeline(context: &BuildContext) -> Pipeline {
    let config = &context.config().assets;
    let dest = context.resolve_dist(&config.out_dir);
    let optimizer = AssetOptimizer::new(config.optimize_png, config.optimize_svg);
    Pipeline::new("assets", context.src_dir(), config.pattern.clone(), dest).stage(optimizer)
}

/// Load a lint rule file, reporting problems and falling back to `defaults`.
fn lint_rules(session: &Session, file: &Path, defaults: RuleSet) -> RuleSet {
    let (rules, problem) = load_rules(&session.context().resolve_path(file), defaults);
    match problem {
        Some(problem @ LintConfigError::Missing(_)) => warn!("{}", problem),
        Some(problem) => session.reporter().warning(&problem.to_string()),
        None => {}
    }
    rules
}

async fn run_pipeline(pipeline: Pipeline) -> Result<PipelineReport, BoxError> {
    let report = tokio::task::spawn_blocking(move || pipeline.run()).await??;
    debug!("{}", report.summary());
    Ok(report)
}

/// Show diagnostics and failures. File failures only fail the task in production.
fn publish(session: &Session, report: &PipelineReport, mode: BuildMode) -> Result<(), BoxError> {
    let reporter = session.reporter();
    reporter.diagnostics(&report.diagnostics);
    for failure in &report.failures {
        reporter.error(&failure.to_string());
    }
    if mode.is_production() && !report.failures.is_empty() {
        let failed = report.failures.len();
        return Err(format!("{} file(s) failed in the {} pipeline", failed, report.name).into());
    }
    Ok(())
}

/// Output stylesheets as paths relative to the distributable root.
fn changed_stylesheets(context: &BuildContext, report: &PipelineReport) -> Vec<String> {
    let dist = context.dist_dir();
    report
        .outputs
        .iter()
        .filter(|p| p.extension().is_some_and(|e| e == "css"))
        .map(|p| p.strip_prefix(&dist).unwrap_or(p).to_string_lossy().replace('\\', "/"))
        .collect()
}

async fn clean(session: Arc<Session>) -> Result<(), BoxError> {
    let dist = session.context().dist_dir();
    tokio::task::spawn_blocking(move || clean_dir(&dist)).await??;
    session.reporter().success("Build directory cleaned");
    Ok(())
}

async fn compile_styles(session: Arc<Session>) -> Result<(), BoxError> {
    let mode = session.mode();
    let config = &session.context().config().lint;
    let rules = lint_rules(&session, &config.styles, lint::styles::default_rules());
    let report = run_pipeline(styles_pipeline(session.context(), rules)).await?;

    session.bridge().inject(changed_stylesheets(session.context(), &report));
    publish(&session, &report, mode)?;
    session.reporter().info("Styles compiled");
    Ok(())
}

async fn compile_scripts(session: Arc<Session>) -> Result<(), BoxError> {
    let mode = session.mode();
    let config = &session.context().config().lint;
    let rules = lint_rules(&session, &config.scripts, lint::scripts::default_rules());
    let main = scripts_pipeline(session.context(), mode, rules);
    let vendor = vendor_scripts_pipeline(session.context(), mode);
    let (main, vendor) = tokio::try_join!(run_pipeline(main), run_pipeline(vendor))?;

    session.bridge().reload();
    publish(&session, &main, mode)?;
    publish(&session, &vendor, mode)?;
    session.reporter().info("Scripts compiled");
    Ok(())
}

async fn compile_markup(session: Arc<Session>) -> Result<(), BoxError> {
    let mode = session.mode();
    let config = &session.context().config().lint;
    let rules = lint_rules(&session, &config.markup, lint::markup::default_rules());
    let report = run_pipeline(markup_pipeline(session.context(), rules)).await?;

    session.bridge().reload();
    publish(&session, &report, mode)?;
    session.reporter().info("Markup compiled");
    Ok(())
}

async fn compress_assets(session: Arc<Session>) -> Result<(), BoxError> {
    let mode = session.mode();
    let report = run_pipeline(assets_pipeline(session.context())).await?;

    session.bridge().reload();
    publish(&session, &report, mode)?;
    session.reporter().info("Assets optimised");
    Ok(())
}

async fn compiled(session: Arc<Session>) -> Result<(), BoxError> {
    if session.mode().is_production() {
        session.reporter().success("Production version built");
    }
    Ok(())
}

async fn production(session: Arc<Session>) -> Result<(), BoxError> {
    if session.mode_latch().promote_to_production() {
        debug!("switched to production mode");
    }
    Ok(())
}

async fn run_linter<L: Linter + 'static>(
    session: Arc<Session>,
    pattern: String,
    linter: L,
) -> Result<(), BoxError> {
    let src = session.context().src_dir();
    let found = tokio::task::spawn_blocking(move || lint_files(&src, &pattern, &linter)).await??;
    session.reporter().diagnostics(&found);

    let errors = found.iter().filter(|d| d.severity == Severity::Error).count();
    if errors > 0 && session.context().config().lint.fail_on_error {
        return Err(format!("{} lint error(s)", errors).into());
    }
    Ok(())
}

async fn lint_styles(session: Arc<Session>) -> Result<(), BoxError> {
    let config = session.context().config();
    let rules = lint_rules(&session, &config.lint.styles, lint::styles::default_rules());
    let pattern = config.styles.pattern.clone();
    run_linter(session.clone(), pattern, StyleLinter::new(rules)).await
}

async fn lint_scripts(session: Arc<Session>) -> Result<(), BoxError> {
    let config = session.context().config();
    let defaults = lint::scripts::default_rules();
    let rules = lint_rules(&session, &config.lint.scripts, defaults);
    let pattern = config.scripts.pattern.clone();
    run_linter(session.clone(), pattern, ScriptLinter::new(rules)).await
}

async fn lint_markup(session: Arc<Session>) -> Result<(), BoxError> {
    let config = session.context().config();
    let rules = lint_rules(&session, &config.lint.markup, lint::markup::default_rules());
    let pattern = config.markup.pattern.clone();
    run_linter(session.clone(), pattern, MarkupLinter::new(rules)).await
}

async fn linted(session: Arc<Session>) -> Result<(), BoxError> {
    session.reporter().success("Linted");
    Ok(())
}

async fn compress(session: Arc<Session>) -> Result<(), BoxError> {
    let dist = session.context().dist_dir();
    let archive = session.context().archive_path();
    let summary = tokio::task::spawn_blocking(move || create_archive(&dist, &archive)).await??;
    debug!(
        files = summary.files,
        bytes = summary.size,
        "archive written to {}",
        summary.archive.display()
    );
    session.reporter().success("Production build packaged");
    Ok(())
}

async fn server(session: Arc<Session>) -> Result<(), BoxError> {
    let config = &session.context().config().server;
    let dist = session.context().dist_dir();
    let addr = session.bridge().start(dist.clone(), &config.host, config.port).await?;
    session.reporter().success("Starting the development server...");
    session.reporter().info(&format!("Serving {} at http://{}", dist.display(), addr));
    Ok(())
}

async fn watch(session: Arc<Session>) -> Result<(), BoxError> {
    let runner = session.runner();
    let context = session.context();
    let coordinator = WatchCoordinator::from_config(context.src_dir(), &context.config().watch)?;
    if let Some(runner) = runner.upgrade() {
        if let Some(binding) = coordinator.bindings().iter().find(|b| !runner.contains(b.task())) {
            return Err(TaskError::NotFound(binding.task().to_string()).into());
        }
    }

    let handle = coordinator.start(runner, session.reporter().clone())?;
    if !session.set_watch(handle) {
        session.reporter().info("Already watching");
        return Ok(());
    }

    if !session.mode().is_production() {
        session.reporter().warning("Note that the development build is not optimised");
    }
    session.reporter().success("Watching changes...");
    Ok(())
}

/// Adapt an `async fn(Arc<Session>)` into a task callback.
fn with_session<F, Fut>(session: &Arc<Session>, f: F) -> impl Fn() -> Fut + Send + Sync + 'static
where
    F: Fn(Arc<Session>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    let session = Arc::clone(session);
    move || f(Arc::clone(&session))
}

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// Register every standard task on `registry`.
pub fn register_standard_tasks(
    registry: &mut TaskRegistry,
    session: &Arc<Session>,
) -> Result<(), TaskError> {
    registry.register("clean", with_session(session, clean))?;
    registry.register("compileStyles", with_session(session, compile_styles))?;
    registry.register("compileScripts", with_session(session, compile_scripts))?;
    registry.register("compileMarkup", with_session(session, compile_markup))?;
    registry.register("compressAssets", with_session(session, compress_assets))?;
    let compile = ["compileMarkup", "compileStyles", "compileScripts", "compressAssets"];
    registry.register_with(
        "compile",
        Dependencies::Parallel(names(&compile)),
        with_session(session, compiled),
    )?;
    registry.register("production", with_session(session, production))?;
    registry.series("build", &["production", "compile"])?;

    registry.register("lintStyles", with_session(session, lint_styles))?;
    registry.register("lintScripts", with_session(session, lint_scripts))?;
    registry.register("lintMarkup", with_session(session, lint_markup))?;
    registry.register_with(
        "lint",
        Dependencies::Parallel(names(&["lintStyles", "lintScripts", "lintMarkup"])),
        with_session(session, linted),
    )?;

    registry.register("compress", with_session(session, compress))?;
    registry.series("package", &["clean", "build", "compress"])?;

    registry.register("server", with_session(session, server))?;
    registry.register("watch", with_session(session, watch))?;
    registry.parallel("start", &["server", "watch", "compile"])?;

    for (name, description) in [
        ("clean", "Remove the distributable directory"),
        ("compileStyles", "Lint and compile stylesheets"),
        ("compileScripts", "Lint and bundle scripts"),
        ("compileMarkup", "Lint and copy markup"),
        ("compressAssets", "Optimise static assets"),
        ("compile", "Compile everything"),
        ("production", "Switch to production mode"),
        ("build", "Compile everything for production"),
        ("lintStyles", "Lint stylesheets"),
        ("lintScripts", "Lint scripts"),
        ("lintMarkup", "Lint markup"),
        ("lint", "Lint everything"),
        ("compress", "Archive the distributable directory"),
        ("package", "Clean, build and archive"),
        ("server", "Start the development server"),
        ("watch", "Recompile on change"),
        ("start", "Serve, watch and compile"),
    ] {
        registry.describe(name, description)?;
    }
    Ok(())
}

/// Register the standard tasks and attach the resulting runner to `session`.
pub fn standard_runner(session: &Arc<Session>) -> Result<TaskRunner, TaskError> {
    let mut registry = TaskRegistry::new();
    register_standard_tasks(&mut registry, session)?;
    let runner = registry.into_runner()?;
    session.attach_runner(&runner);
    Ok(runner)
}
