use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use kpipe_core::Resource;
use kpipe_fnruntime::{
    ConsoleReporter, DefaultExecutors, ExecPolicy, Function, Mount, Reporter, RuntimeOptions, StderrReporter,
};
use kpipe_render::{write_package, PackageOutput, Renderer};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "kpipectl", version, about = "Hydrate configuration packages with KRM functions")]
struct Cli {
    /// Where rendered resources go
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Dir)]
    output: Output,

    /// Truncate function stderr and results (default from KPIPE_TRUNCATE_OUTPUT)
    #[arg(long = "truncate-output", global = true, action = ArgAction::Set)]
    truncate_output: Option<bool>,

    /// Directory to write the function results ledger to
    #[arg(long = "results-dir", global = true)]
    results_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    /// Write back into the package directory
    Dir,
    /// Print resources to stdout; progress goes to stderr
    Stdout,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the Kptfile pipelines of a package and its subpackages
    Render {
        /// Package directory
        #[arg(default_value = ".")]
        pkg: PathBuf,
        /// Permit functions declared with `exec`
        #[arg(long = "allow-exec", action = ArgAction::SetTrue)]
        allow_exec: bool,
    },
    /// Run one function over every resource in a directory
    Eval {
        /// Directory holding the resources
        #[arg(default_value = ".")]
        dir: PathBuf,
        /// Container image of the function
        #[arg(long = "image", conflicts_with = "exec_path", required_unless_present = "exec_path")]
        image: Option<String>,
        /// Local executable implementing the function
        #[arg(long = "exec-path")]
        exec_path: Option<String>,
        /// File holding the function config
        #[arg(long = "fn-config")]
        fn_config: Option<PathBuf>,
        /// Give the function container network access
        #[arg(long = "network", action = ArgAction::SetTrue)]
        network: bool,
        /// Mount in `docker run --mount` syntax; read-only unless rw=true
        #[arg(long = "mount")]
        mounts: Vec<Mount>,
        /// Environment entry, KEY=VALUE or KEY to export from the host
        #[arg(short = 'e', long = "env")]
        env: Vec<String>,
        /// Run the container as the current uid:gid instead of nobody
        #[arg(long = "as-current-user", action = ArgAction::SetTrue)]
        as_current_user: bool,
        /// Function config as key=value pairs
        #[arg(last = true)]
        fn_args: Vec<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("KPIPE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KPIPE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KPIPE_METRICS_ADDR; expected host:port");
        }
    }
}

fn parse_fn_args(args: &[String]) -> Result<Vec<(String, String)>> {
    args.iter()
        .map(|a| match a.split_once('=') {
            Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
            _ => Err(anyhow!("function argument {:?} must be key=value", a)),
        })
        .collect()
}

fn reporter_for(output: Output) -> Box<dyn Reporter> {
    match output {
        Output::Dir => Box::new(ConsoleReporter),
        Output::Stdout => Box::new(StderrReporter),
    }
}

/// Persist the ledger and the resources, then surface the pipeline error.
/// Returns how many functions ran.
fn finish(
    root: &Path,
    mut out: PackageOutput,
    output: Output,
    results_dir: Option<&Path>,
    reporter: &mut dyn Reporter,
) -> Result<usize> {
    let ran = out.results.len();
    let files = std::mem::take(&mut out.files);
    let resources = out.persist_then_surface(results_dir, reporter)?;
    match output {
        Output::Dir => write_package(root, &resources, &files)
            .with_context(|| format!("writing package {}", root.display()))?,
        Output::Stdout => write_resources(&mut std::io::stdout().lock(), &resources)?,
    }
    info!(pkg = %root.display(), resources = resources.len(), functions = ran, "done");
    Ok(ran)
}

fn write_resources(w: &mut impl Write, resources: &[Resource]) -> Result<()> {
    for (i, r) in resources.iter().enumerate() {
        if i > 0 {
            w.write_all(b"---\n")?;
        }
        w.write_all(r.to_yaml()?.as_bytes())?;
    }
    w.flush()?;
    Ok(())
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<()> {
    let mut opts = RuntimeOptions::from_env();
    if let Some(t) = cli.truncate_output {
        opts.truncation.enabled = t;
    }
    let mut reporter = reporter_for(cli.output);

    match cli.command {
        Commands::Render { pkg, allow_exec } => {
            info!(pkg = %pkg.display(), allow_exec, "render invoked");
            let factory = DefaultExecutors {
                policy: ExecPolicy::default(),
                runtime: opts.container_runtime.clone(),
                allow_exec,
            };
            let renderer = Renderer::new(&factory, opts.truncation);
            let out = renderer.hydrate(&pkg, reporter.as_mut(), &cancel).await;
            let ran = finish(&pkg, out, cli.output, cli.results_dir.as_deref(), reporter.as_mut())?;
            reporter.write_out(&format!("Successfully executed {} function(s).\n", ran));
        }
        Commands::Eval { dir, image, exec_path, fn_config, network, mounts, env, as_current_user, fn_args } => {
            info!(dir = %dir.display(), image = ?image, exec = ?exec_path, "eval invoked");
            let mut f = Function { image, exec: exec_path, ..Default::default() };
            if let Some(cfg) = fn_config {
                let abs = std::env::current_dir().context("resolving working directory")?.join(cfg);
                f.config_path = Some(abs.display().to_string());
            }
            f.config_map = parse_fn_args(&fn_args)?.into_iter().collect();

            let factory = DefaultExecutors {
                policy: ExecPolicy { network, mounts, env, as_current_user },
                runtime: opts.container_runtime.clone(),
                allow_exec: true,
            };
            let renderer = Renderer::new(&factory, opts.truncation);
            let out = renderer.eval(&dir, &f, reporter.as_mut(), &cancel).await;
            finish(&dir, out, cli.output, cli.results_dir.as_deref(), reporter.as_mut())?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling running function");
            on_signal.cancel();
        }
    });

    if let Err(e) = run(cli, cancel).await {
        let already_reported = e.downcast_ref::<kpipe_core::Error>().map_or(false, |e| e.is_already_reported());
        if !already_reported {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}
