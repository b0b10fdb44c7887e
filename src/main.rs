//! fedscore: federated HADS scoring over local site files.
//!
//! Every `--site` file is served by its own in-process site node; the
//! coordinator runs both protocol rounds over them and prints the final
//! aggregate as JSON on stdout.
//!
//! # Usage
//!
//! ```bash
//! fedscore --input task.json --site north=north.json --site south=south.json [--organisations north,south]
//! ```

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fedscore::adapters::files::{load_partition, load_task};
use fedscore::adapters::sanitize::SanitizingMakeWriter;
use fedscore::adapters::{HadsScorer, InProcessDispatcher, LaplaceMechanism};
use fedscore::application::PrivacyGuard;
use fedscore::{FederatedScoringService, PrivacyConfig, SiteId, SiteNode};

#[derive(Debug, PartialEq)]
struct CliArgs {
    input: PathBuf,
    sites: Vec<(SiteId, PathBuf)>,
    organisations: Option<Vec<SiteId>>,
}

fn usage() -> String {
    "Usage: fedscore --input <task.json> --site <name>=<rows.json> [--site ...] [--organisations <a,b,...>]"
        .to_string()
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs, String> {
    let mut args = args.into_iter();
    let mut input: Option<PathBuf> = None;
    let mut sites: Vec<(SiteId, PathBuf)> = Vec::new();
    let mut organisations: Option<Vec<SiteId>> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--input" => {
                let v = args.next().ok_or_else(usage)?;
                input = Some(PathBuf::from(v));
            }
            "--site" => {
                let v = args.next().ok_or_else(usage)?;
                let (name, path) = v
                    .split_once('=')
                    .filter(|(n, p)| !n.trim().is_empty() && !p.trim().is_empty())
                    .ok_or_else(|| format!("--site expects <name>=<path>, got '{v}'"))?;
                let site = SiteId::new(name.trim());
                if sites.iter().any(|(s, _)| *s == site) {
                    return Err(format!("site '{site}' given twice"));
                }
                sites.push((site, PathBuf::from(path.trim())));
            }
            "--organisations" => {
                let v = args.next().ok_or_else(usage)?;
                organisations = Some(
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(SiteId::new)
                        .collect(),
                );
            }
            "-h" | "--help" => return Err(usage()),
            other => return Err(format!("unexpected argument '{other}'\n{}", usage())),
        }
    }

    let input = input.ok_or_else(usage)?;
    if sites.is_empty() {
        return Err(format!("at least one --site is required\n{}", usage()));
    }
    Ok(CliArgs {
        input,
        sites,
        organisations,
    })
}

fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    // stdout carries the result, so logs go to stderr unless a file is requested
    let log_mode = std::env::var("FEDSCORE_LOG_MODE").unwrap_or_else(|_| "stderr".to_string());

    let (writer, guard) = if log_mode == "file" {
        let log_file =
            std::env::var("FEDSCORE_LOG_FILE").unwrap_or_else(|_| "fedscore.log".to_string());

        if let Some(parent) = std::path::Path::new(&log_file).parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .with_context(|| format!("cannot open log file {log_file}"))?;
        tracing_appender::non_blocking(file)
    } else {
        tracing_appender::non_blocking(std::io::stderr())
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(SanitizingMakeWriter::new(writer)))
        .init();

    Ok(guard)
}

fn main() -> Result<()> {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => bail!(message),
    };
    let _guard = init_logging()?;

    let config = PrivacyConfig::from_env()?;
    tracing::info!(
        "Privacy settings: minimum cell size {}, noise {}",
        config.min_sample_size,
        if config.noise_enabled() { "on" } else { "off" }
    );

    let task = load_task(&args.input).with_context(|| format!("loading {}", args.input.display()))?;
    let scorer = Arc::new(HadsScorer::new());

    let mut dispatcher = InProcessDispatcher::new();
    for (site, path) in &args.sites {
        let partition = load_partition(path).with_context(|| format!("loading site '{site}'"))?;
        let guard = PrivacyGuard::new(config, Arc::new(LaplaceMechanism::new()))?;
        dispatcher.register(Arc::new(SiteNode::new(
            site.clone(),
            partition,
            guard,
            Arc::clone(&scorer),
        )));
    }

    if let Some(requested) = &args.organisations {
        let known: BTreeSet<&SiteId> = args.sites.iter().map(|(s, _)| s).collect();
        if let Some(unknown) = requested.iter().find(|s| !known.contains(s)) {
            bail!("organisation '{unknown}' has no --site file");
        }
    }

    let service = FederatedScoringService::new(Arc::new(dispatcher), scorer);
    let record = service.run(&task, args.organisations.as_deref())?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
