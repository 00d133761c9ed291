use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use colored::Colorize;

use multipath_bench::config::{
    parse_platform_version, MultipathService, RunConfig, ServerCandidate,
};
use multipath_bench::connectivity::{ConnectivityEvent, StaticMonitor};
use multipath_bench::errors::{exit_codes, ConfigError};
use multipath_bench::latency::LatencyProbe;
use multipath_bench::measurement::Measurement;
use multipath_bench::probes::{
    AddressFamily, HttpDownloadTest, TcpLatencyProbe, TcpReachabilityProbe,
};
use multipath_bench::progress::LogProgress;
use multipath_bench::report::{BenchmarkReport, NullCounters};
use multipath_bench::scheduler::{ReachabilityProbes, TestPlan, TestScheduler};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Candidate test server as host:port=region; repeat for several.
    #[arg(long = "server", value_name = "HOST:PORT=REGION", required = true)]
    servers: Vec<String>,

    /// Ping bursts per candidate during latency estimation.
    #[arg(long, default_value_t = multipath_bench::config::DEFAULT_BURST_COUNT)]
    bursts: usize,

    /// Delay between ping bursts, in milliseconds.
    #[arg(long, default_value_t = 100)]
    burst_delay_ms: u64,

    /// Path fetched by the bulk download tests.
    #[arg(long, default_value = "/10MB")]
    download_path: String,

    /// Port probed by the multipath-capable reachability variant.
    #[arg(long, default_value_t = 6121)]
    multipath_port: u16,

    /// Spread traffic over all paths instead of handover mode; skips the
    /// MPTCP tests.
    #[arg(long)]
    aggregate: bool,

    /// Platform version (major.minor) fed to the MPTCP gate.
    #[arg(long, value_name = "MAJOR.MINOR")]
    platform_version: Option<String>,

    /// Print the full report as JSON instead of a summary.
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbosity.log_level_filter())
        .init();

    let config = build_config(&cli).unwrap_or_else(|err| {
        eprintln!("{} {err}", "error:".red().bold());
        std::process::exit(exit_codes::CONFIG_ERROR);
    });
    let plan = build_plan(&cli, &config);

    let scheduler = TestScheduler::new(
        config,
        plan,
        Arc::new(StaticMonitor::new(ConnectivityEvent::unknown())),
        Arc::new(NullCounters),
        Arc::new(LogProgress),
    )?;

    // Ctrl-C is the user-stop source: the run finalizes with whatever it
    // has instead of being killed.
    let handle = scheduler.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.request_stop();
        }
    });

    let report = scheduler.run().await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    Ok(())
}

fn build_config(cli: &Cli) -> Result<RunConfig, ConfigError> {
    let candidates = cli
        .servers
        .iter()
        .map(|spec| ServerCandidate::parse(spec))
        .collect::<Result<Vec<_>, _>>()?;

    let platform_version = cli
        .platform_version
        .as_deref()
        .map(parse_platform_version)
        .transpose()?;

    let config = RunConfig {
        candidates,
        burst_count: cli.bursts,
        inter_burst_delay: Duration::from_millis(cli.burst_delay_ms),
        multipath_service: if cli.aggregate {
            MultipathService::Aggregate
        } else {
            MultipathService::Handover
        },
        platform_version,
        ..RunConfig::default()
    };
    config.validate()?;

    Ok(config)
}

fn build_plan(cli: &Cli, config: &RunConfig) -> TestPlan {
    let latency_probes = config
        .candidates
        .iter()
        .map(|candidate| {
            Arc::new(TcpLatencyProbe::new(
                candidate.clone(),
                config.probe_timeout,
            )) as Arc<dyn LatencyProbe>
        })
        .collect();

    let reachability = ReachabilityProbes {
        ipv4: Arc::new(TcpReachabilityProbe::new(
            AddressFamily::V4,
            config.probe_timeout,
        )),
        ipv6: Arc::new(TcpReachabilityProbe::new(
            AddressFamily::V6,
            config.probe_timeout,
        )),
        multipath: Arc::new(
            TcpReachabilityProbe::new(AddressFamily::Any, config.probe_timeout)
                .with_port(cli.multipath_port),
        ),
    };

    let download = || {
        Arc::new(HttpDownloadTest::new(
            cli.download_path.clone(),
            Duration::from_secs(30),
        )) as Arc<dyn Measurement>
    };

    TestPlan {
        latency_probes,
        reachability,
        v4_tests: vec![download()],
        v6_tests: vec![download()],
        multipath_tests: vec![download()],
        mptcp_tests: if cli.aggregate { Vec::new() } else { vec![download()] },
    }
}

fn print_summary(report: &BenchmarkReport) {
    println!(
        "{} {}",
        "Server:".bold().white(),
        report.server.to_string().bright_blue()
    );
    match report.ping_median_ms {
        Some(median) => println!(
            "{} {:.1} ms (deviation {:.1} ms)",
            "Ping:".bold().white(),
            median,
            report.ping_std_deviation_ms.unwrap_or(0.0)
        ),
        None => println!(
            "{} {}",
            "Ping:".bold().white(),
            "no qualifying candidate".yellow()
        ),
    }
    if let Some(reason) = report.aborted {
        println!("{} {}", "Aborted:".bold().white(), reason.to_string().red());
    }

    for outcome in &report.outcomes {
        let status = if outcome.succeeded {
            "ok".green()
        } else {
            "failed".red()
        };
        let mut line = format!(
            "  {:>2}. {} {}",
            outcome.index, outcome.description, status
        );
        if let Some(ref summary) = outcome.short_summary {
            line.push_str(&format!(" ({summary})"));
        }
        if let Some(reason) = outcome.aborted {
            line.push_str(&format!(" [aborted: {reason}]"));
        }
        println!("{line}");
    }

    println!(
        "{} {} ok, {} failed in {:.1}s",
        "Result:".bold().white(),
        report.succeeded_count(),
        report.failed_count(),
        report.duration_secs
    );
}
