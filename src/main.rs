use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use colored::*;
use l4scan::config::ScanConfig;
use l4scan::network::interface::InterfaceResolver;
use l4scan::output::{OutputFormat, OutputManager};
use l4scan::utils::parse_port_specs;
use l4scan::ScanEngine;
use std::io;

/// Adjust the file descriptor limit and return the soft limit in effect
#[cfg(unix)]
fn adjust_ulimit_size(ulimit: Option<u64>) -> u64 {
    use rlimit::Resource;

    if let Some(limit) = ulimit {
        match Resource::NOFILE.set(limit, limit) {
            Ok(()) => log::info!("Raised file descriptor limit to {}", limit),
            Err(e) => log::warn!("Failed to set file descriptor limit to {}: {}", limit, e),
        }
    }

    match Resource::NOFILE.get() {
        Ok((soft, _)) => soft,
        Err(e) => {
            log::warn!("Could not read file descriptor limit: {}", e);
            65535
        }
    }
}

#[cfg(not(unix))]
fn adjust_ulimit_size(_ulimit: Option<u64>) -> u64 {
    65535
}

fn cli() -> Command {
    Command::new("l4scan")
        .version(env!("CARGO_PKG_VERSION"))
        .about("TCP SYN and UDP port scanner")
        .arg(
            Arg::new("interface")
                .short('i')
                .long("interface")
                .value_name("IFACE")
                .help("Interface to scan from; without a value, list active interfaces")
                .num_args(0..=1)
                .default_missing_value(""),
        )
        .arg(
            Arg::new("tcp")
                .short('t')
                .long("pt")
                .value_name("PORTS")
                .help("TCP ports, e.g. 22,80,8000-8100 (may be repeated)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("udp")
                .short('u')
                .long("pu")
                .value_name("PORTS")
                .help("UDP ports, e.g. 53,161 (may be repeated)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("wait")
                .short('w')
                .long("wait")
                .value_name("MS")
                .help("Per-probe timeout in milliseconds [default: 5000]")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("retry-window")
                .long("retry-window")
                .value_name("MS")
                .help("Wait after the SYN retransmission in milliseconds [default: 500]")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .value_name("N")
                .help("Concurrent probes per target [default: 256]")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("ulimit")
                .long("ulimit")
                .value_name("N")
                .help("Raise the open file limit before scanning")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file [default: ~/.l4scan.toml]"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print one JSON object per port")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-color")
                .long("no-color")
                .help("Disable colored output")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log probe activity to stderr")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("target")
                .value_name("HOST")
                .help("Host name or IP address to scan")
                .index(1),
        )
}

fn list_interfaces() {
    let resolver = InterfaceResolver::from_system();
    for iface in resolver.active_interfaces() {
        let mac = iface
            .mac
            .map(|mac| mac.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{} [{}]", iface.name.bright_cyan().bold(), mac);
        for network in &iface.ips {
            println!("    {}", network);
        }
    }
}

/// File settings first, command line on top
fn build_config(matches: &ArgMatches) -> anyhow::Result<ScanConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => ScanConfig::from_toml_file(path)?,
        None => ScanConfig::load_default_config(),
    };

    if let Some(interface) = matches.get_one::<String>("interface").filter(|i| !i.is_empty()) {
        config.interface = interface.clone();
    }
    if let Some(target) = matches.get_one::<String>("target") {
        config.target = target.clone();
    }
    if let Some(specs) = matches.get_many::<String>("tcp") {
        config.tcp_ports = parse_port_specs(specs.map(String::as_str)).context("Invalid TCP ports")?;
    }
    if let Some(specs) = matches.get_many::<String>("udp") {
        config.udp_ports = parse_port_specs(specs.map(String::as_str)).context("Invalid UDP ports")?;
    }
    if let Some(&timeout) = matches.get_one::<u64>("wait") {
        config.timeout = timeout;
    }
    if let Some(&window) = matches.get_one::<u64>("retry-window") {
        config.retry_window = window;
    }
    if let Some(&threads) = matches.get_one::<usize>("threads") {
        config.threads = threads;
    }
    if let Some(&ulimit) = matches.get_one::<u64>("ulimit") {
        config.ulimit = Some(ulimit);
    }

    Ok(config)
}

async fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    let mut config = build_config(matches)?;

    if matches.get_one::<String>("target").is_none() && config.interface.is_empty() {
        list_interfaces();
        return Ok(());
    }

    // Every UDP probe keeps a socket open for the whole timeout
    let fd_limit = adjust_ulimit_size(config.ulimit);
    let max_threads = usize::try_from(fd_limit / 2).unwrap_or(usize::MAX).max(1);
    if config.threads > max_threads {
        log::warn!(
            "Lowering concurrency from {} to {} to stay under the file descriptor limit",
            config.threads,
            max_threads
        );
        config.threads = max_threads;
    }

    let format = if matches.get_flag("json") {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let engine = ScanEngine::new(config)?;
    let sessions = engine.run().await?;

    let output = OutputManager::new(format);
    output.write_warnings(&mut io::stderr(), &sessions)?;
    output.write_sessions(&mut io::stdout().lock(), &sessions)?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    if matches.get_flag("no-color") {
        colored::control::set_override(false);
    }

    let level = if matches.get_flag("verbose") { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(&matches).await {
        eprintln!("{} {:#}", "Error:".bright_red().bold(), e);
        std::process::exit(1);
    }
}
