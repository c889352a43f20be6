use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pacer::config::Config;
use pacer::{ApiClient, EnqueueOptions, Failure, Scheduler, SchedulerConfig, SchedulerError, SchedulerStats};

mod cli;

use cli::Cli;
use cli::commands::Commands;

fn setup_logging(config: &Config) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pacer")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("pacer.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let default_level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn scheduler_config(cli: &Cli, config: &Config) -> SchedulerConfig {
    let mut sc = config.scheduler.clone();
    if let Some(n) = cli.max_concurrent {
        sc = sc.with_max_concurrent(n);
    }
    if let Some(ms) = cli.min_delay_ms {
        sc = sc.with_min_delay_ms(ms);
    }
    sc
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Get {
            paths,
            priority,
            max_retries,
        } => {
            let options = EnqueueOptions {
                priority: *priority,
                max_retries: *max_retries,
            };
            handle_get_command(paths, options, cli, config).await
        }
        Commands::Simulate {
            items,
            throttle_every,
            auth_failures,
            latency_ms,
        } => handle_simulate_command(*items, *throttle_every, *auth_failures, *latency_ms, cli, config).await,
        Commands::Config => handle_config_command(config),
    }
}

async fn handle_get_command(paths: &[String], options: EnqueueOptions, cli: &Cli, config: &Config) -> Result<()> {
    info!("Fetching {} paths from {}", paths.len(), config.http.base_url);
    let scheduler = Scheduler::new(scheduler_config(cli, config));
    let client = ApiClient::new(&config.http, scheduler.clone()).context("Failed to build HTTP client")?;

    let requests = paths.iter().map(|path| {
        let client = client.clone();
        async move {
            let result = client.get_with::<serde_json::Value>(path, options).await;
            (path, result)
        }
    });
    let results = futures::future::join_all(requests).await;

    for (path, result) in results {
        match result {
            Ok(value) => {
                println!("{} {}", "OK".green().bold(), path);
                println!("{}", serde_json::to_string_pretty(&value).context("Failed to render response")?);
            }
            Err(err) => print_failure(path, &err, Some(&client)),
        }
    }

    print_stats(&scheduler.stats());
    Ok(())
}

async fn handle_simulate_command(
    items: usize,
    throttle_every: usize,
    auth_failures: usize,
    latency_ms: u64,
    cli: &Cli,
    config: &Config,
) -> Result<()> {
    info!(
        "Simulating {} items (throttle_every={}, auth_failures={}, latency_ms={})",
        items, throttle_every, auth_failures, latency_ms
    );
    let scheduler = Scheduler::new(scheduler_config(cli, config));
    let dispatch_log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    // Stand-in for the login flow: clear the breaker shortly after it trips
    let mut auth_rx = scheduler.subscribe_auth();
    let relogin = scheduler.clone();
    let watcher = tokio::spawn(async move {
        while auth_rx.changed().await.is_ok() {
            let tripped = auth_rx.borrow_and_update().tripped;
            if tripped {
                println!("{}", "Auth breaker tripped, simulating re-login...".red().bold());
                tokio::time::sleep(Duration::from_millis(500)).await;
                relogin.notify_auth_recovered();
            }
        }
    });

    let mut submissions = Vec::with_capacity(items);
    for i in 0..items {
        let priority = if i % 4 == 0 { 1 } else { 5 };
        let attempts = Arc::new(AtomicU32::new(0));
        let log = dispatch_log.clone();
        let throttled = throttle_every > 0 && i % throttle_every == throttle_every - 1;
        let auth_fail = i < auth_failures;

        let submission = scheduler.submit(
            move || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                if let Ok(mut log) = log.lock() {
                    log.push(format!(
                        "{} item-{:02} p{} attempt {}",
                        chrono::Local::now().format("%H:%M:%S%.3f"),
                        i,
                        priority,
                        attempt + 1
                    ));
                }
                async move {
                    tokio::time::sleep(Duration::from_millis(latency_ms)).await;
                    if auth_fail {
                        return Err(Failure::http(401, "session expired"));
                    }
                    if throttled && attempt == 0 {
                        return Err(Failure::http(429, "Too Many Requests").with_retry_after(Duration::from_secs(1)));
                    }
                    Ok(format!("item-{:02} done after {} attempts", i, attempt + 1))
                }
            },
            EnqueueOptions::new().with_priority(priority),
        );
        submissions.push((i, submission));
    }

    let results = futures::future::join_all(
        submissions
            .into_iter()
            .map(|(i, s)| async move { (format!("item-{:02}", i), s.wait().await) }),
    )
    .await;
    watcher.abort();

    println!("{}", "Dispatch order:".cyan().bold());
    if let Ok(log) = dispatch_log.lock() {
        for line in log.iter() {
            println!("  {}", line);
        }
    }

    println!("{}", "Results:".cyan().bold());
    for (name, result) in results {
        match result {
            Ok(msg) => println!("  {} {}", "OK".green(), msg),
            Err(err) => print_failure(&name, &err, None),
        }
    }

    print_stats(&scheduler.stats());
    Ok(())
}

fn handle_config_command(config: &Config) -> Result<()> {
    let yaml = config.to_yaml().context("Failed to render config")?;
    println!("{}", yaml);
    Ok(())
}

fn print_failure(label: &str, err: &SchedulerError, client: Option<&ApiClient>) {
    let class = err.class().map(|c| c.to_string()).unwrap_or_else(|| "-".to_string());
    println!(
        "{} {} [{}, {} attempts] {}",
        "FAIL".red().bold(),
        label,
        class,
        err.attempts(),
        err.user_message()
    );
    if let Some(cause) = err.cause() {
        println!("     cause: {}", cause);
    }
    if err.requires_reauth()
        && let Some(client) = client
    {
        println!("     sign in again: {}", client.login_redirect(label).yellow());
    }
}

fn print_stats(stats: &SchedulerStats) {
    println!("{}", "Scheduler stats:".cyan().bold());
    println!("  queued:     {}", stats.queue_length);
    println!("  active:     {} / {}", stats.active_requests, stats.max_concurrent);
    match stats.rate_limited_until {
        Some(until) => {
            let remaining = until.saturating_duration_since(tokio::time::Instant::now());
            println!("  throttled:  {} ms remaining", remaining.as_millis());
        }
        None => println!("  throttled:  no"),
    }
    if stats.consecutive_rate_limits > 0 {
        println!("  rate-limit streak: {}", stats.consecutive_rate_limits);
    }
    println!(
        "  auth:       {} ({} consecutive failures)",
        if stats.auth_tripped { "tripped".red() } else { "ok".green() },
        stats.consecutive_auth_failures
    );
    println!(
        "  totals:     submitted={} dispatched={} succeeded={} failed={} retried={} cancelled={}",
        stats.total_submitted,
        stats.total_dispatched,
        stats.total_succeeded,
        stats.total_failed,
        stats.total_retried,
        stats.total_cancelled
    );
    println!("  peak concurrency: {}", stats.peak_concurrent);
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging
    setup_logging(&config).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
