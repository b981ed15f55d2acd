//! Subcommand handlers

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use reqwest::Method;
use stowaway_core::{
    Cache, CacheStorage, ClickOutcome, Destination, EventOutcome, Interception, Network,
    Notification, NotificationOptions, PushPayload, Request, Response, ResponseSource, WorkerEvent,
};
use tracing::{debug, warn};

use crate::args::{ClickArgs, Cli, Commands, FetchArgs, InstallArgs, PushArgs, SyncArgs};
use crate::host::{load_config, Host};

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let host = Host::new(config)?;

    match cli.command {
        Commands::Install(args) => install(&host, args).await,
        Commands::Activate => activate(&host).await,
        Commands::Fetch(args) => fetch(&host, args).await,
        Commands::Sync(args) => sync(&host, args).await,
        Commands::Push(args) => push(&host, args).await,
        Commands::Click(args) => click(&host, args).await,
        Commands::Status => status(&host).await,
        Commands::Queue => queue(&host),
    }
}

async fn install(host: &Host, args: InstallArgs) -> Result<()> {
    let (report, activation) = if args.no_activate {
        let dispatched = host.worker.dispatch(WorkerEvent::Install).await?;
        dispatched.settled().await;
        match dispatched.outcome {
            EventOutcome::Installed(report) => (report, None),
            other => bail!("Unexpected install outcome: {:?}", other),
        }
    } else {
        host.worker.roll_out().await?
    };

    println!(
        "Installed {} ({} cached, {} failed)",
        report.store,
        report.precache.stored.len(),
        report.precache.failed.len()
    );
    for failure in &report.precache.failed {
        println!("  failed  {}  {}", failure.entry, failure.reason);
    }

    match activation {
        Some(activation) => {
            println!("Activated {}", activation.current);
            for name in &activation.deleted {
                println!("  deleted {}", name);
            }
            for failure in &activation.failed {
                println!("  kept    {}  {}", failure.store, failure.reason);
            }
        }
        None => println!("Waiting to activate"),
    }
    Ok(())
}

async fn activate(host: &Host) -> Result<()> {
    host.worker.restore().await?;
    let dispatched = host.worker.dispatch(WorkerEvent::Activate).await?;
    dispatched.settled().await;

    let report = match dispatched.outcome {
        EventOutcome::Activated(report) => report,
        other => bail!("Unexpected activate outcome: {:?}", other),
    };
    println!("Activated {}", report.current);
    for name in &report.deleted {
        println!("  deleted {}", name);
    }
    for failure in &report.failed {
        println!("  kept    {}  {}", failure.store, failure.reason);
    }
    Ok(())
}

fn build_request(host: &Host, args: &FetchArgs) -> Result<Request> {
    let url = host
        .worker
        .config()
        .origin
        .join(&args.url)
        .with_context(|| format!("Invalid URL: {}", args.url))?;
    let method = Method::from_bytes(args.method.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid method: {}", args.method))?;

    let mut request = if args.navigate {
        Request::navigate(url)
    } else {
        Request::get(url)
    }
    .with_method(method);

    if let Some(ref destination) = args.destination {
        let destination: Destination = destination.parse().map_err(anyhow::Error::msg)?;
        request = request.with_destination(destination);
    }
    for header in &args.headers {
        let Some((name, value)) = header.split_once(':') else {
            bail!("Invalid header (expected `Name: value`): {}", header);
        };
        request = request.with_header(name.trim(), value.trim());
    }
    if let Some(ref data) = args.data {
        request = request.with_body(data.as_bytes().to_vec());
    }
    Ok(request)
}

async fn fetch(host: &Host, args: FetchArgs) -> Result<()> {
    let request = build_request(host, &args)?;
    let state = host.worker.restore().await?;
    debug!(state = %state, identity = %request.identity(), "Dispatching fetch");

    let dispatched = host
        .worker
        .dispatch(WorkerEvent::Fetch(request.clone()))
        .await
        .with_context(|| format!("Fetch failed: {}", request.url))?;

    let result = match &dispatched.outcome {
        EventOutcome::Fetched(Interception::Respond { response, source }) => {
            print_response(response, Some(*source), args.include)
        }
        _ => pass_through(host, &request, &args).await,
    };

    // Keep the process alive until any write-back has landed
    dispatched.settled().await;
    result
}

/// The worker declined the request: send it straight to the network.
async fn pass_through(host: &Host, request: &Request, args: &FetchArgs) -> Result<()> {
    match host.network.fetch(request).await {
        Ok(response) => print_response(&response, None, args.include),
        Err(e) if args.queue_on_failure && request.method != Method::GET => {
            warn!(error = %e, "Request failed, queueing for background sync");
            let id = host.queue.enqueue(request)?;
            eprintln!("Offline: queued as #{} for background sync", id);
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("Fetch failed: {}", request.url)),
    }
}

fn print_response(response: &Response, source: Option<ResponseSource>, include: bool) -> Result<()> {
    let source = match source {
        Some(ResponseSource::Cache) => "cache",
        Some(ResponseSource::Network) => "network",
        Some(ResponseSource::OfflineFallback) => "offline",
        None => "pass-through",
    };

    if include {
        eprintln!("HTTP {} {} ({})", response.status, response.status_text, source);
        for (name, value) in &response.headers {
            eprintln!("{}: {}", name, value);
        }
        eprintln!();
    } else {
        debug!(status = response.status, source, "Response");
    }

    let mut stdout = io::stdout().lock();
    stdout.write_all(&response.body)?;
    stdout.flush()?;
    Ok(())
}

async fn sync(host: &Host, args: SyncArgs) -> Result<()> {
    let dispatched = host
        .worker
        .dispatch(WorkerEvent::Sync { tag: args.tag.clone() })
        .await?;
    dispatched.settled().await;

    match dispatched.outcome {
        EventOutcome::Synced(Some(report)) => {
            println!("Replayed {}, {} still queued", report.replayed, report.remaining);
        }
        _ => println!("Nothing to do for tag {}", args.tag),
    }
    Ok(())
}

async fn push(host: &Host, args: PushArgs) -> Result<()> {
    let data = args.payload.map(String::into_bytes);
    let dispatched = host.worker.dispatch(WorkerEvent::Push { data }).await?;
    dispatched.settled().await;

    match dispatched.outcome {
        EventOutcome::Pushed(Some(notification)) => {
            println!("{}", serde_json::to_string_pretty(&notification)?);
        }
        _ => println!("No notification shown"),
    }
    Ok(())
}

async fn click(host: &Host, args: ClickArgs) -> Result<()> {
    let payload = PushPayload {
        title: args.title,
        body: String::new(),
    };
    let notification = Notification {
        id: 0,
        title: payload.title.clone(),
        options: NotificationOptions::for_payload(&payload),
    };

    let dispatched = host
        .worker
        .dispatch(WorkerEvent::NotificationClick(notification))
        .await?;
    dispatched.settled().await;

    match dispatched.outcome {
        EventOutcome::Clicked(ClickOutcome::Focused(client)) => {
            println!("Focused window #{} at {}", client.id, client.url)
        }
        EventOutcome::Clicked(ClickOutcome::Opened(client)) => {
            println!("Opened window #{} at {}", client.id, client.url)
        }
        _ => println!("No window opened"),
    }
    Ok(())
}

async fn status(host: &Host) -> Result<()> {
    let config = host.worker.config();
    let current = config.cache_name();
    let state = host.worker.restore().await?;

    println!("Origin:  {}", config.origin);
    println!("Store:   {}", current);
    println!("State:   {}", state);
    println!("Root:    {}", host.storage.root().display());

    let mut names = host.storage.keys().await?;
    names.sort();
    if names.is_empty() {
        println!("\nNo stores. Run `stowaway install`.");
    } else {
        println!("\nStores:");
        for name in &names {
            let cache = host.storage.open(name).await?;
            let count = cache.keys().await?.len();
            let marker = if *name == current { "*" } else { " " };
            println!("  {} {:<32} {:>5} entries", marker, name, count);
        }
    }

    if names.contains(&current) {
        let cache = host.storage.open(&current).await?;
        let mut keys = cache.keys().await?;
        keys.sort();
        if !keys.is_empty() {
            println!("\nEntries in {}:", current);
        }
        for key in keys {
            match cache.lookup(&key).await? {
                Some(entry) => println!(
                    "  {:>3} {:>9}B  {:<10} {}",
                    entry.response.status,
                    entry.response.body_len(),
                    entry.age_display(),
                    key
                ),
                None => continue,
            }
        }
    }

    println!("\nQueued for sync: {}", host.queue.len());
    Ok(())
}

fn queue(host: &Host) -> Result<()> {
    let entries = host.queue.entries();
    if entries.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }
    for entry in entries {
        println!(
            "#{:<4} {:<6} {}  (queued {})",
            entry.id,
            entry.method,
            entry.url,
            entry.queued_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}
