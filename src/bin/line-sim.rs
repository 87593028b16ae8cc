//! Line simulator
//!
//! Drives an in-process queue the way a busy front desk would: a burst of
//! concurrent joins, a set of attached observers, a host serving the first
//! tickets and a sync agent following the last ticket in line.
//!
//! Usage:
//!   cargo run --bin line-sim -- --joins 40 --observers 5 --serve 12
//!   cargo run --bin line-sim -- --history 10 --service-seconds 90

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{info, warn};
use waitline::sync::{LocalTransport, SyncAgent, SyncConfig};
use waitline::utils::describe_eta;
use waitline::{QueueManager, Ticket, TicketStatus};

#[derive(Parser)]
#[command(name = "line-sim")]
#[command(about = "Simulate concurrent joins, serving and live observers on one queue")]
struct Cli {
    /// Queue name
    #[arg(short, long, default_value = "Front desk")]
    name: String,

    /// Participants joining concurrently
    #[arg(short, long, default_value = "25")]
    joins: usize,

    /// Observers attached to the queue
    #[arg(short, long, default_value = "3")]
    observers: usize,

    /// Tickets the host serves to completion
    #[arg(short, long, default_value = "5")]
    serve: usize,

    /// Completed services recorded before the run, so estimates are available
    #[arg(long, default_value = "10")]
    history: usize,

    /// Duration of each recorded historical service
    #[arg(long, default_value = "120.0")]
    service_seconds: f64,

    /// Show per-operation logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose { "debug" } else { "warn" })
        .with_target(false)
        .init();

    let manager = QueueManager::in_memory().context("Failed to build queue manager")?;
    let queue = manager.create_queue(&cli.name)?;
    println!("🎫 Queue '{}' ({})", queue.name, queue.id);

    for _ in 0..cli.history {
        manager.on_completion(queue.id, cli.service_seconds).await?;
    }
    if cli.history > 0 {
        println!(
            "   Seeded {} completed services of {:.0}s",
            cli.history, cli.service_seconds
        );
    }

    // Observers count every update until detached
    let mut observer_tasks = JoinSet::new();
    let mut handles = Vec::with_capacity(cli.observers);
    for index in 0..cli.observers {
        let mut observer = manager.attach(queue.id)?;
        handles.push(observer.handle());
        observer_tasks.spawn(async move {
            let mut received = 0u64;
            while observer.recv().await.is_some() {
                received += 1;
            }
            (index, received)
        });
    }

    // Concurrent joins
    let mut joins = JoinSet::new();
    for index in 0..cli.joins {
        let manager = manager.clone();
        let queue_id = queue.id;
        joins.spawn(async move { manager.issue_ticket(queue_id, format!("guest-{}", index)).await });
    }

    let mut tickets: Vec<Ticket> = Vec::with_capacity(cli.joins);
    while let Some(joined) = joins.join_next().await {
        match joined.context("Join task panicked")? {
            Ok(ticket) => tickets.push(ticket),
            Err(e) => warn!("Join refused: {}", e),
        }
    }
    tickets.sort_by_key(|t| t.position);

    let positions: Vec<u64> = tickets.iter().map(|t| t.position).collect();
    let gap_free = positions.iter().copied().eq(1..=tickets.len() as u64);
    println!(
        "👥 {} tickets issued, positions 1..={} ({})",
        tickets.len(),
        tickets.len(),
        if gap_free { "gap-free" } else { "GAPS FOUND" }
    );

    // Follow the last ticket in line the way a participant's device would
    let agent = match tickets.last() {
        Some(last) => {
            let transport = Arc::new(LocalTransport::new(manager.clone()));
            Some(SyncAgent::spawn(
                transport,
                queue.id,
                last.id,
                SyncConfig::default(),
            )?)
        }
        None => None,
    };

    // Host serves from the front of the line
    for ticket in tickets.iter().take(cli.serve) {
        for status in [
            TicketStatus::Called,
            TicketStatus::Serving,
            TicketStatus::Completed,
        ] {
            manager.transition(ticket.id, status).await?;
        }
        info!("Served {} ({})", ticket.position, ticket.holder_id);
    }

    let state = manager.query_state(queue.id)?;
    println!(
        "🛎️  Served {}; now serving position {}, {} completions, avg {:.1}s",
        cli.serve.min(tickets.len()),
        state.current_position,
        state.completed_count,
        state.avg_service_seconds
    );

    println!("\n{:>8}  {:<10}  {:>6}  ETA", "POSITION", "STATUS", "AHEAD");
    for ticket in tickets.iter().skip(cli.serve).take(10) {
        let view = manager.ticket_view(ticket.id)?;
        println!(
            "{:>8}  {:<10}  {:>6}  {}",
            view.ticket.position,
            view.ticket.status.to_string(),
            view.people_ahead,
            describe_eta(&view.eta)
        );
    }

    if let Some(agent) = agent {
        let target = manager.queue(queue.id)?.version;
        let synced = tokio::time::timeout(
            Duration::from_secs(5),
            agent.wait_for(|s| s.view.as_ref().is_some_and(|v| v.queue_version >= target)),
        )
        .await;

        match synced {
            Ok(Ok(snapshot)) => {
                if let Some(view) = snapshot.view {
                    println!(
                        "\n📱 Last in line sees {} ahead, {} ({} pushed updates applied)",
                        view.people_ahead,
                        describe_eta(&view.eta),
                        snapshot.updates_applied
                    );
                }
            }
            Ok(Err(e)) => warn!("Sync agent stopped: {}", e),
            Err(_) => warn!("Sync agent did not catch up within 5s"),
        }
        agent.shutdown().await;
    }

    for handle in handles {
        manager.detach(handle)?;
    }
    println!();
    while let Some(result) = observer_tasks.join_next().await {
        let (index, received) = result.context("Observer task panicked")?;
        println!("📡 Observer {} received {} updates", index, received);
    }

    let stats = manager.stats()?;
    println!(
        "\n📊 issued {}, transitions {}, events published {}",
        stats.tickets_issued, stats.transitions, stats.events_published
    );

    Ok(())
}
