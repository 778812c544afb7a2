//! `orbitctl check`: operator diagnostic command verifying the process can
//! start cleanly in this environment. Keeps `commands/check.rs`'s
//! dotted-status-line UX; the checks themselves are re-scoped from cluster
//! connectivity to this crate's own ambient wiring, since the concrete
//! cluster manager is reached only through the Orchestrator Gateway adapter
//! and is out of scope here (SPEC_FULL §1, §6).

use orbitctl::budget::BudgetGate;
use orbitctl::config::{BudgetConfig, BuildQueueConfig, ReconcilerConfig, WebhookConfig};
use orbitctl::events::EventBus;
use orbitctl::gateway::InMemoryGateway;

pub async fn run() -> anyhow::Result<()> {
    println!("Running orbitctl environment checks...\n");

    print!("  Reconciler config ............ ");
    let reconciler_config = ReconcilerConfig::default();
    println!(
        "OK (tick {}ms, lease {}s)",
        reconciler_config.tick_interval.as_millis(),
        reconciler_config.lease_duration.as_secs()
    );

    print!("  Build queue config ........... ");
    let build_queue_config = BuildQueueConfig::default();
    println!(
        "OK (global {}, per-tenant {})",
        build_queue_config.global_concurrency, build_queue_config.default_tenant_concurrency
    );

    print!("  Budget config ................ ");
    let budget_config = BudgetConfig::default();
    println!(
        "OK (warn {}%, critical {}%)",
        budget_config.warning_threshold_percent, budget_config.critical_threshold_percent
    );

    print!("  Webhook config ............... ");
    let webhook_config = WebhookConfig::default();
    println!("OK (timeout {}s)", webhook_config.delivery_timeout.as_secs());

    print!("  In-memory gateway adapter .... ");
    let _gateway = InMemoryGateway::new();
    println!("OK (no concrete cluster manager bound)");

    print!("  Event bus ..................... ");
    let events = EventBus::new();
    println!("OK ({} events in a fresh log)", events.len());

    print!("  Budget gate ................... ");
    let _budget = BudgetGate::new(budget_config);
    println!("OK");

    println!("\nAll checks completed.");
    Ok(())
}
