//! Two enforcers kept in step over an in-process bus.
//!
//! This example shows how to:
//! - Connect one notifier per enforcer
//! - Reload the policy when a peer announces a change
//! - Swap the callback at runtime
//! - Close notifiers cleanly
//!
//! Run with: RUST_LOG=policy_watcher=debug cargo run --example policy_sync

use policy_watcher::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Policy Sync Example ===\n");

    let bus = MemoryBus::new();
    bus.bind("mem://enforcers");

    let config = NotifierConfig::new("mem://enforcers").with_subject("casbin.policy.updated");
    let admin = Notifier::connect(&bus, config.clone()).await?;
    let worker = Notifier::connect(&bus, config).await?;

    let reloads = Arc::new(AtomicUsize::new(0));
    let reloads_clone = Arc::clone(&reloads);
    worker.set_callback(move |msg| {
        let count = reloads_clone.fetch_add(1, Ordering::SeqCst) + 1;
        println!("[worker] reloading policy (#{}), payload {:?}", count, msg);
    });

    println!("--- admin adds a rule ---");
    admin.notify_with("p, alice, data1, read").await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("\n--- worker switches to a quieter callback ---");
    worker.set_callback(|_| println!("[worker] policy changed"));
    admin.notify().await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("\n--- worker shuts down ---");
    worker.close().await;
    admin.notify().await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("worker state: {:?}", worker.state());

    admin.close().await;
    match admin.notify().await {
        Err(e) => println!("notify after close: {}", e),
        Ok(()) => println!("notify after close unexpectedly succeeded"),
    }

    println!("\nTotal reloads by the first callback: {}", reloads.load(Ordering::SeqCst));
    println!("Example complete!");

    Ok(())
}
