//! CLI handler for the reconcile command

use std::sync::Arc;

use strata_core::events::IndexEvent;
use strata_core::reconcile::ReconcileReport;

use super::{CliStrata, print_json};

/// Run the reconciler on a tokio runtime, flushing the queue in the
/// background. Ctrl-C stops the run at the next loop boundary.
pub fn handle_reconcile(strata: &CliStrata, json: bool) -> bool {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Could not start runtime: {}", e);
            return false;
        }
    };

    let subscription = (!json).then(|| {
        strata.events().subscribe(Arc::new(|event: &IndexEvent| match event {
            IndexEvent::Progress { phase, total, label } => eprintln!("[{}/{}] {}", phase, total, label),
            IndexEvent::Status { message } => eprintln!("      {}", message),
            IndexEvent::Notice { message, .. } => eprintln!("! {}", message),
            IndexEvent::ReloadUi => {}
        }))
    });

    let result = runtime.block_on(async {
        let shutdown = strata.shutdown_handle();
        let flusher = strata.spawn_flusher();
        let interrupt = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.signal();
            }
        });

        let report = strata.reconciler().spawn().await;
        shutdown.signal();
        if let Err(e) = flusher.await {
            log::error!("Index flusher failed: {}", e);
        }
        report
    });

    if let Some(id) = subscription {
        strata.events().unsubscribe(id);
    }

    match result {
        Ok(Some(report)) => {
            if json {
                print_json(&report)
            } else {
                print_report(&report);
                report.failed_phases.is_empty()
            }
        }
        Ok(None) => {
            eprintln!("✗ Reconciler already ran");
            false
        }
        Err(e) => {
            eprintln!("✗ Reconciler failed: {}", e);
            false
        }
    }
}

fn print_report(report: &ReconcileReport) {
    if report.is_clean() {
        println!("✓ Indexes are consistent");
        return;
    }
    println!("✓ Repaired indexes");
    let lines = [
        ("duplicate index roots dropped", report.duplicate_index_roots),
        ("ids minted", report.ids_minted),
        ("duplicate ids reset", report.ids_reset),
        ("documents recreated", report.trees_recreated),
        ("documents rewritten", report.trees_rewritten),
        ("files quarantined", report.quarantined),
        ("stale paths removed", report.stale_paths_removed),
        ("missing paths indexed", report.missing_paths_indexed),
        ("notebooks purged", report.boxes_purged),
        ("documents re-indexed", report.trees_reindexed),
        ("legacy timestamps fixed", report.legacy_updated_fixed),
        ("orphan roots removed", report.orphan_roots_removed),
        ("reference sets refreshed", report.refs_refreshed),
    ];
    for (label, count) in lines.iter().filter(|(_, c)| *c > 0) {
        println!("  {:>5}  {}", count, label);
    }
    if !report.failed_phases.is_empty() {
        println!("✗ Failed phases: {:?}", report.failed_phases);
    }
}
