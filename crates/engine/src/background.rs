//! Background maintenance worker.
//!
//! One long-lived OS thread sleeps on a condvar for the configured
//! interval (or until shutdown wakes it), then runs a flush-if-needed and
//! at most one merge round. Every error in a cycle is logged and handed
//! to the configured hook; the worker never exits on a failed cycle, so a
//! corrupt part or transient I/O error cannot silently stop maintenance.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;

use crate::Shared;

pub(crate) fn spawn_worker(shared: Arc<Shared>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("granite-maintenance".to_string())
        .spawn(move || worker_loop(&shared))
}

fn worker_loop(shared: &Shared) {
    let interval = Duration::from_secs(shared.config.merge_interval_seconds);

    while !shared.shutdown.load(Ordering::SeqCst) {
        let Ok(guard) = shared.background.lock() else {
            return;
        };
        let Ok((guard, _)) = shared.background_cv.wait_timeout_while(guard, interval, |_| {
            !shared.shutdown.load(Ordering::SeqCst)
        }) else {
            return;
        };
        drop(guard);

        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }

        if let Err(error) = maintenance_cycle(shared) {
            tracing::error!(error = %error, "background maintenance cycle failed");
            if let Some(hook) = &shared.config.background_error_hook {
                hook(&error);
            }
        }
    }
}

fn maintenance_cycle(shared: &Shared) -> Result<()> {
    shared.trigger_flush_if_needed()?;
    if shared.should_trigger_merge()? {
        shared.perform_merge()?;
    }
    Ok(())
}
