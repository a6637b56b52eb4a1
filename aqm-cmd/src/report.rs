//! Status reporting: one-shot and periodic.

use crate::context::{MonitoringContext, Selection};
use crate::options::SourceOptions;
use log::{info, warn};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Status lines for the current context state.
pub fn status_lines(context: &MonitoringContext) -> Vec<String> {
    let status = context.status();
    let mut lines = Vec::new();
    if !status.loaded.is_empty() {
        lines.push(status.loaded.clone());
    }
    if !status.waiting.is_empty() {
        lines.push(status.waiting.clone());
    }
    let error = context.error_message();
    if !error.is_empty() {
        lines.push(error);
    }
    for (name, seconds) in context.load_times().iter() {
        match seconds {
            Some(seconds) => lines.push(format!("{}: loaded in {:.1} seconds", name, seconds)),
            None => lines.push(format!("{}: not loaded", name)),
        }
    }
    lines
}

/// Load every source once and print the status summary.
pub async fn run_status(options: &SourceOptions) -> anyhow::Result<()> {
    let context = MonitoringContext::connect(options.sources()?, Selection::default(), options.client())?;
    context.wait_settled().await;
    for line in status_lines(&context) {
        println!("{}", line);
    }
    context.shutdown();
    Ok(())
}

/// Reload every `interval` and print the status each time it changes.
/// `cycles == 0` runs until interrupted.
pub async fn run_watch(options: &SourceOptions, interval: Duration, cycles: u32) -> anyhow::Result<()> {
    let context = MonitoringContext::connect(options.sources()?, Selection::default(), options.client())?;
    let last = Rc::new(RefCell::new(String::new()));
    let printed = Rc::clone(&last);
    let subscription = context.graph().subscribe(&context.status_node(), move |status| {
        let Some(status) = status else {
            return;
        };
        let line = format!("{} {}", status.loaded, status.waiting).trim().to_string();
        if *printed.borrow() != line {
            println!("{}", line);
            *printed.borrow_mut() = line;
        }
    })?;

    let mut cycle = 0u32;
    loop {
        context.wait_settled().await;
        let error = context.error_message();
        if !error.is_empty() {
            warn!("{}", error);
        }
        cycle += 1;
        if cycles != 0 && cycle >= cycles {
            break;
        }
        tokio::time::sleep(interval).await;
        let triggered = context.reload_all();
        info!("Reloading {} sources (cycle {})", triggered, cycle + 1);
    }
    subscription.unsubscribe();
    context.shutdown();
    info!("Last status: {}", last.borrow());
    Ok(())
}
