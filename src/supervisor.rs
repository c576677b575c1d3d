//! Built-in supervisor that restarts `procd serve` on crash.
//!
//! Forks the server subcommand, forwards SIGINT/SIGTERM to it, and restarts
//! with exponential backoff on abnormal exit. A clean exit (code 0) stops
//! the supervisor.

use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{error, info, warn};

use crate::config::SupervisorConfig;

/// Run the supervisor loop. Does not return unless the child exits cleanly.
pub async fn run_supervisor(config_path: Option<&str>, sup_config: &SupervisorConfig) -> ! {
    let mut backoff = 1u64;
    let max_backoff = sup_config.max_backoff;
    let stable_threshold = Duration::from_secs(sup_config.stable_threshold);

    let exe = std::env::current_exe().expect("resolve own executable path");

    loop {
        let started = Instant::now();

        let mut cmd = Command::new(&exe);
        cmd.arg("serve");
        if let Some(p) = config_path {
            cmd.args(["--config", p]);
        }

        let mut child = cmd.spawn().expect("failed to spawn server process");
        let server_pid = child.id();
        info!("supervisor: started procd serve (pid {server_pid:?})");

        let fwd_pid = server_pid;
        let _signal_task = tokio::spawn(async move {
            let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
                .expect("register SIGINT");
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("register SIGTERM");
            tokio::select! {
                _ = sigint.recv() => {
                    info!("supervisor: forwarding SIGINT to child");
                    if let Some(pid) = fwd_pid {
                        unsafe { libc::kill(pid as i32, libc::SIGINT); }
                    }
                }
                _ = sigterm.recv() => {
                    info!("supervisor: forwarding SIGTERM to child");
                    if let Some(pid) = fwd_pid {
                        unsafe { libc::kill(pid as i32, libc::SIGTERM); }
                    }
                }
            }
        });

        let status = child.wait().await;
        let uptime = started.elapsed();

        match status {
            Ok(s) if s.success() => {
                info!("procd serve exited cleanly, supervisor stopping");
                std::process::exit(0);
            }
            Ok(s) => {
                warn!("procd serve exited: {s} (uptime {:.1}s), restarting in {backoff}s", uptime.as_secs_f64());
                tokio::time::sleep(Duration::from_secs(backoff)).await;
            }
            Err(e) => {
                error!("procd serve wait error: {e} (uptime {:.1}s), restarting in {backoff}s", uptime.as_secs_f64());
                tokio::time::sleep(Duration::from_secs(backoff)).await;
            }
        }

        if uptime >= stable_threshold {
            backoff = 1;
        } else {
            backoff = (backoff * 2).min(max_backoff);
        }
    }
}
