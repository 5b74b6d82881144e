//! ICMP reachability check, off-loaded to the platform `ping` binary — the
//! only blocking call the scan path allows.

use std::time::Duration;

use tokio::process::Command;

const PING_BUDGET: Duration = Duration::from_secs(1);

/// Runs one platform ping against `host` and returns whether it succeeded.
/// Spawning and waiting on the child happens on tokio's blocking-friendly
/// process reactor, never on the caller's task directly.
pub async fn is_reachable(host: &str) -> bool {
    let mut command = build_command(host);
    let status = tokio::time::timeout(PING_BUDGET + Duration::from_millis(200), command.status()).await;
    match status {
        Ok(Ok(status)) => status.success(),
        _ => false,
    }
}

#[cfg(target_os = "windows")]
fn build_command(host: &str) -> Command {
    let mut command = Command::new("ping");
    command.args(["-n", "1", "-w", "1000", host]);
    command.stdout(std::process::Stdio::null());
    command.stderr(std::process::Stdio::null());
    command
}

#[cfg(not(target_os = "windows"))]
fn build_command(host: &str) -> Command {
    let mut command = Command::new("ping");
    command.args(["-c", "1", "-W", "1", host]);
    command.stdout(std::process::Stdio::null());
    command.stderr(std::process::Stdio::null());
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_targets_the_given_host() {
        let command = build_command("203.0.113.5");
        let debug = format!("{command:?}");
        assert!(debug.contains("203.0.113.5"));
    }
}
