//! Readiness barrier for execution units
//!
//! The default barrier is a fixed settling delay with no per-unit check.
//! The polling barrier checks each unit over HTTP with a bounded timeout.

use futures::future::join_all;
use reqwest::Client;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use super::unit::ExecutionUnit;
use crate::config::ReadinessSettings;

/// Wait for the units to settle; returns one readiness flag per unit
pub async fn await_ready(settings: &ReadinessSettings, units: &[ExecutionUnit]) -> Vec<bool> {
    match settings {
        ReadinessSettings::Settle { delay_secs } => {
            info!(
                "Waiting {}s for {} execution unit(s) to settle",
                delay_secs,
                units.len()
            );
            sleep(Duration::from_secs(*delay_secs)).await;
            units.iter().map(ExecutionUnit::is_available).collect()
        }
        ReadinessSettings::Poll {
            path,
            interval_ms,
            timeout_secs,
        } => {
            let client = match Client::builder().timeout(Duration::from_secs(2)).build() {
                Ok(client) => client,
                Err(e) => {
                    warn!("Cannot build readiness client: {}", e);
                    return vec![false; units.len()];
                }
            };

            let interval = Duration::from_millis(*interval_ms);
            let limit = Duration::from_secs(*timeout_secs);

            join_all(
                units
                    .iter()
                    .map(|unit| poll_unit(&client, unit, path, interval, limit)),
            )
            .await
        }
    }
}

async fn poll_unit(
    client: &Client,
    unit: &ExecutionUnit,
    path: &str,
    interval: Duration,
    limit: Duration,
) -> bool {
    let url = format!("http://{}{}", unit.device().endpoint(), path);
    let started = Instant::now();

    let polled = timeout(limit, async {
        loop {
            if !unit.is_available() {
                return false;
            }
            match client.get(&url).send().await {
                Ok(response) if response.status().is_success() => return true,
                Ok(response) => debug!("{} answered {}", url, response.status()),
                Err(e) => debug!("{} not reachable yet: {}", url, e),
            }
            sleep(interval).await;
        }
    })
    .await;

    match polled {
        Ok(true) => {
            debug!(
                "{} ready after {}ms",
                unit.device().tag,
                started.elapsed().as_millis()
            );
            true
        }
        Ok(false) => false,
        Err(_) => {
            warn!(
                "{} did not answer {} within {}s",
                unit.device().tag,
                url,
                limit.as_secs()
            );
            false
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::Device;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::process::Command;

    fn sh_unit(tag: &str, port: u16, script: &str) -> ExecutionUnit {
        let mut command = Command::new("sh");
        command.args(["-c", script]);
        ExecutionUnit::spawn(Arc::new(Device::new(tag, tag, port)), command).unwrap()
    }

    #[tokio::test]
    async fn test_settle_excludes_exited_units() {
        let units = vec![sh_unit("a", 4723, "sleep 30"), sh_unit("b", 4724, "exit 2")];
        let settings = ReadinessSettings::Settle { delay_secs: 1 };

        let ready = await_ready(&settings, &units).await;
        assert_eq!(ready, vec![true, false]);
    }

    #[tokio::test]
    async fn test_poll_answers_and_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\n{}")
                    .await;
            }
        });

        // nothing listens on the second unit's port
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_port = closed.local_addr().unwrap().port();
        drop(closed);

        let units = vec![
            sh_unit("up", port, "sleep 30"),
            sh_unit("down", closed_port, "sleep 30"),
        ];
        let settings = ReadinessSettings::Poll {
            path: "/wd/hub/status".to_string(),
            interval_ms: 50,
            timeout_secs: 1,
        };

        let ready = await_ready(&settings, &units).await;
        assert_eq!(ready, vec![true, false]);
    }
}
