//! HAProxy runtime API adapter.
//!
//! Users are routed by a map from the digest of their `Authorization` header
//! to their user id; traffic is counted per user id in two stick tables.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::LazyLock;

use async_trait::async_trait;
use base64::Engine;
use port_accounting::AccountSnapshot;
use port_types::{Credential, Direction, TrafficSample, UserId};
use regex::Regex;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, instrument};

use crate::collaborators::{TrafficControl, TrafficSource};
use crate::config::ProxyConfig;
use crate::error::{SourceError, SourceResult};

/// One stick-table row: user id key and byte counter.
static TABLE_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"key=(\d*) use.*?cnt=(\d*)").expect("TABLE_ROW is a valid regex pattern")
});

/// Map key for a credential: upper-case hex SHA-1 of the basic-auth header.
pub fn credential_digest(auth_user: &str, credential: &Credential) -> String {
    let token = base64::engine::general_purpose::STANDARD
        .encode(format!("{}:{}", auth_user, credential.expose()));
    let header = format!("Basic {}", token);
    hex::encode_upper(Sha1::digest(header.as_bytes()))
}

/// Parse `show table` output into `(user id, bytes)` rows.
pub fn parse_table(output: &str, reserved: &HashSet<i64>) -> Vec<(UserId, u64)> {
    TABLE_ROW
        .captures_iter(output)
        .filter_map(|caps| {
            let key: i64 = caps[1].parse().ok()?;
            let count: u64 = caps[2].parse().ok()?;
            (!reserved.contains(&key)).then_some((UserId::new(key), count))
        })
        .collect()
}

/// Talks to HAProxy over its admin socket.
#[derive(Debug, Clone)]
pub struct HaproxyRuntime {
    socket: PathBuf,
    user_map: String,
    upload_table: String,
    download_table: String,
    auth_user: String,
    reserved_keys: HashSet<i64>,
}

impl HaproxyRuntime {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            socket: config.socket.clone(),
            user_map: config.user_map.clone(),
            upload_table: config.upload_table.clone(),
            download_table: config.download_table.clone(),
            auth_user: config.auth_user.clone(),
            reserved_keys: config.reserved_keys.iter().copied().collect(),
        }
    }

    /// Send one command and read the reply until the socket closes.
    async fn talk(&self, command: &str) -> SourceResult<String> {
        let mut stream = UnixStream::connect(&self.socket).await.map_err(|e| {
            SourceError::Unavailable(format!("{}: {}", self.socket.display(), e))
        })?;
        let mut line = command.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        stream.write_all(line.as_bytes()).await?;
        stream.flush().await?;

        let mut reply = String::new();
        stream.read_to_string(&mut reply).await?;
        Ok(reply)
    }

    async fn show_table(&self, table: &str) -> SourceResult<Vec<(UserId, u64)>> {
        let output = self.talk(&format!("show table {}", table)).await?;
        Ok(parse_table(&output, &self.reserved_keys))
    }
}

#[async_trait]
impl TrafficControl for HaproxyRuntime {
    #[instrument(skip(self, account), fields(user_id = %account.user_id))]
    async fn apply_credential(&self, account: &AccountSnapshot) -> SourceResult<()> {
        let digest = credential_digest(&self.auth_user, &account.credential);
        let reply = self
            .talk(&format!(
                "add map {} {} {}",
                self.user_map,
                digest,
                account.user_id.get()
            ))
            .await?;
        if !reply.trim().is_empty() {
            return Err(SourceError::Protocol(reply.trim().to_string()));
        }
        debug!("Credential applied");
        Ok(())
    }

    #[instrument(skip(self, account), fields(user_id = %account.user_id))]
    async fn revoke_credential(&self, account: &AccountSnapshot) -> SourceResult<()> {
        let digest = credential_digest(&self.auth_user, &account.credential);
        let reply = self
            .talk(&format!("del map {} {}", self.user_map, digest))
            .await?;
        let reply = reply.trim();
        // Revoking an absent key is already the desired state.
        if !reply.is_empty() && !reply.to_ascii_lowercase().contains("not found") {
            return Err(SourceError::Protocol(reply.to_string()));
        }
        debug!("Credential revoked");
        Ok(())
    }
}

#[async_trait]
impl TrafficSource for HaproxyRuntime {
    async fn fetch_counters(&self) -> SourceResult<Vec<TrafficSample>> {
        let mut merged: BTreeMap<UserId, TrafficSample> = BTreeMap::new();
        for (table, direction) in [
            (&self.upload_table, Direction::Upload),
            (&self.download_table, Direction::Download),
        ] {
            for (user_id, bytes) in self.show_table(table).await? {
                let reading = TrafficSample::single(user_id, direction, bytes);
                merged
                    .entry(user_id)
                    .and_modify(|sample| {
                        sample.upload = sample.upload.or(reading.upload);
                        sample.download = sample.download.or(reading.download);
                    })
                    .or_insert(reading);
            }
        }
        Ok(merged.into_values().collect())
    }
}
