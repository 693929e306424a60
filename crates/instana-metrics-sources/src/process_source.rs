// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! A data source that snapshots the local process table.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::data_source::DataSource;

/// Attributes merged into every snapshot that cannot be derived from the
/// process table itself, e.g. the container instance id reported by the
/// platform metadata. Owned by the source instance that receives them.
#[derive(Debug, Clone, Default)]
pub struct SnapshotAttributes {
    pub container_instance_id: Option<String>,
    pub host_name: Option<String>,
    pub extra: Vec<(String, Value)>,
}

impl SnapshotAttributes {
    fn apply(&self, snapshot: &mut Map<String, Value>) {
        if let Some(container_instance_id) = &self.container_instance_id {
            snapshot.insert(
                "containerInstanceId".to_string(),
                Value::String(container_instance_id.clone()),
            );
        }
        if let Some(host_name) = &self.host_name {
            snapshot.insert("hostName".to_string(), Value::String(host_name.clone()));
        }
        for (key, value) in &self.extra {
            snapshot.insert(key.clone(), value.clone());
        }
    }
}

pub struct ProcessSnapshotDataSource {
    refresh_interval: Duration,
    attributes: SnapshotAttributes,
}

impl ProcessSnapshotDataSource {
    pub fn new(refresh_interval: Duration, attributes: SnapshotAttributes) -> Self {
        ProcessSnapshotDataSource {
            refresh_interval,
            attributes,
        }
    }
}

#[async_trait]
impl DataSource for ProcessSnapshotDataSource {
    fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    async fn fetch(&self) -> anyhow::Result<Value> {
        let processes = read_process_table()?;
        let mut snapshot = Map::new();
        snapshot.insert("processes".to_string(), Value::Array(processes));
        self.attributes.apply(&mut snapshot);
        Ok(Value::Object(snapshot))
    }
}

#[cfg(target_os = "linux")]
fn read_process_table() -> anyhow::Result<Vec<Value>> {
    let mut processes = Vec::new();
    for entry in std::fs::read_dir("/proc")? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|name| name.parse::<u32>().ok()) else {
            continue;
        };
        // Processes can vanish between readdir and the reads below; skip
        // anything that is no longer there.
        if let Some(process) = read_process(pid) {
            processes.push(process);
        }
    }
    Ok(processes)
}

#[cfg(target_os = "linux")]
fn read_process(pid: u32) -> Option<Value> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let (name, ppid) = parse_stat(&stat)?;

    let args: Vec<String> = std::fs::read_to_string(format!("/proc/{pid}/cmdline"))
        .ok()
        .map(|cmdline| {
            cmdline
                .split('\0')
                .filter(|arg| !arg.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Some(json!({
        "pid": pid,
        "ppid": ppid,
        "name": name,
        "args": args,
    }))
}

/// `/proc/<pid>/stat` is `pid (comm) state ppid ...`; comm may contain
/// spaces, so the closing parenthesis is located from the right.
#[cfg(target_os = "linux")]
fn parse_stat(stat: &str) -> Option<(String, u32)> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let name = stat.get(open + 1..close)?.to_string();
    let mut rest = stat.get(close + 1..)?.split_whitespace();
    let _state = rest.next()?;
    let ppid = rest.next()?.parse::<u32>().ok()?;
    Some((name, ppid))
}

/// On platforms without a readable process table only the current process is
/// reported.
#[cfg(not(target_os = "linux"))]
fn read_process_table() -> anyhow::Result<Vec<Value>> {
    let args: Vec<String> = std::env::args().collect();
    Ok(vec![json!({
        "pid": std::process::id(),
        "ppid": 0,
        "name": args.first().cloned().unwrap_or_default(),
        "args": args,
    })])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_snapshot_contains_the_current_process() {
        let source =
            ProcessSnapshotDataSource::new(Duration::from_secs(1), SnapshotAttributes::default());
        let snapshot = source.fetch().await.unwrap();

        let own_pid = std::process::id();
        let processes = snapshot["processes"].as_array().unwrap();
        assert!(
            processes
                .iter()
                .any(|process| process["pid"] == own_pid),
            "expected pid {own_pid} in the snapshot"
        );
    }

    #[tokio::test]
    async fn injected_attributes_are_merged_into_the_snapshot() {
        let attributes = SnapshotAttributes {
            container_instance_id: Some("task/55566677".to_string()),
            host_name: Some("serverless-test-host".to_string()),
            extra: vec![("platformVersion".to_string(), json!("1.4.0"))],
        };
        let source = ProcessSnapshotDataSource::new(Duration::from_secs(1), attributes);
        let snapshot = source.fetch().await.unwrap();

        assert_eq!(snapshot["containerInstanceId"], "task/55566677");
        assert_eq!(snapshot["hostName"], "serverless-test-host");
        assert_eq!(snapshot["platformVersion"], "1.4.0");
    }

    #[tokio::test]
    async fn two_sources_do_not_share_attribute_state() {
        let first = ProcessSnapshotDataSource::new(
            Duration::from_secs(1),
            SnapshotAttributes {
                container_instance_id: Some("first".to_string()),
                ..Default::default()
            },
        );
        let second =
            ProcessSnapshotDataSource::new(Duration::from_secs(1), SnapshotAttributes::default());

        let first_snapshot = first.fetch().await.unwrap();
        let second_snapshot = second.fetch().await.unwrap();
        assert_eq!(first_snapshot["containerInstanceId"], "first");
        assert!(second_snapshot.get("containerInstanceId").is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn stat_lines_with_spaces_in_the_name_parse() {
        let (name, ppid) = parse_stat("1234 (tokio worker 1) S 42 1234 1234 0").unwrap();
        assert_eq!(name, "tokio worker 1");
        assert_eq!(ppid, 42);
    }
}
