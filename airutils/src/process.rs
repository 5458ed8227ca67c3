use std::path::Path;

use sysinfo::{Pid, System};
use tracing::{debug, warn};

/// Informations sur un processus lié à un socket.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: u32,
    pub process_name: String,
    pub owner: String,
}

/// Lists the processes holding a Unix-domain socket bound to `socket_path`.
///
/// The lookup goes through `/proc/net/unix` (socket inode by path) and then
/// through every `/proc/<pid>/fd` entry pointing to one of those inodes.
/// Returns an empty list on platforms without procfs.
pub fn find_processes_bound_to_socket(socket_path: &Path) -> Vec<ProcessInfo> {
    let inodes = unix_socket_inodes(socket_path);
    if inodes.is_empty() {
        return Vec::new();
    }

    let mut system = System::new_all();
    system.refresh_all();

    let mut found = Vec::new();
    for pid in system.processes().keys() {
        let pid = pid.as_u32();
        if process_holds_inode(pid, &inodes) {
            if let Some(info) = build_process_info(&system, pid) {
                found.push(info);
            }
        }
    }
    found
}

/// Kills the process `pid` (SIGKILL on Unix). Returns `true` when a signal
/// could be delivered.
pub fn kill_process(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes();
    match system.process(Pid::from_u32(pid)) {
        Some(process) => {
            let killed = process.kill();
            if !killed {
                warn!(pid, "Failed to kill process");
            }
            killed
        }
        None => {
            debug!(pid, "Process already gone");
            false
        }
    }
}

fn unix_socket_inodes(socket_path: &Path) -> Vec<u64> {
    let table = match std::fs::read_to_string("/proc/net/unix") {
        Ok(table) => table,
        Err(err) => {
            debug!("Cannot read /proc/net/unix: {}", err);
            return Vec::new();
        }
    };
    parse_unix_table(&table, socket_path)
}

/// Extracts the inodes of the entries of a `/proc/net/unix` table whose
/// path is `socket_path`.
fn parse_unix_table(table: &str, socket_path: &Path) -> Vec<u64> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            // Num RefCount Protocol Flags Type St Inode Path
            if fields.len() < 8 || Path::new(fields[7]) != socket_path {
                return None;
            }
            fields[6].parse().ok()
        })
        .collect()
}

fn process_holds_inode(pid: u32, inodes: &[u64]) -> bool {
    let Ok(entries) = std::fs::read_dir(format!("/proc/{pid}/fd")) else {
        return false;
    };
    entries.flatten().any(|entry| {
        std::fs::read_link(entry.path())
            .ok()
            .and_then(|target| socket_inode(&target.to_string_lossy()))
            .is_some_and(|inode| inodes.contains(&inode))
    })
}

/// Parses a `socket:[12345]` fd link target.
fn socket_inode(target: &str) -> Option<u64> {
    target
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

fn build_process_info(system: &System, pid: u32) -> Option<ProcessInfo> {
    let process = system.process(Pid::from_u32(pid))?;
    let process_name = process.name().to_string();

    let owner = process
        .user_id()
        .and_then(|uid| {
            users::get_user_by_uid(**uid).map(|user| user.name().to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "unknown".to_string());

    Some(ProcessInfo {
        pid,
        process_name,
        owner,
    })
}
