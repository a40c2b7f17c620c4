//! In-memory `Transport` for tests: a small remote filesystem, canned exec
//! output, a call journal and a shell channel whose worker end the test owns.

use super::client::{exec_deadline, local_io_error};
use super::transport::{ExecOutput, PtyRequest, ShellChannel, ShellWorkerEnd, Transport};
use crate::error::{AppError, AppResult, ListError};
use crate::sftp::{format_permissions, RemoteEntry};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Read, Write};
use std::time::Duration;

const HOME: &str = "/home/pi";

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
    Symlink(String),
}

#[derive(Default)]
struct Exec {
    canned: HashMap<String, (String, i32)>,
    blocking: HashSet<String>,
    hanging: HashSet<String>,
    delayed: HashMap<String, Duration>,
    aborted: bool,
    in_flight: usize,
    max_in_flight: usize,
}

pub struct MockTransport {
    tree: Mutex<BTreeMap<String, Node>>,
    exec: Mutex<Exec>,
    exec_signal: Condvar,
    journal: Mutex<Vec<String>>,
    journal_signal: Condvar,
    fail_next: Mutex<Option<AppError>>,
    denied: Mutex<HashSet<String>>,
    sftp: bool,
    shell_end: Mutex<Option<ShellWorkerEnd>>,
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(i) => path[..i].to_string(),
        None => HOME.to_string(),
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn within(path: &str, root: &str) -> bool {
    path == root || (root == "/" && path.starts_with('/')) || path.starts_with(&format!("{}/", root))
}

impl MockTransport {
    pub fn new() -> Self {
        let mut tree = BTreeMap::new();
        tree.insert("/".to_string(), Node::Dir);
        tree.insert("/home".to_string(), Node::Dir);
        tree.insert(HOME.to_string(), Node::Dir);

        Self {
            tree: Mutex::new(tree),
            exec: Mutex::new(Exec::default()),
            exec_signal: Condvar::new(),
            journal: Mutex::new(Vec::new()),
            journal_signal: Condvar::new(),
            fail_next: Mutex::new(None),
            denied: Mutex::new(HashSet::new()),
            sftp: true,
            shell_end: Mutex::new(None),
        }
    }

    /// Add a directory and any missing parents
    pub fn with_dir(self, path: &str) -> Self {
        {
            let mut tree = self.tree.lock();
            let mut current = String::new();
            for part in path.split('/').filter(|p| !p.is_empty()) {
                current = format!("{}/{}", current, part);
                tree.entry(current.clone()).or_insert(Node::Dir);
            }
        }
        self
    }

    pub fn with_file(self, path: &str, content: &[u8]) -> Self {
        let this = self.with_dir(&parent_of(path));
        this.tree.lock().insert(path.to_string(), Node::File(content.to_vec()));
        this
    }

    pub fn with_symlink(self, path: &str, target: &str) -> Self {
        let this = self.with_dir(&parent_of(path));
        this.tree.lock().insert(path.to_string(), Node::Symlink(target.to_string()));
        this
    }

    pub fn on_exec(self, command: &str, output: &str, exit_status: i32) -> Self {
        self.exec
            .lock()
            .canned
            .insert(command.to_string(), (output.to_string(), exit_status));
        self
    }

    /// `command` blocks until the exec lane is closed
    pub fn blocking_exec(self, command: &str) -> Self {
        self.exec.lock().blocking.insert(command.to_string());
        self
    }

    /// `command` never finishes on its own; the exec deadline ends it with `Timeout`
    pub fn hanging_exec(self, command: &str) -> Self {
        self.exec.lock().hanging.insert(command.to_string());
        self
    }

    /// `command` takes `delay` before its canned output comes back
    pub fn slow_exec(self, command: &str, delay: Duration) -> Self {
        self.exec.lock().delayed.insert(command.to_string(), delay);
        self
    }

    /// Most exec calls seen running at the same time
    pub fn max_concurrent_exec(&self) -> usize {
        self.exec.lock().max_in_flight
    }

    pub fn without_sftp(mut self) -> Self {
        self.sftp = false;
        self
    }

    /// Deny every operation at or below `path`
    pub fn deny(&self, path: &str) {
        self.denied.lock().insert(path.to_string());
    }

    /// The next operation fails with `err`
    pub fn fail_next(&self, err: AppError) {
        *self.fail_next.lock() = Some(err);
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    pub fn wait_for_exec(&self, command: &str) {
        let expected = format!("exec:{}", command);
        let mut journal = self.journal.lock();
        while !journal.contains(&expected) {
            self.journal_signal.wait_for(&mut journal, Duration::from_millis(50));
        }
    }

    pub fn take_shell_end(&self) -> Option<ShellWorkerEnd> {
        self.shell_end.lock().take()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.tree.lock().contains_key(path)
    }

    pub fn file_content(&self, path: &str) -> Option<Vec<u8>> {
        match self.tree.lock().get(path) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    fn record(&self, entry: impl Into<String>) {
        self.journal.lock().push(entry.into());
        self.journal_signal.notify_all();
    }

    fn check(&self, path: &str) -> AppResult<()> {
        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }
        if self.denied.lock().iter().any(|root| within(path, root)) {
            return Err(ListError::PermissionDenied(path.to_string()).into());
        }
        Ok(())
    }

    fn normalize(path: &str) -> String {
        let absolute = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", HOME, path)
        };
        let mut parts: Vec<&str> = Vec::new();
        for part in absolute.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }
        format!("/{}", parts.join("/"))
    }

    fn entry(path: &str, node: &Node, tree: &BTreeMap<String, Node>) -> RemoteEntry {
        let (mode, size, is_dir, is_symlink) = match node {
            Node::Dir => (0o040755, 4096, true, false),
            Node::File(data) => (0o100644, data.len() as u64, false, false),
            Node::Symlink(target) => (
                0o120777,
                target.len() as u64,
                matches!(tree.get(target), Some(Node::Dir)),
                true,
            ),
        };
        RemoteEntry {
            filename: name_of(path).to_string(),
            path: path.to_string(),
            is_dir,
            is_symlink,
            size,
            permissions: format_permissions(mode),
            modified: 1_700_000_000,
            owner: "1000".to_string(),
        }
    }

    fn run_exec(&self, command: &str, timeout: Duration) -> AppResult<ExecOutput> {
        let mut exec = self.exec.lock();
        if exec.hanging.contains(command) {
            let deadline = exec_deadline(timeout);
            while !exec.aborted {
                match deadline {
                    Some(deadline) => {
                        if self.exec_signal.wait_until(&mut exec, deadline).timed_out() {
                            return Err(AppError::Timeout(format!("command did not finish within {:?}", timeout)));
                        }
                    }
                    None => self.exec_signal.wait(&mut exec),
                }
            }
            return Err(AppError::SessionDead);
        }
        if let Some(delay) = exec.delayed.get(command).copied() {
            drop(exec);
            std::thread::sleep(delay);
            exec = self.exec.lock();
        }
        if exec.blocking.contains(command) {
            while !exec.aborted {
                self.exec_signal.wait(&mut exec);
            }
            return Err(AppError::SessionDead);
        }
        if let Some((output, status)) = exec.canned.get(command) {
            return Ok(ExecOutput {
                output: output.as_bytes().to_vec(),
                exit_status: *status,
            });
        }
        drop(exec);

        if let Some(target) = command
            .strip_prefix("rm -rf -- '")
            .and_then(|rest| rest.strip_suffix('\''))
        {
            let target = target.replace("'\\''", "'");
            if self.denied.lock().iter().any(|root| within(&target, root)) {
                return Ok(ExecOutput {
                    output: format!("rm: cannot remove '{}': Permission denied\n", target).into_bytes(),
                    exit_status: 1,
                });
            }
            self.remove_tree(&Self::normalize(&target));
            return Ok(ExecOutput::default());
        }

        Ok(ExecOutput {
            output: format!("sh: 1: {}: not found\n", command).into_bytes(),
            exit_status: 127,
        })
    }

    fn remove_tree(&self, root: &str) -> bool {
        let mut tree = self.tree.lock();
        let doomed: Vec<String> = tree.keys().filter(|p| within(p, root)).cloned().collect();
        for path in &doomed {
            tree.remove(path);
        }
        !doomed.is_empty()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn exec(&self, command: &str, timeout: Duration) -> AppResult<ExecOutput> {
        self.check("")?;
        self.record(format!("exec:{}", command));

        {
            let mut exec = self.exec.lock();
            exec.in_flight += 1;
            exec.max_in_flight = exec.max_in_flight.max(exec.in_flight);
        }
        let result = self.run_exec(command, timeout);
        self.exec.lock().in_flight -= 1;
        result
    }

    fn has_sftp(&self) -> bool {
        self.sftp
    }

    fn read_dir(&self, path: &str) -> AppResult<Vec<RemoteEntry>> {
        let path = Self::normalize(path);
        self.check(&path)?;
        let tree = self.tree.lock();
        match tree.get(&path) {
            Some(Node::Dir) => {}
            Some(_) => return Err(AppError::Transfer(format!("{} is not a directory", path))),
            None => return Err(ListError::PathNotFound(path).into()),
        }

        let mut entries = vec![
            Self::entry(&format!("{}/.", path), &Node::Dir, &tree),
            Self::entry(&format!("{}/..", path), &Node::Dir, &tree),
        ];
        entries.extend(
            tree.iter()
                .filter(|(p, _)| p.as_str() != "/" && parent_of(p) == path)
                .map(|(p, node)| Self::entry(p, node, &tree)),
        );
        Ok(entries)
    }

    fn stat(&self, path: &str) -> AppResult<RemoteEntry> {
        let path = Self::normalize(path);
        self.check(&path)?;
        let tree = self.tree.lock();
        tree.get(&path)
            .map(|node| Self::entry(&path, node, &tree))
            .ok_or_else(|| ListError::PathNotFound(path.clone()).into())
    }

    fn realpath(&self, path: &str) -> AppResult<String> {
        let path = Self::normalize(path);
        self.check(&path)?;
        if self.tree.lock().contains_key(&path) {
            Ok(path)
        } else {
            Err(ListError::PathNotFound(path).into())
        }
    }

    fn rename(&self, from: &str, to: &str) -> AppResult<()> {
        let (from, to) = (Self::normalize(from), Self::normalize(to));
        self.check(&from)?;
        self.check(&to)?;
        let mut tree = self.tree.lock();
        if !tree.contains_key(&from) {
            return Err(ListError::PathNotFound(from).into());
        }
        if tree.contains_key(&to) {
            return Err(AppError::Transfer(format!("SFTP error 4 on {}: Failure", from)));
        }
        if !matches!(tree.get(&parent_of(&to)), Some(Node::Dir)) {
            return Err(ListError::PathNotFound(to).into());
        }

        let moved: Vec<String> = tree.keys().filter(|p| within(p, &from)).cloned().collect();
        for old in moved {
            if let Some(node) = tree.remove(&old) {
                tree.insert(format!("{}{}", to, &old[from.len()..]), node);
            }
        }
        Ok(())
    }

    fn remove_file(&self, path: &str) -> AppResult<()> {
        let path = Self::normalize(path);
        self.check(&path)?;
        let mut tree = self.tree.lock();
        match tree.get(&path) {
            Some(Node::Dir) => Err(AppError::Transfer(format!("SFTP error 4 on {}: Failure", path))),
            Some(_) => {
                tree.remove(&path);
                Ok(())
            }
            None => Err(ListError::PathNotFound(path).into()),
        }
    }

    fn create_dir(&self, path: &str, _mode: i32) -> AppResult<()> {
        let path = Self::normalize(path);
        self.check(&path)?;
        let mut tree = self.tree.lock();
        if tree.contains_key(&path) {
            return Err(AppError::Transfer(format!("SFTP error 4 on {}: Failure", path)));
        }
        if !matches!(tree.get(&parent_of(&path)), Some(Node::Dir)) {
            return Err(ListError::PathNotFound(path).into());
        }
        tree.insert(path, Node::Dir);
        Ok(())
    }

    fn read_file(&self, path: &str, sink: &mut dyn Write, chunk_size: usize) -> AppResult<u64> {
        let path = Self::normalize(path);
        self.check(&path)?;
        let data = match self.tree.lock().get(&path) {
            Some(Node::File(data)) => data.clone(),
            Some(_) => return Err(AppError::Transfer(format!("{} is not a file", path))),
            None => return Err(ListError::PathNotFound(path).into()),
        };
        for chunk in data.chunks(chunk_size.max(1)) {
            sink.write_all(chunk).map_err(|e| local_io_error(&path, e))?;
        }
        Ok(data.len() as u64)
    }

    fn write_file(&self, path: &str, source: &mut dyn Read, chunk_size: usize) -> AppResult<u64> {
        let path = Self::normalize(path);
        self.check(&path)?;
        if !matches!(self.tree.lock().get(&parent_of(&path)), Some(Node::Dir)) {
            return Err(ListError::PathNotFound(path).into());
        }

        let mut data = Vec::new();
        let mut buf = vec![0u8; chunk_size.max(1)];
        loop {
            let n = source.read(&mut buf).map_err(|e| local_io_error(&path, e))?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
        }
        let written = data.len() as u64;
        self.tree.lock().insert(path, Node::File(data));
        Ok(written)
    }

    fn open_shell(&self, _pty: &PtyRequest) -> AppResult<ShellChannel> {
        self.check("")?;
        self.record("open_shell");
        let (channel, worker) = ShellChannel::pair();
        *self.shell_end.lock() = Some(worker);
        Ok(channel)
    }

    fn close_exec(&self) {
        self.record("close_exec");
        self.exec.lock().aborted = true;
        self.exec_signal.notify_all();
    }

    fn close_sftp(&self) {
        self.record("close_sftp");
    }

    fn disconnect(&self, _reason: &str) {
        self.record("disconnect");
    }
}
