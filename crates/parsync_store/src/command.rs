//! Store sessions backed by the `p4` command-line client.
//!
//! Every request runs the client executable with the session's server, user
//! and workspace on the command line. `open` logs in with `login -p`, which
//! prints a ticket instead of writing it to the user's ticket file; the
//! ticket is handed to every later call through `P4PASSWD` in the child's
//! environment, never on its command line.
//!
//! A ticket belongs to the user on this host, so every session of a run
//! holds the same one. Closing a session therefore only forgets the ticket
//! locally; logging out would revoke it for all sibling sessions.
//!
//! Structured output is requested with the global `-ztag` flag, which emits
//! one `... key value` line per field and separates records with blank lines.

use crate::config::ConnectionConfig;
use crate::error::{StoreError, StoreResult};
use crate::file_spec::FileSpec;
use crate::session::{Session, SessionFactory};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::debug;

/// Environment variable the client reads its password or ticket from.
const PASSWORD_VAR: &str = "P4PASSWD";

/// Default client executable.
pub const DEFAULT_PROGRAM: &str = "p4";

/// Factory for sessions driven by the `p4` command-line client.
#[derive(Debug, Clone)]
pub struct CommandStore {
    program: PathBuf,
}

impl CommandStore {
    /// Creates a store that runs `p4` from `PATH`.
    pub fn new() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
        }
    }

    /// Uses a specific client executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Returns the client executable.
    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Default for CommandStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFactory for CommandStore {
    type Session = CommandSession;

    fn open(&self, config: &ConnectionConfig) -> StoreResult<CommandSession> {
        let mut session = CommandSession {
            program: self.program.clone(),
            server: config.server.clone(),
            user: config.user.clone(),
            workspace: config.workspace.clone(),
            ticket: None,
            open: true,
        };

        let mut password = config.credential.expose().to_string();
        password.push('\n');
        let output = session.run(&["login", "-p"], Some(&password))?;
        if !output.status.success() {
            return Err(session.classify_failure(&output, None));
        }

        let ticket = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| line.trim_start_matches("Enter password:").trim())
            .filter(|line| !line.is_empty())
            .last()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Parse("login printed no ticket".into()))?;
        session.ticket = Some(ticket);

        debug!(server = %session.server, workspace = %session.workspace, "session opened");
        Ok(session)
    }
}

/// A session that shells out to the `p4` client for every request.
#[derive(Debug)]
pub struct CommandSession {
    program: PathBuf,
    server: String,
    user: String,
    workspace: String,
    ticket: Option<String>,
    open: bool,
}

impl CommandSession {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-p")
            .arg(&self.server)
            .arg("-u")
            .arg(&self.user)
            .arg("-c")
            .arg(&self.workspace);
        match &self.ticket {
            Some(ticket) => cmd.env(PASSWORD_VAR, ticket),
            None => cmd.env_remove(PASSWORD_VAR),
        };
        cmd
    }

    fn run(&self, args: &[&str], stdin: Option<&str>) -> StoreResult<Output> {
        if !self.open {
            return Err(StoreError::Closed);
        }

        let mut cmd = self.command();
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let spawn_error = |source| StoreError::Command {
            program: self.program.display().to_string(),
            source,
        };

        let mut child = cmd.spawn().map_err(spawn_error)?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            // A client that exits before reading (unreachable server) closes
            // the pipe; its own output explains why.
            match pipe.write_all(input.as_bytes()) {
                Err(e) if e.kind() != ErrorKind::BrokenPipe => return Err(spawn_error(e)),
                _ => {}
            }
        }
        child.wait_with_output().map_err(spawn_error)
    }

    /// Maps a failed invocation to the error it most likely represents.
    fn classify_failure(&self, output: &Output, path: Option<&str>) -> StoreError {
        let message = failure_message(output);
        let lowered = message.to_ascii_lowercase();

        if CONNECT_MARKERS.iter().any(|m| lowered.contains(m)) {
            StoreError::connect(&self.server, message)
        } else if AUTH_MARKERS.iter().any(|m| lowered.contains(m)) {
            StoreError::auth(&self.user, message)
        } else if let Some(path) = path {
            StoreError::sync(path, message)
        } else {
            StoreError::Query(message)
        }
    }
}

const CONNECT_MARKERS: &[&str] = &[
    "connect to server failed",
    "tcp connect to",
    "check $p4port",
    "connection refused",
    "name or service not known",
];

const AUTH_MARKERS: &[&str] = &[
    "password invalid",
    "p4passwd",
    "session has expired",
    "please login again",
    "doesn't exist",
];

fn failure_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stdout = stdout.trim();
    if stdout.is_empty() {
        format!("client exited with {}", output.status)
    } else {
        stdout.to_string()
    }
}

impl Session for CommandSession {
    fn workspace(&self) -> &str {
        &self.workspace
    }

    fn preview(&mut self) -> StoreResult<Vec<FileSpec>> {
        let output = self.run(&["-ztag", "sync", "-n"], None)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() && !is_up_to_date(&stderr) {
            return Err(self.classify_failure(&output, None));
        }

        parse_tagged(&stdout)
            .iter()
            .map(TaggedRecord::to_file_spec)
            .collect()
    }

    fn sync_file(&mut self, file: &FileSpec, force: bool) -> StoreResult<()> {
        let target = file.revision_spec();
        let mut args = vec!["sync"];
        if force {
            args.push("-f");
        }
        args.push(&target);

        let output = self.run(&args, None)?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if (output.status.success() && !stderr.contains("error:")) || is_up_to_date(&stderr) {
            Ok(())
        } else {
            Err(self.classify_failure(&output, Some(file.depot_path())))
        }
    }

    fn server_version(&mut self) -> StoreResult<Option<String>> {
        let output = self.run(&["-ztag", "info"], None)?;
        if !output.status.success() {
            return Err(self.classify_failure(&output, None));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_tagged(&stdout)
            .into_iter()
            .find_map(|record| record.get("serverVersion").map(str::to_string)))
    }

    fn close(&mut self) -> StoreResult<()> {
        if !self.open {
            return Err(StoreError::Closed);
        }
        self.open = false;
        self.ticket = None;
        debug!(server = %self.server, workspace = %self.workspace, "session closed");
        Ok(())
    }
}

fn is_up_to_date(stderr: &str) -> bool {
    stderr.to_ascii_lowercase().contains("up-to-date")
}

/// One record of `-ztag` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaggedRecord {
    fields: Vec<(String, String)>,
}

impl TaggedRecord {
    /// Returns the value of `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn to_file_spec(&self) -> StoreResult<FileSpec> {
        let field = |key: &str| {
            self.get(key)
                .ok_or_else(|| StoreError::Parse(format!("sync record without {}", key)))
        };
        let revision = field("rev")?
            .parse::<u32>()
            .map_err(|e| StoreError::Parse(format!("bad revision: {}", e)))?;
        Ok(FileSpec::new(field("depotFile")?, field("clientFile")?, revision))
    }
}

/// Splits `-ztag` output into records.
///
/// A record ends at a blank line, or when a key that the current record
/// already holds appears again. Lines that are not tagged are ignored.
pub fn parse_tagged(output: &str) -> Vec<TaggedRecord> {
    let mut records = Vec::new();
    let mut current = TaggedRecord::default();

    for line in output.lines() {
        let Some(tagged) = line.strip_prefix("... ") else {
            if line.trim().is_empty() && !current.fields.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            continue;
        };

        let (key, value) = tagged.split_once(' ').unwrap_or((tagged, ""));
        if current.contains(key) {
            records.push(std::mem::take(&mut current));
        }
        current.fields.push((key.to_string(), value.to_string()));
    }

    if !current.fields.is_empty() {
        records.push(current);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREVIEW: &str = "\
... depotFile //depot/main/a.c
... clientFile /ws/main/a.c
... rev 4
... action updated
... fileSize 120

... depotFile //depot/main/b.c
... clientFile /ws/main/b.c
... rev 1
... action added
";

    #[test]
    fn parses_preview_records_in_order() {
        let records = parse_tagged(PREVIEW);
        assert_eq!(records.len(), 2);

        let files: Vec<_> = records
            .iter()
            .map(|r| r.to_file_spec().unwrap())
            .collect();
        assert_eq!(files[0], FileSpec::new("//depot/main/a.c", "/ws/main/a.c", 4));
        assert_eq!(files[1].revision(), 1);
    }

    #[test]
    fn repeated_key_starts_new_record() {
        let records = parse_tagged("... depotFile //a\n... rev 1\n... depotFile //b\n... rev 2\n");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("depotFile"), Some("//b"));
    }

    #[test]
    fn record_missing_fields_is_a_parse_error() {
        let records = parse_tagged("... depotFile //a\n... rev x\n");
        assert!(matches!(records[0].to_file_spec(), Err(StoreError::Parse(_))));
    }

    #[test]
    fn up_to_date_detection() {
        assert!(is_up_to_date("File(s) up-to-date.\n"));
        assert!(!is_up_to_date("//depot/a.c - no such file(s).\n"));
    }

    #[cfg(unix)]
    mod fake_client {
        use super::super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        /// Writes a shell script that answers like a small p4 server.
        ///
        /// Like a real server it keeps one ticket per user on the host:
        /// `login` hands out the stored ticket, `logout` deletes it, and
        /// every other command must present it through `P4PASSWD`. Each
        /// invocation's arguments are appended to `args` in the same
        /// directory.
        fn fake_p4(dir: &TempDir) -> PathBuf {
            let path = dir.path().join("p4");
            let script = r##"#!/bin/sh
state="__STATE__"
echo "$@" >> "$state/args"
server=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-p" ] && [ -z "$server" ]; then server="$arg"; fi
  prev="$arg"
done
if [ "$server" = "down:1666" ]; then
  echo "Perforce client error:" >&2
  echo "Connect to server failed; check \$P4PORT." >&2
  exit 1
fi
for arg in "$@"; do
  case "$arg" in
    login)
      read pw
      if [ "$pw" != "secret" ]; then echo "Password invalid." >&2; exit 1; fi
      [ -f "$state/ticket" ] || echo "TICKET123" > "$state/ticket"
      echo "Enter password:"
      cat "$state/ticket"
      exit 0 ;;
    logout)
      rm -f "$state/ticket"; exit 0 ;;
  esac
done
if [ ! -f "$state/ticket" ] || [ "$P4PASSWD" != "$(cat "$state/ticket")" ]; then
  echo "Your session has expired, please login again." >&2
  exit 1
fi
for arg in "$@"; do
  case "$arg" in
    info)
      echo "... serverVersion P4D/LINUX26X86_64/2023.1/2468153"; exit 0 ;;
    -n)
      echo "... depotFile //depot/a.c"
      echo "... clientFile /ws/a.c"
      echo "... rev 3"
      echo ""
      exit 0 ;;
    //depot/bad.c#1)
      echo "//depot/bad.c#1 - no such file(s)." >&2; exit 1 ;;
  esac
done
exit 0
"##
            .replace("__STATE__", &dir.path().display().to_string());
            fs::write(&path, script).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn config(password: &str) -> ConnectionConfig {
            ConnectionConfig::new("fake:1666", "alice", password, "ws")
        }

        #[test]
        fn session_round_trip_through_client() {
            let dir = TempDir::new().unwrap();
            let store = CommandStore::new().with_program(fake_p4(&dir));

            let mut session = store.open(&config("secret")).unwrap();
            assert_eq!(session.ticket.as_deref(), Some("TICKET123"));

            let files = session.preview().unwrap();
            assert_eq!(files, vec![FileSpec::new("//depot/a.c", "/ws/a.c", 3)]);

            session.sync_file(&files[0], true).unwrap();
            let bad = FileSpec::new("//depot/bad.c", "/ws/bad.c", 1);
            assert!(matches!(session.sync_file(&bad, true), Err(StoreError::Sync { .. })));

            let version = session.server_version().unwrap();
            assert!(version.unwrap().starts_with("P4D/"));

            session.close().unwrap();
            assert!(matches!(session.preview(), Err(StoreError::Closed)));
        }

        #[test]
        fn closing_one_session_keeps_siblings_logged_in() {
            let dir = TempDir::new().unwrap();
            let store = CommandStore::new().with_program(fake_p4(&dir));

            let mut first = store.open(&config("secret")).unwrap();
            let mut second = store.open(&config("secret")).unwrap();
            let file = FileSpec::new("//depot/a.c", "/ws/a.c", 3);

            first.sync_file(&file, true).unwrap();
            first.close().unwrap();

            second.sync_file(&file, true).unwrap();
            assert_eq!(second.preview().unwrap().len(), 1);
            second.close().unwrap();

            let calls = fs::read_to_string(dir.path().join("args")).unwrap();
            assert!(!calls.contains("logout"));
        }

        #[test]
        fn ticket_is_not_on_the_command_line() {
            let dir = TempDir::new().unwrap();
            let store = CommandStore::new().with_program(fake_p4(&dir));

            let mut session = store.open(&config("secret")).unwrap();
            session.preview().unwrap();
            session.sync_file(&FileSpec::new("//depot/a.c", "/ws/a.c", 3), false).unwrap();

            let calls = fs::read_to_string(dir.path().join("args")).unwrap();
            assert_eq!(calls.lines().count(), 3);
            assert!(!calls.contains("TICKET123"));
            assert!(!calls.contains("secret"));
        }

        #[test]
        fn revoked_ticket_is_a_fatal_auth_error() {
            let dir = TempDir::new().unwrap();
            let store = CommandStore::new().with_program(fake_p4(&dir));

            let mut session = store.open(&config("secret")).unwrap();
            fs::remove_file(dir.path().join("ticket")).unwrap();

            let err = session
                .sync_file(&FileSpec::new("//depot/a.c", "/ws/a.c", 3), true)
                .unwrap_err();
            assert!(matches!(err, StoreError::Auth { .. }));
            assert!(err.is_fatal());
        }

        #[test]
        fn bad_password_is_an_auth_error() {
            let dir = TempDir::new().unwrap();
            let store = CommandStore::new().with_program(fake_p4(&dir));
            assert!(matches!(store.open(&config("nope")), Err(StoreError::Auth { .. })));
        }

        #[test]
        fn unreachable_server_during_login_is_a_connect_error() {
            let dir = TempDir::new().unwrap();
            let store = CommandStore::new().with_program(fake_p4(&dir));

            // The client exits without reading the password from stdin.
            let config = ConnectionConfig::new("down:1666", "alice", "secret", "ws");
            assert!(matches!(store.open(&config), Err(StoreError::Connect { .. })));
        }

        #[test]
        fn missing_program_is_a_command_error() {
            let store = CommandStore::new().with_program("/nonexistent/p4");
            let err = store.open(&config("secret")).unwrap_err();
            assert!(matches!(err, StoreError::Command { .. }));
            assert!(err.is_fatal());
        }
    }
}
