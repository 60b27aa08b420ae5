//! Spawns the worker as a child process and establishes the byte stream
//! (pipe or loopback socket) the dispatcher will frame requests over.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::process::{Child, Command};

use crate::error::{Error, Result};
use crate::options::{ConnectOptions, TransportMode};

pub type BoxedRead = Box<dyn AsyncRead + Unpin + Send>;
pub type BoxedWrite = Box<dyn AsyncWrite + Unpin + Send>;

/// A live worker process plus its established byte stream.
pub struct Transport {
    pub read: BoxedRead,
    pub write: BoxedWrite,
    pub child: Child,
}

pub async fn spawn(options: &ConnectOptions) -> Result<Transport> {
    match options.transport.resolve() {
        TransportMode::Pipe => spawn_pipe(options).await,
        TransportMode::Socket => spawn_socket(options).await,
        TransportMode::Auto => unreachable!("resolve() never returns Auto"),
    }
}

async fn spawn_pipe(options: &ConnectOptions) -> Result<Transport> {
    let mut cmd = base_command(&options.worker_path);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::inherit());

    let mut child = cmd.spawn()?;
    let stdin = child.stdin.take().expect("stdin was piped");
    let stdout = child.stdout.take().expect("stdout was piped");

    Ok(Transport {
        read: Box::new(stdout),
        write: Box::new(stdin),
        child,
    })
}

/// Used when process pipes are not a reliable non-blocking transport on the
/// host, or when a caller explicitly selects `TransportMode::Socket`.
async fn spawn_socket(options: &ConnectOptions) -> Result<Transport> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let port = listener.local_addr()?.port();

    let mut cmd = base_command(&options.worker_path);
    cmd.arg(format!("127.0.0.1:{port}"));
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::inherit());

    let child = cmd.spawn()?;
    // Killed on drop unless `defuse` runs -- covers both the explicit timeout
    // below and a caller dropping the `open` future mid-handshake, so a
    // pending open is always cancellable.
    let mut guard = KillOnDrop(Some(child));

    let accept = listener.accept();
    let accepted = tokio::time::timeout(options.handshake_timeout, accept).await;
    // The listener is only needed to accept this one connection; drop it
    // either way so nothing else can bind to or race for the port.
    drop(listener);

    let stream = match accepted {
        Ok(Ok((stream, _peer))) => stream,
        Ok(Err(err)) => return Err(err.into()),
        Err(_elapsed) => return Err(Error::Cancelled),
    };
    stream.set_nodelay(true).ok();

    let child = guard.0.take().expect("guard still holds the child");
    let (read, write) = stream.into_split();
    Ok(Transport {
        read: Box::new(read),
        write: Box::new(write),
        child,
    })
}

fn base_command(worker_path: &Path) -> Command {
    let mut cmd = Command::new(worker_path);
    sanitize_descriptors(&mut cmd);
    cmd
}

/// Closes every inherited file descriptor above stderr before the child
/// execs, so it never inherits pipes or sockets this process happened to
/// have open. `pre_exec` gives a closure that runs in the forked child
/// right before exec, so this can close them directly -- no shell wrapper
/// needed.
#[cfg(unix)]
fn sanitize_descriptors(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;

    unsafe {
        cmd.pre_exec(|| {
            close_fds_above(2);
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn sanitize_descriptors(_cmd: &mut Command) {}

#[cfg(unix)]
fn close_fds_above(keep_below: i32) {
    // Prefer enumerating the actual open set via /dev/fd (BSD/macOS) or
    // /proc/self/fd (Linux); only fall back to a blind probe if neither
    // pseudo-filesystem is mounted.
    for dir in ["/dev/fd", "/proc/self/fd"] {
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                if let Some(fd) = entry
                    .file_name()
                    .to_str()
                    .and_then(|s| s.parse::<i32>().ok())
                {
                    if fd > keep_below {
                        unsafe {
                            libc::close(fd);
                        }
                    }
                }
            }
            return;
        }
    }
    for fd in (keep_below + 1)..1024 {
        unsafe {
            libc::close(fd);
        }
    }
}

struct KillOnDrop(Option<Child>);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        if let Some(child) = &mut self.0 {
            let _ = child.start_kill();
        }
    }
}
