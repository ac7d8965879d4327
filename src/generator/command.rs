use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use futures::channel::oneshot;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use serde::Serialize;

use super::{GenerationRequest, GeneratorError, GeneratorResult, ImageGenerator};

const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(24);
/// Minimum time left to drain the pipes once the child has exited.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, Serialize)]
struct Turn {
    role: Role,
    text: String,
}

/// Delegates generation to an external program.
///
/// Image requests get the source payload on stdin and
/// `--kind <kind> --instruction <text> [--x <n> --y <n>]` appended to the
/// configured argv; the program writes the new image to stdout. Chat requests
/// get `--chat` and the JSON conversation on stdin and reply with plain text.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    argv: Vec<String>,
    timeout: Duration,
    conversation: Arc<Mutex<Vec<Turn>>>,
}

struct Invocation {
    program: String,
    args: Vec<String>,
    stdin: Vec<u8>,
    timeout: Duration,
}

impl CommandGenerator {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self {
            argv,
            timeout,
            conversation: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn invocation(&self, extra_args: Vec<String>, stdin: Vec<u8>) -> GeneratorResult<Invocation> {
        let (program, base_args) = self
            .argv
            .split_first()
            .ok_or(GeneratorError::NotConfigured)?;
        let mut args = base_args.to_vec();
        args.extend(extra_args);
        Ok(Invocation {
            program: program.clone(),
            args,
            stdin,
            timeout: self.timeout,
        })
    }

    fn conversation(&self) -> std::sync::MutexGuard<'_, Vec<Turn>> {
        // A poisoned lock only means a worker panicked mid-push; the turns are still usable.
        self.conversation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn image_args(request: &GenerationRequest) -> Vec<String> {
    let mut args = vec![
        "--kind".to_string(),
        request.kind.label().to_string(),
        "--instruction".to_string(),
        request.instruction.clone(),
    ];
    if let Some(hotspot) = request.hotspot {
        args.extend([
            "--x".to_string(),
            hotspot.x.to_string(),
            "--y".to_string(),
            hotspot.y.to_string(),
        ]);
    }
    args
}

/// Runs the invocation on a worker thread and resolves once it exits.
fn spawn_invocation(invocation: Invocation) -> LocalBoxFuture<'static, GeneratorResult<Vec<u8>>> {
    let (tx, rx) = oneshot::channel();
    thread::spawn(move || {
        let _ = tx.send(run_invocation(invocation));
    });
    async move { rx.await.map_err(|_| GeneratorError::WorkerGone)? }.boxed_local()
}

fn run_invocation(invocation: Invocation) -> GeneratorResult<Vec<u8>> {
    let Invocation {
        program,
        args,
        stdin,
        timeout,
    } = invocation;
    tracing::debug!(%program, ?args, bytes = stdin.len(), "spawning generator");

    let mut child = Command::new(&program)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| GeneratorError::CommandIo {
            command: program.clone(),
            source: err,
        })?;

    let deadline = Instant::now() + timeout;
    let timed_out = || GeneratorError::Timeout { after: timeout };
    let writer = child.stdin.take().map(|pipe| spawn_writer(pipe, stdin));
    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let status = wait_until(&mut child, deadline).map_err(|err| match err {
        WaitError::Io(source) => GeneratorError::CommandIo {
            command: program.clone(),
            source,
        },
        WaitError::TimedOut => timed_out(),
    })?;

    // A forked grandchild can keep the pipes open past the child's exit. Pipe
    // threads still running at the deadline are left to end with the pipe.
    let drain_deadline = deadline.max(Instant::now() + PIPE_DRAIN_GRACE);
    let drain = |rx| collect(rx, drain_deadline).map_err(|_| timed_out());
    drain(writer)?;
    let stdout = drain(stdout)?;
    let stderr = drain(stderr)?;

    if !status.success() {
        return Err(GeneratorError::CommandFailed {
            status: status.to_string(),
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
        });
    }
    if stdout.is_empty() {
        return Err(GeneratorError::EmptyResponse);
    }
    Ok(stdout)
}

enum WaitError {
    Io(std::io::Error),
    TimedOut,
}

fn wait_until(child: &mut Child, deadline: Instant) -> Result<ExitStatus, WaitError> {
    loop {
        if let Some(status) = child.try_wait().map_err(WaitError::Io)? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(WaitError::TimedOut);
        }
        thread::sleep(CHILD_POLL_INTERVAL);
    }
}

/// Writes `bytes` to stdin and closes it. Resolves to an empty buffer.
fn spawn_writer<W: Write + Send + 'static>(mut pipe: W, bytes: Vec<u8>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The program may exit without draining stdin; its exit status reports that.
        let _ = pipe.write_all(&bytes);
        drop(pipe);
        let _ = tx.send(Vec::new());
    });
    rx
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut bytes = Vec::new();
        let _ = pipe.read_to_end(&mut bytes);
        let _ = tx.send(bytes);
    });
    rx
}

/// Waits for a pipe thread's result until `deadline`.
fn collect(rx: Option<mpsc::Receiver<Vec<u8>>>, deadline: Instant) -> Result<Vec<u8>, WaitError> {
    let Some(rx) = rx else {
        return Ok(Vec::new());
    };
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(bytes) => Ok(bytes),
        Err(RecvTimeoutError::Disconnected) => Ok(Vec::new()),
        Err(RecvTimeoutError::Timeout) => Err(WaitError::TimedOut),
    }
}

impl ImageGenerator for CommandGenerator {
    fn generate(&self, request: GenerationRequest) -> LocalBoxFuture<'_, GeneratorResult<Vec<u8>>> {
        let invocation = self.invocation(image_args(&request), request.source.to_vec());
        tracing::info!(kind = %request.kind, "requesting generated image");
        match invocation {
            Ok(invocation) => spawn_invocation(invocation),
            Err(err) => futures::future::ready(Err(err)).boxed_local(),
        }
    }

    fn chat(&self, message: String) -> LocalBoxFuture<'_, GeneratorResult<String>> {
        let prepared = {
            let mut conversation = self.conversation();
            conversation.push(Turn {
                role: Role::User,
                text: message,
            });
            serde_json::to_vec(&*conversation)
                .map_err(GeneratorError::from)
                .and_then(|stdin| self.invocation(vec!["--chat".to_string()], stdin))
        };

        async move {
            let reply = match prepared {
                Ok(invocation) => spawn_invocation(invocation).await,
                Err(err) => Err(err),
            }
            .and_then(|bytes| Ok(String::from_utf8(bytes)?.trim().to_string()));

            let mut conversation = self.conversation();
            match reply {
                Ok(text) => {
                    conversation.push(Turn {
                        role: Role::Model,
                        text: text.clone(),
                    });
                    Ok(text)
                }
                Err(err) => {
                    // Keep the conversation alternating for the next attempt.
                    conversation.pop();
                    Err(err)
                }
            }
        }
        .boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::GenerativeKind;
    use crate::geometry::NaturalPoint;
    use futures::executor::block_on;

    fn request(hotspot: Option<NaturalPoint>) -> GenerationRequest {
        GenerationRequest {
            kind: GenerativeKind::Retouch,
            source: Arc::from(&b"source-bytes"[..]),
            instruction: "remove mark".to_string(),
            hotspot,
        }
    }

    fn sh(script: &str) -> CommandGenerator {
        CommandGenerator::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string(), "gen".to_string()],
            Duration::from_secs(10),
        )
    }

    #[test]
    fn image_args_include_hotspot_only_when_present() {
        assert_eq!(
            image_args(&request(None)),
            ["--kind", "retouch", "--instruction", "remove mark"]
        );
        assert_eq!(
            image_args(&request(Some(NaturalPoint::new(50, 100)))),
            ["--kind", "retouch", "--instruction", "remove mark", "--x", "50", "--y", "100"]
        );
    }

    #[test]
    fn unconfigured_generator_fails_without_spawning() {
        let generator = CommandGenerator::new(Vec::new(), Duration::from_secs(1));
        let err = block_on(generator.generate(request(None))).expect_err("should fail");
        assert!(matches!(err, GeneratorError::NotConfigured));
    }

    #[cfg(unix)]
    #[test]
    fn generate_pipes_source_through_the_program() {
        let generator = sh("cat");
        let output = block_on(generator.generate(request(None))).expect("cat should succeed");
        assert_eq!(output, b"source-bytes");
    }

    #[cfg(unix)]
    #[test]
    fn generate_reports_exit_status_and_stderr() {
        let generator = sh("echo 'quota exceeded' >&2; exit 3");
        let err = block_on(generator.generate(request(None))).expect_err("should fail");
        match err {
            GeneratorError::CommandFailed { stderr, .. } => assert_eq!(stderr, "quota exceeded"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn generate_times_out_slow_programs() {
        let generator = CommandGenerator::new(
            vec!["sh".to_string(), "-c".to_string(), "sleep 5".to_string()],
            Duration::from_millis(100),
        );
        let err = block_on(generator.generate(request(None))).expect_err("should time out");
        assert!(matches!(err, GeneratorError::Timeout { .. }));
        assert_eq!(err.to_string(), "generator timed out after 100ms");
    }

    #[cfg(unix)]
    #[test]
    fn forked_program_holding_stdout_cannot_outlast_the_timeout() {
        let generator = CommandGenerator::new(
            vec!["sh".to_string(), "-c".to_string(), "sleep 5 & printf out".to_string()],
            Duration::from_millis(300),
        );
        let started = Instant::now();
        let err = block_on(generator.generate(request(None))).expect_err("should time out");
        assert!(matches!(
            err,
            GeneratorError::Timeout { after } if after == Duration::from_millis(300)
        ));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn chat_sends_the_whole_conversation_and_drops_failed_turns() {
        // Replies with the number of user turns it has seen.
        let generator = sh("grep -o '\"role\":\"user\"' | wc -l | tr -d ' '");
        let first = block_on(generator.chat("hello".to_string())).expect("first chat");
        assert_eq!(first, "1");
        let second = block_on(generator.chat("again".to_string())).expect("second chat");
        assert_eq!(second, "2");

        let failing = CommandGenerator {
            argv: vec!["sh".to_string(), "-c".to_string(), "exit 1".to_string()],
            ..generator.clone()
        };
        block_on(failing.chat("lost".to_string())).expect_err("should fail");
        assert_eq!(generator.conversation().len(), 4);
    }
}
